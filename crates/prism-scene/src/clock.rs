// SPDX-License-Identifier: CEPL-1.0
use tracing::info;

/// Playback state for scene animation. Wall-clock and scripted runs feed it the
/// same way: a delta per tick plus the occasional `set_playback`.
#[derive(Clone, Debug)]
pub struct SceneClock {
    elapsed: f32,
    rate: f32,
    playing: bool,
    looping: bool,
    loop_period: f32,
}

impl SceneClock {
    /// `loop_period` is the largest last-keyframe time across all drivers.
    pub fn new(loop_period: f32) -> Self {
        Self {
            elapsed: 0.0,
            rate: 1.0,
            playing: true,
            looping: true,
            loop_period,
        }
    }

    /// Advances by `delta * rate` while playing. Paused clocks keep their time so
    /// drivers re-evaluate at the frozen instant.
    pub fn tick(&mut self, delta: f32) {
        if self.playing {
            self.elapsed = self.wrap(self.elapsed + delta * self.rate);
        }
    }

    /// Time drivers are evaluated at this tick.
    pub fn time(&self) -> f32 {
        self.wrap(self.elapsed)
    }

    pub fn set_playback(&mut self, time: f32, rate: f32) {
        self.elapsed = time;
        self.rate = rate;
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn toggle_playing(&mut self) {
        self.playing = !self.playing;
        info!("playback {}", if self.playing { "resumed" } else { "paused" });
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn toggle_looping(&mut self) {
        self.looping = !self.looping;
        info!("looping {}", if self.looping { "on" } else { "off" });
    }

    pub fn loop_period(&self) -> f32 {
        self.loop_period
    }

    fn wrap(&self, t: f32) -> f32 {
        if self.looping && self.loop_period > 0.0 {
            t.rem_euclid(self.loop_period)
        } else {
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looping_wraps_by_max_keyframe_time() {
        let mut clock = SceneClock::new(2.0);
        clock.set_playback(5.0, 1.0);
        assert_eq!(clock.time(), 1.0);

        clock.tick(0.5);
        assert_eq!(clock.time(), 1.5);
        clock.tick(1.0);
        assert_eq!(clock.time(), 0.5);
    }

    #[test]
    fn pause_freezes_time_and_rate_scales() {
        let mut clock = SceneClock::new(0.0);
        clock.tick(1.0);
        assert_eq!(clock.time(), 1.0);

        clock.set_playing(false);
        clock.tick(3.0);
        assert_eq!(clock.time(), 1.0);

        clock.set_playing(true);
        clock.set_playback(0.0, 2.0);
        clock.tick(0.25);
        assert_eq!(clock.time(), 0.5);

        clock.set_playback(4.0, 0.0);
        clock.tick(10.0);
        assert_eq!(clock.time(), 4.0);
    }

    #[test]
    fn non_looping_runs_past_the_end() {
        let mut clock = SceneClock::new(2.0);
        clock.set_looping(false);
        clock.tick(3.0);
        assert_eq!(clock.time(), 3.0);
        clock.toggle_looping();
        assert_eq!(clock.time(), 1.0);
    }
}
