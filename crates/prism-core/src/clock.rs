// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};
use tracing::info;

/// One application tick as seen by the scene clock and the headless timeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    /// Seconds since the previous tick.
    pub delta: f32,
    /// Microseconds since the stopwatch started. Headless events are keyed on this.
    pub elapsed_us: u64,
}

/// Monotonic tick source shared by the interactive and the scripted loop.
pub struct Stopwatch {
    start: Instant,
    last: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
        }
    }

    pub fn tick(&mut self) -> Tick {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Tick {
        let delta = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        Tick {
            delta,
            elapsed_us: now.saturating_duration_since(self.start).as_micros() as u64,
        }
    }
}

/// Rolling frame-time meter for `--measure`; logs once per window.
pub struct FrameStats {
    window: Duration,
    window_start: Instant,
    frames: u32,
    busy: Duration,
}

impl FrameStats {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
            busy: Duration::ZERO,
        }
    }

    /// Records one rendered frame that took `frame_time` of CPU wall time.
    /// Returns the average frame time in milliseconds when a window closes.
    pub fn record(&mut self, frame_time: Duration) -> Option<f64> {
        self.frames = self.frames.saturating_add(1);
        self.busy += frame_time;

        if self.window_start.elapsed() < self.window {
            return None;
        }

        let avg_ms = self.busy.as_secs_f64() * 1000.0 / f64::from(self.frames.max(1));
        info!("frame time ~ {:.3} ms ({} frames)", avg_ms, self.frames);
        self.frames = 0;
        self.busy = Duration::ZERO;
        self.window_start = Instant::now();
        Some(avg_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_reports_delta_and_elapsed() {
        let mut sw = Stopwatch::start();
        let t0 = sw.start;
        let a = sw.tick_at(t0 + Duration::from_millis(16));
        assert!((a.delta - 0.016).abs() < 1e-6);
        assert_eq!(a.elapsed_us, 16_000);

        let b = sw.tick_at(t0 + Duration::from_millis(40));
        assert!((b.delta - 0.024).abs() < 1e-6);
        assert_eq!(b.elapsed_us, 40_000);
    }

    #[test]
    fn frame_stats_waits_for_window() {
        let mut stats = FrameStats::new(Duration::from_secs(3600));
        assert!(stats.record(Duration::from_millis(5)).is_none());

        let mut stats = FrameStats::new(Duration::ZERO);
        let avg = stats.record(Duration::from_millis(4)).unwrap();
        assert!((avg - 4.0).abs() < 1e-9);
    }
}
