// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use prism_core::FrameStats;
use prism_platform::{EventHub, InputKind, IoInput, Key, KeyAction};
use prism_render::{FrameBackend, FrameOrchestrator, FrameOutcome};
use prism_scene::{CameraRegistry, Scene, SceneClock};
use tracing::info;

use crate::config::AppCfg;

/// Everything a tick mutates apart from the GPU side: the scene, its playback
/// clock and the cameras. Input handlers receive it at dispatch time.
pub struct Session {
    pub scene: Scene,
    pub clock: SceneClock,
    pub cameras: CameraRegistry,
    exit_requested: bool,
}

impl Session {
    /// `camera` names the initially active camera; an unknown name is fatal.
    pub fn new(scene: Scene, cfg: &AppCfg, aspect: f32, camera: Option<&str>) -> Result<Self> {
        let mut clock = SceneClock::new(scene.loop_period());
        clock.set_playing(cfg.playback.playing);
        clock.set_looping(cfg.playback.looping);

        let mut cameras = CameraRegistry::new(aspect, cfg.camera.controls());
        cameras.register_scene_cameras(&scene.graph, &scene.cameras);
        if let Some(name) = camera {
            cameras
                .set_active(name)
                .with_context(|| format!("--camera {name}"))?;
        }
        info!(
            "cameras: {} (active {:?})",
            cameras.names().collect::<Vec<_>>().join(", "),
            cameras.active_name()
        );

        Ok(Self {
            scene,
            clock,
            cameras,
            exit_requested: false,
        })
    }

    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Clock, then drivers at the new time, then camera motion.
    pub fn update(&mut self, delta: f32) {
        self.clock.tick(delta);
        self.scene.animate(self.clock.time());
        self.cameras.update(delta);
    }
}

/// Playback keys first, then every input kind is forwarded to the cameras.
pub fn install_handlers(hub: &mut EventHub<Session>) {
    hub.register(InputKind::Keyboard, |s: &mut Session, input: &IoInput| {
        let IoInput::Key {
            key,
            action: KeyAction::Press,
            ..
        } = *input
        else {
            return;
        };
        match key {
            Key::Space => s.clock.toggle_playing(),
            Key::L => s.clock.toggle_looping(),
            Key::Escape => s.request_exit(),
            _ => {}
        }
    });
    for kind in [
        InputKind::Keyboard,
        InputKind::MouseButton,
        InputKind::MouseMove,
        InputKind::MouseScroll,
    ] {
        hub.register(kind, |s: &mut Session, input: &IoInput| {
            s.cameras.handle_input(input)
        });
    }
}

/// Advances the scene by `delta` and renders one frame, timing the CPU side
/// when `stats` is set.
pub fn step<B: FrameBackend>(
    session: &mut Session,
    orchestrator: &mut FrameOrchestrator<B>,
    stats: Option<&mut FrameStats>,
    delta: f32,
) -> Result<FrameOutcome> {
    let started = Instant::now();
    session.update(delta);
    let outcome = orchestrator.advance_frame(&session.scene, &session.cameras)?;
    if let (Some(stats), FrameOutcome::Submitted { .. }) = (stats, outcome) {
        stats.record(started.elapsed());
    }
    Ok(outcome)
}

/// One-second window, as `--measure` reports.
pub fn measure_window() -> Duration {
    Duration::from_secs(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_platform::Modifiers;
    use prism_scene::USER_CAMERA;
    use std::path::Path;

    const SCENE: &str = r#"[
        "s72-v1",
        { "type": "SCENE", "name": "s", "roots": [2] },
        { "type": "NODE", "name": "rig", "camera": 3 },
        { "type": "CAMERA", "name": "main",
          "perspective": { "aspect": 1.5, "vfov": 1.0, "near": 0.1, "far": 100 } },
        { "type": "DRIVER", "name": "slide", "node": 2, "channel": "translation",
          "times": [0, 2], "values": [0, 0, 0, 4, 0, 0], "interpolation": "LINEAR" }
    ]"#;

    fn session(camera: Option<&str>) -> Result<Session> {
        let scene = Scene::from_s72(SCENE, Path::new("."))?;
        Session::new(scene, &AppCfg::default(), 16.0 / 9.0, camera)
    }

    fn press(key: Key) -> IoInput {
        IoInput::Key {
            key,
            action: KeyAction::Press,
            mods: Modifiers::empty(),
        }
    }

    #[test]
    fn scene_cameras_are_selectable_by_name() {
        let s = session(Some("main")).unwrap();
        assert_eq!(s.cameras.active_name(), "main");
        assert_eq!(session(None).unwrap().cameras.active_name(), USER_CAMERA);
    }

    #[test]
    fn unknown_camera_is_fatal() {
        let err = session(Some("nope")).err().expect("must fail");
        assert!(format!("{err:#}").contains("nope"));
    }

    #[test]
    fn update_drives_nodes_from_the_clock() {
        let mut s = session(None).unwrap();
        s.update(1.0);
        let t = s.scene.graph.nodes()[0].transform.translation;
        assert!((t.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn playback_keys_reach_the_clock() {
        let mut s = session(None).unwrap();
        let mut hub = EventHub::new();
        install_handlers(&mut hub);

        hub.push(press(Key::Space));
        hub.push(press(Key::L));
        hub.dispatch(&mut s);
        assert!(!s.clock.is_playing());
        assert!(!s.clock.is_looping());
        assert!(!s.exit_requested());

        let before = s.clock.time();
        s.update(0.5);
        assert_eq!(s.clock.time(), before);

        hub.push(press(Key::Escape));
        hub.dispatch(&mut s);
        assert!(s.exit_requested());
    }

    #[test]
    fn tab_is_forwarded_to_the_cameras() {
        let mut s = session(None).unwrap();
        let mut hub = EventHub::new();
        install_handlers(&mut hub);
        hub.push(press(Key::Tab));
        hub.dispatch(&mut s);
        assert_eq!(s.cameras.active_name(), "main");
    }
}
