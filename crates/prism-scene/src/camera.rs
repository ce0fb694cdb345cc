// SPDX-License-Identifier: CEPL-1.0
use prism_math::{orbit_direction, Mat4, Perspective, Vec2, Vec3};
use prism_platform::{IoInput, Key, KeyAction, MouseButton};
use tracing::info;

use crate::error::SceneError;
use crate::graph::{NodeId, SceneGraph};

/// Name the free-fly camera is registered under.
pub const USER_CAMERA: &str = "user";

const WORLD_UP: Vec3 = Vec3::Z;

/// Camera as authored in the scene file.
#[derive(Clone, Debug)]
pub struct CameraDesc {
    pub name: String,
    pub perspective: Perspective,
}

/// Camera that follows a scene node; its projection is fixed at load.
#[derive(Clone, Debug)]
pub struct SceneCamera {
    pub name: String,
    pub node: NodeId,
    pub perspective: Perspective,
}

/// Input-driven orbit camera looking at `target` with +Z up.
#[derive(Clone, Debug, PartialEq)]
pub struct UserCamera {
    pub eye: Vec3,
    pub target: Vec3,
    pub perspective: Perspective,
}

impl Default for UserCamera {
    fn default() -> Self {
        Self {
            eye: Vec3::splat(5.0),
            target: Vec3::ZERO,
            perspective: Perspective::default(),
        }
    }
}

impl UserCamera {
    pub fn with_aspect(aspect: f32) -> Self {
        let mut cam = Self::default();
        cam.perspective.aspect = aspect;
        cam
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, WORLD_UP)
    }

    fn look_dir(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    fn translate(&mut self, by: Vec3) {
        self.eye += by;
        self.target += by;
    }
}

#[derive(Clone, Debug)]
pub enum Camera {
    Scene(SceneCamera),
    User(UserCamera),
}

impl Camera {
    pub fn view(&self, graph: &SceneGraph) -> Mat4 {
        match self {
            Camera::Scene(c) => graph.world_transform(c.node).inverse(),
            Camera::User(c) => c.view(),
        }
    }

    pub fn perspective(&self) -> &Perspective {
        match self {
            Camera::Scene(c) => &c.perspective,
            Camera::User(c) => &c.perspective,
        }
    }

    pub fn projection(&self) -> Mat4 {
        self.perspective().matrix()
    }

    pub fn eye(&self, graph: &SceneGraph) -> Vec3 {
        match self {
            Camera::Scene(c) => graph.world_transform(c.node).transform_point3(Vec3::ZERO),
            Camera::User(c) => c.eye,
        }
    }
}

/// Tunables for the user camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraControls {
    /// Radians of orbit per pixel of drag.
    pub mouse_sensitivity: f32,
    /// World units per second for WASDQE.
    pub move_speed: f32,
    /// Fraction of the eye-target distance moved per scroll step.
    pub zoom_speed: f32,
}

impl Default for CameraControls {
    fn default() -> Self {
        Self {
            mouse_sensitivity: 1f32.to_radians(),
            move_speed: 10.0,
            zoom_speed: 0.1,
        }
    }
}

/// Largest pitch applied from one drag event.
const MAX_PITCH_STEP: f32 = 10.0 * std::f32::consts::PI / 180.0;
/// Closest the view direction may come to either pole.
const POLE_MARGIN: f32 = 10.0 * std::f32::consts::PI / 180.0;

#[derive(Clone, Copy, Debug, Default)]
struct HeldKeys {
    w: bool,
    s: bool,
    a: bool,
    d: bool,
    q: bool,
    e: bool,
    x: bool,
}

impl HeldKeys {
    fn set(&mut self, key: Key, down: bool) {
        match key {
            Key::W => self.w = down,
            Key::S => self.s = down,
            Key::A => self.a = down,
            Key::D => self.d = down,
            Key::Q => self.q = down,
            Key::E => self.e = down,
            Key::X => self.x = down,
            _ => {}
        }
    }
}

/// Owns every camera the app can look through and which one is active.
///
/// Cameras keep their state when inactive; switching only moves the active index.
/// In debug builds a detached debug camera can take over the view while culling
/// still uses the active camera.
pub struct CameraRegistry {
    cameras: Vec<(String, Camera)>,
    active: usize,
    debug: Option<Camera>,
    debug_active: bool,
    controls: CameraControls,
    drag_from: Option<Vec2>,
    held: HeldKeys,
}

impl CameraRegistry {
    /// Starts with the user camera registered and active.
    pub fn new(aspect: f32, controls: CameraControls) -> Self {
        let debug = cfg!(debug_assertions).then(|| Camera::User(UserCamera::with_aspect(aspect)));
        Self {
            cameras: vec![(USER_CAMERA.to_string(), Camera::User(UserCamera::with_aspect(aspect)))],
            active: 0,
            debug,
            debug_active: false,
            controls,
            drag_from: None,
            held: HeldKeys::default(),
        }
    }

    /// Adds a camera. A name that is already taken keeps its first camera.
    pub fn register(&mut self, name: impl Into<String>, camera: Camera) -> bool {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return false;
        }
        self.cameras.push((name, camera));
        true
    }

    /// Registers one scene camera per node that carries a camera.
    pub fn register_scene_cameras(&mut self, graph: &SceneGraph, cameras: &[CameraDesc]) {
        for (i, node) in graph.nodes().iter().enumerate() {
            let Some(cam) = node.camera else {
                continue;
            };
            let desc = &cameras[cam.index()];
            self.register(
                desc.name.clone(),
                Camera::Scene(SceneCamera {
                    name: desc.name.clone(),
                    node: NodeId(i as u32),
                    perspective: desc.perspective,
                }),
            );
        }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.cameras.iter().position(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cameras.iter().map(|(n, _)| n.as_str())
    }

    /// Makes `name` active. Selecting the already-active camera changes nothing.
    pub fn set_active(&mut self, name: &str) -> Result<&Camera, SceneError> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| SceneError::UnknownCamera(name.to_string()))?;
        if idx != self.active {
            self.active = idx;
            self.drag_from = None;
        }
        Ok(&self.cameras[self.active].1)
    }

    /// Advances to the next camera in registration order, wrapping.
    pub fn cycle(&mut self) {
        if self.cameras.len() < 2 {
            return;
        }
        self.active = (self.active + 1) % self.cameras.len();
        self.drag_from = None;
        info!("switched to camera {}", self.active_name());
    }

    pub fn active_name(&self) -> &str {
        &self.cameras[self.active].0
    }

    pub fn active(&self) -> &Camera {
        &self.cameras[self.active].1
    }

    /// Camera used to cull; never the debug camera.
    pub fn culling_camera(&self) -> &Camera {
        self.active()
    }

    /// Camera the frame is rendered from.
    pub fn view_camera(&self) -> &Camera {
        match (&self.debug, self.debug_active) {
            (Some(debug), true) => debug,
            _ => self.active(),
        }
    }

    pub fn is_debug_view(&self) -> bool {
        self.debug_active && self.debug.is_some()
    }

    pub fn toggle_debug_view(&mut self) {
        if self.debug.is_none() {
            return;
        }
        self.debug_active = !self.debug_active;
        self.drag_from = None;
        info!("debug camera {}", if self.debug_active { "active" } else { "inactive" });
    }

    /// Updates the aspect of every user-driven camera, e.g. after a resize.
    pub fn set_user_aspect(&mut self, aspect: f32) {
        let cams = self.cameras.iter_mut().map(|(_, c)| c).chain(self.debug.as_mut());
        for cam in cams {
            if let Camera::User(u) = cam {
                u.perspective.aspect = aspect;
            }
        }
    }

    fn controlled_user(&mut self) -> Option<&mut UserCamera> {
        let cam = match (&mut self.debug, self.debug_active) {
            (Some(debug), true) => debug,
            _ => &mut self.cameras[self.active].1,
        };
        match cam {
            Camera::User(u) => Some(u),
            Camera::Scene(_) => None,
        }
    }

    pub fn handle_input(&mut self, input: &IoInput) {
        match *input {
            IoInput::Key { key, action, .. } => {
                let down = matches!(action, KeyAction::Press | KeyAction::Repeat);
                self.held.set(key, down);
                if action == KeyAction::Press {
                    match key {
                        Key::Tab => self.cycle(),
                        Key::F5 => self.toggle_debug_view(),
                        _ => {}
                    }
                }
            }
            IoInput::MouseButton {
                button: MouseButton::Left,
                action,
                x,
                y,
                ..
            } => {
                let is_user = self.controlled_user().is_some();
                self.drag_from = match action {
                    KeyAction::Press if is_user => Some(Vec2::new(x as f32, y as f32)),
                    KeyAction::Release => None,
                    _ => self.drag_from,
                };
            }
            IoInput::MouseMove { x, y } => {
                let Some(from) = self.drag_from else {
                    return;
                };
                let to = Vec2::new(x as f32, y as f32);
                self.drag_from = Some(to);
                self.orbit(to - from);
            }
            IoInput::Scroll { y, .. } => self.zoom(y as f32),
            IoInput::MouseButton { .. } => {}
        }
    }

    /// Orbits the controlled user camera around its target. Horizontal drag
    /// yaws about +Z; vertical drag pitches, and a pitch that would bring the view
    /// within the pole margin is dropped for this event.
    pub fn orbit(&mut self, delta_px: Vec2) {
        let sensitivity = self.controls.mouse_sensitivity;
        let Some(cam) = self.controlled_user() else {
            return;
        };
        let yaw = -delta_px.x * sensitivity;
        let pitch = (-delta_px.y * sensitivity).clamp(-MAX_PITCH_STEP, MAX_PITCH_STEP);

        let distance = cam.eye.distance(cam.target);
        let dir = orbit_direction(cam.look_dir(), WORLD_UP, yaw, pitch, POLE_MARGIN);
        cam.eye = cam.target - dir * distance;
    }

    /// Moves the eye along the view direction; positive steps approach the target.
    pub fn zoom(&mut self, steps: f32) {
        let speed = self.controls.zoom_speed;
        if let Some(cam) = self.controlled_user() {
            let to_target = cam.target - cam.eye;
            cam.eye += to_target * steps * speed;
        }
    }

    /// Applies held movement keys. `X` restores the default pose.
    pub fn update(&mut self, dt: f32) {
        let held = self.held;
        let step = self.controls.move_speed * dt;
        let Some(cam) = self.controlled_user() else {
            return;
        };

        if held.x {
            let perspective = cam.perspective;
            *cam = UserCamera {
                perspective,
                ..UserCamera::default()
            };
            return;
        }

        let dir = cam.look_dir();
        let right = dir.cross(WORLD_UP).normalize_or_zero();
        let screen_up = right.cross(dir).normalize_or_zero();

        let mut motion = Vec3::ZERO;
        if held.w {
            motion += screen_up;
        }
        if held.s {
            motion -= screen_up;
        }
        if held.d {
            motion += right;
        }
        if held.a {
            motion -= right;
        }
        if held.q {
            motion += dir;
        }
        if held.e {
            motion -= dir;
        }
        if motion != Vec3::ZERO {
            cam.translate(motion * step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use prism_platform::Modifiers;

    fn press(key: Key) -> IoInput {
        IoInput::Key {
            key,
            action: KeyAction::Press,
            mods: Modifiers::empty(),
        }
    }

    fn registry_with_scene_camera() -> (CameraRegistry, SceneGraph) {
        let mut node = Node::new("cam-node");
        node.transform.translation = Vec3::new(0.0, 0.0, 3.0);
        node.camera = Some(crate::graph::CameraId(0));
        let graph = SceneGraph::new(vec![node], vec![NodeId(0)]).unwrap();
        let descs = [CameraDesc {
            name: "main".into(),
            perspective: Perspective {
                aspect: 2.0,
                ..Perspective::default()
            },
        }];

        let mut reg = CameraRegistry::new(4.0 / 3.0, CameraControls::default());
        reg.register_scene_cameras(&graph, &descs);
        (reg, graph)
    }

    #[test]
    fn switching_to_active_camera_is_a_noop() {
        let (mut reg, _) = registry_with_scene_camera();
        assert_eq!(reg.active_name(), USER_CAMERA);
        let before = reg.active() as *const Camera;
        let again = reg.set_active(USER_CAMERA).unwrap() as *const Camera;
        assert_eq!(before, again);
        assert_eq!(reg.active_name(), USER_CAMERA);

        assert!(matches!(reg.set_active("nope"), Err(SceneError::UnknownCamera(_))));
        assert_eq!(reg.active_name(), USER_CAMERA);
    }

    #[test]
    fn switching_keeps_camera_state() {
        let (mut reg, graph) = registry_with_scene_camera();
        reg.zoom(1.0);
        let zoomed = reg.active().eye(&graph);

        reg.set_active("main").unwrap();
        assert_eq!(reg.active().eye(&graph), Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(reg.active().perspective().aspect, 2.0);

        reg.handle_input(&press(Key::Tab));
        assert_eq!(reg.active_name(), USER_CAMERA);
        assert_eq!(reg.active().eye(&graph), zoomed);
    }

    #[test]
    fn scroll_moves_along_view_direction() {
        let mut reg = CameraRegistry::new(1.0, CameraControls::default());
        reg.handle_input(&IoInput::Scroll { x: 0.0, y: 1.0 });
        let Camera::User(cam) = reg.active() else {
            panic!("user camera expected");
        };
        assert!((cam.eye - Vec3::splat(4.5)).length() < 1e-5);
    }

    #[test]
    fn drag_pitch_near_pole_is_rejected() {
        let mut reg = CameraRegistry::new(1.0, CameraControls::default());
        reg.register(
            "top",
            Camera::User(UserCamera {
                eye: Vec3::new(1.0, 0.0, 5.0),
                ..UserCamera::default()
            }),
        );
        reg.set_active("top").unwrap();
        let eye_of = |r: &CameraRegistry| match r.active() {
            Camera::User(c) => c.eye,
            Camera::Scene(_) => unreachable!(),
        };
        let start = eye_of(&reg);

        // Dragging down tilts the view further toward -Z; 5 degrees crosses the margin.
        reg.orbit(Vec2::new(0.0, 5.0));
        assert!((eye_of(&reg) - start).length() < 1e-4);

        reg.orbit(Vec2::new(0.0, -5.0));
        assert!((eye_of(&reg) - start).length() > 0.1);
    }

    #[test]
    fn mouse_drag_requires_left_button() {
        let mut reg = CameraRegistry::new(1.0, CameraControls::default());
        let start = reg.active().eye(&SceneGraph::default());
        reg.handle_input(&IoInput::MouseMove { x: 50.0, y: 0.0 });
        assert_eq!(reg.active().eye(&SceneGraph::default()), start);

        reg.handle_input(&IoInput::MouseButton {
            button: MouseButton::Left,
            action: KeyAction::Press,
            x: 0.0,
            y: 0.0,
            mods: Modifiers::empty(),
        });
        reg.handle_input(&IoInput::MouseMove { x: 30.0, y: 0.0 });
        let moved = reg.active().eye(&SceneGraph::default());
        assert!((moved - start).length() > 0.1);
        // Orbit keeps the distance to the target.
        assert!((moved.length() - start.length()).abs() < 1e-4);
    }

    #[test]
    fn held_keys_move_and_x_resets() {
        let mut reg = CameraRegistry::new(1.5, CameraControls::default());
        reg.handle_input(&press(Key::Q));
        reg.update(0.1);
        let Camera::User(cam) = reg.active() else {
            panic!()
        };
        let toward = (Vec3::ZERO - Vec3::splat(5.0)).normalize();
        assert!((cam.eye - (Vec3::splat(5.0) + toward)).length() < 1e-4);

        reg.handle_input(&IoInput::Key {
            key: Key::Q,
            action: KeyAction::Release,
            mods: Modifiers::empty(),
        });
        reg.handle_input(&press(Key::X));
        reg.update(0.1);
        let Camera::User(cam) = reg.active() else {
            panic!()
        };
        assert_eq!(cam.eye, Vec3::splat(5.0));
        assert_eq!(cam.perspective.aspect, 1.5);
    }

    #[test]
    fn scene_camera_view_inverts_node_transform() {
        let (reg, graph) = registry_with_scene_camera();
        let main = reg.cameras.iter().find(|(n, _)| n == "main").unwrap();
        let p = main.1.view(&graph).transform_point3(Vec3::new(0.0, 0.0, 3.0));
        assert!(p.length() < 1e-6);
    }
}
