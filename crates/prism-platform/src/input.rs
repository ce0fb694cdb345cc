// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};

/// Handler buckets; every `IoInput` belongs to exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputKind {
    Keyboard,
    MouseButton,
    MouseMove,
    MouseScroll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    W,
    S,
    A,
    D,
    Q,
    E,
    R,
    X,
    L,
    Up,
    Down,
    Left,
    Right,
    Space,
    Tab,
    F5,
    Escape,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL  = 1 << 1;
        const ALT   = 1 << 2;
        const SUPER = 1 << 3;
    }
}

/// One input event in window coordinates (pixels, origin top-left).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IoInput {
    Key {
        key: Key,
        action: KeyAction,
        mods: Modifiers,
    },
    MouseButton {
        button: MouseButton,
        action: KeyAction,
        x: f64,
        y: f64,
        mods: Modifiers,
    },
    MouseMove {
        x: f64,
        y: f64,
    },
    Scroll {
        x: f64,
        y: f64,
    },
}

impl IoInput {
    pub fn kind(&self) -> InputKind {
        match self {
            IoInput::Key { .. } => InputKind::Keyboard,
            IoInput::MouseButton { .. } => InputKind::MouseButton,
            IoInput::MouseMove { .. } => InputKind::MouseMove,
            IoInput::Scroll { .. } => InputKind::MouseScroll,
        }
    }
}

/// Tracks the cursor and modifier state winit reports separately, so button
/// events can carry a position the way the handlers expect.
#[derive(Default)]
pub struct InputTranslator {
    cursor: (f64, f64),
    mods: Modifiers,
}

impl InputTranslator {
    pub fn translate(&mut self, event: &WindowEvent) -> Option<IoInput> {
        match event {
            WindowEvent::ModifiersChanged(m) => {
                self.mods = map_modifiers(m.state());
                None
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let key = match event.physical_key {
                    PhysicalKey::Code(code) => map_key(code),
                    PhysicalKey::Unidentified(_) => Key::Unknown,
                };
                let action = match (event.state, event.repeat) {
                    (ElementState::Released, _) => KeyAction::Release,
                    (ElementState::Pressed, true) => KeyAction::Repeat,
                    (ElementState::Pressed, false) => KeyAction::Press,
                };
                Some(IoInput::Key {
                    key,
                    action,
                    mods: self.mods,
                })
            }
            WindowEvent::MouseInput { state, button, .. } => Some(IoInput::MouseButton {
                button: match button {
                    winit::event::MouseButton::Left => MouseButton::Left,
                    winit::event::MouseButton::Right => MouseButton::Right,
                    winit::event::MouseButton::Middle => MouseButton::Middle,
                    _ => MouseButton::Other,
                },
                action: match state {
                    ElementState::Pressed => KeyAction::Press,
                    ElementState::Released => KeyAction::Release,
                },
                x: self.cursor.0,
                y: self.cursor.1,
                mods: self.mods,
            }),
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x, position.y);
                Some(IoInput::MouseMove {
                    x: position.x,
                    y: position.y,
                })
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (x, y) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (f64::from(*x), f64::from(*y)),
                    // Roughly one line per 20 px on touchpads.
                    MouseScrollDelta::PixelDelta(p) => (p.x / 20.0, p.y / 20.0),
                };
                Some(IoInput::Scroll { x, y })
            }
            _ => None,
        }
    }
}

fn map_modifiers(state: ModifiersState) -> Modifiers {
    let mut mods = Modifiers::empty();
    mods.set(Modifiers::SHIFT, state.shift_key());
    mods.set(Modifiers::CTRL, state.control_key());
    mods.set(Modifiers::ALT, state.alt_key());
    mods.set(Modifiers::SUPER, state.super_key());
    mods
}

fn map_key(code: KeyCode) -> Key {
    match code {
        KeyCode::KeyW => Key::W,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyE => Key::E,
        KeyCode::KeyR => Key::R,
        KeyCode::KeyX => Key::X,
        KeyCode::KeyL => Key::L,
        KeyCode::ArrowUp => Key::Up,
        KeyCode::ArrowDown => Key::Down,
        KeyCode::ArrowLeft => Key::Left,
        KeyCode::ArrowRight => Key::Right,
        KeyCode::Space => Key::Space,
        KeyCode::Tab => Key::Tab,
        KeyCode::F5 => Key::F5,
        KeyCode::Escape => Key::Escape,
        _ => Key::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let k = IoInput::Key {
            key: Key::Tab,
            action: KeyAction::Press,
            mods: Modifiers::empty(),
        };
        assert_eq!(k.kind(), InputKind::Keyboard);
        assert_eq!(IoInput::Scroll { x: 0.0, y: 1.0 }.kind(), InputKind::MouseScroll);
        assert_eq!(IoInput::MouseMove { x: 1.0, y: 2.0 }.kind(), InputKind::MouseMove);
    }

    #[test]
    fn modifiers_map_from_winit_state() {
        let mods = map_modifiers(ModifiersState::SHIFT | ModifiersState::ALT);
        assert_eq!(mods, Modifiers::SHIFT | Modifiers::ALT);
        assert_eq!(map_key(KeyCode::KeyW), Key::W);
        assert_eq!(map_key(KeyCode::KeyZ), Key::Unknown);
    }
}
