// SPDX-License-Identifier: CEPL-1.0
//! Platform collaborators: the input model, the handler registry the app
//! subscribes through, and the scripted event timeline that replaces a window
//! in headless runs.

mod events;
mod headless;
mod input;

pub use events::{EventHub, HandlerId};
pub use headless::{HeadlessEvent, Timeline, TimelineError, TimedEvent};
pub use input::{InputKind, InputTranslator, IoInput, Key, KeyAction, Modifiers, MouseButton};

// Re-exported so the app talks to winit through this crate.
pub use winit;
