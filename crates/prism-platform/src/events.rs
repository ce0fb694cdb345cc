// SPDX-License-Identifier: CEPL-1.0
use std::collections::{HashMap, VecDeque};

use crate::input::{InputKind, IoInput};

/// Opaque handle returned by [`EventHub::register`]. Ids are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<C> = Box<dyn FnMut(&mut C, &IoInput)>;

/// Observer registry for input. Inputs queue up between ticks and are handed
/// to handlers in arrival order; handlers of one kind run in registration order.
///
/// `C` is the context each handler receives mutably at dispatch time, which
/// keeps handlers free of shared-ownership captures.
pub struct EventHub<C> {
    next_id: u64,
    handlers: HashMap<InputKind, Vec<(HandlerId, Handler<C>)>>,
    queue: VecDeque<IoInput>,
}

impl<C> Default for EventHub<C> {
    fn default() -> Self {
        Self {
            next_id: 0,
            handlers: HashMap::new(),
            queue: VecDeque::new(),
        }
    }
}

impl<C> EventHub<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: InputKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &IoInput) + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Returns false if `id` was not registered under `kind`.
    pub fn remove(&mut self, kind: InputKind, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        list.len() != before
    }

    pub fn remove_all_for_kind(&mut self, kind: InputKind) {
        self.handlers.remove(&kind);
    }

    pub fn handler_count(&self, kind: InputKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn push(&mut self, input: IoInput) {
        self.queue.push_back(input);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drains the queue, FIFO. Returns the number of inputs delivered.
    pub fn dispatch(&mut self, ctx: &mut C) -> usize {
        let mut delivered = 0;
        while let Some(input) = self.queue.pop_front() {
            if let Some(list) = self.handlers.get_mut(&input.kind()) {
                for (_, handler) in list.iter_mut() {
                    handler(ctx, &input);
                }
            }
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Key, KeyAction, Modifiers};

    fn key(k: Key) -> IoInput {
        IoInput::Key {
            key: k,
            action: KeyAction::Press,
            mods: Modifiers::empty(),
        }
    }

    #[test]
    fn dispatch_is_fifo_and_in_registration_order() {
        let mut hub: EventHub<Vec<String>> = EventHub::new();
        hub.register(InputKind::Keyboard, |log, i| {
            if let IoInput::Key { key, .. } = i {
                log.push(format!("a:{key:?}"));
            }
        });
        hub.register(InputKind::Keyboard, |log, i| {
            if let IoInput::Key { key, .. } = i {
                log.push(format!("b:{key:?}"));
            }
        });
        hub.register(InputKind::MouseScroll, |log, _| log.push("scroll".into()));

        hub.push(key(Key::Tab));
        hub.push(IoInput::Scroll { x: 0.0, y: 1.0 });
        hub.push(key(Key::W));

        let mut log = Vec::new();
        assert_eq!(hub.dispatch(&mut log), 3);
        assert_eq!(log, ["a:Tab", "b:Tab", "scroll", "a:W", "b:W"]);
        assert_eq!(hub.pending(), 0);
    }

    #[test]
    fn remove_by_id_and_by_kind() {
        let mut hub: EventHub<u32> = EventHub::new();
        let first = hub.register(InputKind::Keyboard, |n, _| *n += 1);
        let second = hub.register(InputKind::Keyboard, |n, _| *n += 10);
        assert_ne!(first, second);

        assert!(hub.remove(InputKind::Keyboard, first));
        assert!(!hub.remove(InputKind::Keyboard, first));
        assert!(!hub.remove(InputKind::MouseMove, second));

        let mut n = 0;
        hub.push(key(Key::A));
        hub.dispatch(&mut n);
        assert_eq!(n, 10);

        hub.remove_all_for_kind(InputKind::Keyboard);
        assert_eq!(hub.handler_count(InputKind::Keyboard), 0);
        hub.push(key(Key::A));
        hub.dispatch(&mut n);
        assert_eq!(n, 10);
    }
}
