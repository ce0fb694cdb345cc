// SPDX-License-Identifier: CEPL-1.0

/// Ordered teardown requests waiting for the GPU to stop referencing them.
///
/// The queue never decides when it is safe to flush. Per-slot queues are drained
/// right after that slot's fence wait; the global queue only after a device idle.
#[derive(Debug)]
pub struct DeletionQueue<T> {
    pending: Vec<T>,
}

impl<T> Default for DeletionQueue<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<T> DeletionQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: T) {
        self.pending.push(request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs `destroy` on every request, oldest first. Returns how many ran.
    pub fn flush(&mut self, mut destroy: impl FnMut(T)) -> usize {
        let n = self.pending.len();
        for request in self.pending.drain(..) {
            destroy(request);
        }
        n
    }

    /// Moves everything into `other`, keeping order. Used when a slot's requests
    /// must wait for a full device idle instead of its own fence.
    pub fn append_to(&mut self, other: &mut DeletionQueue<T>) {
        other.pending.append(&mut self.pending);
    }
}

impl<T> Extend<T> for DeletionQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.pending.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_runs_in_push_order_and_empties() {
        let mut q = DeletionQueue::new();
        q.push("vertex buffer");
        q.extend(["index buffer", "image view"]);
        assert_eq!(q.len(), 3);

        let mut seen = Vec::new();
        assert_eq!(q.flush(|r| seen.push(r)), 3);
        assert_eq!(seen, ["vertex buffer", "index buffer", "image view"]);
        assert!(q.is_empty());
        assert_eq!(q.flush(|_| panic!("already flushed")), 0);
    }

    #[test]
    fn append_preserves_order() {
        let mut slot = DeletionQueue::new();
        let mut global = DeletionQueue::new();
        global.push(1);
        slot.push(2);
        slot.push(3);
        slot.append_to(&mut global);
        assert!(slot.is_empty());

        let mut seen = Vec::new();
        global.flush(|r| seen.push(r));
        assert_eq!(seen, [1, 2, 3]);
    }
}
