// SPDX-License-Identifier: CEPL-1.0
use crate::MAX_FRAMES_IN_FLIGHT;

/// Fixed set of per-frame slots reused round-robin.
///
/// The ring only hands out indices; whether a slot's previous GPU work has
/// retired is for its fence to say.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<T>,
    current: usize,
}

impl<T> FrameRing<T> {
    /// Builds `MAX_FRAMES_IN_FLIGHT` slots. The cursor starts on the last slot so
    /// the first `advance` lands on slot 0.
    pub fn new(mut make: impl FnMut(usize) -> T) -> Self {
        Self::with_len(MAX_FRAMES_IN_FLIGHT, &mut make)
    }

    fn with_len(len: usize, make: &mut impl FnMut(usize) -> T) -> Self {
        let slots: Vec<T> = (0..len).map(make).collect();
        Self {
            current: len.saturating_sub(1),
            slots,
        }
    }

    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.slots.len();
        self.current
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_round_robin_from_zero() {
        let mut ring = FrameRing::new(|i| i * 10);
        assert_eq!(ring.len(), MAX_FRAMES_IN_FLIGHT);
        let order: Vec<usize> = (0..5).map(|_| ring.advance()).collect();
        assert_eq!(order, [0, 1, 0, 1, 0]);
        assert_eq!(*ring.current(), 0);
        *ring.current_mut() += 1;
        assert_eq!(ring.get(0), Some(&1));
        assert_eq!(ring.get(2), None);
    }
}
