// SPDX-License-Identifier: CEPL-1.0
use tracing::debug;

/// Result of asking for the next presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready(u32),
    /// The image set no longer matches the surface; recreate before drawing.
    Stale,
    /// Headless only: no image has been made available since the last one was used.
    NotReady,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentMode {
    /// Images come from a platform swapchain; acquire and present go through the backend.
    Interactive,
    /// Images are a fixed synthetic array whose availability is scripted.
    Headless,
}

/// Image-index policy for headless runs.
///
/// An `AVAILABLE` event advances the index and marks it ready; drawing consumes
/// it. Without the frame limiter every tick draws into the current index.
#[derive(Clone, Debug)]
pub struct HeadlessImages {
    count: u32,
    next: u32,
    ready: bool,
    limit_fps: bool,
}

impl HeadlessImages {
    pub fn new(count: u32, limit_fps: bool) -> Self {
        Self {
            count: count.max(1),
            next: 0,
            ready: false,
            limit_fps,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limits_fps(&self) -> bool {
        self.limit_fps
    }

    /// Index the next draw targets, whether or not it has been released.
    pub fn current(&self) -> u32 {
        self.next
    }

    pub fn mark_available(&mut self) {
        self.next = (self.next + 1) % self.count;
        self.ready = true;
        debug!("headless image {} available", self.next);
    }

    pub fn acquire(&self) -> Acquire {
        if self.ready || !self.limit_fps {
            Acquire::Ready(self.next)
        } else {
            Acquire::NotReady
        }
    }

    pub fn consume(&mut self) {
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_waits_for_availability() {
        let mut images = HeadlessImages::new(3, true);
        assert_eq!(images.acquire(), Acquire::NotReady);

        images.mark_available();
        assert_eq!(images.acquire(), Acquire::Ready(1));
        images.consume();
        assert_eq!(images.acquire(), Acquire::NotReady);

        images.mark_available();
        images.mark_available();
        assert_eq!(images.acquire(), Acquire::Ready(0));
    }

    #[test]
    fn unlimited_always_draws() {
        let mut images = HeadlessImages::new(3, false);
        assert_eq!(images.acquire(), Acquire::Ready(0));
        images.consume();
        assert_eq!(images.acquire(), Acquire::Ready(0));
        images.mark_available();
        assert_eq!(images.acquire(), Acquire::Ready(1));
    }
}
