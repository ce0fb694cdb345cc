// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame engine: in-flight slot ring, deferred deletion, lazy
//! residency, presentation policies and the per-tick orchestrator.

mod backend;
mod capture;
mod deletion;
mod draw;
mod lazy;
mod orchestrator;
mod present;
mod ring;

pub use backend::FrameBackend;
pub use capture::{encode_ppm, write_ppm, CaptureError, CapturedImage, PixelOrder, RowOrder};
pub use deletion::DeletionQueue;
pub use draw::{DrawItem, FrameUniforms, PushConstants};
pub use lazy::LazyResource;
pub use orchestrator::{Culling, FrameOrchestrator, FrameOutcome, SkipReason};
pub use present::{Acquire, HeadlessImages, Present, PresentMode};
pub use ring::FrameRing;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Presentable images requested from the surface, and created in headless mode.
pub const SWAPCHAIN_IMAGE_COUNT: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero extent; nothing can be drawn into them.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}
