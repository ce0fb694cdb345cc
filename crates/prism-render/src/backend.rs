// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use prism_scene::{Mesh, Texture};

use crate::capture::CapturedImage;
use crate::deletion::DeletionQueue;
use crate::draw::{DrawItem, FrameUniforms};
use crate::present::{Acquire, Present, PresentMode};
use crate::RenderSize;

/// Device-side operations the orchestrator sequences each tick.
///
/// Slot indices are always `< MAX_FRAMES_IN_FLIGHT`; image indices come from
/// `acquire` (interactive) or the headless image policy.
pub trait FrameBackend {
    /// Device buffers of one mesh.
    type Mesh;
    /// Device image of one texture.
    type Texture;
    /// A single teardown request; executed only by `destroy`.
    type Destroy;

    fn mode(&self) -> PresentMode;
    fn size(&self) -> RenderSize;

    /// Blocks until the slot's fence has signaled. Leaves the fence signaled.
    fn wait_slot(&mut self, slot: usize) -> Result<()>;
    /// Unsignals the fence; only called once the tick is certain to submit.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Interactive only. Headless images are resolved by the orchestrator.
    fn acquire(&mut self, slot: usize) -> Result<Acquire>;

    /// Copies a mesh into device-local memory. `Ok(None)` defers to a later frame.
    fn upload_mesh(&mut self, mesh: &Mesh) -> Result<Option<Self::Mesh>>;
    fn upload_texture(&mut self, texture: &Texture) -> Result<Option<Self::Texture>>;

    /// Converts a resident mesh into teardown requests without touching the device.
    fn retire_mesh(mesh: Self::Mesh, queue: &mut DeletionQueue<Self::Destroy>);
    fn retire_texture(texture: Self::Texture, queue: &mut DeletionQueue<Self::Destroy>);
    fn destroy(&mut self, request: Self::Destroy);

    fn write_uniforms(&mut self, slot: usize, uniforms: &FrameUniforms) -> Result<()>;
    fn record(&mut self, slot: usize, image: u32, draws: &[DrawItem<'_, Self::Mesh>])
        -> Result<()>;
    /// Submits the slot's command buffer, signaling its fence on completion.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;
    /// Interactive only.
    fn present(&mut self, slot: usize, image: u32) -> Result<Present>;

    fn wait_idle(&mut self) -> Result<()>;
    /// Rebuilds presentable images and attachments. Called after `wait_idle`.
    fn recreate(&mut self, size: RenderSize) -> Result<()>;

    /// Copies `image` to host memory. The caller has already waited on `slot`.
    fn read_back(&mut self, slot: usize, image: u32) -> Result<CapturedImage>;
}
