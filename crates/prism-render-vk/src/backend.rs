// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_render::{
    Acquire, CapturedImage, DeletionQueue, DrawItem, FrameBackend, FrameUniforms, PixelOrder,
    Present, PresentMode, RenderSize, RowOrder,
};
use prism_scene::{Mesh, Texture, Topology};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::buffer::{create_mapped_buffer, GpuBuffer};
use crate::context::{GpuContext, Target};
use crate::frame::FrameResources;
use crate::image::{cmd_transition, create_depth_image, pick_depth_format, subresource, GpuImage};
use crate::pipeline::{
    create_or_load_pipeline_cache, pipeline_cache_path, save_pipeline_cache, ScenePipelines,
};
use crate::swapchain::{Chain, VsyncMode};
use crate::upload::{one_shot, upload_buffer, upload_texture};

#[derive(Clone, Debug)]
pub struct VkOptions {
    pub size: RenderSize,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    /// Exact device name; `None` picks the best ranked device.
    pub physical_device: Option<String>,
}

impl Default for VkOptions {
    fn default() -> Self {
        Self {
            size: RenderSize::new(1280, 720),
            clear_color: [0.05, 0.05, 0.08, 1.0],
            vsync: true,
            vsync_mode: VsyncMode::Fifo,
            physical_device: None,
        }
    }
}

/// Vertex buffer and optional 32-bit index buffer of one mesh.
#[derive(Debug)]
pub struct VkMesh {
    vertices: GpuBuffer,
    indices: Option<GpuBuffer>,
}

/// Sampled image of one texture.
#[derive(Debug)]
pub struct VkTexture {
    image: GpuImage,
}

#[derive(Debug)]
enum Retired {
    Buffer(GpuBuffer),
    Image(GpuImage),
}

/// A device object whose destruction has been deferred.
#[derive(Debug)]
pub struct DestroyRequest(Retired);

/// Vulkan implementation of the frame backend over a window surface or
/// offscreen images.
pub struct VkBackend {
    ctx: GpuContext,
    frames: FrameResources,
    chain: Chain,
    depth_format: vk::Format,
    depth: GpuImage,
    pipeline_cache: vk::PipelineCache,
    pipelines: ScenePipelines,
    clear: vk::ClearValue,
}

impl VkBackend {
    /// `window` must outlive the backend; the surface is built from its handles.
    pub fn new_windowed<W>(window: &W, opts: &VkOptions) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let target = Target::Window {
            display: window.display_handle()?.as_raw(),
            window: window.window_handle()?.as_raw(),
        };
        unsafe { Self::build(target, opts) }
    }

    pub fn new_headless(opts: &VkOptions) -> Result<Self> {
        unsafe { Self::build(Target::Offscreen, opts) }
    }

    // STRICT ORDER (build):
    // 1) instance + surface + device
    // 2) per-slot frame resources (pool, sets, uniforms, sync)
    // 3) presentable images (swapchain or offscreen)
    // 4) depth at the chosen extent
    // 5) pipeline cache, then pipelines against the chosen color format
    unsafe fn build(target: Target, opts: &VkOptions) -> Result<Self> {
        let (ctx, surface) = GpuContext::new(target, opts.physical_device.as_deref())?;
        let frames = FrameResources::new(&ctx)?;
        let chain = match surface {
            Some((loader, surface)) => Chain::interactive(
                &ctx,
                loader,
                surface,
                opts.size,
                opts.vsync,
                opts.vsync_mode,
            )?,
            None => Chain::headless(&ctx, opts.size)?,
        };
        let depth_format = pick_depth_format(&ctx);
        let depth = create_depth_image(&ctx, chain.extent, depth_format)?;

        let props = ctx.instance.get_physical_device_properties(ctx.phys);
        let pipeline_cache = create_or_load_pipeline_cache(&ctx.device, &pipeline_cache_path(&props))?;
        let pipelines = ScenePipelines::new(
            &ctx.device,
            pipeline_cache,
            chain.format,
            depth_format,
            frames.set_layout,
        )?;

        info!(
            "vulkan backend ready: {} mode, {}x{}, depth {:?}",
            match chain.mode() {
                PresentMode::Interactive => "interactive",
                PresentMode::Headless => "headless",
            },
            chain.extent.width,
            chain.extent.height,
            depth_format
        );

        Ok(Self {
            ctx,
            frames,
            chain,
            depth_format,
            depth,
            pipeline_cache,
            pipelines,
            clear: clear_value(opts.clear_color),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.ctx.device_name
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = clear_value(rgba);
    }

    fn slot(&self, slot: usize) -> Result<&crate::frame::FrameSlot> {
        self.frames
            .slots
            .get(slot)
            .ok_or_else(|| anyhow!("frame slot {slot} out of range"))
    }

    unsafe fn begin_rendering(&self, cmd: vk::CommandBuffer, view: vk::ImageView) {
        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: self.clear,
            ..Default::default()
        };
        let depth_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: self.depth.view,
            image_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.chain.extent,
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            p_depth_attachment: &depth_att,
            ..Default::default()
        };
        self.ctx.cmd_begin_rendering(cmd, &rendering_info);
    }

    unsafe fn set_viewport(&self, cmd: vk::CommandBuffer) {
        let extent = self.chain.extent;
        // Negative height flips y so +Y is up in clip space; rows still land top-down.
        let vp = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let d = &self.ctx.device;
        d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
        let sc = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));
    }

    unsafe fn record_draws(
        &self,
        cmd: vk::CommandBuffer,
        set: vk::DescriptorSet,
        draws: &[DrawItem<'_, VkMesh>],
    ) {
        let d = &self.ctx.device;
        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipelines.layout,
            0,
            std::slice::from_ref(&set),
            &[],
        );

        let mut bound: Option<Topology> = None;
        for draw in draws {
            if bound != Some(draw.topology) {
                d.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipelines.get(draw.topology),
                );
                bound = Some(draw.topology);
            }
            d.cmd_push_constants(
                cmd,
                self.pipelines.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&draw.push),
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[draw.mesh.vertices.buffer], &[0]);
            match &draw.mesh.indices {
                Some(ib) => {
                    d.cmd_bind_index_buffer(cmd, ib.buffer, 0, vk::IndexType::UINT32);
                    d.cmd_draw_indexed(cmd, draw.count, 1, 0, 0, 0);
                }
                None => d.cmd_draw(cmd, draw.count, 1, 0, 0),
            }
        }
    }
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

impl FrameBackend for VkBackend {
    type Mesh = VkMesh;
    type Texture = VkTexture;
    type Destroy = DestroyRequest;

    fn mode(&self) -> PresentMode {
        self.chain.mode()
    }

    fn size(&self) -> RenderSize {
        RenderSize::new(self.chain.extent.width, self.chain.extent.height)
    }

    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.in_flight;
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .context("wait_for_fences(frame slot)")
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.in_flight;
        unsafe { Ok(self.ctx.device.reset_fences(&[fence])?) }
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquire> {
        let signal = self.slot(slot)?.image_available;
        unsafe { self.chain.acquire(signal) }
    }

    fn upload_mesh(&mut self, mesh: &Mesh) -> Result<Option<VkMesh>> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.payload.vertices);
        if vertex_bytes.is_empty() {
            return Err(anyhow!("mesh {:?} has no vertex data", mesh.name));
        }
        unsafe {
            let pool = self.frames.cmd_pool;
            let mut vertices = upload_buffer(
                &self.ctx,
                pool,
                vertex_bytes,
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )
            .with_context(|| format!("upload vertices of {:?}", mesh.name))?;
            let indices = match &mesh.payload.indices {
                Some(idx) => match upload_buffer(
                    &self.ctx,
                    pool,
                    bytemuck::cast_slice(idx),
                    vk::BufferUsageFlags::INDEX_BUFFER,
                ) {
                    Ok(b) => Some(b),
                    Err(e) => {
                        vertices.destroy(&self.ctx.device);
                        return Err(e.context(format!("upload indices of {:?}", mesh.name)));
                    }
                },
                None => None,
            };
            Ok(Some(VkMesh { vertices, indices }))
        }
    }

    fn upload_texture(&mut self, texture: &Texture) -> Result<Option<VkTexture>> {
        let image = unsafe { upload_texture(&self.ctx, self.frames.cmd_pool, texture)? };
        Ok(Some(VkTexture { image }))
    }

    fn retire_mesh(mesh: VkMesh, queue: &mut DeletionQueue<DestroyRequest>) {
        queue.push(DestroyRequest(Retired::Buffer(mesh.vertices)));
        if let Some(ib) = mesh.indices {
            queue.push(DestroyRequest(Retired::Buffer(ib)));
        }
    }

    fn retire_texture(texture: VkTexture, queue: &mut DeletionQueue<DestroyRequest>) {
        queue.push(DestroyRequest(Retired::Image(texture.image)));
    }

    fn destroy(&mut self, request: DestroyRequest) {
        let device = &self.ctx.device;
        unsafe {
            match request.0 {
                Retired::Buffer(mut b) => b.destroy(device),
                Retired::Image(mut i) => i.destroy(device),
            }
        }
    }

    fn write_uniforms(&mut self, slot: usize, uniforms: &FrameUniforms) -> Result<()> {
        let s = self.slot(slot)?;
        unsafe { s.uniforms.write(0, bytemuck::bytes_of(uniforms)) }
            .with_context(|| format!("slot {slot}: uniform write"))
    }

    fn record(&mut self, slot: usize, image: u32, draws: &[DrawItem<'_, VkMesh>]) -> Result<()> {
        let s = self.slot(slot)?;
        let (cmd, set) = (s.cmd, s.set);
        let (color, view) = self
            .chain
            .image(image)
            .ok_or_else(|| anyhow!("image {image} out of range"))?;
        let final_layout = self.chain.final_layout();

        unsafe {
            let d = &self.ctx.device;
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)?;

            let color_range = subresource(vk::ImageAspectFlags::COLOR, 1);
            cmd_transition(
                &self.ctx,
                cmd,
                color,
                color_range,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
            cmd_transition(
                &self.ctx,
                cmd,
                self.depth.image,
                subresource(vk::ImageAspectFlags::DEPTH, 1),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            );
            self.begin_rendering(cmd, view);
            self.set_viewport(cmd);
            self.record_draws(cmd, set, draws);
            self.ctx.cmd_end_rendering(cmd);
            cmd_transition(
                &self.ctx,
                cmd,
                color,
                color_range,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                final_layout,
            );

            d.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    // STRICT PER-FRAME ORDER (interactive):
    // 1) acquire signals the slot's image_available
    // 2) submit waits on it and signals render_finished of THIS image
    // 3) present waits on render_finished
    // Headless submits carry no semaphores; the fence alone orders read-back.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let s = self.slot(slot)?;
        let (cmd, fence, acquired) = (s.cmd, s.in_flight, s.image_available);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let finished = self.chain.render_finished(image);
        let submit = match &finished {
            Some(finished) => vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &acquired,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: finished,
                ..Default::default()
            },
            None => vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            },
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, std::slice::from_ref(&submit), fence)
                .context("queue_submit")
        }
    }

    fn present(&mut self, _slot: usize, image: u32) -> Result<Present> {
        unsafe { self.chain.present(self.ctx.queue, image) }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .device_wait_idle()
                .context("device_wait_idle")
        }
    }

    // STRICT ORDER (recreate), device already idle:
    // 1) presentable images (old swapchain retired through old_swapchain)
    // 2) pipelines ONLY if the color format changed
    // 3) depth at the new extent
    fn recreate(&mut self, size: RenderSize) -> Result<()> {
        unsafe {
            let format_changed = self.chain.recreate(&self.ctx, size)?;
            if format_changed {
                self.pipelines.rebuild(
                    &self.ctx.device,
                    self.pipeline_cache,
                    self.chain.format,
                    self.depth_format,
                )?;
            }
            self.depth.destroy(&self.ctx.device);
            self.depth = create_depth_image(&self.ctx, self.chain.extent, self.depth_format)?;
        }
        Ok(())
    }

    fn read_back(&mut self, _slot: usize, image: u32) -> Result<CapturedImage> {
        if self.chain.mode() != PresentMode::Headless {
            return Err(anyhow!("frame capture is only available headless"));
        }
        let (color, _) = self
            .chain
            .image(image)
            .ok_or_else(|| anyhow!("image {image} out of range"))?;
        let extent = self.chain.extent;
        let len = extent.width as usize * extent.height as usize * 4;

        unsafe {
            let mut staging = create_mapped_buffer(
                &self.ctx,
                len as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_DST,
            )?;
            let copied = one_shot(&self.ctx, self.frames.cmd_pool, |cmd| {
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    },
                };
                self.ctx.device.cmd_copy_image_to_buffer(
                    cmd,
                    color,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    staging.buffer,
                    std::slice::from_ref(&region),
                );
            });
            let pixels = copied.map(|()| std::slice::from_raw_parts(staging.mapped, len).to_vec());
            staging.destroy(&self.ctx.device);
            Ok(CapturedImage {
                width: extent.width,
                height: extent.height,
                pixels: pixels?,
                order: PixelOrder::Bgra,
                rows: RowOrder::TopDown,
            })
        }
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;

            // 1) WAIT ALL SLOT FENCES, THEN QUIESCE THE DEVICE
            let fences = self.frames.fences();
            if !fences.is_empty() {
                let _ = d.wait_for_fences(&fences, true, u64::MAX);
            }
            d.device_wait_idle().ok();

            // 2) PIPELINES BEFORE THE CACHE AND LAYOUTS THEY WERE BUILT FROM
            self.pipelines.destroy(d);
            let props = self.ctx.instance.get_physical_device_properties(self.ctx.phys);
            if let Err(e) = save_pipeline_cache(d, self.pipeline_cache, &pipeline_cache_path(&props)) {
                warn!("pipeline cache not saved: {e:#}");
            }
            d.destroy_pipeline_cache(self.pipeline_cache, None);

            // 3) DEPTH AND PRESENTABLE IMAGES (views before swapchain)
            self.depth.destroy(d);
            self.chain.destroy(d);

            // 4) PER-SLOT SYNC, UNIFORMS, COMMAND BUFFERS, THEN THEIR POOLS
            self.frames.destroy(d);

            // 5) DEVICE, THEN SURFACE, THEN INSTANCE
            self.ctx.destroy_device();
            self.chain.destroy_surface();
            self.ctx.destroy_instance();
        }
    }
}
