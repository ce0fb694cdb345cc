// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;

use crate::buffer::find_memory_type;
use crate::context::GpuContext;

/// Device-local image, its memory and a view over all of its layers.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub layers: u32,
}

impl GpuImage {
    pub const NULL: Self = Self {
        image: vk::Image::null(),
        memory: vk::DeviceMemory::null(),
        view: vk::ImageView::null(),
        format: vk::Format::UNDEFINED,
        extent: vk::Extent2D {
            width: 0,
            height: 0,
        },
        layers: 0,
    };

    /// View, image, memory.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.view != vk::ImageView::null() {
            device.destroy_image_view(self.view, None);
        }
        if self.image != vk::Image::null() {
            device.destroy_image(self.image, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
        }
        *self = Self::NULL;
    }
}

pub(crate) struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub cube: bool,
}

pub(crate) unsafe fn create_image(ctx: &GpuContext, desc: &ImageDesc) -> Result<GpuImage> {
    let device = &ctx.device;
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        flags: if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        },
        image_type: vk::ImageType::TYPE_2D,
        format: desc.format,
        extent: vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: desc.layers,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: desc.usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let image = device.create_image(&img_ci, None).context("create_image")?;

    let mem_req = device.get_image_memory_requirements(image);
    let mem_type = match find_memory_type(
        &ctx.memory_properties(),
        mem_req.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(t) => t,
        Err(e) => {
            device.destroy_image(image, None);
            return Err(e);
        }
    };
    let alloc = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: mem_req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let memory = match device.allocate_memory(&alloc, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_image(image, None);
            return Err(e).context("allocate_memory(image)");
        }
    };
    device.bind_image_memory(image, memory, 0)?;

    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: if desc.cube {
            vk::ImageViewType::CUBE
        } else {
            vk::ImageViewType::TYPE_2D
        },
        format: desc.format,
        subresource_range: subresource(desc.aspect, desc.layers),
        ..Default::default()
    };
    let view = match device.create_image_view(&view_ci, None) {
        Ok(v) => v,
        Err(e) => {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
            return Err(e).context("create_image_view");
        }
    };
    Ok(GpuImage {
        image,
        memory,
        view,
        format: desc.format,
        extent: desc.extent,
        layers: desc.layers,
    })
}

pub(crate) fn subresource(aspect: vk::ImageAspectFlags, layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    }
}

pub(crate) unsafe fn pick_depth_format(ctx: &GpuContext) -> vk::Format {
    // Prefer 32f, then 24+S8, then 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    candidates
        .into_iter()
        .find(|&fmt| {
            ctx.instance
                .get_physical_device_format_properties(ctx.phys, fmt)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .unwrap_or(vk::Format::D32_SFLOAT)
}

pub(crate) unsafe fn create_depth_image(
    ctx: &GpuContext,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<GpuImage> {
    create_image(
        ctx,
        &ImageDesc {
            format,
            extent,
            layers: 1,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            cube: false,
        },
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BarrierMasks {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// Stage and access masks for every layout change the renderer performs.
/// Unlisted pairs fall back to a full barrier.
pub(crate) fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> BarrierMasks {
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    let (src_stage, src_access, dst_stage, dst_access) = match (old, new) {
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE | A::COLOR_ATTACHMENT_READ,
        ),
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_WRITE | A::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::BOTTOM_OF_PIPE,
            A::empty(),
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::ALL_TRANSFER,
            A::TRANSFER_READ,
        ),
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::ALL_TRANSFER,
            A::TRANSFER_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            S::ALL_TRANSFER,
            A::TRANSFER_WRITE,
            S::FRAGMENT_SHADER,
            A::SHADER_READ,
        ),
        _ => (
            S::ALL_COMMANDS,
            A::MEMORY_WRITE,
            S::ALL_COMMANDS,
            A::MEMORY_READ | A::MEMORY_WRITE,
        ),
    };
    BarrierMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    }
}

pub(crate) unsafe fn cmd_transition(
    ctx: &GpuContext,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let m = transition_masks(old, new);
    let barrier = vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: m.src_stage,
        src_access_mask: m.src_access,
        dst_stage_mask: m.dst_stage,
        dst_access_mask: m.dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: range,
        ..Default::default()
    };
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: 1,
        p_image_memory_barriers: &barrier,
        ..Default::default()
    };
    ctx.cmd_pipeline_barrier2(cmd, &dep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_frames_end_readable_by_transfer() {
        let m = transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert!(m.src_access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
        assert!(m.dst_access.contains(vk::AccessFlags2::TRANSFER_READ));
    }

    #[test]
    fn present_transition_has_no_dst_access() {
        let m = transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(m.dst_access, vk::AccessFlags2::empty());
        assert_eq!(m.dst_stage, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
    }

    #[test]
    fn unknown_pairs_get_a_full_barrier() {
        let m = transition_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(m.src_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(m.dst_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
    }
}
