// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use prism_render::{FrameUniforms, MAX_FRAMES_IN_FLIGHT};

use crate::buffer::{create_mapped_buffer, GpuBuffer};
use crate::context::GpuContext;

/// Everything one in-flight frame owns exclusively.
pub(crate) struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub set: vk::DescriptorSet,
    pub uniforms: GpuBuffer,
    /// Signaled by acquire, waited by submit. Unused headless.
    pub image_available: vk::Semaphore,
    /// Created SIGNALED so the first wait on a fresh slot returns immediately.
    pub in_flight: vk::Fence,
}

/// Per-slot resources plus the pool and layout they were allocated from.
pub(crate) struct FrameResources {
    pub cmd_pool: vk::CommandPool,
    pub set_layout: vk::DescriptorSetLayout,
    pub desc_pool: vk::DescriptorPool,
    pub slots: Vec<FrameSlot>,
}

pub(crate) unsafe fn create_camera_set_layout(
    device: &ash::Device,
) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

impl FrameResources {
    pub unsafe fn new(ctx: &GpuContext) -> Result<Self> {
        let device = &ctx.device;
        let count = MAX_FRAMES_IN_FLIGHT as u32;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let cmd_pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        let cmds = device.allocate_command_buffers(&alloc_info)?;

        let set_layout = create_camera_set_layout(device)?;
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let desc_pool = device.create_descriptor_pool(&pool_ci, None)?;
        let layouts = vec![set_layout; MAX_FRAMES_IN_FLIGHT];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: desc_pool,
            descriptor_set_count: count,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = device.allocate_descriptor_sets(&alloc)?;

        let mut res = Self {
            cmd_pool,
            set_layout,
            desc_pool,
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
        };

        let ubo_size = std::mem::size_of::<FrameUniforms>() as vk::DeviceSize;
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for (&cmd, &set) in cmds.iter().zip(&sets) {
            let uniforms = create_mapped_buffer(ctx, ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
            let info = vk::DescriptorBufferInfo {
                buffer: uniforms.buffer,
                offset: 0,
                range: ubo_size,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &info,
                ..Default::default()
            };
            device.update_descriptor_sets(std::slice::from_ref(&write), &[]);

            res.slots.push(FrameSlot {
                cmd,
                set,
                uniforms,
                image_available: device.create_semaphore(&sem_ci, None)?,
                in_flight: device.create_fence(&fence_ci, None)?,
            });
        }
        Ok(res)
    }

    pub fn fences(&self) -> Vec<vk::Fence> {
        self.slots.iter().map(|s| s.in_flight).collect()
    }

    /// Caller has waited for device idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for slot in &mut self.slots {
            device.destroy_fence(slot.in_flight, None);
            device.destroy_semaphore(slot.image_available, None);
            slot.uniforms.destroy(device);
        }
        let cmds: Vec<_> = self.slots.iter().map(|s| s.cmd).collect();
        if !cmds.is_empty() {
            device.free_command_buffers(self.cmd_pool, &cmds);
        }
        self.slots.clear();
        device.destroy_command_pool(self.cmd_pool, None);
        device.destroy_descriptor_pool(self.desc_pool, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
    }
}
