// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;

use crate::context::GpuContext;

/// A buffer and the allocation bound to it. `mapped` is non-null only for
/// persistently mapped host-visible buffers.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub mapped: *mut u8,
}

impl GpuBuffer {
    pub const NULL: Self = Self {
        buffer: vk::Buffer::null(),
        memory: vk::DeviceMemory::null(),
        size: 0,
        mapped: std::ptr::null_mut(),
    };

    /// Copies `bytes` into the mapping at `offset`.
    pub unsafe fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        if self.mapped.is_null() {
            return Err(anyhow!("write to unmapped buffer"));
        }
        if (offset + bytes.len()) as vk::DeviceSize > self.size {
            return Err(anyhow!(
                "write of {} bytes at {offset} overruns buffer of {}",
                bytes.len(),
                self.size
            ));
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset), bytes.len());
        Ok(())
    }

    /// Unmaps (if mapped), destroys, frees.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if !self.mapped.is_null() {
            device.unmap_memory(self.memory);
            self.mapped = std::ptr::null_mut();
        }
        if self.buffer != vk::Buffer::null() {
            device.destroy_buffer(self.buffer, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
        }
        *self = Self::NULL;
    }
}

/// First memory type allowed by `type_bits` that has every flag in `req`.
pub(crate) fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| anyhow!("no memory type with {req:?} in mask {type_bits:#x}"))
}

pub(crate) unsafe fn create_buffer_and_memory(
    ctx: &GpuContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    let device = &ctx.device;
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device.create_buffer(&bci, None).context("create_buffer")?;
    let req = device.get_buffer_memory_requirements(buffer);
    let mem_type = match find_memory_type(&ctx.memory_properties(), req.memory_type_bits, props) {
        Ok(t) => t,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e);
        }
    };
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let memory = match device.allocate_memory(&mai, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(anyhow!("allocate_memory ({size} bytes): {e:?}"));
        }
    };
    device.bind_buffer_memory(buffer, memory, 0)?;
    Ok(GpuBuffer {
        buffer,
        memory,
        size,
        mapped: std::ptr::null_mut(),
    })
}

/// Host-visible, coherent and mapped for its whole lifetime.
pub(crate) unsafe fn create_mapped_buffer(
    ctx: &GpuContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let mut buf = create_buffer_and_memory(
        ctx,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    match ctx
        .device
        .map_memory(buf.memory, 0, size, vk::MemoryMapFlags::empty())
    {
        Ok(ptr) => buf.mapped = ptr as *mut u8,
        Err(e) => {
            buf.destroy(&ctx.device);
            return Err(anyhow!("map_memory: {e:?}"));
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            mem.memory_types[i].property_flags = f;
        }
        mem
    }

    #[test]
    fn picks_first_type_with_all_flags_in_mask() {
        let mem = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&mem, 0b111, coherent).unwrap(), 2);
        assert_eq!(
            find_memory_type(&mem, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        assert!(find_memory_type(&mem, 0b011, coherent).is_err());
    }
}
