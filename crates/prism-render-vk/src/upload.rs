// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_scene::{TexelEncoding, Texture, TextureShape};

use crate::buffer::{create_buffer_and_memory, create_mapped_buffer, GpuBuffer};
use crate::context::GpuContext;
use crate::image::{cmd_transition, create_image, subresource, GpuImage, ImageDesc};

pub(crate) fn texture_format(encoding: TexelEncoding) -> vk::Format {
    match encoding {
        TexelEncoding::Srgb => vk::Format::R8G8B8A8_SRGB,
        // RGBE is decoded in the shader; the bytes travel untouched.
        TexelEncoding::Linear | TexelEncoding::Rgbe => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Records `body` into a one-time command buffer, submits it and waits for the
/// queue to drain.
pub(crate) unsafe fn one_shot<F>(ctx: &GpuContext, pool: vk::CommandPool, body: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let device = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .context("allocate_command_buffers(one-shot)")?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };

    let result = (|| -> Result<()> {
        device.begin_command_buffer(cmd, &bi)?;
        body(cmd);
        device.end_command_buffer(cmd)?;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(ctx.queue, std::slice::from_ref(&si), vk::Fence::null())
            .context("queue_submit(one-shot)")?;
        device
            .queue_wait_idle(ctx.queue)
            .context("queue_wait_idle(one-shot)")?;
        Ok(())
    })();

    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    result
}

unsafe fn staging(ctx: &GpuContext, bytes: &[u8]) -> Result<GpuBuffer> {
    let mut buf = create_mapped_buffer(
        ctx,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    if let Err(e) = buf.write(0, bytes) {
        buf.destroy(&ctx.device);
        return Err(e);
    }
    Ok(buf)
}

/// Host bytes into a new device-local buffer via a staging copy.
pub(crate) unsafe fn upload_buffer(
    ctx: &GpuContext,
    pool: vk::CommandPool,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    if bytes.is_empty() {
        return Err(anyhow!("refusing to upload an empty buffer"));
    }
    let size = bytes.len() as vk::DeviceSize;
    let mut stage = staging(ctx, bytes)?;
    let mut dst = match create_buffer_and_memory(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(b) => b,
        Err(e) => {
            stage.destroy(&ctx.device);
            return Err(e);
        }
    };

    let copied = one_shot(ctx, pool, |cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        ctx.device
            .cmd_copy_buffer(cmd, stage.buffer, dst.buffer, std::slice::from_ref(&region));
    });
    stage.destroy(&ctx.device);
    if let Err(e) = copied {
        dst.destroy(&ctx.device);
        return Err(e);
    }
    Ok(dst)
}

/// Uploads every face of `texture` and leaves it in SHADER_READ_ONLY_OPTIMAL.
pub(crate) unsafe fn upload_texture(
    ctx: &GpuContext,
    pool: vk::CommandPool,
    texture: &Texture,
) -> Result<GpuImage> {
    let layers = texture.shape.layers();
    let face_bytes = (texture.width * texture.height * 4) as usize;
    if texture.byte_len() != face_bytes * layers as usize {
        return Err(anyhow!(
            "texture {}: {} bytes for {}x{}x{layers}",
            texture.label,
            texture.byte_len(),
            texture.width,
            texture.height
        ));
    }

    let mut stage = staging(ctx, &texture.pixels)?;
    let mut img = match create_image(
        ctx,
        &ImageDesc {
            format: texture_format(texture.encoding),
            extent: vk::Extent2D {
                width: texture.width,
                height: texture.height,
            },
            layers,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            cube: texture.shape == TextureShape::Cube,
        },
    ) {
        Ok(i) => i,
        Err(e) => {
            stage.destroy(&ctx.device);
            return Err(e);
        }
    };

    let range = subresource(vk::ImageAspectFlags::COLOR, layers);
    let regions: Vec<vk::BufferImageCopy> = (0..layers)
        .map(|layer| vk::BufferImageCopy {
            buffer_offset: (face_bytes * layer as usize) as vk::DeviceSize,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: texture.width,
                height: texture.height,
                depth: 1,
            },
        })
        .collect();

    let copied = one_shot(ctx, pool, |cmd| {
        cmd_transition(
            ctx,
            cmd,
            img.image,
            range,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        ctx.device.cmd_copy_buffer_to_image(
            cmd,
            stage.buffer,
            img.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &regions,
        );
        cmd_transition(
            ctx,
            cmd,
            img.image,
            range,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    });
    stage.destroy(&ctx.device);
    if let Err(e) = copied {
        img.destroy(&ctx.device);
        return Err(e);
    }
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_srgb_textures_get_srgb_views() {
        assert_eq!(texture_format(TexelEncoding::Srgb), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(texture_format(TexelEncoding::Linear), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(texture_format(TexelEncoding::Rgbe), vk::Format::R8G8B8A8_UNORM);
    }
}
