// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use prism_render::{Acquire, Present, PresentMode, RenderSize, SWAPCHAIN_IMAGE_COUNT};
use tracing::info;

use crate::context::GpuContext;
use crate::image::{create_image, GpuImage, ImageDesc};

/// Present mode preference when vsync is on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

/// Format used for synthetic headless images; matches the usual SDR surface pick.
pub(crate) const HEADLESS_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Three images when the surface allows it; `max_image_count == 0` means no upper bound.
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = SWAPCHAIN_IMAGE_COUNT.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

/// SDR only: 8-bit sRGB BGRA, then RGBA, then UNORM with an sRGB color space.
pub(crate) fn pick_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<(vk::SurfaceFormatKHR, &'static str)> {
    let find = |pred: &dyn Fn(&vk::SurfaceFormatKHR) -> bool| formats.iter().copied().find(|f| pred(f));
    if let Some(f) = find(&|f| f.format == vk::Format::B8G8R8A8_SRGB) {
        return Some((f, "sdr_bgra8_srgb"));
    }
    if let Some(f) = find(&|f| f.format == vk::Format::R8G8B8A8_SRGB) {
        return Some((f, "sdr_rgba8_srgb"));
    }
    if let Some(f) = find(&|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        return Some((f, "sdr_bgra8_unorm_srgbcs"));
    }
    formats.first().map(|&f| (f, "driver_default"))
}

pub(crate) struct SurfaceChain {
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    /// One per swapchain image: a presented image's semaphore is only reused
    /// once that same image is acquired again.
    render_finished: Vec<vk::Semaphore>,
    vsync: bool,
    vsync_mode: VsyncMode,
}

pub(crate) struct OffscreenChain {
    images: Vec<GpuImage>,
}

/// Presentable images: a real swapchain, or synthetic images drawn offscreen.
pub(crate) enum SwapchainController {
    Interactive(SurfaceChain),
    Headless(OffscreenChain),
}

pub(crate) struct Chain {
    pub controller: SwapchainController,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

unsafe fn create_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: crate::image::subresource(vk::ImageAspectFlags::COLOR, 1),
            ..Default::default()
        };
        views.push(device.create_image_view(&iv_info, None)?);
    }
    Ok(views)
}

impl SurfaceChain {
    /// Creates (or re-creates from `self.swapchain`) the swapchain and its views.
    unsafe fn build(
        &mut self,
        ctx: &GpuContext,
        want: RenderSize,
    ) -> Result<(vk::Format, vk::Extent2D)> {
        let surf_i = &self.surface_loader;
        let caps = surf_i.get_physical_device_surface_capabilities(ctx.phys, self.surface)?;
        let formats = surf_i.get_physical_device_surface_formats(ctx.phys, self.surface)?;
        let modes = surf_i.get_physical_device_surface_present_modes(ctx.phys, self.surface)?;

        let (surf_format, reason) =
            pick_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
        let present_mode = choose_present_mode(&modes, self.vsync, self.vsync_mode);
        let extent = extent_from_caps(&caps, want);
        let min_count = image_count(&caps);

        info!(
            "swapchain: {reason}, format {}, present {}, vsync={}, extent {}x{}, images {}",
            fmt_name(surf_format.format),
            pm_name(present_mode),
            self.vsync,
            extent.width,
            extent.height,
            min_count
        );

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let old = self.swapchain;
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let swapchain = self
            .loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;
        if old != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(old, None);
        }
        self.swapchain = swapchain;
        self.images = self.loader.get_swapchain_images(swapchain)?;
        self.views = create_views(&ctx.device, &self.images, surf_format.format)?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        for _ in 0..self.images.len() {
            self.render_finished
                .push(ctx.device.create_semaphore(&sem_ci, None)?);
        }
        Ok((surf_format.format, extent))
    }

    /// Views and semaphores tied to the current image set.
    unsafe fn release_images(&mut self, device: &ash::Device) {
        for &iv in &self.views {
            device.destroy_image_view(iv, None);
        }
        for &s in &self.render_finished {
            device.destroy_semaphore(s, None);
        }
        self.views.clear();
        self.render_finished.clear();
        self.images.clear();
    }
}

impl OffscreenChain {
    unsafe fn build(ctx: &GpuContext, extent: vk::Extent2D) -> Result<Self> {
        let mut images = Vec::with_capacity(SWAPCHAIN_IMAGE_COUNT as usize);
        for _ in 0..SWAPCHAIN_IMAGE_COUNT {
            let desc = ImageDesc {
                format: HEADLESS_FORMAT,
                extent,
                layers: 1,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                aspect: vk::ImageAspectFlags::COLOR,
                cube: false,
            };
            match create_image(ctx, &desc) {
                Ok(img) => images.push(img),
                Err(e) => {
                    for img in &mut images {
                        img.destroy(&ctx.device);
                    }
                    return Err(e);
                }
            }
        }
        info!(
            "headless images: {} x {} {}x{}",
            images.len(),
            fmt_name(HEADLESS_FORMAT),
            extent.width,
            extent.height
        );
        Ok(Self { images })
    }

    unsafe fn destroy(&mut self, device: &ash::Device) {
        for img in &mut self.images {
            img.destroy(device);
        }
        self.images.clear();
    }
}

impl Chain {
    pub unsafe fn interactive(
        ctx: &GpuContext,
        surface_loader: surface::Instance,
        surface: vk::SurfaceKHR,
        size: RenderSize,
        vsync: bool,
        vsync_mode: VsyncMode,
    ) -> Result<Self> {
        let mut chain = SurfaceChain {
            loader: swapchain::Device::new(&ctx.instance, &ctx.device),
            surface_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            render_finished: Vec::new(),
            vsync,
            vsync_mode,
        };
        let (format, extent) = chain.build(ctx, size)?;
        Ok(Self {
            controller: SwapchainController::Interactive(chain),
            format,
            extent,
        })
    }

    pub unsafe fn headless(ctx: &GpuContext, size: RenderSize) -> Result<Self> {
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        Ok(Self {
            controller: SwapchainController::Headless(OffscreenChain::build(ctx, extent)?),
            format: HEADLESS_FORMAT,
            extent,
        })
    }

    pub fn mode(&self) -> PresentMode {
        match self.controller {
            SwapchainController::Interactive(_) => PresentMode::Interactive,
            SwapchainController::Headless(_) => PresentMode::Headless,
        }
    }

    pub fn image(&self, index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let i = index as usize;
        match &self.controller {
            SwapchainController::Interactive(c) => c.images.get(i).zip(c.views.get(i)).map(|(&a, &b)| (a, b)),
            SwapchainController::Headless(c) => c.images.get(i).map(|img| (img.image, img.view)),
        }
    }

    /// Layout the image must be left in once the frame is recorded.
    pub fn final_layout(&self) -> vk::ImageLayout {
        match self.controller {
            SwapchainController::Interactive(_) => vk::ImageLayout::PRESENT_SRC_KHR,
            SwapchainController::Headless(_) => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }

    pub fn render_finished(&self, index: u32) -> Option<vk::Semaphore> {
        match &self.controller {
            SwapchainController::Interactive(c) => c.render_finished.get(index as usize).copied(),
            SwapchainController::Headless(_) => None,
        }
    }

    /// Out-of-date maps to `Stale`; suboptimal images are still drawn and
    /// reported at present.
    pub unsafe fn acquire(&mut self, signal: vk::Semaphore) -> Result<Acquire> {
        let SwapchainController::Interactive(c) = &mut self.controller else {
            return Err(anyhow!("acquire called on headless images"));
        };
        match c
            .loader
            .acquire_next_image(c.swapchain, u64::MAX, signal, vk::Fence::null())
        {
            Ok((index, _suboptimal)) => Ok(Acquire::Ready(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
        }
    }

    pub unsafe fn present(&mut self, queue: vk::Queue, index: u32) -> Result<Present> {
        let SwapchainController::Interactive(c) = &mut self.controller else {
            return Err(anyhow!("present called on headless images"));
        };
        let wait = c
            .render_finished
            .get(index as usize)
            .copied()
            .ok_or_else(|| anyhow!("present of unknown image {index}"))?;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &c.swapchain,
            p_image_indices: &index,
            ..Default::default()
        };
        match c.loader.queue_present(queue, &present) {
            Ok(false) => Ok(Present::Done),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(e) => Err(anyhow!("queue_present: {e:?}")),
        }
    }

    /// Caller has waited for device idle. Returns true when the color format changed.
    pub unsafe fn recreate(&mut self, ctx: &GpuContext, size: RenderSize) -> Result<bool> {
        let old_format = self.format;
        match &mut self.controller {
            SwapchainController::Interactive(c) => {
                c.release_images(&ctx.device);
                let (format, extent) = c.build(ctx, size)?;
                self.format = format;
                self.extent = extent;
            }
            SwapchainController::Headless(c) => {
                c.destroy(&ctx.device);
                self.extent = vk::Extent2D {
                    width: size.width,
                    height: size.height,
                };
                *c = OffscreenChain::build(ctx, self.extent)?;
            }
        }
        Ok(self.format != old_format)
    }

    /// Views before swapchain, swapchain before surface. Caller has waited for
    /// device idle; the surface goes only after the device.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        match &mut self.controller {
            SwapchainController::Interactive(c) => {
                c.release_images(device);
                if c.swapchain != vk::SwapchainKHR::null() {
                    c.loader.destroy_swapchain(c.swapchain, None);
                    c.swapchain = vk::SwapchainKHR::null();
                }
            }
            SwapchainController::Headless(c) => c.destroy(device),
        }
    }

    pub unsafe fn destroy_surface(&mut self) {
        if let SwapchainController::Interactive(c) = &mut self.controller {
            if c.surface != vk::SurfaceKHR::null() {
                c.surface_loader.destroy_surface(c.surface, None);
                c.surface = vk::SurfaceKHR::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn vsync_off_prefers_immediate_and_falls_back_to_fifo() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&all, false, VsyncMode::Fifo),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&all, true, VsyncMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false, VsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn free_size_surfaces_clamp_the_request() {
        let c = caps(2, 0, (u32::MAX, u32::MAX));
        let e = extent_from_caps(&c, RenderSize::new(8000, 600));
        assert_eq!((e.width, e.height), (4096, 600));

        let fixed = caps(2, 0, (640, 480));
        let e = extent_from_caps(&fixed, RenderSize::new(8000, 600));
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn image_count_respects_surface_bounds() {
        assert_eq!(image_count(&caps(2, 0, (1, 1))), 3);
        assert_eq!(image_count(&caps(2, 2, (1, 1))), 2);
        assert_eq!(image_count(&caps(4, 8, (1, 1))), 4);
    }

    #[test]
    fn srgb_bgra_wins_over_driver_default() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::A2B10G10R10_UNORM_PACK32,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let (f, reason) = pick_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(reason, "sdr_bgra8_srgb");
        assert!(pick_surface_format(&[]).is_none());
    }
}
