// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: dynamic rendering with synchronization2, one pipeline per
//! primitive topology, and either a window swapchain or offscreen images.

mod backend;
mod buffer;
mod context;
mod frame;
mod image;
mod pipeline;
mod swapchain;
mod upload;

pub use backend::{DestroyRequest, VkBackend, VkMesh, VkOptions, VkTexture};
pub use swapchain::VsyncMode;
