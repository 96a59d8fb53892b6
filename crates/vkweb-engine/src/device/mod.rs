//! Vulkan device and resource management.
//!
//! This module is responsible for:
//! - creating the instance, surface, physical/logical device and queue
//! - building the swapchain, render pass and framebuffers
//! - per-frame synchronization
//! - composing all of the above into [`VulkanBackend`]

mod backend;
mod context;
mod debug;
mod error;
mod init;
pub(crate) mod memory;
mod select;
mod surface;
mod sync;

pub use backend::{UiInitInfo, VulkanBackend};
pub use context::DeviceContext;
pub use error::GpuError;
pub(crate) use error::VkResultExt;
pub use init::{DeviceSelection, GpuInit};
pub use surface::{PresentationSurface, RenderTargets, TargetDevice};
pub use sync::{FrameSync, SyncDevice};
