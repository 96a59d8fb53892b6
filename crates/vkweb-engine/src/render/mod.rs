//! Frame driver.
//!
//! The [`Renderer`] sequences one frame at a time against a [`GpuBackend`]:
//! wait for the previous frame, acquire, begin the cleared pass, let the UI
//! record, end, submit and present. It also owns the single uploaded texture.
//!
//! Convention:
//! - at most one frame in flight
//! - texture uploads happen only between frames
//! - out-of-date swapchains are rebuilt and the frame skipped

mod backend;
mod driver;

pub use backend::{AcquiredImage, ActiveFrame, FrameStatus, GpuBackend, PresentOutcome, TextureBinding};
pub use driver::Renderer;

/// Renderer over the Vulkan backend.
pub type VulkanRenderer = Renderer<crate::device::VulkanBackend>;
