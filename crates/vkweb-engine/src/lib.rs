//! vkweb engine crate.
//!
//! Vulkan device and resource management for showing an off-screen browser
//! inside an immediate-mode UI: device and swapchain setup, frame
//! synchronization, BGRA pixel uploads and the per-frame driver.

pub mod browser;
pub mod core;
pub mod device;
pub mod logging;
pub mod paint;
pub mod render;
pub mod texture;
pub mod window;

#[cfg(test)]
mod testing;
