use std::time::Duration;

use ash::vk;

use crate::paint::ClearColor;

/// How the physical device is chosen among the qualifying candidates.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DeviceSelection {
    /// First device with a graphics+present queue family, in enumeration order.
    #[default]
    FirstQualifying,

    /// Discrete over integrated over virtual over CPU, then larger device-local heap.
    PreferDiscrete,
}

/// Initialization parameters for the GPU layer.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Application name reported to the driver.
    pub app_name: String,

    /// Requested swapchain extent in physical pixels.
    ///
    /// The surface may dictate its own extent; the requested one is then ignored.
    pub extent: vk::Extent2D,

    /// Background color the render pass clears to.
    pub clear_color: ClearColor,

    /// Enables the Khronos validation layer when it is installed.
    pub validation: bool,

    pub device_selection: DeviceSelection,

    /// Upper bound for the fence wait and the swapchain acquire.
    ///
    /// `None` waits indefinitely.
    pub frame_timeout: Option<Duration>,

    /// Descriptors per type in the pool handed to the UI backend.
    pub descriptor_pool_size: u32,
}

impl GpuInit {
    /// Timeout in nanoseconds as expected by Vulkan wait calls.
    pub(crate) fn timeout_ns(&self) -> u64 {
        self.frame_timeout
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX)
    }
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            app_name: "vkweb".to_string(),
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            clear_color: ClearColor::BLACK,
            validation: cfg!(debug_assertions),
            device_selection: DeviceSelection::FirstQualifying,
            frame_timeout: None,
            descriptor_pool_size: 1000,
        }
    }
}
