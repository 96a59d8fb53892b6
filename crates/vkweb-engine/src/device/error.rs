use ash::vk;
use thiserror::Error;

/// Errors raised by the GPU layer.
///
/// Everything is surfaced synchronously from the call that caused it.
/// `OutOfDate` and `Timeout` are recoverable; the frame is skipped and the
/// caller may try again. Everything else is fatal for the device.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    SurfaceHandle(#[from] raw_window_handle::HandleError),

    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("no physical device exposes a queue family with graphics and present support")]
    NoSuitableDevice,

    #[error("no memory type matches the requested properties")]
    NoCompatibleMemory,

    #[error("swapchain is out of date")]
    OutOfDate,

    #[error("timed out waiting for the GPU")]
    Timeout,

    #[error("pixel buffer of {len} bytes does not describe a {width}x{height} BGRA/RGBA image")]
    InvalidPixelBuffer { width: u32, height: u32, len: usize },

    #[error("texture is {expected:?} but the upload is {actual:?}")]
    ExtentMismatch {
        expected: vk::Extent2D,
        actual: vk::Extent2D,
    },

    #[error("frame order violated: {0}")]
    FrameOrder(&'static str),
}

impl GpuError {
    /// Maps a raw Vulkan result into the error taxonomy.
    pub fn classify(op: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => GpuError::OutOfDate,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => GpuError::Timeout,
            result => GpuError::Vulkan { op, result },
        }
    }

    /// Returns true when skipping the current frame is an adequate response.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GpuError::OutOfDate | GpuError::Timeout)
    }
}

/// Attaches the failing operation name to a raw `VkResult`.
pub(crate) trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T, GpuError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn op(self, op: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| GpuError::classify(op, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_recoverable() {
        let err = GpuError::classify("vkAcquireNextImageKHR", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, GpuError::OutOfDate));
        assert!(err.is_recoverable());
    }

    #[test]
    fn timeouts_are_recoverable() {
        assert!(GpuError::classify("vkWaitForFences", vk::Result::TIMEOUT).is_recoverable());
        assert!(GpuError::classify("vkAcquireNextImageKHR", vk::Result::NOT_READY).is_recoverable());
    }

    #[test]
    fn device_loss_is_fatal_and_keeps_the_operation() {
        let err = GpuError::classify("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST);
        assert!(!err.is_recoverable());
        match err {
            GpuError::Vulkan { op, result } => {
                assert_eq!(op, "vkQueueSubmit");
                assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn op_extension_maps_errors() {
        let res: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = res.op("vkAllocateMemory").unwrap_err();
        assert!(err.to_string().contains("vkAllocateMemory"));
    }
}
