use ash::vk;

use crate::device::GpuError;
use crate::paint::ClearColor;
use crate::texture::PixelBuffer;

/// Swapchain image handed out by an acquire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the swapchain no longer matches the surface.
    pub suboptimal: bool,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    /// Not presented; the surface must be recreated.
    OutOfDate,
}

/// What the UI needs to sample the uploaded texture.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TextureBinding {
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
    /// Layout the image is in whenever a frame samples it.
    pub layout: vk::ImageLayout,
    pub extent: vk::Extent2D,
}

/// A frame between `begin_frame` and `end_frame`.
///
/// UI draw commands go into `recording`, inside the already-begun render pass.
#[derive(Debug, Copy, Clone)]
pub struct ActiveFrame<R> {
    pub recording: R,
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// Result of `Renderer::begin_frame`.
#[derive(Debug, Copy, Clone)]
pub enum FrameStatus<R> {
    Ready(ActiveFrame<R>),
    /// Nothing to draw into this time; try again next frame.
    Skipped,
}

/// Low-level GPU operations the frame driver orchestrates.
///
/// Implemented by the Vulkan backend. Every call is made from the thread
/// that drives the frame loop.
pub trait GpuBackend {
    /// A live sampled texture.
    type Texture;
    /// Handle draw commands are recorded into.
    type Recording: Copy;

    /// Current swapchain extent.
    fn extent(&self) -> vk::Extent2D;

    /// Blocks until the previous submission completed, then resets the fence.
    fn wait_for_previous_frame(&mut self) -> Result<(), GpuError>;

    /// Acquires the next image. Any failure leaves the fence signaled.
    fn acquire_next_image(&mut self) -> Result<AcquiredImage, GpuError>;

    /// Starts recording and begins the render pass on `image_index`.
    fn begin_pass(&mut self, image_index: u32, clear: ClearColor) -> Result<Self::Recording, GpuError>;

    /// Ends the render pass and the recording.
    fn end_pass(&mut self) -> Result<(), GpuError>;

    fn submit_and_present(&mut self, image_index: u32) -> Result<PresentOutcome, GpuError>;

    /// Waits for idle and rebuilds the swapchain and synchronization objects.
    fn recreate_surface(&mut self, extent: vk::Extent2D) -> Result<(), GpuError>;

    fn create_texture(&mut self, pixels: &PixelBuffer<'_>) -> Result<Self::Texture, GpuError>;

    fn update_texture(&mut self, texture: &Self::Texture, pixels: &PixelBuffer<'_>) -> Result<(), GpuError>;

    /// Releases view, image and memory. The GPU must not be using them.
    fn destroy_texture(&mut self, texture: Self::Texture);

    fn texture_binding(&self, texture: &Self::Texture) -> TextureBinding;

    fn wait_idle(&mut self) -> Result<(), GpuError>;

    /// Releases every remaining GPU object, device context last.
    ///
    /// Must be idempotent.
    fn destroy(&mut self);
}
