use ash::vk;
use winit::window::{Window, WindowId};

use crate::browser::PaintSlot;
use crate::device::GpuError;
use crate::render::{ActiveFrame, FrameStatus, GpuBackend, Renderer, TextureBinding, VulkanRenderer};
use crate::texture::UploadOutcome;

use super::app::AppControl;

/// Per-window handles and immutable window metadata.
pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl WindowCtx<'_> {
    /// Drawable size in physical pixels.
    pub fn physical_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

/// Per-frame context passed to `core::App::on_frame`.
pub struct FrameCtx<'a> {
    pub window: WindowCtx<'a>,
    pub renderer: &'a mut VulkanRenderer,
}

impl FrameCtx<'_> {
    /// Uploads the browser's latest paint if there is a new one.
    pub fn upload_paint(&mut self, slot: &PaintSlot) -> Result<Option<UploadOutcome>, GpuError> {
        upload_dirty(&mut *self.renderer, slot)
    }

    /// Begins a frame, calls `draw` with the command buffer inside the
    /// cleared render pass and the current texture binding, then presents.
    pub fn render<F>(&mut self, draw: F) -> AppControl
    where
        F: FnOnce(&ActiveFrame<vk::CommandBuffer>, Option<TextureBinding>),
    {
        let window = self.window.window;
        drive_frame(&mut *self.renderer, |frame, binding| {
            draw(frame, binding);
            window.pre_present_notify();
        })
    }
}

/// Takes the dirty paint out of `slot`, if any, and uploads it.
pub fn upload_dirty<B: GpuBackend>(
    renderer: &mut Renderer<B>,
    slot: &PaintSlot,
) -> Result<Option<UploadOutcome>, GpuError> {
    match slot.take_dirty() {
        Some(frame) => renderer.upload_paint(&frame).map(Some),
        None => Ok(None),
    }
}

/// One begin → draw → end cycle with errors mapped to an [`AppControl`].
///
/// Skipped frames and recoverable errors continue; anything else exits.
pub fn drive_frame<B, F>(renderer: &mut Renderer<B>, draw: F) -> AppControl
where
    B: GpuBackend,
    F: FnOnce(&ActiveFrame<B::Recording>, Option<TextureBinding>),
{
    let frame = match renderer.begin_frame() {
        Ok(FrameStatus::Ready(frame)) => frame,
        Ok(FrameStatus::Skipped) => return AppControl::Continue,
        Err(err) => return control_for(err),
    };

    draw(&frame, renderer.texture_binding());

    match renderer.end_frame() {
        Ok(()) => AppControl::Continue,
        Err(err) => control_for(err),
    }
}

fn control_for(err: GpuError) -> AppControl {
    if err.is_recoverable() {
        log::warn!("frame skipped: {err}");
        AppControl::Continue
    } else {
        log::error!("fatal frame error: {err}");
        AppControl::Exit
    }
}
