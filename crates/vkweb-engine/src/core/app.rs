use winit::event::WindowEvent;
use winit::window::WindowId;

use crate::render::VulkanRenderer;

use super::ctx::FrameCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract implemented by higher layers.
pub trait App {
    /// Called for window events, before the runtime handles them.
    fn on_window_event(&mut self, window_id: WindowId, event: &WindowEvent) -> AppControl {
        let _ = (window_id, event);
        AppControl::Continue
    }

    /// Called once the renderer for the window exists, before the first frame.
    ///
    /// This is where a UI backend gets initialised from
    /// [`VulkanBackend::ui_init_info`](crate::device::VulkanBackend::ui_init_info).
    fn on_renderer_ready(&mut self, renderer: &mut VulkanRenderer) -> AppControl {
        let _ = renderer;
        AppControl::Continue
    }

    /// Called once per redraw.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl;
}
