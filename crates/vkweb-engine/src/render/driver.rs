use ash::vk;

use crate::browser::PaintFrame;
use crate::device::GpuError;
use crate::paint::ClearColor;
use crate::texture::{PixelBuffer, TextureSlot, UploadOutcome};

use super::backend::{ActiveFrame, FrameStatus, GpuBackend, PresentOutcome, TextureBinding};

/// Drives one frame at a time and owns the single uploaded texture.
///
/// Per frame: `begin_frame`, record UI draw commands into the returned
/// [`ActiveFrame`], `end_frame`. Texture uploads happen between frames.
pub struct Renderer<B: GpuBackend> {
    backend: B,
    texture: TextureSlot<B::Texture>,
    clear_color: ClearColor,

    /// Extent requested by the window; applied at the next `begin_frame`.
    pending_resize: Option<vk::Extent2D>,
    /// Set when the swapchain reported out-of-date or suboptimal.
    recreate_pending: bool,

    /// Image index of the frame being recorded.
    active: Option<u32>,
    frames_presented: u64,
    shut_down: bool,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, clear_color: ClearColor) -> Self {
        Self {
            backend,
            texture: TextureSlot::default(),
            clear_color,
            pending_resize: None,
            recreate_pending: false,
            active: None,
            frames_presented: 0,
            shut_down: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, color: ClearColor) {
        self.clear_color = color;
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_frame_active(&self) -> bool {
        self.active.is_some()
    }

    /// Records a new drawable size. Zero-sized requests (minimized windows)
    /// keep frames skipped until a non-zero size arrives.
    ///
    /// A request for the extent already in use drops any pending resize
    /// instead of scheduling a rebuild.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        if extent == self.backend.extent() {
            self.pending_resize = None;
            return;
        }
        self.pending_resize = Some(extent);
    }

    /// Waits for the previous frame, acquires an image and begins the pass.
    ///
    /// Returns [`FrameStatus::Skipped`] when the window is minimized or the
    /// swapchain went out of date; in the latter case it has already been
    /// rebuilt.
    pub fn begin_frame(&mut self) -> Result<FrameStatus<B::Recording>, GpuError> {
        if self.shut_down {
            return Err(GpuError::FrameOrder("begin_frame after shutdown"));
        }
        if self.active.is_some() {
            return Err(GpuError::FrameOrder("begin_frame while a frame is active"));
        }

        if let Some(extent) = self.pending_resize {
            if extent.width == 0 || extent.height == 0 {
                return Ok(FrameStatus::Skipped);
            }
            self.backend.recreate_surface(extent)?;
            self.pending_resize = None;
            self.recreate_pending = false;
        } else if self.recreate_pending {
            let extent = self.backend.extent();
            self.backend.recreate_surface(extent)?;
            self.recreate_pending = false;
        }

        self.backend.wait_for_previous_frame()?;

        let acquired = match self.backend.acquire_next_image() {
            Ok(acquired) => acquired,
            Err(GpuError::OutOfDate) => {
                log::warn!("swapchain out of date on acquire; recreating");
                let extent = self.backend.extent();
                self.backend.recreate_surface(extent)?;
                return Ok(FrameStatus::Skipped);
            }
            Err(err) => return Err(err),
        };

        if acquired.suboptimal {
            log::debug!("suboptimal swapchain image; recreating after this frame");
            self.recreate_pending = true;
        }

        let recording = self.backend.begin_pass(acquired.index, self.clear_color)?;
        self.active = Some(acquired.index);

        Ok(FrameStatus::Ready(ActiveFrame {
            recording,
            image_index: acquired.index,
            extent: self.backend.extent(),
        }))
    }

    /// Ends the pass, submits, and presents the active frame.
    pub fn end_frame(&mut self) -> Result<(), GpuError> {
        let image_index = self
            .active
            .take()
            .ok_or(GpuError::FrameOrder("end_frame without an active frame"))?;

        self.backend.end_pass()?;

        match self.backend.submit_and_present(image_index)? {
            PresentOutcome::Presented => self.frames_presented += 1,
            PresentOutcome::Suboptimal => {
                self.frames_presented += 1;
                self.recreate_pending = true;
            }
            PresentOutcome::OutOfDate => {
                log::warn!("swapchain out of date on present; recreating next frame");
                self.recreate_pending = true;
            }
        }

        Ok(())
    }

    /// Uploads `pixels` into the texture slot.
    ///
    /// Not allowed while a frame is being recorded, since the current frame
    /// may reference the texture.
    pub fn upload(&mut self, pixels: &PixelBuffer<'_>) -> Result<UploadOutcome, GpuError> {
        if self.shut_down {
            return Err(GpuError::FrameOrder("upload after shutdown"));
        }
        if self.active.is_some() {
            return Err(GpuError::FrameOrder("upload while a frame is active"));
        }
        self.texture.upload(&mut self.backend, pixels)
    }

    /// Uploads a browser paint (BGRA).
    pub fn upload_paint(&mut self, frame: &PaintFrame) -> Result<UploadOutcome, GpuError> {
        let pixels = frame.pixels()?;
        self.upload(&pixels)
    }

    /// Binding for the UI to sample, or `None` when there is no texture.
    pub fn texture_binding(&self) -> Option<TextureBinding> {
        self.texture.get().map(|t| self.backend.texture_binding(t))
    }

    pub fn texture(&self) -> Option<&B::Texture> {
        self.texture.get()
    }

    /// Waits for idle, releases the texture, then tears down the backend.
    ///
    /// Idempotent. Teardown proceeds even if the idle wait fails; that error
    /// is returned afterwards.
    pub fn shutdown(&mut self) -> Result<(), GpuError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.active = None;

        let idle = self.backend.wait_idle();
        if let Err(err) = &idle {
            log::error!("device did not go idle before shutdown: {err}");
        }

        self.texture.clear(&mut self.backend);
        self.backend.destroy();
        log::info!("renderer shut down after {} frames", self.frames_presented);

        idle
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("renderer shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingBackend};

    fn renderer() -> Renderer<RecordingBackend> {
        Renderer::new(RecordingBackend::default(), ClearColor::BLACK)
    }

    fn frame(r: &mut Renderer<RecordingBackend>) {
        match r.begin_frame().unwrap() {
            FrameStatus::Ready(_) => r.end_frame().unwrap(),
            FrameStatus::Skipped => panic!("frame unexpectedly skipped"),
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn each_wait_follows_the_previous_submission() {
        let mut r = renderer();
        for _ in 0..5 {
            frame(&mut r);
        }

        let mut pending_signal = true;
        for call in r.backend().calls() {
            match call {
                Call::WaitFence => {
                    assert!(pending_signal, "frame began before the previous one signalled");
                    pending_signal = false;
                }
                Call::SubmitPresent(_) | Call::RearmFence => pending_signal = true,
                _ => {}
            }
        }
        assert_eq!(r.frames_presented(), 5);
    }

    #[test]
    fn one_frame_records_in_order() {
        let mut r = renderer();
        let FrameStatus::Ready(active) = r.begin_frame().unwrap() else {
            panic!("expected a frame");
        };
        r.end_frame().unwrap();

        assert_eq!(active.extent, extent(1280, 720));
        assert_eq!(
            r.backend().calls(),
            &[
                Call::WaitFence,
                Call::Acquire,
                Call::BeginPass(active.image_index),
                Call::EndPass,
                Call::SubmitPresent(active.image_index),
            ]
        );
    }

    #[test]
    fn frame_order_is_enforced() {
        let mut r = renderer();
        assert!(matches!(r.end_frame(), Err(GpuError::FrameOrder(_))));

        let _ = r.begin_frame().unwrap();
        assert!(matches!(r.begin_frame(), Err(GpuError::FrameOrder(_))));

        let data = vec![0u8; 16];
        let pixels = PixelBuffer::bgra(2, 2, &data).unwrap();
        assert!(matches!(r.upload(&pixels), Err(GpuError::FrameOrder(_))));

        r.end_frame().unwrap();
        r.upload(&pixels).unwrap();
    }

    #[test]
    fn browser_scenario() {
        let mut r = renderer();

        let zeros = vec![0u8; 800 * 600 * 4];
        let outcome = r.upload(&PixelBuffer::bgra(800, 600, &zeros).unwrap()).unwrap();
        assert_eq!(outcome, UploadOutcome::Created);
        let first = *r.texture().unwrap();
        assert_eq!(r.backend().sample(first, 0, 0), [0, 0, 0, 0]);
        frame(&mut r);

        let blue = [255u8, 0, 0, 255].repeat(800 * 600);
        let outcome = r.upload(&PixelBuffer::bgra(800, 600, &blue).unwrap()).unwrap();
        assert_eq!(outcome, UploadOutcome::Updated);
        assert_eq!(r.backend().sample(first, 0, 0), [0, 0, 255, 255]);
        assert_eq!(r.backend().sample(first, 799, 599), [0, 0, 255, 255]);
        frame(&mut r);

        let small = vec![7u8; 400 * 300 * 4];
        let outcome = r.upload(&PixelBuffer::bgra(400, 300, &small).unwrap()).unwrap();
        assert_eq!(outcome, UploadOutcome::Recreated);
        assert_eq!(r.texture_binding().unwrap().extent, extent(400, 300));
        assert_eq!(r.backend().live_textures(), 1);
        assert!(r.backend().calls().contains(&Call::FreeMemory(first)));
    }

    #[test]
    fn dimension_change_releases_old_texture_first() {
        let mut r = renderer();
        let a = vec![0u8; 8 * 8 * 4];
        let c = vec![0u8; 4 * 2 * 4];

        r.upload(&PixelBuffer::rgba(8, 8, &a).unwrap()).unwrap();
        let old = *r.texture().unwrap();
        r.upload(&PixelBuffer::rgba(4, 2, &c).unwrap()).unwrap();
        let new = *r.texture().unwrap();

        let calls = r.backend().calls();
        let freed = calls.iter().position(|c| *c == Call::FreeMemory(old)).unwrap();
        let created = calls.iter().position(|c| *c == Call::CreateTexture(new)).unwrap();
        assert!(freed < created);
        assert_eq!(r.texture_binding().unwrap().extent, extent(4, 2));
    }

    #[test]
    fn identical_updates_are_idempotent() {
        let mut r = renderer();
        let data: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
        let pixels = PixelBuffer::bgra(4, 4, &data).unwrap();

        r.upload(&pixels).unwrap();
        let id = *r.texture().unwrap();
        r.upload(&pixels).unwrap();
        let once = r.backend().contents(id).to_vec();
        r.upload(&pixels).unwrap();

        assert_eq!(r.backend().contents(id), once.as_slice());
    }

    #[test]
    fn shutdown_without_texture() {
        let mut r = renderer();
        r.shutdown().unwrap();

        assert_eq!(r.backend().calls(), &[Call::WaitIdle, Call::Destroy]);
        assert!(r.backend().is_destroyed());
    }

    #[test]
    fn shutdown_releases_texture_before_backend() {
        let mut r = renderer();
        let data = vec![0u8; 16];
        r.upload(&PixelBuffer::bgra(2, 2, &data).unwrap()).unwrap();
        let id = *r.texture().unwrap();
        frame(&mut r);
        r.backend_mut().clear_calls();

        r.shutdown().unwrap();

        assert_eq!(
            r.backend().calls(),
            &[
                Call::WaitIdle,
                Call::DestroyView(id),
                Call::DestroyImage(id),
                Call::FreeMemory(id),
                Call::Destroy,
            ]
        );
        assert_eq!(r.backend().live_textures(), 0);

        // A second shutdown does nothing.
        r.shutdown().unwrap();
        assert_eq!(r.backend().calls().len(), 5);
        assert!(matches!(r.begin_frame(), Err(GpuError::FrameOrder(_))));
    }

    #[test]
    fn out_of_date_acquire_recreates_and_skips() {
        let mut r = renderer();
        frame(&mut r);
        r.backend_mut().clear_calls();
        r.backend_mut().fail_next_acquire(GpuError::OutOfDate);

        assert!(matches!(r.begin_frame().unwrap(), FrameStatus::Skipped));
        assert_eq!(
            r.backend().calls(),
            &[
                Call::WaitFence,
                Call::Acquire,
                Call::RearmFence,
                Call::RecreateSurface(extent(1280, 720)),
            ]
        );
        assert!(r.backend().fence_signaled());
        assert!(!r.is_frame_active());

        // The next frame goes through normally.
        frame(&mut r);
        assert_eq!(r.frames_presented(), 2);
    }

    #[test]
    fn timeout_on_acquire_is_recoverable() {
        let mut r = renderer();
        r.backend_mut().fail_next_acquire(GpuError::Timeout);

        let err = r.begin_frame().unwrap_err();
        assert!(err.is_recoverable());
        assert!(r.backend().fence_signaled());
        frame(&mut r);
    }

    #[test]
    fn out_of_date_present_recreates_at_next_frame() {
        let mut r = renderer();
        r.backend_mut().next_present(PresentOutcome::OutOfDate);
        frame(&mut r);
        assert_eq!(r.frames_presented(), 0);
        r.backend_mut().clear_calls();

        frame(&mut r);
        assert_eq!(r.backend().calls()[0], Call::RecreateSurface(extent(1280, 720)));
    }

    #[test]
    fn resize_is_applied_before_waiting() {
        let mut r = renderer();
        r.request_resize(extent(640, 480));
        let FrameStatus::Ready(active) = r.begin_frame().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(active.extent, extent(640, 480));
        assert_eq!(r.backend().calls()[0], Call::RecreateSurface(extent(640, 480)));
        r.end_frame().unwrap();
    }

    #[test]
    fn resize_to_current_extent_does_not_rebuild() {
        let mut r = renderer();
        let current = r.backend().extent();
        r.request_resize(current);
        frame(&mut r);
        assert!(
            !r.backend()
                .calls()
                .iter()
                .any(|c| matches!(c, Call::RecreateSurface(_)))
        );

        // Bouncing back to the current size cancels an earlier request.
        r.request_resize(extent(640, 480));
        r.request_resize(current);
        frame(&mut r);
        assert!(
            !r.backend()
                .calls()
                .iter()
                .any(|c| matches!(c, Call::RecreateSurface(_)))
        );
        assert_eq!(r.frames_presented(), 2);
    }

    #[test]
    fn minimized_window_skips_until_restored() {
        let mut r = renderer();
        r.request_resize(extent(0, 0));
        assert!(matches!(r.begin_frame().unwrap(), FrameStatus::Skipped));
        assert!(r.backend().calls().is_empty());

        r.request_resize(extent(320, 200));
        frame(&mut r);
        assert_eq!(r.backend().extent(), extent(320, 200));
    }

    #[test]
    fn paint_frames_upload_as_bgra() {
        let mut r = renderer();
        let paint = PaintFrame {
            width: 1,
            height: 1,
            data: vec![255, 0, 0, 255],
        };
        r.upload_paint(&paint).unwrap();
        let id = *r.texture().unwrap();
        assert_eq!(r.backend().sample(id, 0, 0), [0, 0, 255, 255]);
    }
}
