//! In-memory `GpuBackend` that records every call, for driver and slot tests.

use std::collections::{HashMap, VecDeque};

use ash::vk;

use crate::device::GpuError;
use crate::paint::ClearColor;
use crate::render::{AcquiredImage, GpuBackend, PresentOutcome, TextureBinding};
use crate::texture::PixelBuffer;

const IMAGE_COUNT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    WaitFence,
    Acquire,
    RearmFence,
    BeginPass(u32),
    EndPass,
    SubmitPresent(u32),
    RecreateSurface(vk::Extent2D),
    CreateTexture(u32),
    UpdateTexture(u32),
    DestroyView(u32),
    DestroyImage(u32),
    FreeMemory(u32),
    WaitIdle,
    Destroy,
}

struct Stored {
    extent: vk::Extent2D,
    rgba: Vec<u8>,
}

pub struct RecordingBackend {
    calls: Vec<Call>,
    extent: vk::Extent2D,
    fence_signaled: bool,
    next_image: u32,
    next_recording: u64,
    acquire_errors: VecDeque<GpuError>,
    present_outcomes: VecDeque<PresentOutcome>,
    textures: HashMap<u32, Stored>,
    next_texture: u32,
    fail_next_create: bool,
    destroyed: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            fence_signaled: true,
            next_image: 0,
            next_recording: 0,
            acquire_errors: VecDeque::new(),
            present_outcomes: VecDeque::new(),
            textures: HashMap::new(),
            next_texture: 1,
            fail_next_create: false,
            destroyed: false,
        }
    }
}

impl RecordingBackend {
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn fail_next_acquire(&mut self, err: GpuError) {
        self.acquire_errors.push_back(err);
    }

    pub fn next_present(&mut self, outcome: PresentOutcome) {
        self.present_outcomes.push_back(outcome);
    }

    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    pub fn fence_signaled(&self) -> bool {
        self.fence_signaled
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// RGBA value at `(x, y)` of texture `id`.
    pub fn sample(&self, id: u32, x: u32, y: u32) -> [u8; 4] {
        let stored = &self.textures[&id];
        let at = ((y * stored.extent.width + x) * 4) as usize;
        let mut px = [0u8; 4];
        px.copy_from_slice(&stored.rgba[at..at + 4]);
        px
    }

    pub fn contents(&self, id: u32) -> &[u8] {
        &self.textures[&id].rgba
    }
}

impl GpuBackend for RecordingBackend {
    type Texture = u32;
    type Recording = u64;

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_previous_frame(&mut self) -> Result<(), GpuError> {
        assert!(self.fence_signaled, "fence waited on with no submission pending: deadlock");
        self.fence_signaled = false;
        self.calls.push(Call::WaitFence);
        Ok(())
    }

    fn acquire_next_image(&mut self) -> Result<AcquiredImage, GpuError> {
        self.calls.push(Call::Acquire);
        if let Some(err) = self.acquire_errors.pop_front() {
            self.fence_signaled = true;
            self.calls.push(Call::RearmFence);
            return Err(err);
        }

        let index = self.next_image;
        self.next_image = (self.next_image + 1) % IMAGE_COUNT;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn begin_pass(&mut self, image_index: u32, _clear: ClearColor) -> Result<u64, GpuError> {
        self.calls.push(Call::BeginPass(image_index));
        self.next_recording += 1;
        Ok(self.next_recording)
    }

    fn end_pass(&mut self) -> Result<(), GpuError> {
        self.calls.push(Call::EndPass);
        Ok(())
    }

    fn submit_and_present(&mut self, image_index: u32) -> Result<PresentOutcome, GpuError> {
        self.calls.push(Call::SubmitPresent(image_index));
        self.fence_signaled = true;
        Ok(self.present_outcomes.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_surface(&mut self, extent: vk::Extent2D) -> Result<(), GpuError> {
        self.calls.push(Call::RecreateSurface(extent));
        self.extent = extent;
        self.fence_signaled = true;
        self.next_image = 0;
        Ok(())
    }

    fn create_texture(&mut self, pixels: &PixelBuffer<'_>) -> Result<u32, GpuError> {
        if std::mem::take(&mut self.fail_next_create) {
            return Err(GpuError::NoCompatibleMemory);
        }

        let id = self.next_texture;
        self.next_texture += 1;

        let mut rgba = vec![0; pixels.len()];
        pixels.write_rgba_into(&mut rgba);
        self.textures.insert(
            id,
            Stored {
                extent: pixels.extent(),
                rgba,
            },
        );
        self.calls.push(Call::CreateTexture(id));
        Ok(id)
    }

    fn update_texture(&mut self, texture: &u32, pixels: &PixelBuffer<'_>) -> Result<(), GpuError> {
        let stored = self
            .textures
            .get_mut(texture)
            .expect("update of a texture that does not exist");

        if stored.extent != pixels.extent() {
            return Err(GpuError::ExtentMismatch {
                expected: stored.extent,
                actual: pixels.extent(),
            });
        }

        pixels.write_rgba_into(&mut stored.rgba);
        self.calls.push(Call::UpdateTexture(*texture));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: u32) {
        assert!(
            self.textures.remove(&texture).is_some(),
            "texture {texture} released twice"
        );
        self.calls.push(Call::DestroyView(texture));
        self.calls.push(Call::DestroyImage(texture));
        self.calls.push(Call::FreeMemory(texture));
    }

    fn texture_binding(&self, texture: &u32) -> TextureBinding {
        TextureBinding {
            image_view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            extent: self.textures[texture].extent,
        }
    }

    fn wait_idle(&mut self) -> Result<(), GpuError> {
        self.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.calls.push(Call::Destroy);
        }
    }
}
