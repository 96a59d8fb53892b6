use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::paint::ClearColor;
use crate::render::{AcquiredImage, GpuBackend, PresentOutcome, TextureBinding};
use crate::texture::{GpuTexture, PixelBuffer, TextureUploader};

use super::context::DeviceContext;
use super::error::{GpuError, VkResultExt};
use super::surface::PresentationSurface;
use super::sync::FrameSync;
use super::GpuInit;

/// Handles a Vulkan UI backend needs at initialisation.
///
/// The render pass is rebuilt with the swapchain; the replacement is
/// compatible, so pipelines created against the first one stay valid.
#[derive(Clone, Copy)]
pub struct UiInitInfo<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: &'a ash::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub render_pass: vk::RenderPass,
    pub descriptor_pool: vk::DescriptorPool,
    pub min_image_count: u32,
    pub image_count: u32,
}

/// The Vulkan implementation of [`GpuBackend`].
///
/// Owns the device context, the presentation surface, the frame
/// synchronizer, the texture uploader and the per-frame command buffer.
/// Teardown runs in reverse creation order with the context last.
pub struct VulkanBackend {
    ctx: DeviceContext,
    surface: PresentationSurface,
    sync: FrameSync,
    uploader: TextureUploader,
    command_buffer: vk::CommandBuffer,
    timeout_ns: u64,
    destroyed: bool,
}

impl VulkanBackend {
    /// Creates the whole GPU stack for a window.
    pub fn for_window<W>(window: &W, init: &GpuInit) -> Result<Self, GpuError>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window.display_handle()?.as_raw();
        let handle = window.window_handle()?.as_raw();
        Self::new(display, handle, init)
    }

    pub fn new(display: RawDisplayHandle, window: RawWindowHandle, init: &GpuInit) -> Result<Self, GpuError> {
        let mut ctx = DeviceContext::new(display, window, init)?;

        let (surface, sync, uploader, command_buffer) = match build(&ctx, init.extent) {
            Ok(parts) => parts,
            Err(err) => {
                ctx.destroy();
                return Err(err);
            }
        };

        log::info!("vulkan backend ready");

        Ok(Self {
            ctx,
            surface,
            sync,
            uploader,
            command_buffer,
            timeout_ns: init.timeout_ns(),
            destroyed: false,
        })
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn surface(&self) -> &PresentationSurface {
        &self.surface
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn ui_init_info(&self) -> UiInitInfo<'_> {
        UiInitInfo {
            instance: self.ctx.instance(),
            physical_device: self.ctx.physical_device(),
            device: self.ctx.device(),
            queue_family: self.ctx.queue_family(),
            queue: self.ctx.queue(),
            render_pass: self.surface.render_pass(),
            descriptor_pool: self.ctx.descriptor_pool(),
            min_image_count: self.surface.min_image_count(),
            image_count: self.surface.image_count(),
        }
    }
}

type Parts = (PresentationSurface, FrameSync, TextureUploader, vk::CommandBuffer);

fn build(ctx: &DeviceContext, extent: vk::Extent2D) -> Result<Parts, GpuError> {
    let device = ctx.device();

    let mut surface = PresentationSurface::new(ctx, extent)?;

    let mut sync = match FrameSync::new(device) {
        Ok(sync) => sync,
        Err(err) => {
            surface.destroy(device);
            return Err(err);
        }
    };

    let mut uploader = match TextureUploader::new(ctx) {
        Ok(uploader) => uploader,
        Err(err) => {
            sync.destroy(device);
            surface.destroy(device);
            return Err(err);
        }
    };

    let alloc = vk::CommandBufferAllocateInfo::default()
        .command_pool(ctx.command_pool())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    match unsafe { device.allocate_command_buffers(&alloc) }.op("vkAllocateCommandBuffers") {
        Ok(buffers) => Ok((surface, sync, uploader, buffers[0])),
        Err(err) => {
            uploader.destroy(device);
            sync.destroy(device);
            surface.destroy(device);
            Err(err)
        }
    }
}

impl GpuBackend for VulkanBackend {
    type Texture = GpuTexture;
    type Recording = vk::CommandBuffer;

    fn extent(&self) -> vk::Extent2D {
        self.surface.extent()
    }

    fn wait_for_previous_frame(&mut self) -> Result<(), GpuError> {
        self.sync.wait_for_previous_frame(self.ctx.device(), self.timeout_ns)
    }

    fn acquire_next_image(&mut self) -> Result<AcquiredImage, GpuError> {
        self.sync.acquire_next_image(
            self.ctx.device(),
            self.surface.loader(),
            self.surface.swapchain(),
            self.timeout_ns,
        )
    }

    fn begin_pass(&mut self, image_index: u32, clear: ClearColor) -> Result<vk::CommandBuffer, GpuError> {
        let device = self.ctx.device();
        let cmd = self.command_buffer;
        let framebuffer = self
            .surface
            .framebuffer(image_index)
            .ok_or(GpuError::FrameOrder("acquired image index has no framebuffer"))?;

        let clear_values = [clear.to_clear_value()];
        let pass = vk::RenderPassBeginInfo::default()
            .render_pass(self.surface.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.surface.extent(),
            })
            .clear_values(&clear_values);

        let begin = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .op("vkResetCommandBuffer")?;
            device.begin_command_buffer(cmd, &begin).op("vkBeginCommandBuffer")?;
            device.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
        }

        Ok(cmd)
    }

    fn end_pass(&mut self) -> Result<(), GpuError> {
        let device = self.ctx.device();
        unsafe {
            device.cmd_end_render_pass(self.command_buffer);
            device.end_command_buffer(self.command_buffer).op("vkEndCommandBuffer")
        }
    }

    fn submit_and_present(&mut self, image_index: u32) -> Result<PresentOutcome, GpuError> {
        self.sync.submit_and_present(
            self.ctx.device(),
            self.surface.loader(),
            self.ctx.queue(),
            self.command_buffer,
            self.surface.swapchain(),
            image_index,
        )
    }

    fn recreate_surface(&mut self, extent: vk::Extent2D) -> Result<(), GpuError> {
        self.ctx.wait_idle()?;
        self.surface.recreate(&self.ctx, extent)?;
        self.sync.rearm(self.ctx.device())
    }

    fn create_texture(&mut self, pixels: &PixelBuffer<'_>) -> Result<GpuTexture, GpuError> {
        self.uploader.create_texture(&self.ctx, pixels)
    }

    fn update_texture(&mut self, texture: &GpuTexture, pixels: &PixelBuffer<'_>) -> Result<(), GpuError> {
        self.uploader.update_texture(&self.ctx, texture, pixels)
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        self.uploader.destroy_texture(&self.ctx, texture);
    }

    fn texture_binding(&self, texture: &GpuTexture) -> TextureBinding {
        TextureBinding {
            image_view: texture.view(),
            sampler: self.uploader.sampler(),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            extent: texture.extent(),
        }
    }

    fn wait_idle(&mut self) -> Result<(), GpuError> {
        self.ctx.wait_idle()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let device = self.ctx.device();
        unsafe {
            device.free_command_buffers(self.ctx.command_pool(), &[self.command_buffer]);
        }
        self.command_buffer = vk::CommandBuffer::null();
        self.uploader.destroy(device);
        self.sync.destroy(device);
        self.surface.destroy(device);
        self.ctx.destroy();
        log::info!("vulkan backend destroyed");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(err) = self.ctx.wait_idle() {
            log::error!("device did not go idle before teardown: {err}");
        }
        self.destroy();
    }
}
