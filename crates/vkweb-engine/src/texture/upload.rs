use ash::vk;

use crate::device::memory::{self, Buffer};
use crate::device::{DeviceContext, GpuError, VkResultExt};

use super::pixels::PixelBuffer;

/// Texture format; pixels are converted to this byte order while staging.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Upper bound for sampler anisotropy, further capped by the device limit.
const MAX_ANISOTROPY: f32 = 16.0;

/// Device-local sampled image with its memory and view.
///
/// Never resized in place: a new extent means a new texture.
#[derive(Debug)]
pub struct GpuTexture {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

impl GpuTexture {
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Copies CPU pixel buffers into device-local textures.
///
/// Every upload goes through a fresh staging buffer and a one-shot command
/// buffer, then blocks on queue idle. The sampler is shared by all textures.
pub struct TextureUploader {
    sampler: vk::Sampler,
}

impl TextureUploader {
    pub fn new(ctx: &DeviceContext) -> Result<Self, GpuError> {
        let anisotropy = sampler_anisotropy(ctx.max_anisotropy());

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mip_lod_bias(0.0)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { ctx.device().create_sampler(&info, None) }.op("vkCreateSampler")?;
        log::debug!("texture sampler created (anisotropy: {anisotropy:?})");

        Ok(Self { sampler })
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Creates a texture holding `pixels`, ready for sampling.
    ///
    /// On failure, everything created so far is released.
    pub fn create_texture(&self, ctx: &DeviceContext, pixels: &PixelBuffer<'_>) -> Result<GpuTexture, GpuError> {
        let device = ctx.device();
        let extent = pixels.extent();

        let staging = stage(ctx, pixels)?;

        let (image, memory) = match create_image(ctx, extent) {
            Ok(created) => created,
            Err(err) => {
                staging.destroy(device);
                return Err(err);
            }
        };

        let copied = copy_to_image(ctx, &staging, image, extent, vk::ImageLayout::UNDEFINED);
        staging.destroy(device);

        let view = copied.and_then(|()| create_view(device, image));
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(err);
            }
        };

        log::debug!("created {}x{} texture", extent.width, extent.height);

        Ok(GpuTexture {
            image,
            memory,
            view,
            extent,
        })
    }

    /// Overwrites the contents of `texture`; dimensions must match.
    pub fn update_texture(
        &self,
        ctx: &DeviceContext,
        texture: &GpuTexture,
        pixels: &PixelBuffer<'_>,
    ) -> Result<(), GpuError> {
        if pixels.extent() != texture.extent {
            return Err(GpuError::ExtentMismatch {
                expected: texture.extent,
                actual: pixels.extent(),
            });
        }

        let staging = stage(ctx, pixels)?;
        let copied = copy_to_image(
            ctx,
            &staging,
            texture.image,
            texture.extent,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        staging.destroy(ctx.device());
        copied
    }

    /// Releases view, image and memory, in that order.
    ///
    /// The texture must no longer be referenced by pending GPU work.
    pub fn destroy_texture(&self, ctx: &DeviceContext, texture: GpuTexture) {
        let device = ctx.device();
        unsafe {
            device.destroy_image_view(texture.view, None);
            device.destroy_image(texture.image, None);
            device.free_memory(texture.memory, None);
        }
        log::debug!(
            "destroyed {}x{} texture",
            texture.extent.width,
            texture.extent.height
        );
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        if self.sampler != vk::Sampler::null() {
            unsafe { device.destroy_sampler(self.sampler, None) };
            self.sampler = vk::Sampler::null();
        }
    }
}

/// Clamps the device limit to [`MAX_ANISOTROPY`]; `None` disables anisotropy.
pub(crate) fn sampler_anisotropy(device_limit: Option<f32>) -> Option<f32> {
    device_limit
        .filter(|&limit| limit >= 1.0)
        .map(|limit| limit.min(MAX_ANISOTROPY))
}

/// Access masks and pipeline stages for one image layout transition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Returns the barrier parameters for the transitions uploads perform.
    pub(crate) fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<Self> {
        use vk::ImageLayout as L;

        let t = match (old, new) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            },
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => Self {
                src_access: vk::AccessFlags::SHADER_READ,
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            },
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Self {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            },
            _ => return None,
        };
        Some(t)
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Fills a host-visible staging buffer with `pixels` converted to RGBA.
fn stage(ctx: &DeviceContext, pixels: &PixelBuffer<'_>) -> Result<Buffer, GpuError> {
    let staging = Buffer::new(
        ctx,
        pixels.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    if let Err(err) = staging.write_with(ctx.device(), |bytes| pixels.write_rgba_into(bytes)) {
        staging.destroy(ctx.device());
        return Err(err);
    }

    Ok(staging)
}

fn create_image(ctx: &DeviceContext, extent: vk::Extent2D) -> Result<(vk::Image, vk::DeviceMemory), GpuError> {
    let device = ctx.device();
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(TEXTURE_FORMAT)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.create_image(&info, None) }.op("vkCreateImage")?;
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let memory = match memory::allocate(ctx, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { device.destroy_image(image, None) };
            return Err(err);
        }
    };

    if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) }.op("vkBindImageMemory") {
        unsafe {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
        }
        return Err(err);
    }

    Ok((image, memory))
}

fn create_view(device: &ash::Device, image: vk::Image) -> Result<vk::ImageView, GpuError> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(TEXTURE_FORMAT)
        .subresource_range(COLOR_RANGE);

    unsafe { device.create_image_view(&info, None) }.op("vkCreateImageView")
}

fn barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(), GpuError> {
    let t = LayoutTransition::between(old, new).ok_or(GpuError::Vulkan {
        op: "vkCmdPipelineBarrier",
        result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
    })?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .src_access_mask(t.src_access)
        .dst_access_mask(t.dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            t.src_stage,
            t.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
    Ok(())
}

/// Records and submits the full-extent buffer-to-image copy, then waits for
/// the queue to go idle.
fn copy_to_image(
    ctx: &DeviceContext,
    staging: &Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
    from: vk::ImageLayout,
) -> Result<(), GpuError> {
    let device = ctx.device();

    let alloc = vk::CommandBufferAllocateInfo::default()
        .command_pool(ctx.command_pool())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers = unsafe { device.allocate_command_buffers(&alloc) }.op("vkAllocateCommandBuffers")?;
    let cmd = buffers[0];

    let result = record_copy(device, cmd, staging.buffer, image, extent, from).and_then(|()| {
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        unsafe {
            device
                .queue_submit(ctx.queue(), std::slice::from_ref(&submit), vk::Fence::null())
                .op("vkQueueSubmit")?;
            device.queue_wait_idle(ctx.queue()).op("vkQueueWaitIdle")
        }
    });

    unsafe { device.free_command_buffers(ctx.command_pool(), &buffers) };
    result
}

fn record_copy(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
    from: vk::ImageLayout,
) -> Result<(), GpuError> {
    let begin = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin) }.op("vkBeginCommandBuffer")?;

    barrier(device, cmd, image, from, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;

    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
    }

    barrier(
        device,
        cmd,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;

    unsafe { device.end_command_buffer(cmd) }.op("vkEndCommandBuffer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_upload_starts_from_undefined() {
        let t = LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn update_waits_for_fragment_reads() {
        let t = LayoutTransition::between(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(t.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn copy_result_is_made_visible_to_fragment_shader() {
        let t = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn unsupported_transition_is_rejected() {
        assert!(LayoutTransition::between(vk::ImageLayout::GENERAL, vk::ImageLayout::PRESENT_SRC_KHR).is_none());
    }

    #[test]
    fn anisotropy_is_capped() {
        assert_eq!(sampler_anisotropy(Some(32.0)), Some(16.0));
        assert_eq!(sampler_anisotropy(Some(8.0)), Some(8.0));
        assert_eq!(sampler_anisotropy(None), None);
    }
}
