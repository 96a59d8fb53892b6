use ash::khr::swapchain;
use ash::vk;

use super::context::DeviceContext;
use super::error::{GpuError, VkResultExt};

/// Preferred swapchain format: sRGB BGRA.
pub(crate) const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Per-image render targets creation, so [`RenderTargets`] can be built
/// against a fake device in tests.
pub trait TargetDevice {
    fn new_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError>;
    fn new_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError>;
    fn new_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError>;
    fn drop_view(&self, view: vk::ImageView);
    fn drop_render_pass(&self, render_pass: vk::RenderPass);
    fn drop_framebuffer(&self, framebuffer: vk::Framebuffer);
}

impl TargetDevice for ash::Device {
    fn new_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError> {
        create_view(self, image, format)
    }

    fn new_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError> {
        create_render_pass(self, format)
    }

    fn new_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        let attachments = [view];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.create_framebuffer(&info, None) }.op("vkCreateFramebuffer")
    }

    fn drop_view(&self, view: vk::ImageView) {
        unsafe { self.destroy_image_view(view, None) }
    }

    fn drop_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.destroy_render_pass(render_pass, None) }
    }

    fn drop_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.destroy_framebuffer(framebuffer, None) }
    }
}

/// Image views, render pass and framebuffers for one swapchain.
///
/// Either one view and one framebuffer per swapchain image, or nothing at all.
#[derive(Debug, Default)]
pub struct RenderTargets {
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTargets {
    /// Builds the targets for `images`. On failure everything created so far
    /// is destroyed and the error returned.
    pub fn build<D: TargetDevice>(
        device: &D,
        images: &[vk::Image],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self, GpuError> {
        let mut targets = Self::default();
        if let Err(err) = targets.fill(device, images, format, extent) {
            targets.destroy(device);
            return Err(err);
        }
        Ok(targets)
    }

    fn fill<D: TargetDevice>(
        &mut self,
        device: &D,
        images: &[vk::Image],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<(), GpuError> {
        for &image in images {
            self.views.push(device.new_view(image, format)?);
        }

        self.render_pass = device.new_render_pass(format)?;

        for &view in &self.views {
            self.framebuffers
                .push(device.new_framebuffer(self.render_pass, view, extent)?);
        }
        Ok(())
    }

    /// Destroys framebuffers, render pass and image views, in that order.
    pub fn destroy<D: TargetDevice>(&mut self, device: &D) {
        for framebuffer in self.framebuffers.drain(..) {
            device.drop_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.drop_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        for view in self.views.drain(..) {
            device.drop_view(view);
        }
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

/// Swapchain plus everything sized by it: image views, render pass, framebuffers.
pub struct PresentationSurface {
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    targets: RenderTargets,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    min_image_count: u32,
}

impl PresentationSurface {
    /// Builds the swapchain, its views, the render pass and one framebuffer per image.
    ///
    /// Any failing step is fatal; objects already created are destroyed first.
    pub fn new(ctx: &DeviceContext, extent: vk::Extent2D) -> Result<Self, GpuError> {
        let loader = swapchain::Device::new(ctx.instance(), ctx.device());
        let mut surface = Self {
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            targets: RenderTargets::default(),
            format: PREFERRED_FORMAT,
            extent,
            min_image_count: 0,
        };

        if let Err(err) = surface.build(ctx, extent) {
            surface.destroy(ctx.device());
            return Err(err);
        }

        Ok(surface)
    }

    fn build(&mut self, ctx: &DeviceContext, requested: vk::Extent2D) -> Result<(), GpuError> {
        let device = ctx.device();
        let pd = ctx.physical_device();
        let surface = ctx.surface();

        let caps = unsafe { ctx.surface_loader().get_physical_device_surface_capabilities(pd, surface) }
            .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = unsafe { ctx.surface_loader().get_physical_device_surface_formats(pd, surface) }
            .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

        self.format = choose_surface_format(&formats).ok_or(GpuError::Vulkan {
            op: "vkGetPhysicalDeviceSurfaceFormatsKHR",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        self.extent = choose_extent(&caps, requested);
        self.min_image_count = choose_image_count(&caps);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(self.min_image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        self.swapchain = unsafe { self.loader.create_swapchain(&info, None) }.op("vkCreateSwapchainKHR")?;
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }.op("vkGetSwapchainImagesKHR")?;

        log::info!(
            "swapchain {}x{} {:?}, {} images (requested {})",
            self.extent.width,
            self.extent.height,
            self.format.format,
            self.images.len(),
            self.min_image_count,
        );

        self.targets = RenderTargets::build(device, &self.images, self.format.format, self.extent)?;
        Ok(())
    }

    /// Tears everything down and rebuilds it at `extent`.
    ///
    /// The caller must have waited for device idle.
    pub fn recreate(&mut self, ctx: &DeviceContext, extent: vk::Extent2D) -> Result<(), GpuError> {
        log::info!("recreating swapchain at {}x{}", extent.width, extent.height);
        self.destroy(ctx.device());
        if let Err(err) = self.build(ctx, extent) {
            self.destroy(ctx.device());
            return Err(err);
        }
        Ok(())
    }

    /// Destroys framebuffers, render pass, image views and swapchain, in that order.
    pub fn destroy(&mut self, device: &ash::Device) {
        self.targets.destroy(device);
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }

    pub(crate) fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.targets.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.targets.framebuffers.get(image_index as usize).copied()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn min_image_count(&self) -> u32 {
        self.min_image_count
    }
}

/// One more image than the minimum, bounded by the maximum when there is one.
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Uses the surface's own extent when it dictates one, else clamps `requested`.
pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| *f == PREFERRED_FORMAT)
        .or_else(|| formats.first().copied())
}

/// External dependency making the color write wait for the previous frame's output.
pub(crate) fn color_write_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

fn create_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&info, None) }.op("vkCreateImageView")
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass, GpuError> {
    let color = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref));

    let dependency = color_write_dependency();

    let info = vk::RenderPassCreateInfo::default()
        .attachments(std::slice::from_ref(&color))
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    unsafe { device.create_render_pass(&info, None) }.op("vkCreateRenderPass")
}
