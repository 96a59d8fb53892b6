use ash::khr::swapchain;
use ash::vk;

use crate::render::{AcquiredImage, PresentOutcome};

use super::error::{GpuError, VkResultExt};

/// Semaphores and fence for the single frame in flight.
///
/// Frame N+1 cannot start recording before the fence signalled by frame N's
/// submission has been waited on.
pub struct FrameSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Creation and destruction of the sync objects, so the handle
/// bookkeeping can run against a fake device in tests.
pub trait SyncDevice {
    fn new_semaphore(&self) -> Result<vk::Semaphore, GpuError>;
    fn new_signaled_fence(&self) -> Result<vk::Fence, GpuError>;
    fn drop_semaphore(&self, semaphore: vk::Semaphore);
    fn drop_fence(&self, fence: vk::Fence);
}

impl SyncDevice for ash::Device {
    fn new_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.create_semaphore(&info, None) }.op("vkCreateSemaphore")
    }

    fn new_signaled_fence(&self) -> Result<vk::Fence, GpuError> {
        // Signaled so the very first wait returns immediately.
        let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe { self.create_fence(&info, None) }.op("vkCreateFence")
    }

    fn drop_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.destroy_semaphore(semaphore, None) }
    }

    fn drop_fence(&self, fence: vk::Fence) {
        unsafe { self.destroy_fence(fence, None) }
    }
}

impl FrameSync {
    pub fn new<D: SyncDevice>(device: &D) -> Result<Self, GpuError> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };

        if let Err(err) = sync.create(device) {
            sync.destroy(device);
            return Err(err);
        }

        Ok(sync)
    }

    fn create<D: SyncDevice>(&mut self, device: &D) -> Result<(), GpuError> {
        self.image_available = device.new_semaphore()?;
        self.render_finished = device.new_semaphore()?;
        self.in_flight = device.new_signaled_fence()?;
        Ok(())
    }

    /// Waits for the previous submission, then resets the fence.
    ///
    /// On timeout the fence is left signaled-pending and untouched.
    pub fn wait_for_previous_frame(&self, device: &ash::Device, timeout_ns: u64) -> Result<(), GpuError> {
        let fences = [self.in_flight];
        unsafe {
            device.wait_for_fences(&fences, true, timeout_ns).op("vkWaitForFences")?;
            device.reset_fences(&fences).op("vkResetFences")?;
        }
        Ok(())
    }

    /// Acquires the next swapchain image, signalling `image_available`.
    ///
    /// The fence has already been reset at this point, so any failure
    /// replaces it with a signaled one; otherwise the next wait would block
    /// forever. The semaphores are left alone: the previous present may still
    /// be waiting on `render_finished`.
    pub fn acquire_next_image(
        &mut self,
        device: &ash::Device,
        loader: &swapchain::Device,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
    ) -> Result<AcquiredImage, GpuError> {
        let acquired = unsafe {
            loader.acquire_next_image(swapchain, timeout_ns, self.image_available, vk::Fence::null())
        };

        match acquired {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(result) => {
                self.replace_fence(device)?;
                Err(GpuError::classify("vkAcquireNextImageKHR", result))
            }
        }
    }

    /// Submits `cmd` and queues the image for presentation.
    ///
    /// Out-of-date and suboptimal presents are reported, not raised; the
    /// submission itself still signals the fence.
    pub fn submit_and_present(
        &self,
        device: &ash::Device,
        loader: &swapchain::Device,
        queue: vk::Queue,
        cmd: vk::CommandBuffer,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    ) -> Result<PresentOutcome, GpuError> {
        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [self.render_finished];

        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { device.queue_submit(queue, std::slice::from_ref(&submit), self.in_flight) }
            .op("vkQueueSubmit")?;

        let swapchains = [swapchain];
        let indices = [image_index];
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { loader.queue_present(queue, &present) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(GpuError::classify("vkQueuePresentKHR", result)),
        }
    }

    /// Swaps the in-flight fence for a new signaled one.
    ///
    /// Only valid while the fence is unsignaled and nothing was submitted
    /// against it since the last reset.
    pub fn replace_fence<D: SyncDevice>(&mut self, device: &D) -> Result<(), GpuError> {
        log::debug!("replacing in-flight fence");
        let fresh = device.new_signaled_fence()?;
        if self.in_flight != vk::Fence::null() {
            device.drop_fence(self.in_flight);
        }
        self.in_flight = fresh;
        Ok(())
    }

    /// Recreates both semaphores and a signaled fence.
    ///
    /// The caller must have waited for device idle.
    pub fn rearm<D: SyncDevice>(&mut self, device: &D) -> Result<(), GpuError> {
        log::debug!("re-arming frame synchronization");
        self.destroy(device);
        if let Err(err) = self.create(device) {
            self.destroy(device);
            return Err(err);
        }
        Ok(())
    }

    pub fn destroy<D: SyncDevice>(&mut self, device: &D) {
        if self.image_available != vk::Semaphore::null() {
            device.drop_semaphore(self.image_available);
        }
        if self.render_finished != vk::Semaphore::null() {
            device.drop_semaphore(self.render_finished);
        }
        if self.in_flight != vk::Fence::null() {
            device.drop_fence(self.in_flight);
        }
        self.image_available = vk::Semaphore::null();
        self.render_finished = vk::Semaphore::null();
        self.in_flight = vk::Fence::null();
    }
}
