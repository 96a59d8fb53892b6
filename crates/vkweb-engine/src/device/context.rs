use std::ffi::{CString, c_char};

use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::debug::{self, DebugMessenger};
use super::error::{GpuError, VkResultExt};
use super::select::{self, Candidate};
use super::GpuInit;

/// Owns the Vulkan instance, the window surface and the logical device.
///
/// This type is created once at startup and never mutated afterwards. Every
/// other GPU object borrows it and must be destroyed before [`destroy`] runs.
///
/// [`destroy`]: DeviceContext::destroy
pub struct DeviceContext {
    /// Keeps the loader library mapped for as long as the instance lives.
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,

    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Sampler anisotropy limit, `None` when the feature is unsupported.
    max_anisotropy: Option<f32>,

    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,

    /// Resettable pool for the frame command buffer and one-shot uploads.
    command_pool: vk::CommandPool,

    /// Pool handed to the UI backend for its font and image descriptors.
    descriptor_pool: vk::DescriptorPool,
}

impl DeviceContext {
    /// Creates the instance, surface and logical device for a window.
    ///
    /// Picks the physical device according to `init.device_selection`; fails
    /// when no device has a queue family with both graphics and present support.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        init: &GpuInit,
    ) -> Result<Self, GpuError> {
        let entry = unsafe { ash::Entry::load() }?;

        let validation = init.validation && debug::validation_available(&entry);
        if init.validation && !validation {
            log::warn!("validation requested but {:?} is not installed", debug::VALIDATION_LAYER);
        }

        let instance = create_instance(&entry, display, &init.app_name, validation)?;

        let debug = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(m) => Some(m),
                Err(err) => {
                    log::warn!("debug messenger unavailable: {err}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);

        // From here on, partial failures must unwind what was created so far.
        let mut partial = Partial {
            armed: true,
            instance: &instance,
            debug,
            surface_loader: &surface_loader,
            surface: vk::SurfaceKHR::null(),
            device: None,
            command_pool: vk::CommandPool::null(),
        };

        partial.surface = unsafe { ash_window::create_surface(&entry, &instance, display, window, None) }
            .op("vkCreateSurfaceKHR")?;

        let candidate = select_physical_device(&instance, &surface_loader, partial.surface, init)?;
        let physical_device = candidate.physical_device;

        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let max_anisotropy =
            (features.sampler_anisotropy == vk::TRUE).then_some(props.limits.max_sampler_anisotropy);

        log::info!(
            "using {:?} ({:?}), queue family {}",
            props.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            props.device_type,
            candidate.queue_family,
        );

        let device = create_device(&instance, physical_device, candidate.queue_family, max_anisotropy.is_some())?;
        partial.device = Some(device.clone());
        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(candidate.queue_family);
        partial.command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.op("vkCreateCommandPool")?;

        let descriptor_pool = create_descriptor_pool(&device, init.descriptor_pool_size)?;

        let surface = partial.surface;
        let command_pool = partial.command_pool;
        let debug = partial.disarm();

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            physical_device,
            memory_properties,
            max_anisotropy,
            device,
            queue_family: candidate.queue_family,
            queue,
            command_pool,
            descriptor_pool,
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub(crate) fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub(crate) fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub(crate) fn max_anisotropy(&self) -> Option<f32> {
        self.max_anisotropy
    }

    /// Blocks until the device has finished all submitted work.
    pub fn wait_idle(&self) -> Result<(), GpuError> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }

    /// Destroys the device-level objects, the device, the surface and the instance.
    ///
    /// The caller must have waited for device idle and released every object
    /// created from this context.
    pub fn destroy(&mut self) {
        log::debug!("destroying device context");
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            if let Some(mut debug) = self.debug.take() {
                debug.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        self.descriptor_pool = vk::DescriptorPool::null();
        self.command_pool = vk::CommandPool::null();
        self.surface = vk::SurfaceKHR::null();
    }
}

/// Objects created during `DeviceContext::new` that must be released if a
/// later step fails.
struct Partial<'a> {
    armed: bool,
    instance: &'a ash::Instance,
    debug: Option<DebugMessenger>,
    surface_loader: &'a surface::Instance,
    surface: vk::SurfaceKHR,
    device: Option<ash::Device>,
    command_pool: vk::CommandPool,
}

impl Partial<'_> {
    /// Hands the debug messenger over and skips the unwinding.
    fn disarm(mut self) -> Option<DebugMessenger> {
        self.armed = false;
        self.debug.take()
    }
}

impl Drop for Partial<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::debug!("unwinding partially created device context");
        unsafe {
            if let Some(device) = self.device.take() {
                if self.command_pool != vk::CommandPool::null() {
                    device.destroy_command_pool(self.command_pool, None);
                }
                device.destroy_device(None);
            }
            if let Some(mut debug) = self.debug.take() {
                debug.destroy();
            }
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn create_instance(
    entry: &ash::Entry,
    display: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<ash::Instance, GpuError> {
    let app_name = CString::new(app_name).unwrap_or_else(|_| CString::from(c"vkweb"));
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"vkweb-engine")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .op("vkEnumerateInstanceExtensionProperties")?
        .to_vec();
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layers: Vec<*const c_char> = if validation {
        vec![debug::VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&info, None) }.op("vkCreateInstance")?;
    log::debug!("instance created ({} extensions, validation: {validation})", extensions.len());
    Ok(instance)
}

fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    init: &GpuInit,
) -> Result<Candidate, GpuError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")?;

    let mut candidates = Vec::with_capacity(devices.len());
    for (index, &pd) in devices.iter().enumerate() {
        let families = unsafe { instance.get_physical_device_queue_family_properties(pd) };
        let family = select::graphics_present_family(&families, |i| unsafe {
            surface_loader
                .get_physical_device_surface_support(pd, i, surface)
                .unwrap_or(false)
        });

        let Some(queue_family) = family else {
            log::debug!("physical device {index} has no graphics+present queue family");
            continue;
        };

        let props = unsafe { instance.get_physical_device_properties(pd) };
        let memory = unsafe { instance.get_physical_device_memory_properties(pd) };
        candidates.push(Candidate {
            index,
            physical_device: pd,
            device_type: props.device_type,
            device_local_bytes: select::device_local_bytes(&memory),
            queue_family,
        });

        // The first match is all this policy needs.
        if init.device_selection == super::DeviceSelection::FirstQualifying {
            break;
        }
    }

    select::pick(&candidates, init.device_selection).ok_or(GpuError::NoSuitableDevice)
}

fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    anisotropy: bool,
) -> Result<ash::Device, GpuError> {
    let priorities = [1.0_f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities);

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);
    let extensions = [swapchain::NAME.as_ptr()];

    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &info, None) }.op("vkCreateDevice")?;
    log::debug!("logical device created (anisotropy: {anisotropy})");
    Ok(device)
}

fn create_descriptor_pool(device: &ash::Device, per_type: u32) -> Result<vk::DescriptorPool, GpuError> {
    const TYPES: [vk::DescriptorType; 11] = [
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        vk::DescriptorType::INPUT_ATTACHMENT,
    ];

    let per_type = per_type.max(1);
    let sizes = TYPES.map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: per_type,
    });

    let info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(per_type.saturating_mul(TYPES.len() as u32))
        .pool_sizes(&sizes);

    unsafe { device.create_descriptor_pool(&info, None) }.op("vkCreateDescriptorPool")
}
