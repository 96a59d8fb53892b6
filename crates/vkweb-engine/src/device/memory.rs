use ash::vk;

use super::context::DeviceContext;
use super::error::{GpuError, VkResultExt};

/// Finds a memory type allowed by `type_bits` that has all of `flags`.
pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, t)| type_bits & (1 << i) != 0 && t.property_flags.contains(flags))
        .map(|(i, _)| i as u32)
}

/// Allocates memory satisfying `requirements` with the given properties.
pub(crate) fn allocate(
    ctx: &DeviceContext,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory, GpuError> {
    let type_index = find_memory_type(ctx.memory_properties(), requirements.memory_type_bits, flags)
        .ok_or(GpuError::NoCompatibleMemory)?;

    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(type_index);

    unsafe { ctx.device().allocate_memory(&info, None) }.op("vkAllocateMemory")
}

/// Buffer plus its dedicated allocation.
pub(crate) struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub(crate) fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, GpuError> {
        let device = ctx.device();
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&info, None) }.op("vkCreateBuffer")?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match allocate(ctx, requirements, flags) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) }.op("vkBindBufferMemory") {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(err);
        }

        Ok(Self { buffer, memory, size })
    }

    /// Maps the buffer, lets `fill` write exactly `size` bytes, then unmaps.
    ///
    /// Requires host-visible, host-coherent memory; no flush is issued.
    pub(crate) fn write_with(&self, device: &ash::Device, fill: impl FnOnce(&mut [u8])) -> Result<(), GpuError> {
        let len = usize::try_from(self.size).map_err(|_| GpuError::NoCompatibleMemory)?;
        let ptr = unsafe { device.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty()) }
            .op("vkMapMemory")?;

        // SAFETY: the mapping covers `size` bytes and nothing else aliases it
        // until `unmap_memory`.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len) };
        fill(bytes);

        unsafe { device.unmap_memory(self.memory) };
        Ok(())
    }

    pub(crate) fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn picks_first_type_with_all_flags() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let staging = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&p, u32::MAX, staging), Some(2));
        assert_eq!(find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
    }

    #[test]
    fn respects_type_bits() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(1));
    }

    #[test]
    fn no_match_is_an_error_not_index_zero() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE), None);
    }

    #[test]
    fn ignores_types_past_the_reported_count() {
        let mut p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        p.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE), None);
    }
}
