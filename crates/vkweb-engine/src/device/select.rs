use ash::vk;

use super::DeviceSelection;

/// A physical device that exposes a graphics+present queue family.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Candidate {
    /// Position in the driver's enumeration order.
    pub index: usize,
    pub physical_device: vk::PhysicalDevice,
    pub device_type: vk::PhysicalDeviceType,
    pub device_local_bytes: u64,
    pub queue_family: u32,
}

/// Returns the first queue family supporting both graphics and presentation.
///
/// `supports_present` is queried lazily, only for graphics-capable families.
pub(crate) fn graphics_present_family(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, f)| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .find(|&i| supports_present(i))
}

/// Total size of the heaps flagged `DEVICE_LOCAL`.
pub(crate) fn device_local_bytes(props: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    let count = (props.memory_heap_count as usize).min(props.memory_heaps.len());
    props.memory_heaps[..count]
        .iter()
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size)
        .sum()
}

fn type_rank(t: vk::PhysicalDeviceType) -> u32 {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Chooses among qualifying candidates according to `policy`.
pub(crate) fn pick(candidates: &[Candidate], policy: DeviceSelection) -> Option<Candidate> {
    match policy {
        DeviceSelection::FirstQualifying => candidates.first().copied(),
        DeviceSelection::PreferDiscrete => candidates
            .iter()
            .copied()
            // Reverse the index so that ties keep enumeration order.
            .max_by_key(|c| (type_rank(c.device_type), c.device_local_bytes, std::cmp::Reverse(c.index))),
    }
}
