use crate::adapter::Adapter;
use crate::VulkanError;
use ash::vk;
use std::sync::Mutex;

/// A bindable region of device memory.
pub struct MemoryBlock {
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    allocation: Option<gpu_allocator::vulkan::Allocation>,
}

impl MemoryBlock {
    pub fn new(memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        Self {
            memory,
            offset,
            size,
            allocation: None,
        }
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

pub trait MemoryAllocator: Send + Sync {
    /// Allocates memory for `requirements` from a memory type that has every flag in
    /// `memory_flags`.
    fn allocate(
        &self,
        name: &str,
        requirements: &vk::MemoryRequirements,
        memory_flags: vk::MemoryPropertyFlags,
        linear: bool,
    ) -> crate::Result<MemoryBlock>;

    fn free(&self, block: MemoryBlock) -> crate::Result<()>;
}

/// Memory type bits from `type_bits` whose properties contain `memory_flags`.
pub fn supported_memory_types(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    memory_flags: vk::MemoryPropertyFlags,
) -> u32 {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .filter(|(index, memory_type)| {
            (type_bits & (1 << index)) != 0 && memory_type.property_flags.contains(memory_flags)
        })
        .fold(0, |bits, (index, _memory_type)| bits | (1 << index))
}

pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    memory_flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let supported = supported_memory_types(memory_properties, type_bits, memory_flags);
    (supported != 0).then(|| supported.trailing_zeros())
}

fn memory_location(memory_flags: vk::MemoryPropertyFlags) -> gpu_allocator::MemoryLocation {
    if memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        if memory_flags.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            gpu_allocator::MemoryLocation::GpuToCpu
        } else {
            gpu_allocator::MemoryLocation::CpuToGpu
        }
    } else if memory_flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        gpu_allocator::MemoryLocation::GpuOnly
    } else {
        gpu_allocator::MemoryLocation::Unknown
    }
}

/// [`MemoryAllocator`] backed by `gpu_allocator`.
///
/// The requested flags are enforced by narrowing the requirement's memory type bits before
/// handing the request over, the allocator then picks among those types by location.
pub struct GpuMemoryAllocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    allocator: Mutex<gpu_allocator::vulkan::Allocator>,
}

impl GpuMemoryAllocator {
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        adapter: &Adapter,
    ) -> crate::Result<Self> {
        let allocator =
            gpu_allocator::vulkan::Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device: adapter.handle(),
                debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })?;

        Ok(Self {
            memory_properties: *adapter.memory_properties(),
            allocator: Mutex::new(allocator),
        })
    }
}

impl MemoryAllocator for GpuMemoryAllocator {
    fn allocate(
        &self,
        name: &str,
        requirements: &vk::MemoryRequirements,
        memory_flags: vk::MemoryPropertyFlags,
        linear: bool,
    ) -> crate::Result<MemoryBlock> {
        let type_bits = supported_memory_types(
            &self.memory_properties,
            requirements.memory_type_bits,
            memory_flags,
        );
        if type_bits == 0 {
            return Err(VulkanError::NoSuitableMemoryType {
                flags: memory_flags,
                type_bits: requirements.memory_type_bits,
            });
        }

        let mut requirements = *requirements;
        requirements.memory_type_bits = type_bits;

        let allocation =
            crate::lock(&self.allocator).allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                name,
                requirements,
                location: memory_location(memory_flags),
                linear,
                allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
            })?;

        Ok(MemoryBlock {
            memory: unsafe { allocation.memory() },
            offset: allocation.offset(),
            size: allocation.size(),
            allocation: Some(allocation),
        })
    }

    fn free(&self, mut block: MemoryBlock) -> crate::Result<()> {
        if let Some(allocation) = block.allocation.take() {
            crate::lock(&self.allocator).free(allocation)?;
        }
        Ok(())
    }
}
