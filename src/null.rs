//! A device backend that talks to no driver at all.
//!
//! [`NullDeviceFunctions`] hands out fake handles, records every call it receives and keeps
//! track of which objects are still alive, so device behaviour can be checked without a gpu.

use crate::adapter::Adapter;
#[cfg(test)]
use crate::device::DeviceShared;
use crate::functions::{DeviceFunctions, SubmitBatch, SwapchainDescription};
use crate::memory::{find_memory_type_index, MemoryAllocator, MemoryBlock};
use crate::render_pass::RenderPassFormat;
use crate::VulkanError;
use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use slotmap::{Key, KeyData, SlotMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
#[cfg(test)]
use std::sync::Arc;

slotmap::new_key_type! {
    struct NullKey;
}

fn raw_key(key: NullKey) -> u64 {
    key.data().as_ffi()
}

fn handle_key<H: Handle>(handle: H) -> NullKey {
    KeyData::from_ffi(handle.as_raw()).into()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ObjectKind {
    Semaphore,
    Fence,
    CommandPool,
    CommandBuffer,
    Image,
    ImageView,
    RenderPass,
    Framebuffer,
    Swapchain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    GetDeviceQueue {
        family_index: u32,
        queue_index: u32,
    },
    QueueSubmit {
        queue: vk::Queue,
        batch: SubmitBatch,
        fence: vk::Fence,
    },
    QueuePresent {
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    QueueWaitIdle(vk::Queue),
    DeviceWaitIdle,
    DestroyDevice,
    Create(ObjectKind, u64),
    Destroy(ObjectKind, u64),
    BindImageMemory {
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    },
    WaitForFence {
        fence: vk::Fence,
        timeout_ns: u64,
    },
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    ResetCommandBuffer(u64),
    BeginRenderPass {
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
    },
    EndRenderPass(u64),
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        surface: vk::SurfaceKHR,
        queue_family_indices: Vec<u32>,
        old_swapchain: vk::SwapchainKHR,
    },
    AcquireNextImage(u64),
}

struct NullObject {
    kind: ObjectKind,
    parent: Option<NullKey>,
    signaled: bool,
    submitted: bool,
    size: vk::DeviceSize,
    image_count: u32,
    next_image: u32,
}

impl NullObject {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            parent: None,
            signaled: false,
            submitted: false,
            size: 0,
            image_count: 0,
            next_image: 0,
        }
    }
}

#[derive(Default)]
struct NullState {
    objects: SlotMap<NullKey, NullObject>,
    calls: Vec<DeviceCall>,
    stalled: bool,
    fail_submit: bool,
    fail_bind: bool,
    fail_wait_idle: bool,
}

impl NullState {
    fn create(&mut self, object: NullObject) -> u64 {
        let kind = object.kind;
        let raw = raw_key(self.objects.insert(object));
        self.calls.push(DeviceCall::Create(kind, raw));
        raw
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        self.calls.push(DeviceCall::Destroy(kind, raw));

        let key: NullKey = KeyData::from_ffi(raw).into();
        if self.objects.get(key).map(|object| object.kind) == Some(kind) {
            let _ = self.objects.remove(key);
            if kind == ObjectKind::CommandPool {
                self.objects.retain(|_key, object| object.parent != Some(key));
            }
        } else {
            warn!("Destroying unknown {:?} {:#x}", kind, raw);
        }
    }

    fn object_mut<H: Handle>(&mut self, kind: ObjectKind, handle: H) -> VkResult<&mut NullObject> {
        self.objects
            .get_mut(handle_key(handle))
            .filter(|object| object.kind == kind)
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn signal_submitted_fences(&mut self) {
        for (_key, object) in self.objects.iter_mut() {
            if object.kind == ObjectKind::Fence && object.submitted {
                object.signaled = true;
            }
        }
    }
}

/// Recording [`DeviceFunctions`] implementation.
///
/// Submitted fences signal immediately unless the simulated gpu is stalled, in which case they
/// stay pending until an unbounded wait, a wait idle or the stall is lifted.
pub struct NullDeviceFunctions {
    queue_family_count: u32,
    state: Mutex<NullState>,
}

impl NullDeviceFunctions {
    /// Each of the first `queue_family_count` families exposes a single queue.
    pub fn new(queue_family_count: u32) -> Self {
        Self {
            queue_family_count,
            state: Mutex::new(NullState::default()),
        }
    }

    fn state(&self) -> MutexGuard<NullState> {
        crate::lock(&self.state)
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state().calls.clone()
    }

    pub fn submissions(&self) -> Vec<SubmitBatch> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::QueueSubmit { batch, .. } => Some(batch.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live_objects(&self, kind: ObjectKind) -> usize {
        self.state()
            .objects
            .values()
            .filter(|object| object.kind == kind)
            .count()
    }

    /// While stalled, submitted work does not complete on its own.
    pub fn set_stalled(&self, stalled: bool) {
        let mut state = self.state();
        state.stalled = stalled;
        if !stalled {
            state.signal_submitted_fences();
        }
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.state().fail_submit = fail;
    }

    pub fn set_fail_bind(&self, fail: bool) {
        self.state().fail_bind = fail;
    }

    pub fn set_fail_wait_idle(&self, fail: bool) {
        self.state().fail_wait_idle = fail;
    }
}

impl DeviceFunctions for NullDeviceFunctions {
    fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        self.state().calls.push(DeviceCall::GetDeviceQueue {
            family_index,
            queue_index,
        });
        if family_index < self.queue_family_count && queue_index == 0 {
            vk::Queue::from_raw(0x1000 + family_index as u64)
        } else {
            vk::Queue::null()
        }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        batch: &SubmitBatch,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(DeviceCall::QueueSubmit {
            queue,
            batch: batch.clone(),
            fence,
        });

        if state.fail_submit {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }

        if queue == vk::Queue::null() {
            return Err(vk::Result::ERROR_UNKNOWN);
        }

        if fence != vk::Fence::null() {
            let stalled = state.stalled;
            let object = state.object_mut(ObjectKind::Fence, fence)?;
            object.submitted = true;
            object.signaled = !stalled;
        }
        Ok(())
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        self.state().calls.push(DeviceCall::QueuePresent {
            queue,
            swapchain,
            image_index,
        });
        Ok(false)
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(DeviceCall::QueueWaitIdle(queue));
        if state.fail_wait_idle {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        state.signal_submitted_fences();
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(DeviceCall::DeviceWaitIdle);
        if state.fail_wait_idle {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        state.signal_submitted_fences();
        Ok(())
    }

    fn destroy_device(&self) {
        self.state().calls.push(DeviceCall::DestroyDevice);
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let raw = self.state().create(NullObject::new(ObjectKind::Semaphore));
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state()
            .destroy(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut object = NullObject::new(ObjectKind::Fence);
        object.signaled = signaled;
        let raw = self.state().create(object);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state().destroy(ObjectKind::Fence, fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state();
        state
            .calls
            .push(DeviceCall::WaitForFence { fence, timeout_ns });

        let object = state.object_mut(ObjectKind::Fence, fence)?;
        if object.signaled {
            Ok(())
        } else if timeout_ns == u64::MAX {
            object.signaled = true;
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        Ok(self.state().object_mut(ObjectKind::Fence, fence)?.signaled)
    }

    fn create_command_pool(&self, _family_index: u32) -> VkResult<vk::CommandPool> {
        let raw = self
            .state()
            .create(NullObject::new(ObjectKind::CommandPool));
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state().destroy(ObjectKind::CommandPool, pool.as_raw());
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state();
        let _ = state.object_mut(ObjectKind::CommandPool, pool)?;

        let mut object = NullObject::new(ObjectKind::CommandBuffer);
        object.parent = Some(handle_key(pool));
        Ok(vk::CommandBuffer::from_raw(state.create(object)))
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state()
            .calls
            .push(DeviceCall::BeginCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state()
            .calls
            .push(DeviceCall::EndCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state()
            .calls
            .push(DeviceCall::ResetCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn create_image(&self, create_info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        let extent = create_info.extent;
        let mut object = NullObject::new(ObjectKind::Image);
        object.size = extent.width as u64
            * extent.height as u64
            * extent.depth as u64
            * create_info.array_layers as u64
            * 4;
        Ok(vk::Image::from_raw(self.state().create(object)))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state().destroy(ObjectKind::Image, image.as_raw());
    }

    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self
            .state()
            .object_mut(ObjectKind::Image, image)
            .map(|object| object.size)
            .unwrap_or(0);
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: 0b111,
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(DeviceCall::BindImageMemory {
            image,
            memory,
            offset,
        });
        if state.fail_bind {
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        } else {
            Ok(())
        }
    }

    fn create_image_view(
        &self,
        _create_info: &vk::ImageViewCreateInfo,
    ) -> VkResult<vk::ImageView> {
        let raw = self.state().create(NullObject::new(ObjectKind::ImageView));
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, image_view: vk::ImageView) {
        self.state()
            .destroy(ObjectKind::ImageView, image_view.as_raw());
    }

    fn create_render_pass(&self, _format: &RenderPassFormat) -> VkResult<vk::RenderPass> {
        let raw = self
            .state()
            .create(NullObject::new(ObjectKind::RenderPass));
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state()
            .destroy(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
        _layers: u32,
    ) -> VkResult<vk::Framebuffer> {
        let raw = self
            .state()
            .create(NullObject::new(ObjectKind::Framebuffer));
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state()
            .destroy(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    fn create_swapchain(
        &self,
        description: &SwapchainDescription,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let mut object = NullObject::new(ObjectKind::Swapchain);
        object.image_count = description.properties.image_count;
        let swapchain = vk::SwapchainKHR::from_raw(state.create(object));

        state.calls.push(DeviceCall::CreateSwapchain {
            swapchain,
            surface: description.surface,
            queue_family_indices: description.queue_family_indices.clone(),
            old_swapchain: description.old_swapchain,
        });
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state()
            .destroy(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let image_count = self
            .state()
            .object_mut(ObjectKind::Swapchain, swapchain)?
            .image_count;
        Ok((0..image_count as u64)
            .map(|index| vk::Image::from_raw(0x7000_0000 + index))
            .collect())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        state
            .calls
            .push(DeviceCall::AcquireNextImage(swapchain.as_raw()));

        let object = state.object_mut(ObjectKind::Swapchain, swapchain)?;
        let index = object.next_image;
        object.next_image = (index + 1) % object.image_count.max(1);
        Ok((index, false))
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.state().calls.push(DeviceCall::BeginRenderPass {
            command_buffer,
            render_pass,
            framebuffer,
        });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state()
            .calls
            .push(DeviceCall::EndRenderPass(command_buffer.as_raw()));
    }
}

/// [`MemoryAllocator`] that picks the lowest matching memory type and hands out fake memory.
pub struct NullMemoryAllocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    allocations: Mutex<SlotMap<NullKey, u32>>,
    fail_free: AtomicBool,
}

impl NullMemoryAllocator {
    pub fn new(memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            memory_properties,
            allocations: Mutex::new(SlotMap::with_key()),
            fail_free: AtomicBool::new(false),
        }
    }

    /// A failing free keeps the block allocated.
    pub fn set_fail_free(&self, fail: bool) {
        self.fail_free.store(fail, Ordering::Relaxed);
    }

    pub fn live_allocations(&self) -> usize {
        crate::lock(&self.allocations).len()
    }
}

impl MemoryAllocator for NullMemoryAllocator {
    fn allocate(
        &self,
        _name: &str,
        requirements: &vk::MemoryRequirements,
        memory_flags: vk::MemoryPropertyFlags,
        _linear: bool,
    ) -> crate::Result<MemoryBlock> {
        let memory_type_index = find_memory_type_index(
            &self.memory_properties,
            requirements.memory_type_bits,
            memory_flags,
        )
        .ok_or(VulkanError::NoSuitableMemoryType {
            flags: memory_flags,
            type_bits: requirements.memory_type_bits,
        })?;

        let key = crate::lock(&self.allocations).insert(memory_type_index);
        Ok(MemoryBlock::new(
            vk::DeviceMemory::from_raw(raw_key(key)),
            0,
            requirements.size,
        ))
    }

    fn free(&self, block: MemoryBlock) -> crate::Result<()> {
        if self.fail_free.load(Ordering::Relaxed) {
            return Err(VulkanError::Vk(vk::Result::ERROR_UNKNOWN));
        }
        let _ = crate::lock(&self.allocations).remove(handle_key(block.memory()));
        Ok(())
    }
}

/// Device local, host coherent, and host cached memory, in that order.
pub fn null_memory_properties() -> vk::PhysicalDeviceMemoryProperties {
    let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 3,
        memory_heap_count: 2,
        ..Default::default()
    };
    memory_properties.memory_types[0] = vk::MemoryType {
        property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        heap_index: 0,
    };
    memory_properties.memory_types[1] = vk::MemoryType {
        property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT,
        heap_index: 1,
    };
    memory_properties.memory_types[2] = vk::MemoryType {
        property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT
            | vk::MemoryPropertyFlags::HOST_CACHED,
        heap_index: 1,
    };
    memory_properties.memory_heaps[0] = vk::MemoryHeap {
        size: 256 * 1024 * 1024,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    memory_properties.memory_heaps[1] = vk::MemoryHeap {
        size: 64 * 1024 * 1024,
        flags: vk::MemoryHeapFlags::empty(),
    };
    memory_properties
}

pub fn null_adapter(graphics_queue_family: u32, present_queue_family: u32) -> Adapter {
    Adapter::new(
        vk::PhysicalDevice::from_raw(1),
        "Null Adapter",
        graphics_queue_family,
        present_queue_family,
        null_memory_properties(),
    )
}

/// Device state for resources built directly on `functions` in unit tests.
#[cfg(test)]
pub(crate) fn null_device_shared(functions: &Arc<NullDeviceFunctions>) -> Arc<DeviceShared> {
    Arc::new(DeviceShared {
        functions: functions.clone(),
        allocator: Arc::new(NullMemoryAllocator::new(null_memory_properties())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroying_a_pool_frees_its_command_buffers() {
        let functions = NullDeviceFunctions::new(1);
        let pool = functions.create_command_pool(0).unwrap();
        let _ = functions.allocate_command_buffer(pool).unwrap();
        let _ = functions.allocate_command_buffer(pool).unwrap();
        assert_eq!(functions.live_objects(ObjectKind::CommandBuffer), 2);

        functions.destroy_command_pool(pool);
        assert_eq!(functions.live_objects(ObjectKind::CommandPool), 0);
        assert_eq!(functions.live_objects(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn stalled_fences_signal_once_the_stall_is_lifted() {
        let functions = NullDeviceFunctions::new(1);
        functions.set_stalled(true);

        let queue = functions.get_device_queue(0, 0);
        let fence = functions.create_fence(false).unwrap();
        functions
            .queue_submit(queue, &SubmitBatch::default(), fence)
            .unwrap();
        assert!(!functions.get_fence_status(fence).unwrap());
        assert_eq!(
            functions.wait_for_fence(fence, 1000),
            Err(vk::Result::TIMEOUT)
        );

        functions.set_stalled(false);
        assert!(functions.get_fence_status(fence).unwrap());
    }

    #[test]
    fn queues_exist_only_for_known_families() {
        let functions = NullDeviceFunctions::new(2);
        assert_ne!(functions.get_device_queue(1, 0), vk::Queue::null());
        assert_eq!(functions.get_device_queue(2, 0), vk::Queue::null());
        assert_eq!(functions.get_device_queue(0, 1), vk::Queue::null());
    }

    #[test]
    fn allocator_rejects_unsatisfiable_flags() {
        let allocator = NullMemoryAllocator::new(null_memory_properties());
        let requirements = vk::MemoryRequirements {
            size: 1024,
            alignment: 256,
            memory_type_bits: 0b111,
        };

        let block = allocator
            .allocate(
                "test",
                &requirements,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
                false,
            )
            .unwrap();
        assert_eq!(allocator.live_allocations(), 1);
        allocator.free(block).unwrap();
        assert_eq!(allocator.live_allocations(), 0);

        assert!(matches!(
            allocator.allocate(
                "test",
                &requirements,
                vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_CACHED,
                false,
            ),
            Err(VulkanError::NoSuitableMemoryType { .. })
        ));
    }
}
