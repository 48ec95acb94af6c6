use crate::adapter::Adapter;
use crate::command_list::{CommandList, TrackedResource};
use crate::context::Context;
use crate::framebuffer::{Framebuffer, RenderTargets};
use crate::functions::{AshDeviceFunctions, DeviceFunctions, SubmitBatch};
use crate::image::{Image, ImageCreateInfo, ImageView, ImageViewCreateInfo};
use crate::memory::{GpuMemoryAllocator, MemoryAllocator};
use crate::render_pass::RenderPassCache;
use crate::submission::{SubmissionRing, SubmitOptions};
use crate::swapchain::{Surface, Swapchain, SwapchainProperties};
use crate::sync::{Fence, Semaphore};
use crate::VulkanError;
use ash::vk;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceQueue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

#[derive(Copy, Clone, Debug)]
pub struct DeviceSettings {
    /// Capacity of the asynchronous submission ring, at least 1.
    pub max_submissions_in_flight: usize,
    /// Stages that wait on a submission's wait semaphore.
    pub wait_stage_mask: vk::PipelineStageFlags,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            max_submissions_in_flight: 3,
            wait_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
        }
    }
}

fn resolve_queue(functions: &dyn DeviceFunctions, family_index: u32) -> crate::Result<DeviceQueue> {
    let handle = functions.get_device_queue(family_index, 0);
    if handle == vk::Queue::null() {
        return Err(VulkanError::QueueUnavailable {
            family_index,
            queue_index: 0,
        });
    }
    Ok(DeviceQueue {
        family_index,
        handle,
    })
}

fn release_connection(functions: &dyn DeviceFunctions) {
    if let Err(e) = functions.device_wait_idle() {
        error!("Device wait idle failed before destroy: {}", e);
    }
    functions.destroy_device();
}

/// State resources reach through a `Weak`. The device holds the only strong reference, so a
/// failed upgrade means the device is gone no matter who else holds the function table.
pub(crate) struct DeviceShared {
    pub(crate) functions: Arc<dyn DeviceFunctions>,
    pub(crate) allocator: Arc<dyn MemoryAllocator>,
}

pub struct Device {
    adapter: Arc<Adapter>,
    functions: Arc<dyn DeviceFunctions>,
    graphics_queue: DeviceQueue,
    present_queue: DeviceQueue,
    shared: ManuallyDrop<Arc<DeviceShared>>,
    render_pass_cache: RenderPassCache,
    submissions: Mutex<SubmissionRing>,
    settings: DeviceSettings,
}

impl Device {
    /// Takes ownership of the connection behind `functions`.
    ///
    /// On failure the connection is idled and destroyed before the error is returned.
    pub fn new(
        adapter: Arc<Adapter>,
        functions: Arc<dyn DeviceFunctions>,
        allocator: Arc<dyn MemoryAllocator>,
        settings: DeviceSettings,
    ) -> crate::Result<Self> {
        let queues = resolve_queue(functions.as_ref(), adapter.graphics_queue_family()).and_then(
            |graphics_queue| {
                let present_queue =
                    resolve_queue(functions.as_ref(), adapter.present_queue_family())?;
                Ok((graphics_queue, present_queue))
            },
        );

        let (graphics_queue, present_queue) = match queues {
            Ok(queues) => queues,
            Err(e) => {
                drop(allocator);
                release_connection(functions.as_ref());
                return Err(e);
            }
        };

        info!(
            "Created device on {}: graphics family {}, present family {}",
            adapter.name(),
            graphics_queue.family_index,
            present_queue.family_index
        );

        Ok(Self {
            adapter,
            render_pass_cache: RenderPassCache::new(functions.clone()),
            shared: ManuallyDrop::new(Arc::new(DeviceShared {
                functions: functions.clone(),
                allocator,
            })),
            functions,
            graphics_queue,
            present_queue,
            submissions: Mutex::new(SubmissionRing::new(settings.max_submissions_in_flight)),
            settings,
        })
    }

    /// Builds the ash function table and a `gpu_allocator` backed allocator for `device`.
    pub fn from_ash(
        instance: &ash::Instance,
        device: ash::Device,
        adapter: Arc<Adapter>,
        settings: DeviceSettings,
    ) -> crate::Result<Self> {
        let allocator = GpuMemoryAllocator::new(instance, &device, &adapter);
        let functions = AshDeviceFunctions::new(instance, device);

        match allocator {
            Ok(allocator) => Self::new(
                adapter,
                Arc::new(functions),
                Arc::new(allocator),
                settings,
            ),
            Err(e) => {
                release_connection(&functions);
                Err(e)
            }
        }
    }

    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    pub fn graphics_queue(&self) -> DeviceQueue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> DeviceQueue {
        self.present_queue
    }

    pub fn allocator(&self) -> &dyn MemoryAllocator {
        self.shared.allocator.as_ref()
    }

    pub fn render_pass_cache(&self) -> &RenderPassCache {
        &self.render_pass_cache
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn create_command_list(&self) -> crate::Result<Arc<CommandList>> {
        Ok(Arc::new(CommandList::new(
            &self.shared,
            self.graphics_queue.family_index,
        )?))
    }

    pub fn create_context(&self) -> Arc<Context> {
        Arc::new(Context::new(&self.shared))
    }

    pub fn create_framebuffer(
        &self,
        render_targets: RenderTargets,
    ) -> crate::Result<Arc<Framebuffer>> {
        Ok(Arc::new(Framebuffer::new(
            &self.shared,
            &self.render_pass_cache,
            render_targets,
        )?))
    }

    pub fn create_image(
        &self,
        create_info: &ImageCreateInfo,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> crate::Result<Arc<Image>> {
        Ok(Arc::new(Image::new(
            &self.shared,
            create_info,
            memory_flags,
        )?))
    }

    pub fn create_image_view(
        &self,
        image: Arc<Image>,
        create_info: &ImageViewCreateInfo,
    ) -> crate::Result<Arc<ImageView>> {
        Ok(Arc::new(ImageView::new(
            &self.shared,
            image,
            create_info,
        )?))
    }

    pub fn create_semaphore(&self) -> crate::Result<Arc<Semaphore>> {
        Ok(Arc::new(Semaphore::new(&self.shared)?))
    }

    /// Creates a swapchain presented on the presentation queue. Images are shared with the
    /// graphics family when the two differ.
    pub fn create_swapchain(
        &self,
        surface: Arc<Surface>,
        properties: SwapchainProperties,
    ) -> crate::Result<Arc<Swapchain>> {
        let queue_family_indices =
            if self.graphics_queue.family_index != self.present_queue.family_index {
                vec![
                    self.graphics_queue.family_index,
                    self.present_queue.family_index,
                ]
            } else {
                vec![self.present_queue.family_index]
            };

        Ok(Arc::new(Swapchain::new(
            &self.shared,
            surface,
            properties,
            self.present_queue,
            queue_family_indices,
        )?))
    }

    /// Submits `command_list` to the graphics queue and blocks until it has executed.
    ///
    /// `wait` is waited on before the work starts and `wake` is signaled once it is done. The
    /// list is reset afterwards and the returned fence is signaled.
    pub fn submit_command_list(
        &self,
        command_list: &Arc<CommandList>,
        wait: Option<&Arc<Semaphore>>,
        wake: Option<&Arc<Semaphore>>,
    ) -> crate::Result<Arc<Fence>> {
        self.submit_command_list_with(command_list, wait, wake, &SubmitOptions::default())
    }

    /// Like [`Device::submit_command_list`], with a wait stage mask and completion timeout.
    ///
    /// When the wait fails the submission is handed to the submission ring, the list stays
    /// executing until a later poll or flush retires it.
    pub fn submit_command_list_with(
        &self,
        command_list: &Arc<CommandList>,
        wait: Option<&Arc<Semaphore>>,
        wake: Option<&Arc<Semaphore>>,
        options: &SubmitOptions,
    ) -> crate::Result<Arc<Fence>> {
        let wait_stage_mask = options
            .wait_stage_mask
            .unwrap_or(self.settings.wait_stage_mask);
        let fence = self.queue_submission(command_list, wait, wake, wait_stage_mask)?;

        if let Err(e) = fence.wait(options.timeout) {
            warn!("Submission did not complete: {}", e);
            crate::lock(&self.submissions).push(fence, command_list.clone());
            return Err(e);
        }

        command_list.mark_completed();
        command_list.reset()?;
        Ok(fence)
    }

    /// Submits without waiting for completion, the fence and list are kept in the submission
    /// ring until retired. Blocks on the oldest submission while the ring is full.
    pub fn submit_command_list_async(
        &self,
        command_list: &Arc<CommandList>,
        wait: Option<&Arc<Semaphore>>,
        wake: Option<&Arc<Semaphore>>,
    ) -> crate::Result<Arc<Fence>> {
        let mut submissions = crate::lock(&self.submissions);
        while submissions.is_full() {
            let _ = submissions.retire_oldest()?;
        }

        let fence =
            self.queue_submission(command_list, wait, wake, self.settings.wait_stage_mask)?;
        submissions.push(fence.clone(), command_list.clone());
        Ok(fence)
    }

    /// Retires finished submissions without blocking.
    pub fn poll_submissions(&self) -> crate::Result<usize> {
        crate::lock(&self.submissions).poll()
    }

    /// Blocks until every submission in the ring has been retired.
    pub fn flush_submissions(&self) -> crate::Result<usize> {
        crate::lock(&self.submissions).flush()
    }

    pub fn in_flight_submissions(&self) -> usize {
        crate::lock(&self.submissions).len()
    }

    fn queue_submission(
        &self,
        command_list: &Arc<CommandList>,
        wait: Option<&Arc<Semaphore>>,
        wake: Option<&Arc<Semaphore>>,
        wait_stage_mask: vk::PipelineStageFlags,
    ) -> crate::Result<Arc<Fence>> {
        let tracked: Vec<TrackedResource> = wait
            .into_iter()
            .chain(wake)
            .map(|semaphore| semaphore.clone() as TrackedResource)
            .collect();
        let (command_buffer, previous_count) = command_list.prepare_submission(&tracked)?;

        let fence = match Fence::new(&self.shared) {
            Ok(fence) => Arc::new(fence),
            Err(e) => {
                command_list.abort_submission(previous_count);
                return Err(e);
            }
        };

        let batch = SubmitBatch {
            wait_semaphores: wait.iter().map(|semaphore| semaphore.handle()).collect(),
            wait_stages: wait.iter().map(|_| wait_stage_mask).collect(),
            command_buffers: Some(command_buffer)
                .filter(|&command_buffer| command_buffer != vk::CommandBuffer::null())
                .into_iter()
                .collect(),
            signal_semaphores: wake.iter().map(|semaphore| semaphore.handle()).collect(),
        };

        if let Err(e) =
            self.functions
                .queue_submit(self.graphics_queue.handle, &batch, fence.handle())
        {
            error!("Queue submit failed: {}", e);
            command_list.abort_submission(previous_count);
            return Err(VulkanError::SubmissionFailed(e));
        }

        command_list.mark_executing();
        debug!(
            "Submitted {} command buffer(s), {} wait, {} signal",
            batch.command_buffers.len(),
            batch.wait_semaphores.len(),
            batch.signal_semaphores.len()
        );
        Ok(fence)
    }

    /// Blocks until the device is idle. A failure leaves the device unusable.
    pub fn wait_for_idle(&self) -> crate::Result<()> {
        self.functions
            .device_wait_idle()
            .map_err(VulkanError::WaitIdleFailed)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_idle() {
            error!("Failed to wait for idle before destroying the device: {}", e);
        }

        let submissions = match self.submissions.get_mut() {
            Ok(submissions) => submissions,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = submissions.poll() {
            error!("Failed to retire submissions: {}", e);
        }
        submissions.clear();

        self.render_pass_cache.destroy_all();

        unsafe {
            ManuallyDrop::drop(&mut self.shared);
        }

        self.functions.destroy_device();
        trace!("Drop Device");
    }
}
