use crate::render_pass::RenderPassFormat;
use crate::swapchain::SwapchainProperties;
use ash::prelude::VkResult;
use ash::vk;

/// A single queue submission as handed to the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitBatch {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

#[derive(Debug, Clone)]
pub struct SwapchainDescription {
    pub surface: vk::SurfaceKHR,
    pub properties: SwapchainProperties,
    pub queue_family_indices: Vec<u32>,
    pub old_swapchain: vk::SwapchainKHR,
}

/// Function table over a logical device connection.
///
/// Every method maps onto one driver entry point. Implementations own the connection:
/// nothing is destroyed implicitly, `destroy_device` is the only way to release it.
pub trait DeviceFunctions: Send + Sync {
    fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue;
    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch, fence: vk::Fence)
        -> VkResult<()>;
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
    fn device_wait_idle(&self) -> VkResult<()>;
    fn destroy_device(&self);

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;

    fn create_command_pool(&self, family_index: u32) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    fn create_image(&self, create_info: &vk::ImageCreateInfo) -> VkResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;

    fn create_image_view(&self, create_info: &vk::ImageViewCreateInfo)
        -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, image_view: vk::ImageView);

    fn create_render_pass(&self, format: &RenderPassFormat) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_swapchain(&self, description: &SwapchainDescription)
        -> VkResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
}

pub struct AshDeviceFunctions {
    core: ash::Device,
    swapchain: ash::extensions::khr::Swapchain,
}

impl AshDeviceFunctions {
    pub fn new(instance: &ash::Instance, core: ash::Device) -> Self {
        let swapchain = ash::extensions::khr::Swapchain::new(instance, &core);
        Self { core, swapchain }
    }

    pub fn core(&self) -> &ash::Device {
        &self.core
    }
}

impl DeviceFunctions for AshDeviceFunctions {
    fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.core.get_device_queue(family_index, queue_index) }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        batch: &SubmitBatch,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&batch.wait_semaphores)
            .wait_dst_stage_mask(&batch.wait_stages)
            .command_buffers(&batch.command_buffers)
            .signal_semaphores(&batch.signal_semaphores);
        unsafe { self.core.queue_submit(queue, &[submit_info.build()], fence) }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let mut present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        if wait_semaphore != vk::Semaphore::null() {
            present_info = present_info.wait_semaphores(&wait_semaphores);
        }
        unsafe { self.swapchain.queue_present(queue, &present_info) }
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.core.queue_wait_idle(queue) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.core.device_wait_idle() }
    }

    fn destroy_device(&self) {
        unsafe { self.core.destroy_device(None) };
        trace!("Destroy Device");
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.core
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.core.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.core
                .create_fence(&vk::FenceCreateInfo::builder().flags(flags), None)
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.core.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.core.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.core.get_fence_status(fence) }
    }

    fn create_command_pool(&self, family_index: u32) -> VkResult<vk::CommandPool> {
        unsafe {
            self.core.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
        }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.core.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let command_buffers = unsafe {
            self.core.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?;
        command_buffers
            .first()
            .copied()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.core.begin_command_buffer(
                command_buffer,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.core.end_command_buffer(command_buffer) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.core
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    fn create_image(&self, create_info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        unsafe { self.core.create_image(create_info, None) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.core.destroy_image(image, None) }
    }

    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.core.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.core.bind_image_memory(image, memory, offset) }
    }

    fn create_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo,
    ) -> VkResult<vk::ImageView> {
        unsafe { self.core.create_image_view(create_info, None) }
    }

    fn destroy_image_view(&self, image_view: vk::ImageView) {
        unsafe { self.core.destroy_image_view(image_view, None) }
    }

    fn create_render_pass(&self, format: &RenderPassFormat) -> VkResult<vk::RenderPass> {
        let mut attachments: Vec<vk::AttachmentDescription> = Vec::new();
        let mut color_references: Vec<vk::AttachmentReference> = Vec::new();
        for &color_format in format.color_formats.iter() {
            color_references.push(
                vk::AttachmentReference::builder()
                    .attachment(attachments.len() as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            attachments.push(vk::AttachmentDescription {
                flags: Default::default(),
                format: color_format,
                samples: format.samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }

        let depth_reference = format.depth_format.map(|depth_format| {
            let reference = vk::AttachmentReference::builder()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build();
            attachments.push(vk::AttachmentDescription {
                flags: Default::default(),
                format: depth_format,
                samples: format.samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::CLEAR,
                stencil_store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
            reference
        });

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_references);
        if let Some(depth_reference) = depth_reference.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_reference);
        }

        unsafe {
            self.core.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(&attachments)
                    .subpasses(&[subpass.build()]),
                None,
            )
        }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.core.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> VkResult<vk::Framebuffer> {
        unsafe {
            self.core.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(layers),
                None,
            )
        }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.core.destroy_framebuffer(framebuffer, None) }
    }

    fn create_swapchain(
        &self,
        description: &SwapchainDescription,
    ) -> VkResult<vk::SwapchainKHR> {
        let properties = &description.properties;
        let sharing_mode = if description.queue_family_indices.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        unsafe {
            self.swapchain.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(description.surface)
                    .min_image_count(properties.image_count)
                    .image_color_space(properties.surface_format.color_space)
                    .image_format(properties.surface_format.format)
                    .image_extent(properties.extent)
                    .image_array_layers(1)
                    .image_usage(properties.usage.to_vk(properties.surface_format.format))
                    .image_sharing_mode(sharing_mode)
                    .queue_family_indices(&description.queue_family_indices)
                    .pre_transform(properties.pre_transform)
                    .composite_alpha(properties.composite_alpha)
                    .present_mode(properties.present_mode)
                    .clipped(true)
                    .old_swapchain(description.old_swapchain),
                None,
            )
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain.destroy_swapchain(swapchain, None) }
    }

    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain.get_swapchain_images(swapchain) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        unsafe {
            self.core.cmd_begin_render_pass(
                command_buffer,
                &vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(clear_values),
                vk::SubpassContents::INLINE,
            )
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.core.cmd_end_render_pass(command_buffer) }
    }
}
