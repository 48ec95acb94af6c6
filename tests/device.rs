use neptune_device::ash::vk;
use neptune_device::ash::vk::Handle;
use neptune_device::null::{
    null_adapter, null_memory_properties, DeviceCall, NullDeviceFunctions, NullMemoryAllocator,
    ObjectKind,
};
use neptune_device::*;
use std::sync::Arc;
use std::time::Duration;

struct TestDevice {
    device: Device,
    functions: Arc<NullDeviceFunctions>,
    allocator: Arc<NullMemoryAllocator>,
}

fn test_device_with(
    queue_family_count: u32,
    graphics_queue_family: u32,
    present_queue_family: u32,
    settings: DeviceSettings,
) -> TestDevice {
    let _ = pretty_env_logger::try_init();

    let functions = Arc::new(NullDeviceFunctions::new(queue_family_count));
    let allocator = Arc::new(NullMemoryAllocator::new(null_memory_properties()));
    let device = Device::new(
        Arc::new(null_adapter(graphics_queue_family, present_queue_family)),
        functions.clone(),
        allocator.clone(),
        settings,
    )
    .unwrap();

    TestDevice {
        device,
        functions,
        allocator,
    }
}

fn test_device() -> TestDevice {
    test_device_with(1, 0, 0, DeviceSettings::default())
}

fn color_target(device: &Device, size: [u32; 2]) -> Arc<ImageView> {
    let image = device
        .create_image(
            &ImageCreateInfo::texture_2d(
                vk::Format::B8G8R8A8_UNORM,
                size,
                ImageUsage::ATTACHMENT | ImageUsage::SAMPLED,
            ),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
    device
        .create_image_view(image, &ImageViewCreateInfo::default())
        .unwrap()
}

fn last_submission(functions: &NullDeviceFunctions) -> SubmitBatch {
    functions.submissions().pop().unwrap()
}

fn position(calls: &[DeviceCall], call: &DeviceCall) -> usize {
    calls.iter().position(|other| other == call).unwrap()
}

#[test]
fn submit_returns_a_signaled_fence_and_resets_the_list() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let command_list = device.create_command_list().unwrap();
    command_list.begin().unwrap();
    command_list.finish().unwrap();

    let fence = device
        .submit_command_list(&command_list, None, None)
        .unwrap();

    assert!(fence.is_signaled().unwrap());
    assert_eq!(command_list.state(), CommandListState::Recording);

    let batch = last_submission(&functions);
    assert_eq!(batch.command_buffers, vec![command_list.handle()]);
    assert!(batch.wait_semaphores.is_empty());
    assert!(batch.signal_semaphores.is_empty());
}

#[test]
fn submission_goes_to_the_graphics_queue() {
    let TestDevice {
        device, functions, ..
    } = test_device_with(2, 0, 1, DeviceSettings::default());

    let command_list = device.create_command_list().unwrap();
    assert_eq!(command_list.queue_family(), 0);
    command_list.finish().unwrap();
    let fence = device
        .submit_command_list(&command_list, None, None)
        .unwrap();

    assert!(functions.calls().contains(&DeviceCall::QueueSubmit {
        queue: device.graphics_queue().handle,
        batch: SubmitBatch::default(),
        fence: fence.handle(),
    }));
}

#[test]
fn empty_list_submits_no_command_buffers() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let command_list = device.create_command_list().unwrap();
    command_list.finish().unwrap();
    let fence = device
        .submit_command_list(&command_list, None, None)
        .unwrap();

    assert!(fence.is_signaled().unwrap());
    assert!(last_submission(&functions).command_buffers.is_empty());
    assert_eq!(functions.live_objects(ObjectKind::CommandBuffer), 0);
}

#[test]
fn submitting_a_recording_list_is_rejected() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let command_list = device.create_command_list().unwrap();
    command_list.begin().unwrap();

    assert!(matches!(
        device.submit_command_list(&command_list, None, None),
        Err(VulkanError::InvalidCommandListState {
            found: CommandListState::Recording,
            expected: CommandListState::Pending,
        })
    ));
    assert!(functions.submissions().is_empty());
}

#[test]
fn signal_semaphore_is_kept_alive_while_in_flight() {
    let TestDevice {
        device, functions, ..
    } = test_device();
    functions.set_stalled(true);

    let wake = device.create_semaphore().unwrap();
    let command_list = device.create_command_list().unwrap();
    command_list.finish().unwrap();

    let result = device.submit_command_list_with(
        &command_list,
        None,
        Some(&wake),
        &SubmitOptions {
            timeout: Some(Duration::from_millis(1)),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(VulkanError::FenceTimeout)));

    let batch = last_submission(&functions);
    assert!(batch.wait_semaphores.is_empty());
    assert_eq!(batch.signal_semaphores, vec![wake.handle()]);

    assert_eq!(command_list.state(), CommandListState::Executing);
    assert_eq!(Arc::strong_count(&wake), 2);
    assert_eq!(device.in_flight_submissions(), 1);

    assert_eq!(device.flush_submissions().unwrap(), 1);
    assert_eq!(command_list.state(), CommandListState::Recording);
    assert_eq!(Arc::strong_count(&wake), 1);
}

#[test]
fn wait_semaphore_uses_the_wait_stage_mask() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let wait = device.create_semaphore().unwrap();
    let command_list = device.create_command_list().unwrap();

    command_list.finish().unwrap();
    device
        .submit_command_list(&command_list, Some(&wait), None)
        .unwrap();
    let batch = last_submission(&functions);
    assert_eq!(batch.wait_semaphores, vec![wait.handle()]);
    assert_eq!(batch.wait_stages, vec![vk::PipelineStageFlags::ALL_COMMANDS]);

    command_list.finish().unwrap();
    device
        .submit_command_list_with(
            &command_list,
            Some(&wait),
            None,
            &SubmitOptions {
                wait_stage_mask: Some(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        last_submission(&functions).wait_stages,
        vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
    );
}

#[test]
fn rejected_submission_leaves_the_list_pending() {
    let TestDevice {
        device, functions, ..
    } = test_device();
    functions.set_fail_submit(true);

    let wake = device.create_semaphore().unwrap();
    let command_list = device.create_command_list().unwrap();
    command_list.begin().unwrap();
    command_list.finish().unwrap();

    let result = device.submit_command_list(&command_list, None, Some(&wake));
    assert!(matches!(result, Err(VulkanError::SubmissionFailed(_))));
    assert_eq!(command_list.state(), CommandListState::Pending);
    assert_eq!(command_list.tracked_resource_count(), 0);
    assert_eq!(Arc::strong_count(&wake), 1);

    functions.set_fail_submit(false);
    device
        .submit_command_list(&command_list, None, Some(&wake))
        .unwrap();
    assert_eq!(command_list.state(), CommandListState::Recording);
}

#[test]
fn reset_waits_for_confirmed_completion() {
    let TestDevice {
        device, functions, ..
    } = test_device();
    functions.set_stalled(true);

    let command_list = device.create_command_list().unwrap();
    command_list.finish().unwrap();
    let fence = device
        .submit_command_list_async(&command_list, None, None)
        .unwrap();

    assert!(!fence.is_signaled().unwrap());
    assert!(matches!(
        command_list.reset(),
        Err(VulkanError::CommandListInFlight)
    ));

    assert_eq!(device.flush_submissions().unwrap(), 1);
    assert!(fence.is_signaled().unwrap());
    command_list.reset().unwrap();
    assert_eq!(command_list.state(), CommandListState::Recording);
}

#[test]
fn async_submissions_apply_back_pressure() {
    let TestDevice {
        device, functions, ..
    } = test_device_with(
        1,
        0,
        0,
        DeviceSettings {
            max_submissions_in_flight: 2,
            ..Default::default()
        },
    );
    functions.set_stalled(true);

    let command_lists: Vec<Arc<CommandList>> = (0..3)
        .map(|_| device.create_command_list().unwrap())
        .collect();
    for command_list in command_lists.iter() {
        command_list.finish().unwrap();
        device
            .submit_command_list_async(command_list, None, None)
            .unwrap();
    }

    assert_eq!(device.in_flight_submissions(), 2);
    assert_eq!(command_lists[0].state(), CommandListState::Recording);
    assert_eq!(command_lists[1].state(), CommandListState::Executing);
    assert_eq!(command_lists[2].state(), CommandListState::Executing);

    assert_eq!(device.poll_submissions().unwrap(), 0);

    functions.set_stalled(false);
    assert_eq!(device.poll_submissions().unwrap(), 2);
    assert_eq!(device.in_flight_submissions(), 0);
    assert!(command_lists
        .iter()
        .all(|command_list| command_list.state() == CommandListState::Recording));
}

#[test]
fn framebuffers_with_the_same_format_share_a_render_pass() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let first = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [128, 128])],
            depth: None,
        })
        .unwrap();
    let second = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [128, 128])],
            depth: None,
        })
        .unwrap();

    assert_ne!(first.handle(), second.handle());
    assert_eq!(first.render_pass(), second.render_pass());
    assert_eq!(device.render_pass_cache().len(), 1);
    assert_eq!(functions.live_objects(ObjectKind::RenderPass), 1);
    assert_eq!(
        first.extent(),
        vk::Extent2D {
            width: 128,
            height: 128
        }
    );
}

#[test]
fn framebuffer_with_depth_uses_its_own_render_pass() {
    let TestDevice { device, .. } = test_device();

    let depth_image = device
        .create_image(
            &ImageCreateInfo::texture_2d(
                vk::Format::D32_SFLOAT,
                [64, 64],
                ImageUsage::ATTACHMENT,
            ),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
    let depth = device
        .create_image_view(depth_image, &ImageViewCreateInfo::default())
        .unwrap();
    assert_eq!(depth.format(), vk::Format::D32_SFLOAT);

    let color_only = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [64, 64])],
            depth: None,
        })
        .unwrap();
    let with_depth = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [64, 64])],
            depth: Some(depth),
        })
        .unwrap();

    assert_ne!(color_only.render_pass(), with_depth.render_pass());
    assert_eq!(device.render_pass_cache().len(), 2);
}

#[test]
fn render_targets_must_agree_on_extent() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let mismatched = device.create_framebuffer(RenderTargets {
        color: vec![color_target(&device, [64, 64]), color_target(&device, [32, 64])],
        depth: None,
    });
    assert!(matches!(
        mismatched,
        Err(VulkanError::InvalidRenderTargets(_))
    ));

    let empty = device.create_framebuffer(RenderTargets::default());
    assert!(matches!(empty, Err(VulkanError::InvalidRenderTargets(_))));

    assert_eq!(functions.live_objects(ObjectKind::Framebuffer), 0);
    assert!(device.render_pass_cache().is_empty());
}

#[test]
fn unsatisfiable_memory_flags_leak_nothing() {
    let TestDevice {
        device,
        functions,
        allocator,
    } = test_device();

    let result = device.create_image(
        &ImageCreateInfo::texture_2d(
            vk::Format::R8G8B8A8_UNORM,
            [16, 16],
            ImageUsage::SAMPLED,
        ),
        vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_CACHED,
    );

    assert!(matches!(
        result,
        Err(VulkanError::NoSuitableMemoryType { .. })
    ));
    assert_eq!(functions.live_objects(ObjectKind::Image), 0);
    assert_eq!(allocator.live_allocations(), 0);
}

#[test]
fn bind_failure_releases_image_and_memory() {
    let TestDevice {
        device,
        functions,
        allocator,
    } = test_device();
    functions.set_fail_bind(true);

    let result = device.create_image(
        &ImageCreateInfo::texture_2d(
            vk::Format::R8G8B8A8_UNORM,
            [16, 16],
            ImageUsage::SAMPLED,
        ),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    );

    assert!(matches!(result, Err(VulkanError::Vk(_))));
    assert_eq!(functions.live_objects(ObjectKind::Image), 0);
    assert_eq!(allocator.live_allocations(), 0);
}

#[test]
fn bind_failure_reports_the_bind_error_when_free_fails() {
    let TestDevice {
        device,
        functions,
        allocator,
    } = test_device();
    functions.set_fail_bind(true);
    allocator.set_fail_free(true);

    let result = device.create_image(
        &ImageCreateInfo::texture_2d(
            vk::Format::R8G8B8A8_UNORM,
            [16, 16],
            ImageUsage::SAMPLED,
        ),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    );

    assert!(matches!(
        result,
        Err(VulkanError::Vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    ));
    assert_eq!(functions.live_objects(ObjectKind::Image), 0);
    assert_eq!(allocator.live_allocations(), 1);
}

#[test]
fn invalid_image_is_rejected_before_reaching_the_driver() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let result = device.create_image(
        &ImageCreateInfo::texture_2d(vk::Format::R8G8B8A8_UNORM, [0, 16], ImageUsage::SAMPLED),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    );

    assert!(matches!(result, Err(VulkanError::InvalidImage(_))));
    assert!(!functions
        .calls()
        .iter()
        .any(|call| matches!(call, DeviceCall::Create(ObjectKind::Image, _))));
}

#[test]
fn image_memory_is_freed_on_drop() {
    let TestDevice {
        device,
        functions,
        allocator,
    } = test_device();

    let image = device
        .create_image(
            &ImageCreateInfo::texture_2d(
                vk::Format::R8G8B8A8_UNORM,
                [16, 16],
                ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            ),
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )
        .unwrap();
    assert_eq!(
        image.memory_flags(),
        vk::MemoryPropertyFlags::HOST_VISIBLE
    );
    assert_eq!(allocator.live_allocations(), 1);

    drop(image);
    assert_eq!(functions.live_objects(ObjectKind::Image), 0);
    assert_eq!(allocator.live_allocations(), 0);
}

fn mipmapped_image(device: &Device) -> Arc<Image> {
    let mut create_info =
        ImageCreateInfo::texture_2d(vk::Format::R8G8B8A8_UNORM, [64, 64], ImageUsage::SAMPLED);
    create_info.mip_levels = 2;
    create_info.array_layers = 3;
    device
        .create_image(&create_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .unwrap()
}

#[test]
fn image_view_resolves_remaining_levels_and_layers() {
    let TestDevice { device, .. } = test_device();
    let image = mipmapped_image(&device);

    let view = device
        .create_image_view(
            image,
            &ImageViewCreateInfo {
                base_mip_level: 1,
                mip_level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 1,
                array_layer_count: vk::REMAINING_ARRAY_LAYERS,
                ..Default::default()
            },
        )
        .unwrap();

    let range = view.subresource_range();
    assert_eq!(range.base_mip_level, 1);
    assert_eq!(range.level_count, 1);
    assert_eq!(range.base_array_layer, 1);
    assert_eq!(range.layer_count, 2);
    assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
}

#[test]
fn image_view_rejects_ranges_outside_the_image() {
    let TestDevice {
        device, functions, ..
    } = test_device();
    let image = mipmapped_image(&device);

    let invalid_ranges = [
        ImageViewCreateInfo {
            mip_level_count: 0,
            ..Default::default()
        },
        ImageViewCreateInfo {
            array_layer_count: 0,
            ..Default::default()
        },
        ImageViewCreateInfo {
            base_mip_level: 2,
            mip_level_count: vk::REMAINING_MIP_LEVELS,
            ..Default::default()
        },
        ImageViewCreateInfo {
            base_mip_level: 1,
            mip_level_count: 2,
            ..Default::default()
        },
        ImageViewCreateInfo {
            base_array_layer: 1,
            array_layer_count: u32::MAX - 1,
            ..Default::default()
        },
    ];

    for create_info in invalid_ranges.iter() {
        assert!(matches!(
            device.create_image_view(image.clone(), create_info),
            Err(VulkanError::InvalidImage(_))
        ));
    }
    assert_eq!(functions.live_objects(ObjectKind::ImageView), 0);
}

#[test]
fn swapchain_binds_to_the_present_family() {
    let TestDevice {
        device, functions, ..
    } = test_device_with(2, 0, 1, DeviceSettings::default());

    let swapchain = device
        .create_swapchain(
            Arc::new(Surface::from_raw(vk::SurfaceKHR::from_raw(42))),
            SwapchainProperties::new(
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::Extent2D {
                    width: 800,
                    height: 600,
                },
            ),
        )
        .unwrap();

    assert_eq!(swapchain.queue_family(), 1);
    assert_eq!(swapchain.queue_family_indices(), &[0, 1]);
    assert_eq!(swapchain.images().len(), 3);
    assert!(functions.calls().contains(&DeviceCall::CreateSwapchain {
        swapchain: swapchain.handle(),
        surface: vk::SurfaceKHR::from_raw(42),
        queue_family_indices: vec![0, 1],
        old_swapchain: vk::SwapchainKHR::null(),
    }));

    let image_ready = device.create_semaphore().unwrap();
    let acquired = swapchain
        .acquire_next_image(Some(image_ready.as_ref()), None)
        .unwrap();
    assert!(!swapchain.present(acquired.index, None).unwrap());
    assert!(functions.calls().contains(&DeviceCall::QueuePresent {
        queue: device.present_queue().handle,
        swapchain: swapchain.handle(),
        image_index: acquired.index,
    }));
}

#[test]
fn swapchain_recreate_retires_the_old_handle() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let surface_format = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    let swapchain = device
        .create_swapchain(
            Arc::new(Surface::from_raw(vk::SurfaceKHR::from_raw(7))),
            SwapchainProperties::new(
                surface_format,
                vk::Extent2D {
                    width: 640,
                    height: 480,
                },
            ),
        )
        .unwrap();
    assert_eq!(swapchain.queue_family_indices(), &[0]);
    let old_handle = swapchain.handle();

    let mut properties = SwapchainProperties::new(
        surface_format,
        vk::Extent2D {
            width: 1280,
            height: 720,
        },
    );
    properties.image_count = 2;
    swapchain.recreate(properties).unwrap();

    assert_ne!(swapchain.handle(), old_handle);
    assert_eq!(swapchain.images().len(), 2);
    assert_eq!(swapchain.properties().extent.width, 1280);

    let calls = functions.calls();
    assert!(calls.contains(&DeviceCall::CreateSwapchain {
        swapchain: swapchain.handle(),
        surface: vk::SurfaceKHR::from_raw(7),
        queue_family_indices: vec![0],
        old_swapchain: old_handle,
    }));
    let wait_present = position(
        &calls,
        &DeviceCall::QueueWaitIdle(device.present_queue().handle),
    );
    let destroy_old = position(
        &calls,
        &DeviceCall::Destroy(ObjectKind::Swapchain, old_handle.as_raw()),
    );
    assert!(wait_present < destroy_old);
    assert_eq!(functions.live_objects(ObjectKind::Swapchain), 1);
}

#[test]
fn context_records_a_render_pass() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let framebuffer = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [32, 32])],
            depth: None,
        })
        .unwrap();
    let command_list = device.create_command_list().unwrap();
    let context = device.create_context();

    context.begin_recording(command_list.clone()).unwrap();
    context
        .bind_framebuffer(
            framebuffer.clone(),
            &[vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            }],
        )
        .unwrap();
    assert_eq!(Arc::strong_count(&framebuffer), 3);

    let finished = context.end_recording().unwrap();
    assert!(Arc::ptr_eq(&finished, &command_list));
    assert_eq!(command_list.state(), CommandListState::Pending);
    assert!(context.command_list().is_none());
    assert!(context.framebuffer().is_none());

    let calls = functions.calls();
    let begin = position(
        &calls,
        &DeviceCall::BeginRenderPass {
            command_buffer: command_list.handle(),
            render_pass: framebuffer.render_pass(),
            framebuffer: framebuffer.handle(),
        },
    );
    let end = position(
        &calls,
        &DeviceCall::EndRenderPass(command_list.handle().as_raw()),
    );
    assert!(begin < end);

    device
        .submit_command_list(&command_list, None, None)
        .unwrap();
    assert_eq!(Arc::strong_count(&framebuffer), 1);
}

#[test]
fn context_without_command_list_fails() {
    let TestDevice { device, .. } = test_device();

    let framebuffer = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [8, 8])],
            depth: None,
        })
        .unwrap();
    let context = device.create_context();

    assert!(matches!(
        context.bind_framebuffer(framebuffer, &[]),
        Err(VulkanError::NoCommandList)
    ));
    assert!(matches!(
        context.end_recording(),
        Err(VulkanError::NoCommandList)
    ));
}

#[test]
fn drop_waits_for_idle_before_destroying_the_device() {
    let TestDevice {
        device, functions, ..
    } = test_device();

    let framebuffer = device
        .create_framebuffer(RenderTargets {
            color: vec![color_target(&device, [8, 8])],
            depth: None,
        })
        .unwrap();
    let render_pass = framebuffer.render_pass();
    drop(framebuffer);
    drop(device);

    let calls = functions.calls();
    let wait_idle = position(&calls, &DeviceCall::DeviceWaitIdle);
    let destroy_render_pass = position(
        &calls,
        &DeviceCall::Destroy(ObjectKind::RenderPass, render_pass.as_raw()),
    );
    let destroy_device = position(&calls, &DeviceCall::DestroyDevice);
    assert!(wait_idle < destroy_render_pass);
    assert!(destroy_render_pass < destroy_device);
    assert_eq!(calls.last(), Some(&DeviceCall::DestroyDevice));
}

#[test]
fn drop_destroys_the_device_even_when_wait_idle_fails() {
    let TestDevice {
        device, functions, ..
    } = test_device();
    functions.set_fail_wait_idle(true);

    assert!(matches!(
        device.wait_for_idle(),
        Err(VulkanError::WaitIdleFailed(vk::Result::ERROR_DEVICE_LOST))
    ));
    assert!(device
        .wait_for_idle()
        .map_err(|e| e.is_device_fatal())
        .unwrap_err());

    drop(device);
    assert_eq!(functions.calls().last(), Some(&DeviceCall::DestroyDevice));
}

#[test]
fn drop_retires_in_flight_submissions() {
    let TestDevice {
        device, functions, ..
    } = test_device();
    functions.set_stalled(true);

    let command_list = device.create_command_list().unwrap();
    command_list.finish().unwrap();
    device
        .submit_command_list_async(&command_list, None, None)
        .unwrap();
    assert_eq!(command_list.state(), CommandListState::Executing);

    drop(device);
    assert_eq!(command_list.state(), CommandListState::Recording);
}

#[test]
fn missing_queue_releases_the_connection() {
    let _ = pretty_env_logger::try_init();

    let functions = Arc::new(NullDeviceFunctions::new(1));
    let allocator = Arc::new(NullMemoryAllocator::new(null_memory_properties()));
    let result = Device::new(
        Arc::new(null_adapter(0, 1)),
        functions.clone(),
        allocator.clone(),
        DeviceSettings::default(),
    );

    assert!(matches!(
        result,
        Err(VulkanError::QueueUnavailable {
            family_index: 1,
            queue_index: 0,
        })
    ));
    assert_eq!(Arc::strong_count(&allocator), 1);

    let calls = functions.calls();
    let wait_idle = position(&calls, &DeviceCall::DeviceWaitIdle);
    let destroy_device = position(&calls, &DeviceCall::DestroyDevice);
    assert!(wait_idle < destroy_device);
}

#[test]
fn resources_outliving_the_device_skip_their_destroy() {
    let TestDevice {
        device,
        functions,
        allocator,
    } = test_device();

    let semaphore = device.create_semaphore().unwrap();
    let view = color_target(&device, [8, 8]);
    let command_list = device.create_command_list().unwrap();
    drop(device);

    drop(semaphore);
    drop(view);
    drop(command_list);

    let calls = functions.calls();
    let destroy_device = position(&calls, &DeviceCall::DestroyDevice);
    assert!(!calls[destroy_device..]
        .iter()
        .any(|call| matches!(call, DeviceCall::Destroy(..))));
    assert_eq!(allocator.live_allocations(), 1);
}

#[test]
fn device_releases_its_allocator_on_drop() {
    let TestDevice {
        device, allocator, ..
    } = test_device();

    let image = device
        .create_image(
            &ImageCreateInfo::texture_2d(vk::Format::R8G8B8A8_UNORM, [4, 4], ImageUsage::SAMPLED),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
    assert_eq!(allocator.live_allocations(), 1);
    assert!(device
        .allocator()
        .allocate(
            "scratch",
            &vk::MemoryRequirements {
                size: 64,
                alignment: 16,
                memory_type_bits: 0b1,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            false,
        )
        .and_then(|block| device.allocator().free(block))
        .is_ok());

    drop(device);
    assert_eq!(Arc::strong_count(&allocator), 1);
    drop(image);
}
