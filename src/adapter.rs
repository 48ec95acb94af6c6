use crate::VulkanError;
use ash::vk;
use std::ffi::CStr;

fn find_queue_index(
    queue_family_properties: &[vk::QueueFamilyProperties],
    contains_flags: vk::QueueFlags,
) -> Option<u32> {
    queue_family_properties
        .iter()
        .enumerate()
        .find(|(_index, &queue_family)| {
            queue_family.queue_count > 0 && queue_family.queue_flags.contains(contains_flags)
        })
        .map(|(index, _queue_family)| index as u32)
}

/// The physical device a [`crate::Device`] is created on.
#[derive(Clone, Debug)]
pub struct Adapter {
    handle: vk::PhysicalDevice,
    name: String,
    graphics_queue_family: u32,
    present_queue_family: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Adapter {
    pub fn new(
        handle: vk::PhysicalDevice,
        name: &str,
        graphics_queue_family: u32,
        present_queue_family: u32,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
    ) -> Self {
        Self {
            handle,
            name: name.to_string(),
            graphics_queue_family,
            present_queue_family,
            memory_properties,
        }
    }

    /// Reads queue families and memory properties of an already selected physical device.
    ///
    /// The present family is the graphics family when it can present to `surface`, otherwise
    /// the first family that can. Without a surface both are the graphics family.
    pub fn from_physical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: Option<(&ash::extensions::khr::Surface, vk::SurfaceKHR)>,
    ) -> crate::Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let graphics_queue_family =
            find_queue_index(&queue_family_properties, vk::QueueFlags::GRAPHICS).ok_or(
                VulkanError::QueueUnavailable {
                    family_index: u32::MAX,
                    queue_index: 0,
                },
            )?;

        let present_queue_family = match surface {
            None => graphics_queue_family,
            Some((surface_ext, surface)) => {
                let supports_present = |family_index: u32| unsafe {
                    surface_ext
                        .get_physical_device_surface_support(physical_device, family_index, surface)
                        .unwrap_or(false)
                };

                if supports_present(graphics_queue_family) {
                    graphics_queue_family
                } else {
                    (0..queue_family_properties.len() as u32)
                        .find(|&family_index| supports_present(family_index))
                        .ok_or(VulkanError::QueueUnavailable {
                            family_index: u32::MAX,
                            queue_index: 0,
                        })?
                }
            }
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            handle: physical_device,
            name,
            graphics_queue_family,
            present_queue_family,
            memory_properties,
        })
    }

    /// Creates the logical device with one queue per used family and the swapchain extension.
    pub fn create_device_connection(&self, instance: &ash::Instance) -> crate::Result<ash::Device> {
        let priorities = [1.0];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(self.graphics_queue_family)
            .queue_priorities(&priorities)
            .build()];
        if self.present_queue_family != self.graphics_queue_family {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(self.present_queue_family)
                    .queue_priorities(&priorities)
                    .build(),
            );
        }

        let device_extension_names_raw = [ash::extensions::khr::Swapchain::name().as_ptr()];

        let device = unsafe {
            instance.create_device(
                self.handle,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_create_infos)
                    .enabled_extension_names(&device_extension_names_raw),
                None,
            )
        }?;
        Ok(device)
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub fn present_queue_family(&self) -> u32 {
        self.present_queue_family
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn graphics_family_skips_empty_and_non_graphics_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
        ];
        assert_eq!(find_queue_index(&families, vk::QueueFlags::GRAPHICS), Some(2));
        assert_eq!(find_queue_index(&families[..2], vk::QueueFlags::GRAPHICS), None);
    }
}
