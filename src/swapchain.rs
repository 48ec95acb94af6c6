use crate::device::{DeviceQueue, DeviceShared};
use crate::functions::{DeviceFunctions, SwapchainDescription};
use crate::image::ImageUsage;
use crate::sync::Semaphore;
use crate::VulkanError;
use ash::vk;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// A presentation surface, destroyed on drop only when created with its extension loader.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_ext: Option<Arc<ash::extensions::khr::Surface>>,
}

impl Surface {
    pub fn new(handle: vk::SurfaceKHR, surface_ext: Arc<ash::extensions::khr::Surface>) -> Self {
        Self {
            handle,
            surface_ext: Some(surface_ext),
        }
    }

    /// Wraps a surface owned elsewhere.
    pub fn from_raw(handle: vk::SurfaceKHR) -> Self {
        Self {
            handle,
            surface_ext: None,
        }
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if let Some(surface_ext) = self.surface_ext.as_ref() {
            unsafe { surface_ext.destroy_surface(self.handle, None) };
            trace!("Drop Surface");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwapchainProperties {
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub usage: ImageUsage,
}

impl SwapchainProperties {
    /// Triple buffered fifo presentation into opaque attachment images.
    pub fn new(surface_format: vk::SurfaceFormatKHR, extent: vk::Extent2D) -> Self {
        Self {
            surface_format,
            extent,
            image_count: 3,
            present_mode: vk::PresentModeKHR::FIFO,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            usage: ImageUsage::ATTACHMENT,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

struct SwapchainState {
    handle: vk::SwapchainKHR,
    properties: SwapchainProperties,
    images: Vec<vk::Image>,
}

pub struct Swapchain {
    device: Weak<DeviceShared>,
    surface: Arc<Surface>,
    present_queue: DeviceQueue,
    queue_family_indices: Vec<u32>,
    state: Mutex<SwapchainState>,
}

impl Swapchain {
    pub(crate) fn new(
        device: &Arc<DeviceShared>,
        surface: Arc<Surface>,
        properties: SwapchainProperties,
        present_queue: DeviceQueue,
        queue_family_indices: Vec<u32>,
    ) -> crate::Result<Self> {
        let (handle, images) = create_swapchain(
            device.functions.as_ref(),
            &surface,
            &properties,
            &queue_family_indices,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device: Arc::downgrade(device),
            surface,
            present_queue,
            queue_family_indices,
            state: Mutex::new(SwapchainState {
                handle,
                properties,
                images,
            }),
        })
    }

    fn functions(&self) -> crate::Result<Arc<dyn DeviceFunctions>> {
        self.device
            .upgrade()
            .map(|device| device.functions.clone())
            .ok_or(VulkanError::DeviceDestroyed)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        crate::lock(&self.state).handle
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn properties(&self) -> SwapchainProperties {
        crate::lock(&self.state).properties.clone()
    }

    pub fn images(&self) -> Vec<vk::Image> {
        crate::lock(&self.state).images.clone()
    }

    /// Family of the queue images are presented on.
    pub fn queue_family(&self) -> u32 {
        self.present_queue.family_index
    }

    /// Families the swapchain images are shared between.
    pub fn queue_family_indices(&self) -> &[u32] {
        &self.queue_family_indices
    }

    /// Acquires the next image, signaling `image_ready` once it may be written.
    pub fn acquire_next_image(
        &self,
        image_ready: Option<&Semaphore>,
        timeout: Option<Duration>,
    ) -> crate::Result<AcquiredImage> {
        let functions = self.functions()?;
        let handle = self.handle();
        let (index, suboptimal) = functions.acquire_next_image(
            handle,
            crate::timeout_ns(timeout),
            image_ready.map_or(vk::Semaphore::null(), Semaphore::handle),
        )?;
        Ok(AcquiredImage { index, suboptimal })
    }

    /// Presents `image_index` on the presentation queue, returns whether the swapchain is
    /// suboptimal.
    pub fn present(&self, image_index: u32, wait: Option<&Semaphore>) -> crate::Result<bool> {
        let functions = self.functions()?;
        let handle = self.handle();
        Ok(functions.queue_present(
            self.present_queue.handle,
            handle,
            image_index,
            wait.map_or(vk::Semaphore::null(), Semaphore::handle),
        )?)
    }

    /// Rebuilds the swapchain with new properties, handing the old one to the driver.
    ///
    /// Waits for the presentation queue to go idle first, so no earlier present still reads
    /// from the old swapchain when it is destroyed.
    pub fn recreate(&self, properties: SwapchainProperties) -> crate::Result<()> {
        let functions = self.functions()?;
        let mut state = crate::lock(&self.state);

        functions.queue_wait_idle(self.present_queue.handle)?;

        let (handle, images) = create_swapchain(
            functions.as_ref(),
            &self.surface,
            &properties,
            &self.queue_family_indices,
            state.handle,
        )?;
        functions.destroy_swapchain(state.handle);
        debug!(
            "Recreated swapchain {}x{} with {} images",
            properties.extent.width,
            properties.extent.height,
            images.len()
        );

        state.handle = handle;
        state.properties = properties;
        state.images = images;
        Ok(())
    }
}

fn create_swapchain(
    functions: &dyn DeviceFunctions,
    surface: &Surface,
    properties: &SwapchainProperties,
    queue_family_indices: &[u32],
    old_swapchain: vk::SwapchainKHR,
) -> crate::Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
    let handle = functions.create_swapchain(&SwapchainDescription {
        surface: surface.handle(),
        properties: properties.clone(),
        queue_family_indices: queue_family_indices.to_vec(),
        old_swapchain,
    })?;

    match functions.get_swapchain_images(handle) {
        Ok(images) => Ok((handle, images)),
        Err(e) => {
            functions.destroy_swapchain(handle);
            Err(VulkanError::Vk(e))
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let handle = match self.state.get_mut() {
            Ok(state) => state.handle,
            Err(poisoned) => poisoned.into_inner().handle,
        };
        match self.device.upgrade() {
            Some(device) => device.functions.destroy_swapchain(handle),
            None => warn!("Swapchain {:?} outlived its device", handle),
        }
        trace!("Drop Swapchain");
    }
}
