use crate::device::DeviceShared;
use crate::VulkanError;
use ash::vk;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct Semaphore {
    device: Weak<DeviceShared>,
    handle: vk::Semaphore,
}

impl Semaphore {
    pub(crate) fn new(device: &Arc<DeviceShared>) -> crate::Result<Self> {
        let handle = device.functions.create_semaphore()?;
        Ok(Self {
            device: Arc::downgrade(device),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => device.functions.destroy_semaphore(self.handle),
            None => warn!("Semaphore {:?} outlived its device", self.handle),
        }
        trace!("Drop Semaphore");
    }
}

pub struct Fence {
    device: Weak<DeviceShared>,
    handle: vk::Fence,
}

impl Fence {
    pub(crate) fn new(device: &Arc<DeviceShared>) -> crate::Result<Self> {
        let handle = device.functions.create_fence(false)?;
        Ok(Self {
            device: Arc::downgrade(device),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    fn device(&self) -> crate::Result<Arc<DeviceShared>> {
        self.device.upgrade().ok_or(VulkanError::DeviceDestroyed)
    }

    /// Blocks until the fence is signaled. `None` waits without a limit.
    pub fn wait(&self, timeout: Option<Duration>) -> crate::Result<()> {
        let device = self.device()?;
        match device.functions.wait_for_fence(self.handle, crate::timeout_ns(timeout)) {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::FenceTimeout),
            Err(e) => Err(VulkanError::Vk(e)),
        }
    }

    pub fn is_signaled(&self) -> crate::Result<bool> {
        Ok(self.device()?.functions.get_fence_status(self.handle)?)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => device.functions.destroy_fence(self.handle),
            None => warn!("Fence {:?} outlived its device", self.handle),
        }
        trace!("Drop Fence");
    }
}
