mod adapter;
mod command_list;
mod context;
mod device;
mod framebuffer;
mod functions;
mod image;
mod memory;
pub mod null;
mod render_pass;
mod submission;
mod swapchain;
mod sync;

pub use adapter::*;
pub use command_list::*;
pub use context::*;
pub use device::*;
pub use framebuffer::*;
pub use functions::*;
pub use image::*;
pub use memory::*;
pub use render_pass::*;
pub use submission::*;
pub use swapchain::*;
pub use sync::*;

pub use ash;

use ash::vk;
use std::sync::{Mutex, MutexGuard};

#[macro_use]
extern crate log;

#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    #[error("Vk error: {0}")]
    Vk(#[from] vk::Result),

    #[error("Gpu alloc error: {0}")]
    GpuAlloc(#[from] gpu_allocator::AllocationError),

    #[error("No queue {queue_index} in queue family {family_index}")]
    QueueUnavailable { family_index: u32, queue_index: u32 },

    #[error("No memory type supports {flags:?} (allowed types {type_bits:#b})")]
    NoSuitableMemoryType {
        flags: vk::MemoryPropertyFlags,
        type_bits: u32,
    },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid render targets: {0}")]
    InvalidRenderTargets(String),

    #[error("Command list is {found:?}, expected {expected:?}")]
    InvalidCommandListState {
        found: CommandListState,
        expected: CommandListState,
    },

    #[error("Command list is still executing")]
    CommandListInFlight,

    #[error("Queue rejected submission: {0}")]
    SubmissionFailed(vk::Result),

    #[error("Fence wait timed out")]
    FenceTimeout,

    #[error("Device wait idle failed: {0}")]
    WaitIdleFailed(vk::Result),

    #[error("Context has no command list bound")]
    NoCommandList,

    #[error("Device has been destroyed")]
    DeviceDestroyed,
}

impl VulkanError {
    /// Errors after which the device has to be torn down.
    pub fn is_device_fatal(&self) -> bool {
        matches!(
            self,
            VulkanError::WaitIdleFailed(_)
                | VulkanError::Vk(vk::Result::ERROR_DEVICE_LOST)
                | VulkanError::SubmissionFailed(vk::Result::ERROR_DEVICE_LOST)
                | VulkanError::DeviceDestroyed
        )
    }
}

pub type Result<T> = std::result::Result<T, VulkanError>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn timeout_ns(timeout: Option<std::time::Duration>) -> u64 {
    timeout
        .map(|duration| u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(u64::MAX)
}
