use crate::device::DeviceShared;
use crate::functions::DeviceFunctions;
use crate::VulkanError;
use ash::vk;
use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CommandListState {
    /// Open for recording, possibly without any commands yet.
    Recording,
    /// Finished and waiting to be submitted.
    Pending,
    /// Submitted, the gpu may still be reading it.
    Executing,
    /// The submission fence has signaled.
    Completed,
}

pub type TrackedResource = Arc<dyn Any + Send + Sync>;

struct CommandListInner {
    state: CommandListState,
    handle: vk::CommandBuffer,
    recorded: bool,
    tracked_resources: Vec<TrackedResource>,
}

/// A resettable unit of recorded gpu work bound to one queue family.
///
/// The native command buffer is allocated on the first call to [`CommandList::begin`], so a
/// list finished without recording anything carries no command buffer into its submission.
pub struct CommandList {
    device: Weak<DeviceShared>,
    queue_family: u32,
    pool: vk::CommandPool,
    inner: Mutex<CommandListInner>,
}

impl CommandList {
    pub(crate) fn new(
        device: &Arc<DeviceShared>,
        queue_family: u32,
    ) -> crate::Result<Self> {
        let pool = device.functions.create_command_pool(queue_family)?;
        Ok(Self {
            device: Arc::downgrade(device),
            queue_family,
            pool,
            inner: Mutex::new(CommandListInner {
                state: CommandListState::Recording,
                handle: vk::CommandBuffer::null(),
                recorded: false,
                tracked_resources: Vec::new(),
            }),
        })
    }

    fn functions(&self) -> crate::Result<Arc<dyn DeviceFunctions>> {
        self.device
            .upgrade()
            .map(|device| device.functions.clone())
            .ok_or(VulkanError::DeviceDestroyed)
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn state(&self) -> CommandListState {
        crate::lock(&self.inner).state
    }

    /// Native command buffer, null until something has been recorded.
    pub fn handle(&self) -> vk::CommandBuffer {
        crate::lock(&self.inner).handle
    }

    /// Returns the command buffer to record into, beginning it if this cycle has not yet.
    pub fn begin(&self) -> crate::Result<vk::CommandBuffer> {
        let mut inner = crate::lock(&self.inner);
        expect_state(inner.state, CommandListState::Recording)?;

        if !inner.recorded {
            let functions = self.functions()?;
            if inner.handle == vk::CommandBuffer::null() {
                inner.handle = functions.allocate_command_buffer(self.pool)?;
            }
            functions.begin_command_buffer(inner.handle)?;
            inner.recorded = true;
        }

        Ok(inner.handle)
    }

    /// Ends recording, the list can be submitted afterwards.
    pub fn finish(&self) -> crate::Result<()> {
        let mut inner = crate::lock(&self.inner);
        expect_state(inner.state, CommandListState::Recording)?;

        if inner.recorded {
            self.functions()?.end_command_buffer(inner.handle)?;
        }
        inner.state = CommandListState::Pending;
        Ok(())
    }

    /// Keeps `resource` alive until the list is next reset.
    pub fn track_resource<T: Any + Send + Sync>(&self, resource: Arc<T>) {
        crate::lock(&self.inner).tracked_resources.push(resource);
    }

    pub fn tracked_resource_count(&self) -> usize {
        crate::lock(&self.inner).tracked_resources.len()
    }

    /// Returns the list to [`CommandListState::Recording`] and releases tracked resources.
    ///
    /// Fails with [`VulkanError::CommandListInFlight`] while a submission is outstanding.
    pub fn reset(&self) -> crate::Result<()> {
        let mut inner = crate::lock(&self.inner);
        if inner.state == CommandListState::Executing {
            return Err(VulkanError::CommandListInFlight);
        }

        if inner.handle != vk::CommandBuffer::null() {
            self.functions()?.reset_command_buffer(inner.handle)?;
        }
        inner.recorded = false;
        inner.tracked_resources.clear();
        inner.state = CommandListState::Recording;
        Ok(())
    }

    /// Checks the list is pending and tracks `resources` for the coming submission.
    ///
    /// Returns the command buffer to submit (null when nothing was recorded) and the tracked
    /// resource count before the new entries, for [`CommandList::abort_submission`].
    pub(crate) fn prepare_submission(
        &self,
        resources: &[TrackedResource],
    ) -> crate::Result<(vk::CommandBuffer, usize)> {
        let mut inner = crate::lock(&self.inner);
        expect_state(inner.state, CommandListState::Pending)?;

        let previous_count = inner.tracked_resources.len();
        inner.tracked_resources.extend(resources.iter().cloned());

        let handle = if inner.recorded {
            inner.handle
        } else {
            vk::CommandBuffer::null()
        };
        Ok((handle, previous_count))
    }

    pub(crate) fn abort_submission(&self, previous_count: usize) {
        crate::lock(&self.inner)
            .tracked_resources
            .truncate(previous_count);
    }

    pub(crate) fn mark_executing(&self) {
        crate::lock(&self.inner).state = CommandListState::Executing;
    }

    pub(crate) fn mark_completed(&self) {
        crate::lock(&self.inner).state = CommandListState::Completed;
    }
}

fn expect_state(found: CommandListState, expected: CommandListState) -> crate::Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(VulkanError::InvalidCommandListState { found, expected })
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.state == CommandListState::Executing {
            error!("Command list dropped while executing");
        }
        inner.tracked_resources.clear();

        match self.device.upgrade() {
            Some(device) => device.functions.destroy_command_pool(self.pool),
            None => warn!("Command list pool {:?} outlived its device", self.pool),
        }
        trace!("Drop Command List");
    }
}
