use crate::command_list::CommandList;
use crate::sync::Fence;
use ash::vk;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Per call overrides for a command list submission.
#[derive(Debug, Copy, Clone, Default)]
pub struct SubmitOptions {
    /// Stages that wait on the wait semaphore, the device default when `None`.
    pub wait_stage_mask: Option<vk::PipelineStageFlags>,
    /// Limit for the completion wait of a synchronous submit.
    pub timeout: Option<Duration>,
}

struct InFlightSubmission {
    fence: Arc<Fence>,
    command_list: Arc<CommandList>,
}

/// Fixed capacity queue of submissions whose completion has not been observed yet, oldest
/// first.
pub struct SubmissionRing {
    capacity: usize,
    submissions: VecDeque<InFlightSubmission>,
}

impl SubmissionRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            submissions: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.submissions.len() >= self.capacity
    }

    /// Adds a submission. Never blocks, callers make room with [`SubmissionRing::retire_oldest`]
    /// first when they want to respect the capacity.
    pub(crate) fn push(&mut self, fence: Arc<Fence>, command_list: Arc<CommandList>) {
        self.submissions.push_back(InFlightSubmission {
            fence,
            command_list,
        });
    }

    /// Blocks on the oldest submission and retires it. Returns false when the ring is empty.
    pub(crate) fn retire_oldest(&mut self) -> crate::Result<bool> {
        let Some(oldest) = self.submissions.front() else {
            return Ok(false);
        };
        oldest.fence.wait(None)?;

        if let Some(oldest) = self.submissions.pop_front() {
            retire(oldest)?;
        }
        Ok(true)
    }

    /// Retires every leading submission whose fence has signaled.
    pub(crate) fn poll(&mut self) -> crate::Result<usize> {
        let mut retired = 0;
        while let Some(oldest) = self.submissions.front() {
            if !oldest.fence.is_signaled()? {
                break;
            }

            if let Some(oldest) = self.submissions.pop_front() {
                retire(oldest)?;
                retired += 1;
            }
        }
        Ok(retired)
    }

    pub(crate) fn flush(&mut self) -> crate::Result<usize> {
        let mut retired = 0;
        while self.retire_oldest()? {
            retired += 1;
        }
        Ok(retired)
    }

    /// Forgets every submission without waiting on it.
    pub(crate) fn clear(&mut self) {
        if !self.submissions.is_empty() {
            warn!(
                "Dropping {} unretired submission(s)",
                self.submissions.len()
            );
        }
        self.submissions.clear();
    }
}

fn retire(submission: InFlightSubmission) -> crate::Result<()> {
    submission.command_list.mark_completed();
    submission.command_list.reset()
}
