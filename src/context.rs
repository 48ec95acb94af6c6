use crate::command_list::CommandList;
use crate::framebuffer::Framebuffer;
use crate::device::DeviceShared;
use crate::functions::DeviceFunctions;
use crate::VulkanError;
use ash::vk;
use std::sync::{Arc, Mutex, Weak};

#[derive(Default)]
struct ContextState {
    command_list: Option<Arc<CommandList>>,
    framebuffer: Option<Arc<Framebuffer>>,
}

/// Records render passes into a bound [`CommandList`].
pub struct Context {
    device: Weak<DeviceShared>,
    state: Mutex<ContextState>,
}

impl Context {
    pub(crate) fn new(device: &Arc<DeviceShared>) -> Self {
        Self {
            device: Arc::downgrade(device),
            state: Mutex::new(ContextState::default()),
        }
    }

    fn functions(&self) -> crate::Result<Arc<dyn DeviceFunctions>> {
        self.device
            .upgrade()
            .map(|device| device.functions.clone())
            .ok_or(VulkanError::DeviceDestroyed)
    }

    pub fn command_list(&self) -> Option<Arc<CommandList>> {
        crate::lock(&self.state).command_list.clone()
    }

    pub fn framebuffer(&self) -> Option<Arc<Framebuffer>> {
        crate::lock(&self.state).framebuffer.clone()
    }

    /// Binds `command_list` for recording, replacing any list bound before.
    pub fn begin_recording(&self, command_list: Arc<CommandList>) -> crate::Result<()> {
        let _ = command_list.begin()?;

        let mut state = crate::lock(&self.state);
        if state.framebuffer.is_some() {
            self.end_render_pass_locked(&mut state)?;
        }
        state.command_list = Some(command_list);
        Ok(())
    }

    /// Begins a render pass on `framebuffer`, ending the previous one first.
    ///
    /// The framebuffer stays alive until the command list is reset.
    pub fn bind_framebuffer(
        &self,
        framebuffer: Arc<Framebuffer>,
        clear_values: &[vk::ClearValue],
    ) -> crate::Result<()> {
        let mut state = crate::lock(&self.state);
        let command_list = state
            .command_list
            .clone()
            .ok_or(VulkanError::NoCommandList)?;

        if state.framebuffer.is_some() {
            self.end_render_pass_locked(&mut state)?;
        }

        let command_buffer = command_list.begin()?;
        self.functions()?.cmd_begin_render_pass(
            command_buffer,
            framebuffer.render_pass(),
            framebuffer.handle(),
            framebuffer.extent(),
            clear_values,
        );
        command_list.track_resource(framebuffer.clone());
        state.framebuffer = Some(framebuffer);
        Ok(())
    }

    pub fn end_render_pass(&self) -> crate::Result<()> {
        let mut state = crate::lock(&self.state);
        self.end_render_pass_locked(&mut state)
    }

    fn end_render_pass_locked(&self, state: &mut ContextState) -> crate::Result<()> {
        if state.framebuffer.take().is_none() {
            return Ok(());
        }

        let command_list = state
            .command_list
            .as_ref()
            .ok_or(VulkanError::NoCommandList)?;
        self.functions()?
            .cmd_end_render_pass(command_list.begin()?);
        Ok(())
    }

    /// Ends any open render pass, finishes the bound list and unbinds it.
    pub fn end_recording(&self) -> crate::Result<Arc<CommandList>> {
        let mut state = crate::lock(&self.state);
        self.end_render_pass_locked(&mut state)?;

        let command_list = state
            .command_list
            .take()
            .ok_or(VulkanError::NoCommandList)?;
        command_list.finish()?;
        Ok(command_list)
    }
}
