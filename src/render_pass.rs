use crate::functions::DeviceFunctions;
use ash::vk;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Attachment layout that decides whether two sets of render targets can share a render pass.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RenderPassFormat {
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

pub struct RenderPassCache {
    functions: Arc<dyn DeviceFunctions>,
    render_passes: Mutex<HashMap<RenderPassFormat, vk::RenderPass>>,
}

impl RenderPassCache {
    pub(crate) fn new(functions: Arc<dyn DeviceFunctions>) -> Self {
        Self {
            functions,
            render_passes: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_render_pass(&self, format: &RenderPassFormat) -> crate::Result<vk::RenderPass> {
        let mut render_passes = crate::lock(&self.render_passes);
        if let Some(&render_pass) = render_passes.get(format) {
            return Ok(render_pass);
        }

        let render_pass = self.functions.create_render_pass(format)?;
        debug!(
            "Created render pass for {} color attachment(s), depth: {:?}",
            format.color_formats.len(),
            format.depth_format
        );
        let _ = render_passes.insert(format.clone(), render_pass);
        Ok(render_pass)
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.render_passes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn destroy_all(&self) {
        for (_format, render_pass) in crate::lock(&self.render_passes).drain() {
            self.functions.destroy_render_pass(render_pass);
        }
        trace!("Destroy Render Pass Cache");
    }
}
