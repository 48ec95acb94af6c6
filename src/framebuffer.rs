use crate::device::DeviceShared;
use crate::image::ImageView;
use crate::render_pass::{RenderPassCache, RenderPassFormat};
use crate::VulkanError;
use ash::vk;
use std::sync::{Arc, Weak};

/// The attachments a framebuffer renders into. Color attachments come first, in order.
#[derive(Clone, Default)]
pub struct RenderTargets {
    pub color: Vec<Arc<ImageView>>,
    pub depth: Option<Arc<ImageView>>,
}

impl RenderTargets {
    fn attachments(&self) -> impl Iterator<Item = &Arc<ImageView>> {
        self.color.iter().chain(self.depth.iter())
    }

    pub fn attachment_count(&self) -> usize {
        self.color.len() + self.depth.iter().count()
    }

    /// The shared extent of every attachment.
    pub fn extent(&self) -> crate::Result<vk::Extent2D> {
        let mut extents = self.attachments().map(|view| {
            let extent = view.image().extent();
            vk::Extent2D {
                width: extent.width,
                height: extent.height,
            }
        });

        let extent = extents.next().ok_or_else(|| {
            VulkanError::InvalidRenderTargets(String::from("no attachments"))
        })?;

        if let Some(other) = extents.find(|&other| other != extent) {
            return Err(VulkanError::InvalidRenderTargets(format!(
                "attachment extent {}x{} does not match {}x{}",
                other.width, other.height, extent.width, extent.height
            )));
        }
        Ok(extent)
    }

    pub fn render_pass_format(&self) -> crate::Result<RenderPassFormat> {
        let _ = self.extent()?;

        let mut samples = self
            .attachments()
            .map(|view| view.image().create_info().samples);
        let sample_count = samples.next().unwrap_or(vk::SampleCountFlags::TYPE_1);
        if samples.any(|other| other != sample_count) {
            return Err(VulkanError::InvalidRenderTargets(String::from(
                "attachments have different sample counts",
            )));
        }

        Ok(RenderPassFormat {
            color_formats: self.color.iter().map(|view| view.format()).collect(),
            depth_format: self.depth.as_ref().map(|view| view.format()),
            samples: sample_count,
        })
    }
}

pub struct Framebuffer {
    device: Weak<DeviceShared>,
    handle: vk::Framebuffer,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    render_targets: RenderTargets,
}

impl Framebuffer {
    pub(crate) fn new(
        device: &Arc<DeviceShared>,
        render_pass_cache: &RenderPassCache,
        render_targets: RenderTargets,
    ) -> crate::Result<Self> {
        let extent = render_targets.extent()?;
        let render_pass = render_pass_cache.get_render_pass(&render_targets.render_pass_format()?)?;

        let attachments: Vec<vk::ImageView> = render_targets
            .attachments()
            .map(|view| view.handle())
            .collect();
        let handle = device.functions.create_framebuffer(render_pass, &attachments, extent, 1)?;

        Ok(Self {
            device: Arc::downgrade(device),
            handle,
            render_pass,
            extent,
            render_targets,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn render_targets(&self) -> &RenderTargets {
        &self.render_targets
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => device.functions.destroy_framebuffer(self.handle),
            None => warn!("Framebuffer {:?} outlived its device", self.handle),
        }
        trace!("Drop Framebuffer");
    }
}
