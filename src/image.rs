use crate::device::DeviceShared;
use crate::memory::MemoryBlock;
use crate::VulkanError;
use ash::vk;
use bitflags::bitflags;
use std::sync::{Arc, Weak};

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const ATTACHMENT = 1 << 4;
    }
}

impl ImageUsage {
    pub fn to_vk(self, format: vk::Format) -> vk::ImageUsageFlags {
        let mut vk_usage = vk::ImageUsageFlags::empty();

        if self.contains(ImageUsage::TRANSFER_SRC) {
            vk_usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        if self.contains(ImageUsage::TRANSFER_DST) {
            vk_usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        if self.contains(ImageUsage::SAMPLED) {
            vk_usage |= vk::ImageUsageFlags::SAMPLED;
        }

        if self.contains(ImageUsage::STORAGE) {
            vk_usage |= vk::ImageUsageFlags::STORAGE;
        }

        if self.contains(ImageUsage::ATTACHMENT) {
            vk_usage |= match is_depth_format(format) {
                false => vk::ImageUsageFlags::COLOR_ATTACHMENT,
                true => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            };
        }

        vk_usage
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::S8_UINT
    )
}

pub fn format_aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageCreateInfo {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: ImageUsage,
}

impl ImageCreateInfo {
    pub fn texture_2d(format: vk::Format, size: [u32; 2], usage: ImageUsage) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: size[0],
                height: size[1],
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.format == vk::Format::UNDEFINED {
            return Err(VulkanError::InvalidImage(String::from("undefined format")));
        }

        if self.extent.width == 0 || self.extent.height == 0 || self.extent.depth == 0 {
            return Err(VulkanError::InvalidImage(format!(
                "zero sized extent {}x{}x{}",
                self.extent.width, self.extent.height, self.extent.depth
            )));
        }

        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(VulkanError::InvalidImage(format!(
                "{} mip levels and {} array layers",
                self.mip_levels, self.array_layers
            )));
        }

        if self.usage.is_empty() {
            return Err(VulkanError::InvalidImage(String::from("no usage")));
        }

        Ok(())
    }

    pub fn to_vk(&self) -> vk::ImageCreateInfo {
        vk::ImageCreateInfo::builder()
            .image_type(self.image_type)
            .format(self.format)
            .extent(self.extent)
            .mip_levels(self.mip_levels)
            .array_layers(self.array_layers)
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(self.usage.to_vk(self.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build()
    }
}

pub struct Image {
    device: Weak<DeviceShared>,
    handle: vk::Image,
    memory: Option<MemoryBlock>,
    create_info: ImageCreateInfo,
    memory_flags: vk::MemoryPropertyFlags,
}

impl Image {
    /// Creates the image, allocates memory matching `memory_flags` and binds it.
    ///
    /// Either every step succeeds or everything acquired so far is released again.
    pub(crate) fn new(
        device: &Arc<DeviceShared>,
        create_info: &ImageCreateInfo,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> crate::Result<Self> {
        create_info.validate()?;
        let functions = &device.functions;
        let allocator = &device.allocator;

        let handle = functions.create_image(&create_info.to_vk())?;

        let requirements = functions.get_image_memory_requirements(handle);

        let memory = match allocator.allocate(
            "Image Allocation",
            &requirements,
            memory_flags,
            create_info.tiling == vk::ImageTiling::LINEAR,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                functions.destroy_image(handle);
                return Err(e);
            }
        };

        if let Err(e) = functions.bind_image_memory(handle, memory.memory(), memory.offset()) {
            functions.destroy_image(handle);
            if let Err(free_error) = allocator.free(memory) {
                error!("Failed to free memory of unbound image: {}", free_error);
            }
            return Err(VulkanError::Vk(e));
        }

        Ok(Self {
            device: Arc::downgrade(device),
            handle,
            memory: Some(memory),
            create_info: *create_info,
            memory_flags,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn create_info(&self) -> &ImageCreateInfo {
        &self.create_info
    }

    pub fn format(&self) -> vk::Format {
        self.create_info.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.create_info.extent
    }

    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: format_aspect_flags(self.create_info.format),
            base_mip_level: 0,
            level_count: self.create_info.mip_levels,
            base_array_layer: 0,
            layer_count: self.create_info.array_layers,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                device.functions.destroy_image(self.handle);
                if let Some(memory) = self.memory.take() {
                    if let Err(e) = device.allocator.free(memory) {
                        error!("Failed to free image memory: {}", e);
                    }
                }
            }
            None => warn!("Image {:?} outlived its device", self.handle),
        }
        trace!("Drop Image");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewCreateInfo {
    pub view_type: vk::ImageViewType,
    /// Falls back to the image's format.
    pub format: Option<vk::Format>,
    /// Falls back to the aspects of the view's format.
    pub aspect_mask: Option<vk::ImageAspectFlags>,
    pub base_mip_level: u32,
    /// [`vk::REMAINING_MIP_LEVELS`] covers every level from the base on.
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    /// [`vk::REMAINING_ARRAY_LAYERS`] covers every layer from the base on.
    pub array_layer_count: u32,
}

impl Default for ImageViewCreateInfo {
    fn default() -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            format: None,
            aspect_mask: None,
            base_mip_level: 0,
            mip_level_count: 1,
            base_array_layer: 0,
            array_layer_count: 1,
        }
    }
}

/// Resolves a view range against `available` levels or layers, returning the concrete count.
fn resolve_view_range(
    name: &str,
    base: u32,
    count: u32,
    remaining: u32,
    available: u32,
) -> crate::Result<u32> {
    if base >= available {
        return Err(VulkanError::InvalidImage(format!(
            "base {} {} is outside the image's {}",
            name, base, available
        )));
    }

    let count = if count == remaining {
        available - base
    } else {
        count
    };

    match base.checked_add(count) {
        Some(end) if count > 0 && end <= available => Ok(count),
        _ => Err(VulkanError::InvalidImage(format!(
            "{} {}(s) from base {} do not fit the image's {}",
            count, name, base, available
        ))),
    }
}

pub struct ImageView {
    device: Weak<DeviceShared>,
    image: Arc<Image>,
    handle: vk::ImageView,
    format: vk::Format,
    subresource_range: vk::ImageSubresourceRange,
}

impl ImageView {
    pub(crate) fn new(
        device: &Arc<DeviceShared>,
        image: Arc<Image>,
        create_info: &ImageViewCreateInfo,
    ) -> crate::Result<Self> {
        let format = create_info.format.unwrap_or(image.format());
        let image_info = image.create_info();

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: create_info
                .aspect_mask
                .unwrap_or_else(|| format_aspect_flags(format)),
            base_mip_level: create_info.base_mip_level,
            level_count: resolve_view_range(
                "mip level",
                create_info.base_mip_level,
                create_info.mip_level_count,
                vk::REMAINING_MIP_LEVELS,
                image_info.mip_levels,
            )?,
            base_array_layer: create_info.base_array_layer,
            layer_count: resolve_view_range(
                "array layer",
                create_info.base_array_layer,
                create_info.array_layer_count,
                vk::REMAINING_ARRAY_LAYERS,
                image_info.array_layers,
            )?,
        };

        let handle = device.functions.create_image_view(
            &vk::ImageViewCreateInfo::builder()
                .image(image.handle())
                .view_type(create_info.view_type)
                .format(format)
                .components(vk::ComponentMapping::default())
                .subresource_range(subresource_range)
                .build(),
        )?;

        Ok(Self {
            device: Arc::downgrade(device),
            image,
            handle,
            format,
            subresource_range,
        })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// The viewed range with remaining counts resolved.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.subresource_range
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => device.functions.destroy_image_view(self.handle),
            None => warn!("Image view {:?} outlived its device", self.handle),
        }
        trace!("Drop Image View");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_usage_depends_on_format() {
        assert_eq!(
            ImageUsage::ATTACHMENT.to_vk(vk::Format::B8G8R8A8_UNORM),
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        );
        assert_eq!(
            (ImageUsage::ATTACHMENT | ImageUsage::SAMPLED).to_vk(vk::Format::D32_SFLOAT),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        );
    }

    #[test]
    fn aspect_flags_cover_depth_stencil_formats() {
        assert_eq!(
            format_aspect_flags(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            format_aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            format_aspect_flags(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn validate_rejects_degenerate_images() {
        let valid = ImageCreateInfo::texture_2d(
            vk::Format::R8G8B8A8_UNORM,
            [64, 64],
            ImageUsage::SAMPLED,
        );
        assert!(valid.validate().is_ok());

        let mut zero_width = valid;
        zero_width.extent.width = 0;
        assert!(matches!(
            zero_width.validate(),
            Err(VulkanError::InvalidImage(_))
        ));

        let mut no_mips = valid;
        no_mips.mip_levels = 0;
        assert!(no_mips.validate().is_err());

        let mut no_usage = valid;
        no_usage.usage = ImageUsage::empty();
        assert!(no_usage.validate().is_err());

        let mut undefined = valid;
        undefined.format = vk::Format::UNDEFINED;
        assert!(undefined.validate().is_err());
    }

    #[test]
    fn view_range_resolves_remaining_from_the_base() {
        let remaining = vk::REMAINING_MIP_LEVELS;
        assert_eq!(resolve_view_range("mip level", 0, remaining, remaining, 4).unwrap(), 4);
        assert_eq!(resolve_view_range("mip level", 3, remaining, remaining, 4).unwrap(), 1);
        assert_eq!(resolve_view_range("mip level", 1, 2, remaining, 4).unwrap(), 2);
    }

    #[test]
    fn view_range_rejects_empty_and_overflowing_ranges() {
        let remaining = vk::REMAINING_ARRAY_LAYERS;
        let rejected = |base, count| {
            matches!(
                resolve_view_range("array layer", base, count, remaining, 4),
                Err(VulkanError::InvalidImage(_))
            )
        };
        assert!(rejected(0, 0));
        assert!(rejected(4, remaining));
        assert!(rejected(4, 1));
        assert!(rejected(2, 3));
        assert!(rejected(1, u32::MAX - 1));
        assert!(rejected(u32::MAX, 1));
    }
}
