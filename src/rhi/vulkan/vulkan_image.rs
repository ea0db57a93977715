#![allow(unsafe_code)]

//! Image resources and their view caches.

use std::any::Any;
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;
use fxhash::FxHashMap;

use crate::core::diagnostics::FatalKind;
use crate::core::handle::{ResourceId, RESOURCE_IDS};
use crate::render_fatal;
use crate::rhi::rhi_enums::{ImageType, ResourceCreationError};
use crate::rhi::rhi_structs::{ImageDescription, ImageViewDescription, MemoryRequirements, ResourceView, ViewRange};
use crate::rhi::rhi_traits::ImageResource;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_utils::*;

pub struct VulkanImage {
    raw: Arc<RawDevice>,
    id: ResourceId,
    description: ImageDescription,
    handle: vk::Image,
    /// Memory owned by this image; `None` for swapchain-owned or aliased
    /// placements.
    owned_memory: Mutex<Option<vk::DeviceMemory>>,
    /// The swapchain owns and destroys its images.
    swapchain_owned: bool,
    /// Identical view requests return the identical view.
    views: Mutex<FxHashMap<ImageViewDescription, ResourceView>>,
}

unsafe impl Send for VulkanImage {}
unsafe impl Sync for VulkanImage {}

impl VulkanImage {
    pub fn new(raw: Arc<RawDevice>, description: ImageDescription) -> Result<VulkanImage, ResourceCreationError> {
        let flags = if description.image_type == ImageType::Cubemap {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let create_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(to_vk_image_type(description.image_type))
            .format(to_vk_format(description.format))
            .extent(vk::Extent3D {
                width: description.width,
                height: description.height,
                depth: description.depth,
            })
            .mip_levels(description.num_mips)
            .array_layers(description.num_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(to_vk_image_usage(description.usage, description.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();

        let handle = unsafe { raw.device.create_image(&create_info, None) }.map_err(|error| match error {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => ResourceCreationError::OutOfHostMemory,
            _ => ResourceCreationError::OutOfDeviceMemory,
        })?;

        let image = VulkanImage {
            raw,
            id: RESOURCE_IDS.allocate(),
            description,
            handle,
            owned_memory: Mutex::new(None),
            swapchain_owned: false,
            views: Mutex::new(FxHashMap::default()),
        };

        if !image.description.virtual_resource {
            image.allocate_dedicated()?;
        }

        Ok(image)
    }

    /// Wraps an image the swapchain owns; no memory to manage and no
    /// destruction on drop (the swapchain destroys its own images).
    pub fn from_swapchain_image(
        raw: Arc<RawDevice>,
        handle: vk::Image,
        description: ImageDescription,
    ) -> VulkanImage {
        VulkanImage {
            raw,
            id: RESOURCE_IDS.allocate(),
            description,
            handle,
            owned_memory: Mutex::new(None),
            swapchain_owned: true,
            views: Mutex::new(FxHashMap::default()),
        }
    }

    fn allocate_dedicated(&self) -> Result<(), ResourceCreationError> {
        let requirements = self.memory_requirements();

        let memory_type = self
            .raw
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .ok_or(ResourceCreationError::NoCompatibleMemoryType)?;

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = unsafe { self.raw.device.allocate_memory(&allocate_info, None) }
            .map_err(|_| ResourceCreationError::OutOfDeviceMemory)?;

        unsafe { self.raw.device.bind_image_memory(self.handle, memory, 0) }
            .map_err(|_| ResourceCreationError::OutOfDeviceMemory)?;

        *self.owned_memory.lock().unwrap() = Some(memory);
        Ok(())
    }

    pub fn vk_handle(&self) -> vk::Image {
        self.handle
    }

    pub fn bind_placed_memory(&self, memory: vk::DeviceMemory, offset: u64) {
        if let Err(error) = unsafe { self.raw.device.bind_image_memory(self.handle, memory, offset) } {
            render_fatal!(FatalKind::DriverError, "image memory bind failed: {:?}", error);
        }
    }
}

impl ImageResource for VulkanImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn description(&self) -> &ImageDescription {
        &self.description
    }

    fn memory_requirements(&self) -> MemoryRequirements {
        let requirements = unsafe { self.raw.device.get_image_memory_requirements(self.handle) };

        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        }
    }

    fn view(&self, description: ImageViewDescription) -> ResourceView {
        let mut views = self.views.lock().unwrap();

        if let Some(view) = views.get(&description) {
            return *view;
        }

        let format = description.format_override.unwrap_or(self.description.format);
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(self.handle)
            .view_type(to_vk_image_view_type(
                self.description.image_type,
                description.range.layer_count,
            ))
            .format(to_vk_format(format))
            .subresource_range(to_vk_subresource_range(description.range, format))
            .build();

        let handle = match unsafe { self.raw.device.create_image_view(&create_info, None) } {
            Ok(handle) => handle,
            Err(error) => render_fatal!(FatalKind::DriverError, "image view creation failed: {:?}", error),
        };

        let view = ResourceView {
            kind: description.kind,
            resource: self.id,
            range: ViewRange::Image(description.range),
            format_override: description.format_override,
            raw: handle.as_raw(),
        };

        views.insert(description, view);
        view
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        let views = self.views.lock().unwrap();
        let owned_memory = self.owned_memory.lock().unwrap();

        unsafe {
            for view in views.values() {
                self.raw
                    .device
                    .destroy_image_view(vk::ImageView::from_raw(view.raw), None);
            }

            // Swapchain images are destroyed with their swapchain.
            if !self.swapchain_owned {
                self.raw.device.destroy_image(self.handle, None);
            }

            if let Some(memory) = *owned_memory {
                self.raw.device.free_memory(memory, None);
            }
        }
    }
}
