#![allow(unsafe_code)]

//! Sampler objects. The device keeps a content-hash cache, so equal
//! descriptions share one `VkSampler`.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use crate::rhi::rhi_enums::ResourceCreationError;
use crate::rhi::rhi_structs::SamplerDescription;
use crate::rhi::rhi_traits::SamplerState;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_utils::*;

pub struct VulkanSampler {
    raw: Arc<RawDevice>,
    description: SamplerDescription,
    handle: vk::Sampler,
}

impl VulkanSampler {
    pub fn new(raw: Arc<RawDevice>, description: SamplerDescription) -> Result<VulkanSampler, ResourceCreationError> {
        let mut create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(to_vk_filter(description.mag_filter))
            .min_filter(to_vk_filter(description.min_filter))
            .mipmap_mode(to_vk_mipmap_mode(description.mip_filter))
            .address_mode_u(to_vk_address_mode(description.address_u))
            .address_mode_v(to_vk_address_mode(description.address_v))
            .address_mode_w(to_vk_address_mode(description.address_w))
            .border_color(to_vk_border_color(description.border_color))
            .min_lod(description.lod_min)
            .max_lod(description.lod_max);

        if let Some(compare_op) = description.compare_op {
            create_info = create_info.compare_enable(true).compare_op(to_vk_compare_op(compare_op));
        }

        let handle = unsafe { raw.device.create_sampler(&create_info, None) }.map_err(|error| match error {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => ResourceCreationError::OutOfHostMemory,
            _ => ResourceCreationError::OutOfDeviceMemory,
        })?;

        Ok(VulkanSampler {
            raw,
            description,
            handle,
        })
    }

    pub fn vk_handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl SamplerState for VulkanSampler {
    fn description(&self) -> &SamplerDescription {
        &self.description
    }

    fn raw(&self) -> u64 {
        self.handle.as_raw()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe { self.raw.device.destroy_sampler(self.handle, None) };
    }
}
