#![allow(unsafe_code)]

//! The surface-bound presentable image ring.

use std::sync::Arc;

use ash::extensions::khr;
use ash::vk;
use cgmath::Vector2;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::rhi_enums::{ImageType, ImageUsage, SwapchainError};
use crate::rhi::rhi_structs::ImageDescription;
use crate::rhi::rhi_traits::{Fence, ImageResource, Semaphore, Swapchain};
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_image::VulkanImage;
use crate::rhi::vulkan::vulkan_sync::{VulkanFence, VulkanSemaphore};
use crate::rhi::vulkan::vulkan_utils::from_vk_format;

pub struct VulkanSwapchain {
    raw: Arc<RawDevice>,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    images: Vec<Arc<VulkanImage>>,
    extent: vk::Extent2D,
    format: vk::SurfaceFormatKHR,
}

fn map_swapchain_error(error: vk::Result) -> SwapchainError {
    match error {
        vk::Result::ERROR_OUT_OF_DATE_KHR => SwapchainError::OutOfDate,
        vk::Result::ERROR_SURFACE_LOST_KHR => SwapchainError::SurfaceLost,
        vk::Result::ERROR_DEVICE_LOST => SwapchainError::DeviceLost,
        _ => SwapchainError::OutOfDeviceMemory,
    }
}

impl VulkanSwapchain {
    pub fn new(raw: Arc<RawDevice>, surface: vk::SurfaceKHR) -> Result<VulkanSwapchain, SwapchainError> {
        let surface_loader = khr::Surface::new(&raw.entry, &raw.instance);
        let swapchain_loader = khr::Swapchain::new(&raw.instance, &raw.device);

        let mut swapchain = VulkanSwapchain {
            raw,
            surface_loader,
            swapchain_loader,
            surface,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            extent: vk::Extent2D::default(),
            format: vk::SurfaceFormatKHR::default(),
        };

        swapchain.recreate()?;
        Ok(swapchain)
    }

    /// Builds (or rebuilds after `OutOfDate`) the swapchain against the
    /// surface's current properties and wraps its images as engine
    /// resources.
    pub fn recreate(&mut self) -> Result<(), SwapchainError> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.raw.physical_device, self.surface)
        }
        .map_err(map_swapchain_error)?;

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.raw.physical_device, self.surface)
        }
        .map_err(map_swapchain_error)?;

        let format = formats
            .iter()
            .find(|candidate| {
                candidate.format == vk::Format::B8G8R8A8_SRGB
                    && candidate.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or(SwapchainError::SurfaceLost)?;

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.raw.physical_device, self.surface)
        }
        .map_err(map_swapchain_error)?;

        let present_mode = if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let old_swapchain = self.handle;

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(capabilities.current_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(map_swapchain_error)?;

        if old_swapchain != vk::SwapchainKHR::null() {
            self.images.clear();
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }

        let vk_images = unsafe { self.swapchain_loader.get_swapchain_images(handle) }.map_err(map_swapchain_error)?;

        let engine_format = from_vk_format(format.format).unwrap_or(crate::rhi::rhi_enums::ImageFormat::B8G8R8A8_SRGB);

        self.images = vk_images
            .into_iter()
            .enumerate()
            .map(|(index, image)| {
                Arc::new(VulkanImage::from_swapchain_image(
                    self.raw.clone(),
                    image,
                    ImageDescription {
                        name: format!("swapchain-{}", index),
                        image_type: ImageType::Image2D,
                        format: engine_format,
                        width: capabilities.current_extent.width,
                        height: capabilities.current_extent.height,
                        depth: 1,
                        num_mips: 1,
                        num_layers: 1,
                        usage: ImageUsage::ATTACHMENT | ImageUsage::TRANSFER_DST,
                        virtual_resource: false,
                    },
                ))
            })
            .collect();

        self.handle = handle;
        self.extent = capabilities.current_extent;
        self.format = format;

        Ok(())
    }

    pub fn vk_handle(&self) -> vk::SwapchainKHR {
        self.handle
    }
}

impl Swapchain for VulkanSwapchain {
    fn acquire_next_image(
        &mut self,
        signal_semaphore: Option<&Arc<dyn Semaphore>>,
        signal_fence: Option<&Arc<dyn Fence>>,
    ) -> Result<u32, SwapchainError> {
        let semaphore = signal_semaphore
            .and_then(|semaphore| semaphore.as_any().downcast_ref::<VulkanSemaphore>())
            .map(|semaphore| semaphore.handle())
            .unwrap_or_else(vk::Semaphore::null);

        let fence = signal_fence
            .and_then(|fence| fence.as_any().downcast_ref::<VulkanFence>())
            .map(|fence| fence.handle())
            .unwrap_or_else(vk::Fence::null);

        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.handle, u64::max_value(), semaphore, fence)
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("suboptimal swapchain image acquired");
                }
                Ok(index)
            }
            Err(error) => Err(map_swapchain_error(error)),
        }
    }

    fn present(&mut self, image_index: u32, wait_semaphores: &[Arc<dyn Semaphore>]) -> Result<(), SwapchainError> {
        let mut semaphores = Vec::with_capacity(wait_semaphores.len());
        for semaphore in wait_semaphores {
            match semaphore.as_any().downcast_ref::<VulkanSemaphore>() {
                Some(semaphore) => semaphores.push(semaphore.handle()),
                None => render_fatal!(FatalKind::Invariant, "semaphore from a different backend handed to Vulkan"),
            }
        }

        let swapchains = [self.handle];
        let indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match self.raw.present_to_queue(&self.swapchain_loader, &present_info) {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("suboptimal swapchain present");
                }
                Ok(())
            }
            Err(error) => Err(map_swapchain_error(error)),
        }
    }

    fn images(&self) -> Vec<Arc<dyn ImageResource>> {
        self.images
            .iter()
            .map(|image| image.clone() as Arc<dyn ImageResource>)
            .collect()
    }

    fn extent(&self) -> Vector2<u32> {
        Vector2::new(self.extent.width, self.extent.height)
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            self.images.clear();
            if self.handle != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.handle, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
