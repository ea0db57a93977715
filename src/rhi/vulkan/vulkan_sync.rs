#![allow(unsafe_code)]

//! Fences and semaphores.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::rhi_traits::{Fence, Semaphore};
use crate::rhi::vulkan::vulkan_device::RawDevice;

pub struct VulkanFence {
    raw: Arc<RawDevice>,
    handle: vk::Fence,
}

impl VulkanFence {
    pub fn new(raw: Arc<RawDevice>, signalled: bool) -> Result<VulkanFence, vk::Result> {
        let flags = if signalled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags).build();

        let handle = unsafe { raw.device.create_fence(&create_info, None) }?;
        Ok(VulkanFence { raw, handle })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Fence for VulkanFence {
    fn wait_for(&self) {
        let result = unsafe {
            self.raw
                .device
                .wait_for_fences(&[self.handle], true, u64::max_value())
        };

        if let Err(error) = result {
            match error {
                vk::Result::ERROR_DEVICE_LOST => {
                    render_fatal!(FatalKind::DeviceLost, "device lost while waiting on a fence")
                }
                other => render_fatal!(FatalKind::DriverError, "fence wait failed: {:?}", other),
            }
        }
    }

    fn reset(&self) {
        if let Err(error) = unsafe { self.raw.device.reset_fences(&[self.handle]) } {
            render_fatal!(FatalKind::DriverError, "fence reset failed: {:?}", error);
        }
    }

    fn is_signalled(&self) -> bool {
        unsafe { self.raw.device.get_fence_status(self.handle) }.unwrap_or(false)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.raw.device.destroy_fence(self.handle, None) };
    }
}

pub struct VulkanSemaphore {
    raw: Arc<RawDevice>,
    handle: vk::Semaphore,
}

impl VulkanSemaphore {
    pub fn new(raw: Arc<RawDevice>) -> Result<VulkanSemaphore, vk::Result> {
        let create_info = vk::SemaphoreCreateInfo::builder().build();
        let handle = unsafe { raw.device.create_semaphore(&create_info, None) }?;
        Ok(VulkanSemaphore { raw, handle })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Semaphore for VulkanSemaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe { self.raw.device.destroy_semaphore(self.handle, None) };
    }
}
