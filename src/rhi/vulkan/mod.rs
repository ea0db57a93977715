//! The Vulkan reference backend.

pub mod vulkan_acceleration_structure;
pub mod vulkan_buffer;
pub mod vulkan_command_list;
pub mod vulkan_descriptors;
pub mod vulkan_device;
pub mod vulkan_image;
pub mod vulkan_instance;
pub mod vulkan_memory;
pub mod vulkan_pipeline;
pub mod vulkan_renderpass;
pub mod vulkan_sampler;
pub mod vulkan_swapchain;
pub mod vulkan_sync;
pub mod vulkan_utils;

pub use self::vulkan_device::VulkanDevice;
pub use self::vulkan_instance::create_vulkan_device;
pub use self::vulkan_swapchain::VulkanSwapchain;
