#![allow(unsafe_code)]

//! The two device-memory allocators.
//!
//! The base allocator hands every resource its own `VkDeviceMemory`. The
//! aliased allocator stages `(resource, offset)` pairs against the shared
//! planning math in `rhi::allocator` and backs them all with one block;
//! the render-graph compiler is responsible for proving the lifetimes do
//! not overlap.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::allocator::AliasedAllocationPlan;
use crate::rhi::rhi_enums::{AllocationError, BufferUsage};
use crate::rhi::rhi_structs::{AllocationId, AllocationInfo};
use crate::rhi::rhi_traits::{
    AliasedDeviceMemoryAllocator, BufferResource, DeviceMemoryAllocator, ImageResource,
};
use crate::rhi::vulkan::vulkan_buffer::VulkanBuffer;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_image::VulkanImage;

fn expect_vulkan_buffer<'a>(buffer: &'a dyn Any) -> &'a VulkanBuffer {
    match buffer.downcast_ref::<VulkanBuffer>() {
        Some(buffer) => buffer,
        None => render_fatal!(FatalKind::Invariant, "buffer from a different backend handed to Vulkan"),
    }
}

fn expect_vulkan_image<'a>(image: &'a dyn Any) -> &'a VulkanImage {
    match image.downcast_ref::<VulkanImage>() {
        Some(image) => image,
        None => render_fatal!(FatalKind::Invariant, "image from a different backend handed to Vulkan"),
    }
}

struct BaseAllocation {
    memory: vk::DeviceMemory,
    mapped: Option<*mut u8>,
}

/// One `VkDeviceMemory` per resource.
pub struct VulkanBaseAllocator {
    raw: Arc<RawDevice>,
    allocations: HashMap<AllocationId, BaseAllocation>,
    next_id: u64,
}

unsafe impl Send for VulkanBaseAllocator {}

impl VulkanBaseAllocator {
    pub fn new(raw: Arc<RawDevice>) -> VulkanBaseAllocator {
        VulkanBaseAllocator {
            raw,
            allocations: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate_block(
        &mut self,
        size: u64,
        memory_type_bits: u32,
        host_visible: bool,
    ) -> Result<(AllocationId, vk::DeviceMemory, Option<*mut u8>), AllocationError> {
        let property_flags = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };

        let memory_type = self
            .raw
            .find_memory_type(memory_type_bits, property_flags)
            .ok_or(AllocationError::NoCompatibleMemoryType)?;

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);

        let memory = unsafe { self.raw.device.allocate_memory(&allocate_info, None) }
            .map_err(|_| AllocationError::OutOfDeviceMemory)?;

        let mapped = if host_visible {
            let pointer = unsafe {
                self.raw
                    .device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(|_| AllocationError::MappingFailed)?;
            Some(pointer as *mut u8)
        } else {
            None
        };

        let id = AllocationId(self.next_id);
        self.next_id += 1;
        self.allocations.insert(id, BaseAllocation { memory, mapped });

        Ok((id, memory, mapped))
    }
}

impl DeviceMemoryAllocator for VulkanBaseAllocator {
    fn allocate_buffer(&mut self, buffer: &dyn BufferResource) -> Result<AllocationInfo, AllocationError> {
        let vulkan_buffer = expect_vulkan_buffer(buffer.as_any());
        let requirements = buffer.memory_requirements();
        let host_visible = buffer.description().usage.contains(BufferUsage::HOST_VISIBLE);

        let (id, memory, mapped) = self.allocate_block(requirements.size, requirements.memory_type_bits, host_visible)?;
        vulkan_buffer.bind_placed_memory(memory, 0, mapped);

        Ok(AllocationInfo {
            id,
            offset: 0,
            size: requirements.size,
        })
    }

    fn allocate_image(&mut self, image: &dyn ImageResource) -> Result<AllocationInfo, AllocationError> {
        let vulkan_image = expect_vulkan_image(image.as_any());
        let requirements = image.memory_requirements();

        let (id, memory, _) = self.allocate_block(requirements.size, requirements.memory_type_bits, false)?;
        vulkan_image.bind_placed_memory(memory, 0);

        Ok(AllocationInfo {
            id,
            offset: 0,
            size: requirements.size,
        })
    }

    fn mapped_memory(&self, id: AllocationId) -> Option<*mut u8> {
        self.allocations.get(&id).and_then(|allocation| allocation.mapped)
    }

    fn release(&mut self, id: AllocationId) -> Result<(), AllocationError> {
        let allocation = self.allocations.remove(&id).ok_or(AllocationError::UnknownAllocation)?;

        unsafe {
            if allocation.mapped.is_some() {
                self.raw.device.unmap_memory(allocation.memory);
            }
            self.raw.device.free_memory(allocation.memory, None);
        }

        Ok(())
    }
}

impl Drop for VulkanBaseAllocator {
    fn drop(&mut self) {
        for allocation in self.allocations.values() {
            unsafe {
                if allocation.mapped.is_some() {
                    self.raw.device.unmap_memory(allocation.memory);
                }
                self.raw.device.free_memory(allocation.memory, None);
            }
        }
    }
}

enum StagedResource {
    Buffer(Arc<dyn BufferResource>, u64),
    Image(Arc<dyn ImageResource>, u64),
}

/// One block, many resources with non-overlapping lifetimes.
pub struct VulkanAliasedAllocator {
    raw: Arc<RawDevice>,
    name: String,
    host_visible: bool,
    plan: AliasedAllocationPlan,
    staged: Vec<StagedResource>,
    needs_device_address: bool,
    memory: Option<vk::DeviceMemory>,
    allocated_size: u64,
    mapped: Option<*mut u8>,
}

unsafe impl Send for VulkanAliasedAllocator {}

impl VulkanAliasedAllocator {
    pub fn new(raw: Arc<RawDevice>, host_visible: bool, name: &str) -> VulkanAliasedAllocator {
        VulkanAliasedAllocator {
            raw,
            name: name.to_owned(),
            host_visible,
            plan: AliasedAllocationPlan::new(),
            staged: Vec::new(),
            needs_device_address: false,
            memory: None,
            allocated_size: 0,
            mapped: None,
        }
    }
}

impl AliasedDeviceMemoryAllocator for VulkanAliasedAllocator {
    fn stage_buffer(&mut self, buffer: Arc<dyn BufferResource>, offset: u64) -> Result<(), AllocationError> {
        self.plan.stage(offset, buffer.memory_requirements())?;
        self.needs_device_address |= buffer.description().usage.intersects(
            BufferUsage::ACCELERATION_STRUCTURE_STORAGE
                | BufferUsage::ACCELERATION_STRUCTURE_INPUT
                | BufferUsage::SHADER_BINDING_TABLE,
        );
        self.staged.push(StagedResource::Buffer(buffer, offset));
        Ok(())
    }

    fn stage_image(&mut self, image: Arc<dyn ImageResource>, offset: u64) -> Result<(), AllocationError> {
        self.plan.stage(offset, image.memory_requirements())?;
        self.staged.push(StagedResource::Image(image, offset));
        Ok(())
    }

    fn allocate(&mut self) -> Result<(), AllocationError> {
        let layout = self.plan.finalize()?;

        if self.staged.is_empty() {
            return Ok(());
        }

        let property_flags = if self.host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };

        let memory_type = self
            .raw
            .find_memory_type(layout.memory_type_bits, property_flags)
            .ok_or(AllocationError::NoCompatibleMemoryType)?;

        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);

        let mut allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(layout.size)
            .memory_type_index(memory_type);
        if self.needs_device_address {
            allocate_info = allocate_info.push_next(&mut flags_info);
        }

        let memory = unsafe { self.raw.device.allocate_memory(&allocate_info, None) }
            .map_err(|_| AllocationError::OutOfDeviceMemory)?;

        let mapped = if self.host_visible {
            let pointer = unsafe {
                self.raw
                    .device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(|_| AllocationError::MappingFailed)?;
            Some(pointer as *mut u8)
        } else {
            None
        };

        log::debug!(
            "aliased allocator '{}': {} bytes backing {} resources",
            self.name,
            layout.size,
            self.staged.len()
        );

        for staged in &self.staged {
            match staged {
                StagedResource::Buffer(buffer, offset) => {
                    let vulkan_buffer = expect_vulkan_buffer(buffer.as_any());
                    let resource_mapped = mapped.map(|base| unsafe { base.add(*offset as usize) });
                    vulkan_buffer.bind_placed_memory(memory, *offset, resource_mapped);
                }
                StagedResource::Image(image, offset) => {
                    let vulkan_image = expect_vulkan_image(image.as_any());
                    vulkan_image.bind_placed_memory(memory, *offset);
                }
            }
        }

        self.memory = Some(memory);
        self.allocated_size = layout.size;
        self.mapped = mapped;

        Ok(())
    }

    fn allocated_size(&self) -> u64 {
        self.allocated_size
    }

    fn mapped_memory(&self) -> Option<*mut u8> {
        self.mapped
    }
}

impl Drop for VulkanAliasedAllocator {
    fn drop(&mut self) {
        if let Some(memory) = self.memory {
            unsafe {
                if self.mapped.is_some() {
                    self.raw.device.unmap_memory(memory);
                }
                self.raw.device.free_memory(memory, None);
            }
        }
    }
}
