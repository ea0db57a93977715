#![allow(unsafe_code)]

//! Buffer resources.

use std::any::Any;
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use crate::core::diagnostics::FatalKind;
use crate::core::handle::{ResourceId, RESOURCE_IDS};
use crate::render_fatal;
use crate::rhi::rhi_enums::{BufferAccessError, BufferUsage, ResourceCreationError, ViewKind};
use crate::rhi::rhi_structs::{BufferDescription, MemoryRequirements, ResourceView, ViewRange};
use crate::rhi::rhi_traits::BufferResource;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_utils::to_vk_buffer_usage;

struct BoundMemory {
    /// Memory owned by this buffer; `None` when an allocator owns it.
    owned: Option<vk::DeviceMemory>,
    mapped: Option<*mut u8>,
}

pub struct VulkanBuffer {
    raw: Arc<RawDevice>,
    id: ResourceId,
    description: BufferDescription,
    handle: vk::Buffer,
    bound: Mutex<BoundMemory>,
}

unsafe impl Send for VulkanBuffer {}
unsafe impl Sync for VulkanBuffer {}

impl VulkanBuffer {
    pub fn new(raw: Arc<RawDevice>, description: BufferDescription) -> Result<VulkanBuffer, ResourceCreationError> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(description.size.max(1))
            .usage(to_vk_buffer_usage(description.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let handle = unsafe { raw.device.create_buffer(&create_info, None) }.map_err(|error| match error {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => ResourceCreationError::OutOfHostMemory,
            _ => ResourceCreationError::OutOfDeviceMemory,
        })?;

        let buffer = VulkanBuffer {
            raw,
            id: RESOURCE_IDS.allocate(),
            description,
            handle,
            bound: Mutex::new(BoundMemory {
                owned: None,
                mapped: None,
            }),
        };

        // Virtual buffers wait for an aliased allocator to place them;
        // everything else gets a dedicated allocation right away.
        if !buffer.description.virtual_resource {
            buffer.allocate_dedicated()?;
        }

        Ok(buffer)
    }

    fn allocate_dedicated(&self) -> Result<(), ResourceCreationError> {
        let requirements = self.memory_requirements();
        let host_visible = self.description.usage.contains(BufferUsage::HOST_VISIBLE);

        let property_flags = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };

        let memory_type = self
            .raw
            .find_memory_type(requirements.memory_type_bits, property_flags)
            .ok_or(ResourceCreationError::NoCompatibleMemoryType)?;

        let needs_device_address = self.description.usage.intersects(
            BufferUsage::ACCELERATION_STRUCTURE_STORAGE
                | BufferUsage::ACCELERATION_STRUCTURE_INPUT
                | BufferUsage::SHADER_BINDING_TABLE,
        );

        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);

        let mut allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        if needs_device_address {
            allocate_info = allocate_info.push_next(&mut flags_info);
        }

        let memory = unsafe { self.raw.device.allocate_memory(&allocate_info, None) }
            .map_err(|_| ResourceCreationError::OutOfDeviceMemory)?;

        unsafe { self.raw.device.bind_buffer_memory(self.handle, memory, 0) }
            .map_err(|_| ResourceCreationError::OutOfDeviceMemory)?;

        let mapped = if host_visible {
            let pointer = unsafe {
                self.raw
                    .device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(|_| ResourceCreationError::OutOfDeviceMemory)?;
            Some(pointer as *mut u8)
        } else {
            None
        };

        let mut bound = self.bound.lock().unwrap();
        bound.owned = Some(memory);
        bound.mapped = mapped;

        Ok(())
    }

    pub fn vk_handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Called by an aliased allocator after placing this virtual buffer.
    /// `mapped` points at this buffer's own offset inside the block.
    pub fn bind_placed_memory(&self, memory: vk::DeviceMemory, offset: u64, mapped: Option<*mut u8>) {
        if let Err(error) = unsafe { self.raw.device.bind_buffer_memory(self.handle, memory, offset) } {
            render_fatal!(FatalKind::DriverError, "buffer memory bind failed: {:?}", error);
        }

        let mut bound = self.bound.lock().unwrap();
        bound.mapped = mapped;
    }
}

impl BufferResource for VulkanBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn description(&self) -> &BufferDescription {
        &self.description
    }

    fn memory_requirements(&self) -> MemoryRequirements {
        let requirements = unsafe { self.raw.device.get_buffer_memory_requirements(self.handle) };

        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        }
    }

    fn set_data(&self, data: &[u8], offset: u64) -> Result<(), BufferAccessError> {
        if !self.description.usage.contains(BufferUsage::HOST_VISIBLE) {
            return Err(BufferAccessError::NotHostVisible);
        }

        if offset + data.len() as u64 > self.description.size {
            return Err(BufferAccessError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size: self.description.size,
            });
        }

        let bound = self.bound.lock().unwrap();
        let mapped = bound.mapped.ok_or(BufferAccessError::NotHostVisible)?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }

        Ok(())
    }

    fn device_address(&self) -> u64 {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.handle);
        unsafe { self.raw.device.get_buffer_device_address(&info) }
    }

    fn srv(&self) -> ResourceView {
        self.whole_buffer_view(ViewKind::Srv)
    }

    fn uav(&self) -> ResourceView {
        self.whole_buffer_view(ViewKind::Uav)
    }

    fn cbv(&self) -> ResourceView {
        self.whole_buffer_view(ViewKind::Cbv)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl VulkanBuffer {
    fn whole_buffer_view(&self, kind: ViewKind) -> ResourceView {
        ResourceView {
            kind,
            resource: self.id,
            range: ViewRange::Buffer {
                offset: 0,
                size: self.description.size,
            },
            format_override: None,
            raw: self.handle.as_raw(),
        }
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        let bound = self.bound.lock().unwrap();

        unsafe {
            self.raw.device.destroy_buffer(self.handle, None);

            if let Some(memory) = bound.owned {
                if bound.mapped.is_some() {
                    self.raw.device.unmap_memory(memory);
                }
                self.raw.device.free_memory(memory, None);
            }
        }
    }
}
