#![allow(unsafe_code)]

//! Descriptor pools, sets and resource groups.
//!
//! Three pool disciplines: transient (bulk reset each frame), persistent
//! (individually freed) and bindless (variable count, update after bind).
//! Set updates run through the shared write-merge planner so consecutive
//! writes to one binding reach the driver as a single record.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::descriptors::{
    merge_write_runs, DescriptorSetLayoutHandle, DescriptorValue, ResourceGroupDescription, WriteDescriptor,
};
use crate::rhi::rhi_enums::{DescriptorSetAllocationType, ShaderResourceKind};
use crate::rhi::rhi_structs::ViewRange;
use crate::rhi::rhi_traits::{DescriptorSet, ResourceGroup};
use crate::rhi::vulkan::vulkan_acceleration_structure::VulkanAccelerationStructure;
use crate::rhi::vulkan::vulkan_device::{RawDevice, VulkanDevice};
use crate::rhi::vulkan::vulkan_utils::to_vk_descriptor_type;

const MAX_SETS_PER_POOL: u32 = 512;

pub struct VulkanDescriptorManager {
    raw: Arc<RawDevice>,
    pools: Mutex<Pools>,
    transient_allocations: AtomicU32,
}

struct Pools {
    transient: vk::DescriptorPool,
    persistent: vk::DescriptorPool,
    bindless: vk::DescriptorPool,
}

fn create_pool(raw: &RawDevice, flags: vk::DescriptorPoolCreateFlags) -> vk::DescriptorPool {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: 4096,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: 1024,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1024,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1024,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: 256,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: 64,
        },
    ];

    let create_info = vk::DescriptorPoolCreateInfo::builder()
        .flags(flags)
        .max_sets(MAX_SETS_PER_POOL)
        .pool_sizes(&pool_sizes);

    match unsafe { raw.device.create_descriptor_pool(&create_info, None) } {
        Ok(pool) => pool,
        Err(error) => render_fatal!(FatalKind::DriverError, "descriptor pool creation failed: {:?}", error),
    }
}

impl VulkanDescriptorManager {
    pub fn new(raw: Arc<RawDevice>) -> VulkanDescriptorManager {
        let pools = Pools {
            transient: create_pool(&raw, vk::DescriptorPoolCreateFlags::empty()),
            persistent: create_pool(&raw, vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET),
            bindless: create_pool(&raw, vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND),
        };

        VulkanDescriptorManager {
            raw,
            pools: Mutex::new(pools),
            transient_allocations: AtomicU32::new(0),
        }
    }

    pub fn allocate_transient(
        &self,
        layout: DescriptorSetLayoutHandle,
        vk_layout: vk::DescriptorSetLayout,
    ) -> Arc<dyn DescriptorSet> {
        let pools = self.pools.lock().unwrap();
        let handle = self.allocate_from(pools.transient, vk_layout, None);
        self.transient_allocations.fetch_add(1, Ordering::Relaxed);

        Arc::new(VulkanDescriptorSet {
            raw: self.raw.clone(),
            handle,
            layout,
            allocation_type: DescriptorSetAllocationType::Transient,
            persistent_pool: None,
        })
    }

    pub fn allocate_persistent(
        &self,
        layout: DescriptorSetLayoutHandle,
        vk_layout: vk::DescriptorSetLayout,
    ) -> Arc<dyn DescriptorSet> {
        let pools = self.pools.lock().unwrap();
        let handle = self.allocate_from(pools.persistent, vk_layout, None);

        Arc::new(VulkanDescriptorSet {
            raw: self.raw.clone(),
            handle,
            layout,
            allocation_type: DescriptorSetAllocationType::Persistent,
            persistent_pool: Some(pools.persistent),
        })
    }

    pub fn allocate_bindless(
        &self,
        layout: DescriptorSetLayoutHandle,
        vk_layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Arc<dyn DescriptorSet> {
        let pools = self.pools.lock().unwrap();
        let handle = self.allocate_from(pools.bindless, vk_layout, Some(count));

        Arc::new(VulkanDescriptorSet {
            raw: self.raw.clone(),
            handle,
            layout,
            allocation_type: DescriptorSetAllocationType::Bindless,
            persistent_pool: None,
        })
    }

    fn allocate_from(
        &self,
        pool: vk::DescriptorPool,
        vk_layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> vk::DescriptorSet {
        let layouts = [vk_layout];
        let counts;

        let mut allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let mut variable_info;
        if let Some(count) = variable_count {
            counts = [count];
            variable_info =
                vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder().descriptor_counts(&counts);
            allocate_info = allocate_info.push_next(&mut variable_info);
        }

        match unsafe { self.raw.device.allocate_descriptor_sets(&allocate_info) } {
            Ok(mut sets) => sets.remove(0),
            Err(error) => render_fatal!(FatalKind::DriverError, "descriptor set allocation failed: {:?}", error),
        }
    }

    /// Bulk-frees every transient set. Sets handed out earlier become
    /// invalid; using one afterwards is undefined.
    pub fn reset_transient(&self) {
        let pools = self.pools.lock().unwrap();
        if let Err(error) = unsafe {
            self.raw
                .device
                .reset_descriptor_pool(pools.transient, vk::DescriptorPoolResetFlags::empty())
        } {
            render_fatal!(FatalKind::DriverError, "transient pool reset failed: {:?}", error);
        }

        self.transient_allocations.store(0, Ordering::Relaxed);
    }

    pub fn transient_allocation_count(&self) -> u32 {
        self.transient_allocations.load(Ordering::Relaxed)
    }
}

impl Drop for VulkanDescriptorManager {
    fn drop(&mut self) {
        let pools = self.pools.lock().unwrap();
        unsafe {
            self.raw.device.destroy_descriptor_pool(pools.transient, None);
            self.raw.device.destroy_descriptor_pool(pools.persistent, None);
            self.raw.device.destroy_descriptor_pool(pools.bindless, None);
        }
    }
}

pub struct VulkanDescriptorSet {
    raw: Arc<RawDevice>,
    handle: vk::DescriptorSet,
    layout: DescriptorSetLayoutHandle,
    allocation_type: DescriptorSetAllocationType,
    persistent_pool: Option<vk::DescriptorPool>,
}

impl VulkanDescriptorSet {
    pub fn vk_handle(&self) -> vk::DescriptorSet {
        self.handle
    }
}

fn is_image_kind(kind: ShaderResourceKind) -> bool {
    matches!(
        kind,
        ShaderResourceKind::TextureSrv | ShaderResourceKind::TextureUav | ShaderResourceKind::Sampler
    )
}

fn is_buffer_kind(kind: ShaderResourceKind) -> bool {
    matches!(
        kind,
        ShaderResourceKind::BufferSrv
            | ShaderResourceKind::BufferUav
            | ShaderResourceKind::ConstantBuffer
    )
}

impl DescriptorSet for VulkanDescriptorSet {
    fn update(&self, writes: &[WriteDescriptor], array_offset: u32) {
        if writes.is_empty() {
            return;
        }

        let (order, runs) = merge_write_runs(writes, &self.raw.binding_offsets);

        // Payload arrays are gathered in sorted order; reserving up front
        // keeps the element addresses stable for the write records.
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::with_capacity(writes.len());
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::with_capacity(writes.len());
        let mut acceleration_handles: Vec<vk::AccelerationStructureKHR> = Vec::with_capacity(writes.len());
        let mut acceleration_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> =
            Vec::with_capacity(writes.len());

        // Index into the right payload array for each sorted position.
        let mut payload_index = Vec::with_capacity(order.len());

        for &write_index in &order {
            let write = &writes[write_index];

            match (&write.value, write.kind) {
                (DescriptorValue::ImageView(view), ShaderResourceKind::TextureSrv) => {
                    payload_index.push(image_infos.len());
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: vk::ImageView::from_raw(view.raw),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                }
                (DescriptorValue::ImageView(view), ShaderResourceKind::TextureUav) => {
                    payload_index.push(image_infos.len());
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: vk::ImageView::from_raw(view.raw),
                        image_layout: vk::ImageLayout::GENERAL,
                    });
                }
                (DescriptorValue::Sampler(sampler), ShaderResourceKind::Sampler) => {
                    payload_index.push(image_infos.len());
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::from_raw(sampler.raw()),
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                }
                (DescriptorValue::BufferView(view), kind) if is_buffer_kind(kind) => {
                    let (offset, size) = match view.range {
                        ViewRange::Buffer { offset, size } => (offset, size),
                        ViewRange::Image(_) => {
                            render_fatal!(FatalKind::Invariant, "image range in a buffer descriptor write")
                        }
                    };

                    payload_index.push(buffer_infos.len());
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: vk::Buffer::from_raw(view.raw),
                        offset,
                        range: size,
                    });
                }
                (DescriptorValue::AccelerationStructure(acceleration_structure), _) => {
                    let native = match acceleration_structure
                        .as_any()
                        .downcast_ref::<VulkanAccelerationStructure>()
                    {
                        Some(native) => native,
                        None => render_fatal!(
                            FatalKind::Invariant,
                            "acceleration structure from a different backend handed to Vulkan"
                        ),
                    };

                    payload_index.push(acceleration_handles.len());
                    acceleration_handles.push(native.vk_handle());
                }
                _ => render_fatal!(
                    FatalKind::RecordingContract,
                    "descriptor write payload does not match its declared kind"
                ),
            }
        }

        let mut write_sets: Vec<vk::WriteDescriptorSet> = Vec::with_capacity(runs.len());

        for run in &runs {
            let descriptor_type = to_vk_descriptor_type(run.kind);
            let start = payload_index[run.start];

            let mut write_set = vk::WriteDescriptorSet {
                dst_set: self.handle,
                dst_binding: run.binding,
                dst_array_element: array_offset,
                descriptor_count: run.count,
                descriptor_type,
                ..vk::WriteDescriptorSet::default()
            };

            if is_buffer_kind(run.kind) {
                write_set.p_buffer_info = &buffer_infos[start];
            } else if is_image_kind(run.kind) {
                write_set.p_image_info = &image_infos[start];
            } else {
                acceleration_infos.push(vk::WriteDescriptorSetAccelerationStructureKHR {
                    acceleration_structure_count: run.count,
                    p_acceleration_structures: &acceleration_handles[start],
                    ..vk::WriteDescriptorSetAccelerationStructureKHR::default()
                });
                write_set.p_next =
                    &acceleration_infos[acceleration_infos.len() - 1] as *const _ as *const std::ffi::c_void;
            }

            write_sets.push(write_set);
        }

        unsafe { self.raw.device.update_descriptor_sets(&write_sets, &[]) };
    }

    fn allocation_type(&self) -> DescriptorSetAllocationType {
        self.allocation_type
    }

    fn layout(&self) -> DescriptorSetLayoutHandle {
        self.layout
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanDescriptorSet {
    fn drop(&mut self) {
        if let Some(pool) = self.persistent_pool {
            let result = unsafe { self.raw.device.free_descriptor_sets(pool, &[self.handle]) };
            if let Err(error) = result {
                log::warn!("persistent descriptor set free failed: {:?}", error);
            }
        }
    }
}

/// A persistent descriptor set baked from a named bundle of views and
/// samplers, hashable for re-bind elision.
pub struct VulkanResourceGroup {
    content_hash: u64,
    layout: DescriptorSetLayoutHandle,
    set: Arc<dyn DescriptorSet>,
}

impl VulkanResourceGroup {
    pub fn new(device: &VulkanDevice, description: &ResourceGroupDescription) -> VulkanResourceGroup {
        let layout_description = description.layout();
        let (layout, vk_layout) = device.get_or_create_set_layout(&layout_description, false);

        let set = device.descriptor_manager().allocate_persistent(layout, vk_layout);
        set.update(&description.writes(), 0);

        VulkanResourceGroup {
            content_hash: description.content_hash(),
            layout,
            set,
        }
    }
}

impl ResourceGroup for VulkanResourceGroup {
    fn content_hash(&self) -> u64 {
        self.content_hash
    }

    fn descriptor_set(&self) -> Arc<dyn DescriptorSet> {
        self.set.clone()
    }

    fn layout(&self) -> DescriptorSetLayoutHandle {
        self.layout
    }
}
