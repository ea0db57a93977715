#![allow(unsafe_code)]

//! Bottom- and top-level acceleration structures.
//!
//! Creation queries the build sizes for the declared geometry, carves out
//! the backing storage buffer and creates the native object. Builds are
//! recorded later through the command recorder, which pulls the stored
//! geometry back out of the resource.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::core::diagnostics::FatalKind;
use crate::core::handle::{ResourceId, RESOURCE_IDS};
use crate::render_fatal;
use crate::rhi::rhi_enums::{AccelerationStructureType, BufferUsage, ResourceCreationError};
use crate::rhi::rhi_structs::{
    AccelerationStructureBuildSizes, AccelerationStructureDescription, AccelerationStructureGeometry,
    BufferDescription,
};
use crate::rhi::rhi_traits::{AccelerationStructure, BufferResource};
use crate::rhi::vulkan::vulkan_buffer::VulkanBuffer;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_utils::to_vk_format;

/// Size of one packed instance record in a top-level input buffer.
pub const INSTANCE_RECORD_SIZE: u64 = std::mem::size_of::<vk::AccelerationStructureInstanceKHR>() as u64;

pub struct VulkanAccelerationStructure {
    raw: Arc<RawDevice>,
    id: ResourceId,
    description: AccelerationStructureDescription,
    handle: vk::AccelerationStructureKHR,
    build_sizes: AccelerationStructureBuildSizes,
    /// Storage backing the structure itself.
    _storage: Arc<VulkanBuffer>,
    /// Top-level only: the packed instance records consumed by builds.
    instances_buffer: Option<Arc<VulkanBuffer>>,
}

impl VulkanAccelerationStructure {
    pub fn new(
        raw: Arc<RawDevice>,
        description: AccelerationStructureDescription,
    ) -> Result<VulkanAccelerationStructure, ResourceCreationError> {
        let loader = raw
            .acceleration_structure_loader
            .clone()
            .ok_or_else(|| ResourceCreationError::FeatureNotAvailable("acceleration structures".to_owned()))?;

        let (geometry, primitive_count) = build_query_geometry(&description.geometry);

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(to_vk_acceleration_structure_type(description.as_type))
            .flags(build_flags(&description.geometry))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&geometry))
            .build();

        let sizes = unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
        };

        let build_sizes = AccelerationStructureBuildSizes {
            acceleration_structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        };

        let storage = Arc::new(VulkanBuffer::new(
            raw.clone(),
            BufferDescription {
                name: format!("{}-storage", description.name),
                size: build_sizes.acceleration_structure_size,
                stride: 0,
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                virtual_resource: false,
            },
        )?);

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(storage.vk_handle())
            .offset(0)
            .size(build_sizes.acceleration_structure_size)
            .ty(to_vk_acceleration_structure_type(description.as_type));

        let handle = unsafe { loader.create_acceleration_structure(&create_info, None) }
            .map_err(|_| ResourceCreationError::OutOfDeviceMemory)?;

        let instances_buffer = match &description.geometry {
            AccelerationStructureGeometry::Instances { max_instances, .. } => Some(Arc::new(VulkanBuffer::new(
                raw.clone(),
                BufferDescription {
                    name: format!("{}-instances", description.name),
                    size: *max_instances as u64 * INSTANCE_RECORD_SIZE,
                    stride: INSTANCE_RECORD_SIZE,
                    usage: BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::HOST_VISIBLE,
                    virtual_resource: false,
                },
            )?)),
            AccelerationStructureGeometry::Triangles { .. } => None,
        };

        Ok(VulkanAccelerationStructure {
            raw,
            id: RESOURCE_IDS.allocate(),
            description,
            handle,
            build_sizes,
            _storage: storage,
            instances_buffer,
        })
    }

    pub fn vk_handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    pub fn geometry(&self) -> &AccelerationStructureGeometry {
        &self.description.geometry
    }

    /// Primitive count for a full build of the stored geometry.
    pub fn primitive_count(&self) -> u32 {
        geometry_primitive_count(&self.description.geometry)
    }

    pub fn vk_instances_buffer(&self) -> Option<&Arc<VulkanBuffer>> {
        self.instances_buffer.as_ref()
    }
}

impl AccelerationStructure for VulkanAccelerationStructure {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn description(&self) -> &AccelerationStructureDescription {
        &self.description
    }

    fn build_sizes(&self) -> AccelerationStructureBuildSizes {
        self.build_sizes
    }

    fn instances_buffer(&self) -> Option<Arc<dyn BufferResource>> {
        self.instances_buffer
            .as_ref()
            .map(|buffer| buffer.clone() as Arc<dyn BufferResource>)
    }

    fn device_address(&self) -> u64 {
        let loader = match self.raw.acceleration_structure_loader.as_ref() {
            Some(loader) => loader,
            None => render_fatal!(
                FatalKind::Invariant,
                "acceleration structure '{}' outlived its extension loader",
                self.description.name
            ),
        };

        let info = vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(self.handle);
        unsafe { loader.get_acceleration_structure_device_address(&info) }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanAccelerationStructure {
    fn drop(&mut self) {
        if let Some(loader) = &self.raw.acceleration_structure_loader {
            unsafe { loader.destroy_acceleration_structure(self.handle, None) };
        }
    }
}

pub fn to_vk_acceleration_structure_type(as_type: AccelerationStructureType) -> vk::AccelerationStructureTypeKHR {
    match as_type {
        AccelerationStructureType::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureType::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

pub fn build_flags(geometry: &AccelerationStructureGeometry) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut flags = vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;

    if let AccelerationStructureGeometry::Instances {
        allow_updates: true, ..
    } = geometry
    {
        flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }

    flags
}

pub fn geometry_primitive_count(geometry: &AccelerationStructureGeometry) -> u32 {
    match geometry {
        AccelerationStructureGeometry::Triangles {
            vertex_buffer,
            vertex_stride,
            index_buffer,
            ..
        } => match index_buffer {
            Some(index_buffer) => (index_buffer.size() / 4 / 3) as u32,
            None => {
                let stride = (*vertex_stride).max(1);
                (vertex_buffer.size() / stride / 3) as u32
            }
        },
        AccelerationStructureGeometry::Instances { max_instances, .. } => *max_instances,
    }
}

/// Geometry description used for the size query; device addresses are not
/// inspected there and stay null.
pub fn build_query_geometry(
    geometry: &AccelerationStructureGeometry,
) -> (vk::AccelerationStructureGeometryKHR, u32) {
    match geometry {
        AccelerationStructureGeometry::Triangles {
            vertex_buffer,
            vertex_format,
            vertex_stride,
            index_buffer,
        } => {
            let max_vertex = if *vertex_stride > 0 {
                (vertex_buffer.size() / vertex_stride) as u32
            } else {
                0
            };

            let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                .vertex_format(to_vk_format(*vertex_format))
                .vertex_stride(*vertex_stride)
                .max_vertex(max_vertex.saturating_sub(1));
            if index_buffer.is_some() {
                triangles = triangles.index_type(vk::IndexType::UINT32);
            } else {
                triangles = triangles.index_type(vk::IndexType::NONE_KHR);
            }

            let vk_geometry = vk::AccelerationStructureGeometryKHR::builder()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .geometry(vk::AccelerationStructureGeometryDataKHR {
                    triangles: triangles.build(),
                })
                .flags(vk::GeometryFlagsKHR::OPAQUE)
                .build();

            (vk_geometry, geometry_primitive_count(geometry))
        }
        AccelerationStructureGeometry::Instances { max_instances, .. } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                .array_of_pointers(false)
                .build();

            let geometry = vk::AccelerationStructureGeometryKHR::builder()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
                .build();

            (geometry, *max_instances)
        }
    }
}
