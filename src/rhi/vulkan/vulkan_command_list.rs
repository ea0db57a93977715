#![allow(unsafe_code)]

//! The Vulkan command recorder.
//!
//! Wraps one primary command buffer from the calling thread's pool slot.
//! Contract violations (draws without a pipeline, undefined transitions,
//! push-constant size mismatches) terminate through the fatal-diagnostic
//! channel; driver failures do the same.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use cgmath::Vector4;
use smallvec::SmallVec;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::rhi_enums::*;
use crate::rhi::rhi_structs::*;
use crate::rhi::rhi_traits::*;
use crate::rhi::transitions::transition_info;
use crate::rhi::vulkan::vulkan_acceleration_structure::{
    build_flags, VulkanAccelerationStructure, INSTANCE_RECORD_SIZE,
};
use crate::rhi::vulkan::vulkan_buffer::VulkanBuffer;
use crate::rhi::vulkan::vulkan_descriptors::VulkanDescriptorSet;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_image::VulkanImage;
use crate::rhi::vulkan::vulkan_pipeline::VulkanPipeline;
use crate::rhi::vulkan::vulkan_renderpass::VulkanFramebuffer;
use crate::rhi::vulkan::vulkan_sync::{VulkanFence, VulkanSemaphore};
use crate::rhi::vulkan::vulkan_utils::*;

const MAX_BOUND_SETS: usize = 8;

fn expect_buffer<'a>(buffer: &'a Arc<dyn BufferResource>) -> &'a VulkanBuffer {
    match buffer.as_any().downcast_ref::<VulkanBuffer>() {
        Some(buffer) => buffer,
        None => render_fatal!(FatalKind::Invariant, "buffer from a different backend handed to Vulkan"),
    }
}

fn expect_image<'a>(image: &'a Arc<dyn ImageResource>) -> &'a VulkanImage {
    match image.as_any().downcast_ref::<VulkanImage>() {
        Some(image) => image,
        None => render_fatal!(FatalKind::Invariant, "image from a different backend handed to Vulkan"),
    }
}

fn expect_pipeline<'a>(pipeline: &'a Arc<dyn Pipeline>) -> &'a VulkanPipeline {
    match pipeline.as_any().downcast_ref::<VulkanPipeline>() {
        Some(pipeline) => pipeline,
        None => render_fatal!(FatalKind::Invariant, "pipeline from a different backend handed to Vulkan"),
    }
}

pub struct VulkanCommandRecorder {
    raw: Arc<RawDevice>,
    kind: QueueType,
    command_buffer: vk::CommandBuffer,

    bound_pipeline: Option<Arc<dyn Pipeline>>,
    /// Content hash of the group bound at each set index, for re-bind
    /// elision.
    bound_group_hashes: [Option<u64>; MAX_BOUND_SETS],
    active_render_pass: Option<Arc<dyn Framebuffer>>,
}

impl VulkanCommandRecorder {
    pub fn new(raw: Arc<RawDevice>, kind: QueueType) -> VulkanCommandRecorder {
        let command_buffer = raw.allocate_command_buffer(kind);

        VulkanCommandRecorder {
            raw,
            kind,
            command_buffer,
            bound_pipeline: None,
            bound_group_hashes: [None; MAX_BOUND_SETS],
            active_render_pass: None,
        }
    }

    fn bound_vulkan_pipeline(&self, operation: &str) -> &VulkanPipeline {
        match &self.bound_pipeline {
            Some(pipeline) => {
                let native: &VulkanPipeline = expect_pipeline(pipeline);
                native
            }
            None => render_fatal!(FatalKind::RecordingContract, "{} requires a bound pipeline", operation),
        }
    }

    fn require_render_pass(&self, operation: &str) {
        if self.active_render_pass.is_none() {
            render_fatal!(FatalKind::RecordingContract, "{} requires an active render pass", operation);
        }
    }

    fn require_pipeline_kind(&self, operation: &str, kind: PipelineType) -> &VulkanPipeline {
        let pipeline = self.bound_vulkan_pipeline(operation);
        if pipeline.pipeline_type() != kind {
            render_fatal!(
                FatalKind::RecordingContract,
                "{} requires a {:?} pipeline, a {:?} pipeline is bound",
                operation,
                kind,
                pipeline.pipeline_type()
            );
        }
        pipeline
    }

    fn write_instance_records(
        &self,
        tlas: &VulkanAccelerationStructure,
        instances: &[AccelerationStructureInstance],
    ) {
        let instances_buffer = match tlas.vk_instances_buffer() {
            Some(buffer) => buffer,
            None => render_fatal!(
                FatalKind::RecordingContract,
                "top-level build against a bottom-level structure"
            ),
        };

        let mut records = Vec::with_capacity(instances.len());
        for instance in instances {
            let matrix = vk::TransformMatrixKHR {
                matrix: [
                    instance.transform[0][0],
                    instance.transform[0][1],
                    instance.transform[0][2],
                    instance.transform[0][3],
                    instance.transform[1][0],
                    instance.transform[1][1],
                    instance.transform[1][2],
                    instance.transform[1][3],
                    instance.transform[2][0],
                    instance.transform[2][1],
                    instance.transform[2][2],
                    instance.transform[2][3],
                ],
            };

            records.push(vk::AccelerationStructureInstanceKHR {
                transform: matrix,
                instance_custom_index_and_mask: vk::Packed24_8::new(
                    instance.custom_index & 0x00ff_ffff,
                    instance.mask,
                ),
                instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                    instance.sbt_offset & 0x00ff_ffff,
                    instance.flags,
                ),
                acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                    device_handle: instance.blas.device_address(),
                },
            });
        }

        let bytes = unsafe {
            std::slice::from_raw_parts(
                records.as_ptr() as *const u8,
                records.len() * INSTANCE_RECORD_SIZE as usize,
            )
        };

        if let Err(error) = instances_buffer.set_data(bytes, 0) {
            render_fatal!(FatalKind::RecordingContract, "instance record upload failed: {}", error);
        }
    }

    fn record_acceleration_structure_build(
        &mut self,
        structure: &VulkanAccelerationStructure,
        scratch: &Arc<dyn BufferResource>,
        mode: vk::BuildAccelerationStructureModeKHR,
        instance_count: Option<u32>,
    ) {
        let loader = match &self.raw.acceleration_structure_loader {
            Some(loader) => loader.clone(),
            None => render_fatal!(FatalKind::RecordingContract, "acceleration structures are unavailable"),
        };

        let (geometry, primitive_count) = match structure.geometry() {
            crate::rhi::rhi_structs::AccelerationStructureGeometry::Triangles {
                vertex_buffer,
                vertex_format,
                vertex_stride,
                index_buffer,
            } => {
                let vertex_address = vk::DeviceOrHostAddressConstKHR {
                    device_address: vertex_buffer.device_address(),
                };

                let max_vertex = if *vertex_stride > 0 {
                    (vertex_buffer.size() / vertex_stride) as u32
                } else {
                    0
                };

                let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                    .vertex_format(to_vk_format(*vertex_format))
                    .vertex_data(vertex_address)
                    .vertex_stride(*vertex_stride)
                    .max_vertex(max_vertex.saturating_sub(1));

                triangles = match index_buffer {
                    Some(index_buffer) => triangles.index_type(vk::IndexType::UINT32).index_data(
                        vk::DeviceOrHostAddressConstKHR {
                            device_address: index_buffer.device_address(),
                        },
                    ),
                    None => triangles.index_type(vk::IndexType::NONE_KHR),
                };

                let geometry = vk::AccelerationStructureGeometryKHR::builder()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR {
                        triangles: triangles.build(),
                    })
                    .flags(vk::GeometryFlagsKHR::OPAQUE)
                    .build();

                (geometry, structure.primitive_count())
            }
            crate::rhi::rhi_structs::AccelerationStructureGeometry::Instances { .. } => {
                let instances_buffer = match structure.vk_instances_buffer() {
                    Some(buffer) => buffer,
                    None => render_fatal!(
                        FatalKind::Invariant,
                        "instances geometry without an instances buffer on '{}'",
                        structure.description().name
                    ),
                };

                let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instances_buffer.device_address(),
                    })
                    .build();

                let geometry = vk::AccelerationStructureGeometryKHR::builder()
                    .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
                    .build();

                (geometry, instance_count.unwrap_or(0))
            }
        };

        let geometries = [geometry];

        let mut builder = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(to_vk_build_type(structure))
            .flags(build_flags(structure.geometry()))
            .mode(mode)
            .dst_acceleration_structure(structure.vk_handle())
            .geometries(&geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.device_address(),
            });

        if mode == vk::BuildAccelerationStructureModeKHR::UPDATE {
            builder = builder.src_acceleration_structure(structure.vk_handle());
        }
        let build_info = builder.build();

        let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build();
        let ranges = [range];

        unsafe {
            loader.cmd_build_acceleration_structures(
                self.command_buffer,
                std::slice::from_ref(&build_info),
                &[&ranges],
            );
        }
    }
}

fn to_vk_build_type(structure: &VulkanAccelerationStructure) -> vk::AccelerationStructureTypeKHR {
    crate::rhi::vulkan::vulkan_acceleration_structure::to_vk_acceleration_structure_type(structure.as_type())
}

impl CommandRecorder for VulkanCommandRecorder {
    fn kind(&self) -> QueueType {
        self.kind
    }

    fn begin(&mut self) {
        if let Err(error) = unsafe {
            self.raw
                .device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
        } {
            render_fatal!(FatalKind::DriverError, "command buffer reset failed: {:?}", error);
        }

        let begin_info = vk::CommandBufferBeginInfo::builder();
        if let Err(error) = unsafe { self.raw.device.begin_command_buffer(self.command_buffer, &begin_info) } {
            render_fatal!(FatalKind::DriverError, "command buffer begin failed: {:?}", error);
        }

        self.bound_pipeline = None;
        self.bound_group_hashes = [None; MAX_BOUND_SETS];
        self.active_render_pass = None;
    }

    fn end(&mut self) {
        // Transient bindings do not survive the recording.
        self.bound_pipeline = None;
        self.bound_group_hashes = [None; MAX_BOUND_SETS];

        if let Err(error) = unsafe { self.raw.device.end_command_buffer(self.command_buffer) } {
            render_fatal!(FatalKind::DriverError, "command buffer end failed: {:?}", error);
        }
    }

    fn submit(&mut self, info: &SubmitInfo) -> Result<(), SubmitError> {
        let wait_stage = match self.kind {
            QueueType::Graphics => vk::PipelineStageFlags::ALL_GRAPHICS,
            QueueType::Compute => vk::PipelineStageFlags::ALL_COMMANDS,
            QueueType::Transfer => vk::PipelineStageFlags::TRANSFER,
        };

        let mut wait_semaphores = SmallVec::<[vk::Semaphore; 4]>::new();
        let mut wait_stages = SmallVec::<[vk::PipelineStageFlags; 4]>::new();
        for semaphore in &info.wait_semaphores {
            match semaphore.as_any().downcast_ref::<VulkanSemaphore>() {
                Some(semaphore) => {
                    wait_semaphores.push(semaphore.handle());
                    wait_stages.push(wait_stage);
                }
                None => render_fatal!(FatalKind::Invariant, "semaphore from a different backend handed to Vulkan"),
            }
        }

        let mut signal_semaphores = SmallVec::<[vk::Semaphore; 4]>::new();
        for semaphore in &info.signal_semaphores {
            match semaphore.as_any().downcast_ref::<VulkanSemaphore>() {
                Some(semaphore) => signal_semaphores.push(semaphore.handle()),
                None => render_fatal!(FatalKind::Invariant, "semaphore from a different backend handed to Vulkan"),
            }
        }

        let signal_fence = match &info.signal_fence {
            Some(fence) =>

                match fence_handle(fence) {
                    Some(handle) => handle,
                    None => render_fatal!(FatalKind::Invariant, "fence from a different backend handed to Vulkan"),
                },
            None => vk::Fence::null(),
        };

        let command_buffers = [self.command_buffer];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        match self.raw.submit_to_queue(self.kind, &[submit], signal_fence) {
            Ok(()) => Ok(()),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(SubmitError::DeviceLost),
            Err(_) => Err(SubmitError::QueueSubmitFailed),
        }
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) {
        let native = expect_pipeline(pipeline);

        unsafe {
            self.raw
                .device
                .cmd_bind_pipeline(self.command_buffer, native.bind_point(), native.vk_handle());
        }

        // Implicit set bindings from another layout are stale now.
        if let Some(previous) = &self.bound_pipeline {
            if previous.layout() != pipeline.layout() {
                self.bound_group_hashes = [None; MAX_BOUND_SETS];
            }
        }

        self.bound_pipeline = Some(pipeline.clone());
    }

    fn bind_resource_group(&mut self, group: &Arc<dyn ResourceGroup>, set_index: u32) {
        if self.bound_pipeline.is_none() {
            render_fatal!(
                FatalKind::RecordingContract,
                "bind_resource_group requires a bound pipeline"
            );
        }

        let slot = set_index as usize;
        if slot >= MAX_BOUND_SETS {
            render_fatal!(FatalKind::RecordingContract, "set index {} out of range", set_index);
        }

        if self.bound_group_hashes[slot] == Some(group.content_hash()) {
            return;
        }

        let set = group.descriptor_set();
        self.bind_descriptor_set(&set, set_index);
        self.bound_group_hashes[slot] = Some(group.content_hash());
    }

    fn bind_descriptor_set(&mut self, set: &Arc<dyn DescriptorSet>, set_index: u32) {
        let pipeline = self.bound_vulkan_pipeline("bind_descriptor_set");

        let native = match set.as_any().downcast_ref::<VulkanDescriptorSet>() {
            Some(native) => native,
            None => render_fatal!(
                FatalKind::Invariant,
                "descriptor set from a different backend handed to Vulkan"
            ),
        };

        unsafe {
            self.raw.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                pipeline.bind_point(),
                pipeline.vk_layout(),
                set_index,
                &[native.vk_handle()],
                &[],
            );
        }
    }

    fn push_constant(&mut self, data: &[u8]) {
        let pipeline = self.bound_vulkan_pipeline("push_constant");

        let range = match pipeline.push_constant() {
            Some(range) => range,
            None => render_fatal!(
                FatalKind::RecordingContract,
                "push_constant on a pipeline without a push-constant range"
            ),
        };

        if range.size as usize != data.len() {
            render_fatal!(
                FatalKind::RecordingContract,
                "push constant size mismatch: declared {}, pushed {}",
                range.size,
                data.len()
            );
        }

        unsafe {
            self.raw.device.cmd_push_constants(
                self.command_buffer,
                pipeline.vk_layout(),
                to_vk_shader_stages(range.stages),
                0,
                data,
            );
        }
    }

    fn begin_render_pass(&mut self, framebuffer: &Arc<dyn Framebuffer>) {
        if self.kind != QueueType::Graphics {
            render_fatal!(
                FatalKind::RecordingContract,
                "begin_render_pass on a {:?} recorder",
                self.kind
            );
        }

        let native = match framebuffer.as_any().downcast_ref::<VulkanFramebuffer>() {
            Some(native) => native,
            None => render_fatal!(
                FatalKind::Invariant,
                "framebuffer from a different backend handed to Vulkan"
            ),
        };

        let description = framebuffer.description();

        let mut clear_values = SmallVec::<[vk::ClearValue; 8]>::new();
        for attachment in &description.color_attachments {
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color_array(attachment.clear_value),
                },
            });
        }
        if let Some(depth) = &description.depth_stencil_attachment {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: depth.clear_value.x,
                    stencil: 0,
                },
            });
        }

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(native.vk_render_pass())
            .framebuffer(native.vk_handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: description.width,
                    height: description.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            self.raw
                .device
                .cmd_begin_render_pass(self.command_buffer, &begin_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: description.width as f32,
                height: description.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.raw.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);

            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: description.width,
                    height: description.height,
                },
            };
            self.raw.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }

        self.active_render_pass = Some(framebuffer.clone());
    }

    fn end_render_pass(&mut self) {
        self.require_render_pass("end_render_pass");

        // The render pass performs the initial -> final state completion
        // transitions itself.
        unsafe { self.raw.device.cmd_end_render_pass(self.command_buffer) };
        self.active_render_pass = None;
    }

    fn bind_vertex_buffer(&mut self, buffer: &Arc<dyn BufferResource>) {
        let native = expect_buffer(buffer);
        unsafe {
            self.raw
                .device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &[native.vk_handle()], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: &Arc<dyn BufferResource>) {
        let native = expect_buffer(buffer);
        unsafe {
            self.raw
                .device
                .cmd_bind_index_buffer(self.command_buffer, native.vk_handle(), 0, vk::IndexType::UINT32);
        }
    }

    fn draw(&mut self, vertex_count: u32) {
        self.draw_instanced(vertex_count, 1);
    }

    fn draw_indexed(&mut self, index_count: u32) {
        self.draw_indexed_instanced(index_count, 1);
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        self.require_render_pass("draw");
        self.require_pipeline_kind("draw", PipelineType::Graphics);

        unsafe {
            self.raw
                .device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0);
        }
    }

    fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) {
        self.require_render_pass("draw_indexed");
        self.require_pipeline_kind("draw_indexed", PipelineType::Graphics);

        unsafe {
            self.raw
                .device
                .cmd_draw_indexed(self.command_buffer, index_count, instance_count, 0, 0, 0);
        }
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.require_pipeline_kind("dispatch", PipelineType::Compute);

        unsafe {
            self.raw
                .device
                .cmd_dispatch(self.command_buffer, group_count_x, group_count_y, group_count_z);
        }
    }

    fn trace_rays(&mut self, width: u32, height: u32, depth: u32) {
        let pipeline = self.require_pipeline_kind("trace_rays", PipelineType::RayTracing);

        let table = match pipeline.shader_binding_table() {
            Some(table) => table,
            None => render_fatal!(FatalKind::Invariant, "ray-tracing pipeline without a binding table"),
        };

        let loader = match &self.raw.ray_tracing_loader {
            Some(loader) => loader.clone(),
            None => render_fatal!(FatalKind::RecordingContract, "ray tracing is unavailable"),
        };

        let to_region = |region: StridedRegion| vk::StridedDeviceAddressRegionKHR {
            device_address: region.device_address,
            stride: region.stride,
            size: region.size,
        };

        unsafe {
            loader.cmd_trace_rays(
                self.command_buffer,
                &to_region(table.raygen),
                &to_region(table.miss),
                &to_region(table.hit),
                &to_region(table.callable),
                width,
                height,
                depth,
            );
        }
    }

    fn transition_image(&mut self, image: &Arc<dyn ImageResource>, old: ResourceState, new: ResourceState) {
        let description = image.description();
        let range = ImageViewRange::whole(description.num_mips, description.num_layers);
        self.transition_image_range(image, old, new, range);
    }

    fn transition_image_range(
        &mut self,
        image: &Arc<dyn ImageResource>,
        old: ResourceState,
        new: ResourceState,
        range: ImageViewRange,
    ) {
        if old == new {
            log::warn!(
                "redundant transition for '{}': image already in {:?}",
                image.name(),
                old
            );
            return;
        }

        let info = match transition_info(old, new) {
            Some(info) => info,
            None => render_fatal!(
                FatalKind::UndefinedTransition,
                "image layout transition not defined: {:?} -> {:?} for '{}'",
                old,
                new,
                image.name()
            ),
        };

        let native = expect_image(image);
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(to_vk_access_flags(info.src_access))
            .dst_access_mask(to_vk_access_flags(info.dst_access))
            .old_layout(to_vk_image_layout(old))
            .new_layout(to_vk_image_layout(new))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(native.vk_handle())
            .subresource_range(to_vk_subresource_range(range, image.format()))
            .build();

        unsafe {
            self.raw.device.cmd_pipeline_barrier(
                self.command_buffer,
                to_vk_pipeline_stages(info.src_stage),
                to_vk_pipeline_stages(info.dst_stage),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn transition_buffer(&mut self, _buffer: &Arc<dyn BufferResource>, _old: ResourceState, _new: ResourceState) {
        // Buffers have no layouts in Vulkan.
    }

    fn copy_buffer_to_buffer(&mut self, source: &Arc<dyn BufferResource>, destination: &Arc<dyn BufferResource>) {
        if source.size() != destination.size() {
            render_fatal!(
                FatalKind::RecordingContract,
                "buffer copy size mismatch: {} vs {}",
                source.size(),
                destination.size()
            );
        }

        let copy = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: source.size(),
        };

        unsafe {
            self.raw.device.cmd_copy_buffer(
                self.command_buffer,
                expect_buffer(source).vk_handle(),
                expect_buffer(destination).vk_handle(),
                &[copy],
            );
        }
    }

    fn copy_buffer_to_image(&mut self, source: &Arc<dyn BufferResource>, destination: &Arc<dyn ImageResource>) {
        let description = destination.description();

        let copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect_mask_for(description.format),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: description.num_layers,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: description.width,
                height: description.height,
                depth: description.depth,
            },
        };

        unsafe {
            self.raw.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                expect_buffer(source).vk_handle(),
                expect_image(destination).vk_handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
    }

    fn build_bottom_level(&mut self, blas: &Arc<dyn AccelerationStructure>, scratch: &Arc<dyn BufferResource>) {
        let native = match blas.as_any().downcast_ref::<VulkanAccelerationStructure>() {
            Some(native) => native,
            None => render_fatal!(
                FatalKind::Invariant,
                "acceleration structure from a different backend handed to Vulkan"
            ),
        };

        self.record_acceleration_structure_build(
            native,
            scratch,
            vk::BuildAccelerationStructureModeKHR::BUILD,
            None,
        );
    }

    fn build_top_level(
        &mut self,
        tlas: &Arc<dyn AccelerationStructure>,
        instances: &[AccelerationStructureInstance],
        scratch: &Arc<dyn BufferResource>,
        mode: AccelerationStructureBuildMode,
    ) {
        let native = match tlas.as_any().downcast_ref::<VulkanAccelerationStructure>() {
            Some(native) => native,
            None => render_fatal!(
                FatalKind::Invariant,
                "acceleration structure from a different backend handed to Vulkan"
            ),
        };

        self.write_instance_records(native, instances);

        let vk_mode = match mode {
            AccelerationStructureBuildMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
            AccelerationStructureBuildMode::Update => vk::BuildAccelerationStructureModeKHR::UPDATE,
        };

        self.record_acceleration_structure_build(native, scratch, vk_mode, Some(instances.len() as u32));
    }

    fn begin_gpu_marker(&mut self, label: &str) {
        if let Some(debug_utils) = &self.raw.debug_utils {
            let name = CString::new(label).unwrap_or_default();
            let label_info = vk::DebugUtilsLabelEXT::builder().label_name(&name);

            unsafe { debug_utils.cmd_begin_debug_utils_label(self.command_buffer, &label_info) };
        }
    }

    fn end_gpu_marker(&mut self) {
        if let Some(debug_utils) = &self.raw.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer) };
        }
    }
}

impl Drop for VulkanCommandRecorder {
    fn drop(&mut self) {
        self.raw.free_command_buffer(self.kind, self.command_buffer);
    }
}

fn fence_handle(fence: &Arc<dyn Fence>) -> Option<vk::Fence> {
    fence
        .as_any()
        .downcast_ref::<VulkanFence>()
        .map(|fence| fence.handle())
}

fn clear_color_array(value: Vector4<f32>) -> [f32; 4] {
    [value.x, value.y, value.z, value.w]
}
