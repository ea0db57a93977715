//! Veil's Render Hardware Interface.
//!
//! This is the capability seam between the engine core and a native GPU
//! API. The render graph, the caches and the allocators talk exclusively to
//! these traits; the Vulkan backend implements them, and the test suite
//! implements a recording device to observe what the core asks a backend to
//! do. Everything here is object safe on purpose: the core stores
//! `Arc<dyn _>` / `Box<dyn _>` and never names a backend type.

use std::any::Any;
use std::sync::Arc;

use cgmath::Vector2;

use super::rhi_enums::*;
use super::rhi_structs::*;
use crate::core::handle::ResourceId;
use crate::rhi::descriptors::{DescriptorItem, DescriptorSetLayoutHandle, PipelineLayoutHandle, ResourceGroupDescription, WriteDescriptor};
use crate::shader::ShaderRegistry;

/// A GPU buffer.
///
/// Buffers created as virtual carry no memory until an aliased allocator
/// places them; everything else owns exactly one backing allocation until
/// destruction.
pub trait BufferResource: Send + Sync {
    /// Process-unique identity, referenced by views.
    fn id(&self) -> ResourceId;

    fn description(&self) -> &BufferDescription;

    fn memory_requirements(&self) -> MemoryRequirements;

    /// Copies `data` into the buffer at `offset` through its persistent
    /// mapping. Fails unless the buffer is host visible.
    fn set_data(&self, data: &[u8], offset: u64) -> Result<(), BufferAccessError>;

    /// GPU virtual address, used for acceleration-structure inputs and
    /// shader binding tables.
    fn device_address(&self) -> u64;

    /// Whole-buffer shader-resource view. Identical requests return the
    /// identical view.
    fn srv(&self) -> ResourceView;

    /// Whole-buffer unordered-access view.
    fn uav(&self) -> ResourceView;

    /// Whole-buffer constant-buffer view.
    fn cbv(&self) -> ResourceView;

    fn as_any(&self) -> &dyn Any;

    fn size(&self) -> u64 {
        self.description().size
    }

    fn name(&self) -> &str {
        &self.description().name
    }
}

/// A GPU image.
pub trait ImageResource: Send + Sync {
    fn id(&self) -> ResourceId;

    fn description(&self) -> &ImageDescription;

    fn memory_requirements(&self) -> MemoryRequirements;

    /// Returns the view for `description`, minting it on first request and
    /// returning the cached identical view afterwards. Views never outlive
    /// the resource that minted them.
    fn view(&self, description: ImageViewDescription) -> ResourceView;

    fn as_any(&self) -> &dyn Any;

    fn format(&self) -> ImageFormat {
        self.description().format
    }

    fn name(&self) -> &str {
        &self.description().name
    }

    /// View covering every mip and layer.
    fn whole_view(&self, kind: ViewKind) -> ResourceView {
        let description = self.description();
        self.view(ImageViewDescription {
            kind,
            range: ImageViewRange::whole(description.num_mips, description.num_layers),
            format_override: None,
        })
    }
}

/// An immutable sampler object.
pub trait SamplerState: Send + Sync {
    fn description(&self) -> &SamplerDescription;

    /// Backend sampler object, opaque at this layer.
    fn raw(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// A ray-tracing acceleration structure.
pub trait AccelerationStructure: Send + Sync {
    fn id(&self) -> ResourceId;

    fn description(&self) -> &AccelerationStructureDescription;

    /// Sizes the backend reported for building this structure.
    fn build_sizes(&self) -> AccelerationStructureBuildSizes;

    /// The internal instances buffer of a top-level structure; `None` for
    /// bottom-level ones.
    fn instances_buffer(&self) -> Option<Arc<dyn BufferResource>>;

    fn device_address(&self) -> u64;

    fn as_any(&self) -> &dyn Any;

    fn as_type(&self) -> AccelerationStructureType {
        self.description().as_type
    }
}

/// GPU -> CPU synchronization.
///
/// A fence is signalled by a queue submission and waited on by the host.
/// `wait_for` returns once the associated submission has completed; there
/// is no cancellation.
pub trait Fence: Send + Sync {
    fn wait_for(&self);

    fn reset(&self);

    fn is_signalled(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Queue <-> queue synchronization. Binary, never host-visible.
pub trait Semaphore: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A descriptor set handed out by one of the three pool types.
///
/// A transient set is valid only until the next `reset_transient` on the
/// device that allocated it.
pub trait DescriptorSet: Send + Sync {
    /// Applies a batch of writes. Writes are sorted by binding and
    /// consecutive writes to the same binding merge into a single backend
    /// record with a descriptor count greater than one.
    fn update(&self, writes: &[WriteDescriptor], array_offset: u32);

    fn allocation_type(&self) -> DescriptorSetAllocationType;

    fn layout(&self) -> DescriptorSetLayoutHandle;

    fn as_any(&self) -> &dyn Any;
}

/// A pre-built descriptor set viewed as a named, hashable bundle of
/// resource views and samplers.
pub trait ResourceGroup: Send + Sync {
    /// Content hash over the group's members; the command recorder uses it
    /// to skip redundant re-binds.
    fn content_hash(&self) -> u64;

    fn descriptor_set(&self) -> Arc<dyn DescriptorSet>;

    fn layout(&self) -> DescriptorSetLayoutHandle;
}

/// A compiled pipeline of any of the three kinds.
pub trait Pipeline: Send + Sync {
    fn pipeline_type(&self) -> PipelineType;

    fn layout(&self) -> PipelineLayoutHandle;

    /// The shader-binding-table regions of a ray-tracing pipeline; `None`
    /// for the other kinds.
    fn shader_binding_table(&self) -> Option<ShaderBindingTable>;

    fn as_any(&self) -> &dyn Any;
}

/// A framebuffer together with its derived render pass.
pub trait Framebuffer: Send + Sync {
    fn description(&self) -> &FramebufferDescription;

    fn as_any(&self) -> &dyn Any;

    fn width(&self) -> u32 {
        self.description().width
    }

    fn height(&self) -> u32 {
        self.description().height
    }
}

/// A surface-bound ring of presentable images.
pub trait Swapchain: Send + Sync {
    /// Advances to the next presentable image, optionally signalling a
    /// semaphore and/or fence once it is ready.
    fn acquire_next_image(
        &mut self,
        signal_semaphore: Option<&Arc<dyn Semaphore>>,
        signal_fence: Option<&Arc<dyn Fence>>,
    ) -> Result<u32, SwapchainError>;

    fn present(&mut self, image_index: u32, wait_semaphores: &[Arc<dyn Semaphore>]) -> Result<(), SwapchainError>;

    fn images(&self) -> Vec<Arc<dyn ImageResource>>;

    fn extent(&self) -> Vector2<u32>;
}

/// One device-memory block per resource.
pub trait DeviceMemoryAllocator {
    fn allocate_buffer(&mut self, buffer: &dyn BufferResource) -> Result<AllocationInfo, AllocationError>;

    fn allocate_image(&mut self, image: &dyn ImageResource) -> Result<AllocationInfo, AllocationError>;

    /// Base pointer of a host-visible allocation's persistent mapping.
    fn mapped_memory(&self, id: AllocationId) -> Option<*mut u8>;

    fn release(&mut self, id: AllocationId) -> Result<(), AllocationError>;
}

/// One device-memory block backing many resources with non-overlapping GPU
/// lifetimes.
///
/// Two-phase: stage every `(resource, offset)` pair, then `allocate` once.
/// The caller guarantees lifetimes do not overlap; the render-graph
/// compiler is the caller that proves it.
pub trait AliasedDeviceMemoryAllocator {
    fn stage_buffer(&mut self, buffer: Arc<dyn BufferResource>, offset: u64) -> Result<(), AllocationError>;

    fn stage_image(&mut self, image: Arc<dyn ImageResource>, offset: u64) -> Result<(), AllocationError>;

    /// Computes the backing size, picks a memory type satisfying every
    /// staged entry and binds each resource at its offset. Fails with
    /// `NoCompatibleMemoryType` when the staged memory-type-bit
    /// intersection is empty and `AllocatorAlreadyFinalized` on a second
    /// call.
    fn allocate(&mut self) -> Result<(), AllocationError>;

    fn allocated_size(&self) -> u64;

    /// Base pointer of the block when allocated host visible.
    fn mapped_memory(&self) -> Option<*mut u8>;
}

/// A command buffer in the recording state machine
/// `begin -> (record...) -> end -> submit`.
///
/// Contract violations (drawing without a pipeline, transitioning through
/// an unregistered state pair, pushing constants of the wrong size) are
/// programmer errors and terminate through the fatal-diagnostic channel.
pub trait CommandRecorder {
    fn kind(&self) -> QueueType;

    /// Resets the underlying buffer and starts recording.
    fn begin(&mut self);

    /// Stops recording and clears bound transient state.
    fn end(&mut self);

    /// Hands the recorded work to the queue implied by `kind`.
    fn submit(&mut self, info: &SubmitInfo) -> Result<(), SubmitError>;

    /// Stores the pipeline and its bind point; descriptor-set bindings not
    /// compatible with the new pipeline's layout are dropped.
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>);

    /// Binds a resource group at `set_index`. Requires a bound pipeline. A
    /// group whose content hash is already bound at that index is a no-op.
    fn bind_resource_group(&mut self, group: &Arc<dyn ResourceGroup>, set_index: u32);

    /// Lower-level set binding without the content-hash de-duplication.
    fn bind_descriptor_set(&mut self, set: &Arc<dyn DescriptorSet>, set_index: u32);

    /// Pushes constants; `data.len()` must equal the size declared in the
    /// bound pipeline's layout.
    fn push_constant(&mut self, data: &[u8]);

    /// Only on a graphics recorder: transitions the attachments into their
    /// declared initial states and opens the pass with viewport and scissor
    /// covering the framebuffer extent.
    fn begin_render_pass(&mut self, framebuffer: &Arc<dyn Framebuffer>);

    /// Completes the `initial_state -> final_state` attachment transitions
    /// and closes the pass.
    fn end_render_pass(&mut self);

    fn bind_vertex_buffer(&mut self, buffer: &Arc<dyn BufferResource>);

    fn bind_index_buffer(&mut self, buffer: &Arc<dyn BufferResource>);

    fn draw(&mut self, vertex_count: u32);

    fn draw_indexed(&mut self, index_count: u32);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32);

    fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32);

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32);

    /// Requires a ray-tracing pipeline; consumes the SBT regions captured
    /// on it.
    fn trace_rays(&mut self, width: u32, height: u32, depth: u32);

    /// Emits the single barrier registered for `(old, new)` over the whole
    /// image. The same state in and out is a no-op with a warning; an
    /// unregistered pair is fatal.
    fn transition_image(&mut self, image: &Arc<dyn ImageResource>, old: ResourceState, new: ResourceState);

    /// Range-limited variant of [`transition_image`].
    fn transition_image_range(
        &mut self,
        image: &Arc<dyn ImageResource>,
        old: ResourceState,
        new: ResourceState,
        range: ImageViewRange,
    );

    /// Buffers have no layouts on the reference backend; this records
    /// nothing there.
    fn transition_buffer(&mut self, buffer: &Arc<dyn BufferResource>, old: ResourceState, new: ResourceState);

    /// Requires `source.size() == destination.size()`.
    fn copy_buffer_to_buffer(&mut self, source: &Arc<dyn BufferResource>, destination: &Arc<dyn BufferResource>);

    /// Writes the whole of mip 0, all layers.
    fn copy_buffer_to_image(&mut self, source: &Arc<dyn BufferResource>, destination: &Arc<dyn ImageResource>);

    /// Builds a bottom-level acceleration structure from its stored
    /// geometry, using `scratch` as build scratch.
    fn build_bottom_level(&mut self, blas: &Arc<dyn AccelerationStructure>, scratch: &Arc<dyn BufferResource>);

    /// Writes `instances` into the top-level structure's instances buffer
    /// and issues a build or update.
    fn build_top_level(
        &mut self,
        tlas: &Arc<dyn AccelerationStructure>,
        instances: &[AccelerationStructureInstance],
        scratch: &Arc<dyn BufferResource>,
        mode: AccelerationStructureBuildMode,
    );

    fn begin_gpu_marker(&mut self, label: &str);

    fn end_gpu_marker(&mut self);
}

/// The logical device: resource factory, descriptor pools, queue access.
///
/// Command-buffer allocation is thread safe: each thread gets its own
/// command-pool slot per queue type, recycled through a free list once the
/// thread has returned all its buffers. Queue submission serializes behind
/// a per-queue mutex. Everything else is intended to be called from the
/// thread driving the frame.
pub trait RenderDevice: Send + Sync {
    fn properties(&self) -> &DeviceProperties;

    fn graphics_api(&self) -> GraphicsApi;

    fn shader_registry(&self) -> &ShaderRegistry;

    fn create_buffer(&self, description: BufferDescription) -> Result<Arc<dyn BufferResource>, ResourceCreationError>;

    fn create_image(&self, description: ImageDescription) -> Result<Arc<dyn ImageResource>, ResourceCreationError>;

    fn create_sampler(&self, description: SamplerDescription) -> Result<Arc<dyn SamplerState>, ResourceCreationError>;

    fn create_acceleration_structure(
        &self,
        description: AccelerationStructureDescription,
    ) -> Result<Arc<dyn AccelerationStructure>, ResourceCreationError>;

    fn create_fence(&self, signalled: bool) -> Result<Arc<dyn Fence>, ResourceCreationError>;

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>, ResourceCreationError>;

    fn create_base_allocator(&self) -> Box<dyn DeviceMemoryAllocator>;

    fn create_aliased_allocator(&self, host_visible: bool, name: &str) -> Box<dyn AliasedDeviceMemoryAllocator>;

    fn create_command_recorder(&self, kind: QueueType) -> Box<dyn CommandRecorder>;

    /// Looks up or builds the pipeline for `description` in the device's
    /// content-hash keyed cache.
    fn create_graphics_pipeline(
        &self,
        description: &GraphicsPipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError>;

    fn create_compute_pipeline(
        &self,
        description: &ComputePipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError>;

    fn create_ray_tracing_pipeline(
        &self,
        description: &RayTracingPipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError>;

    /// Builds a framebuffer, sharing a cached render pass with every other
    /// framebuffer of the same attachment layout.
    fn create_framebuffer(
        &self,
        description: FramebufferDescription,
    ) -> Result<Arc<dyn Framebuffer>, ResourceCreationError>;

    /// Bakes a persistent descriptor set out of a named bundle of views
    /// and samplers.
    fn create_resource_group(
        &self,
        description: &ResourceGroupDescription,
    ) -> Result<Arc<dyn ResourceGroup>, ResourceCreationError>;

    fn allocate_transient_descriptor_set(&self, layout: &[DescriptorItem]) -> Arc<dyn DescriptorSet>;

    fn allocate_persistent_descriptor_set(&self, layout: &[DescriptorItem]) -> Arc<dyn DescriptorSet>;

    /// Allocates a variable-count, partially-bound set with exactly one
    /// binding and `count` descriptors.
    fn allocate_bindless_descriptor_set(&self, item: DescriptorItem, count: u32) -> Arc<dyn DescriptorSet>;

    /// Bulk-frees every transient descriptor set. The caller must have
    /// waited the fence of the submission that used them.
    fn reset_transient_descriptors(&self);

    /// Number of transient sets handed out since the last reset.
    fn transient_descriptor_allocation_count(&self) -> u32;

    fn wait_idle(&self);
}
