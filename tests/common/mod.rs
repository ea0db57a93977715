//! A recording backend for driving the render graph in tests.
//!
//! Every operation the engine asks of the backend is appended to a shared
//! log; scenario tests build a graph, execute it and assert on the exact
//! sequence the backend saw. This is the second implementation of the
//! capability interface, which also pins down the seam a real alternative
//! backend would fill.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use veil::core::handle::{ResourceId, RESOURCE_IDS};
use veil::rhi::allocator::AliasedAllocationPlan;
use veil::rhi::descriptors::{
    DescriptorItem, DescriptorSetLayoutCache, DescriptorSetLayoutDescription, DescriptorSetLayoutHandle,
    PipelineLayoutHandle, ResourceGroupDescription, WriteDescriptor,
};
use veil::rhi::rhi_enums::*;
use veil::rhi::rhi_structs::*;
use veil::rhi::rhi_traits::*;
use veil::rhi::transitions::transition_info;
use veil::shader::ShaderRegistry;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn record(log: &Log, line: String) {
    log.lock().unwrap().push(line);
}

pub struct TestDevice {
    registry: Arc<ShaderRegistry>,
    properties: DeviceProperties,
    pub log: Log,
    transient_allocations: AtomicU32,
    render_pass_layouts: Mutex<Vec<RenderPassLayout>>,
    layout_cache: Mutex<DescriptorSetLayoutCache>,
}

impl TestDevice {
    pub fn new(registry: Arc<ShaderRegistry>) -> Arc<TestDevice> {
        Arc::new(TestDevice {
            registry,
            properties: DeviceProperties {
                device_name: "test-device".to_owned(),
                supports_ray_tracing: true,
                ..DeviceProperties::default()
            },
            log: Arc::new(Mutex::new(Vec::new())),
            transient_allocations: AtomicU32::new(0),
            render_pass_layouts: Mutex::new(Vec::new()),
            layout_cache: Mutex::new(DescriptorSetLayoutCache::new()),
        })
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn lines_matching(&self, needle: &str) -> Vec<String> {
        self.log_lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }

    pub fn render_pass_count(&self) -> usize {
        self.render_pass_layouts.lock().unwrap().len()
    }
}

fn state_name(state: ResourceState) -> &'static str {
    match state {
        ResourceState::Undefined => "Undefined",
        ResourceState::General => "General",
        ResourceState::ColorAttachment => "ColorAttachment",
        ResourceState::DepthStencilAttachment => "DepthStencilAttachment",
        ResourceState::ShaderReadOnly => "ShaderReadOnly",
        ResourceState::TransferSrc => "TransferSrc",
        ResourceState::TransferDst => "TransferDst",
        ResourceState::Present => "Present",
    }
}

//
// Resources
//

pub struct TestBuffer {
    id: ResourceId,
    description: BufferDescription,
    data: Mutex<Vec<u8>>,
}

impl TestBuffer {
    pub fn new(description: BufferDescription) -> TestBuffer {
        let size = description.size as usize;
        TestBuffer {
            id: RESOURCE_IDS.allocate(),
            description,
            data: Mutex::new(vec![0; size]),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl BufferResource for TestBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn description(&self) -> &BufferDescription {
        &self.description
    }

    fn memory_requirements(&self) -> MemoryRequirements {
        let host_visible = self.description.usage.contains(BufferUsage::HOST_VISIBLE);
        MemoryRequirements {
            size: self.description.size.max(1),
            alignment: 256,
            memory_type_bits: if host_visible { 0b10 } else { 0b01 },
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

        let mut contents = self.data.lock().unwrap();
        contents[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn device_address(&self) -> u64 {
        0x1000_0000 + self.id.0
    }

    fn srv(&self) -> ResourceView {
        self.view_of(ViewKind::Srv)
    }

    fn uav(&self) -> ResourceView {
        self.view_of(ViewKind::Uav)
    }

    fn cbv(&self) -> ResourceView {
        self.view_of(ViewKind::Cbv)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TestBuffer {
    fn view_of(&self, kind: ViewKind) -> ResourceView {
        ResourceView {
            kind,
            resource: self.id,
            range: ViewRange::Buffer {
                offset: 0,
                size: self.description.size,
            },
            format_override: None,
            raw: self.id.0,
        }
    }
}

static NEXT_VIEW_HANDLE: AtomicU64 = AtomicU64::new(1);

pub struct TestImage {
    id: ResourceId,
    description: ImageDescription,
    views: Mutex<fxhash::FxHashMap<ImageViewDescription, ResourceView>>,
}

impl TestImage {
    pub fn new(description: ImageDescription) -> TestImage {
        TestImage {
            id: RESOURCE_IDS.allocate(),
            description,
            views: Mutex::new(Default::default()),
        }
    }
}

impl ImageResource for TestImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn description(&self) -> &ImageDescription {
        &self.description
    }

    fn memory_requirements(&self) -> MemoryRequirements {
        let texels = self.description.width as u64 * self.description.height as u64;
        let size = texels * self.description.format.texel_size() * self.description.num_layers as u64;

        MemoryRequirements {
            size: size.max(256),
            alignment: 256,
            memory_type_bits: 0b01,
        }
    }

    fn view(&self, description: ImageViewDescription) -> ResourceView {
        let mut views = self.views.lock().unwrap();

        if let Some(view) = views.get(&description) {
            return *view;
        }

        let view = ResourceView {
            kind: description.kind,
            resource: self.id,
            range: ViewRange::Image(description.range),
            format_override: description.format_override,
            raw: NEXT_VIEW_HANDLE.fetch_add(1, Ordering::Relaxed),
        };

        views.insert(description, view);
        view
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestAccelerationStructure {
    id: ResourceId,
    description: AccelerationStructureDescription,
    instances_buffer: Option<Arc<TestBuffer>>,
}

impl TestAccelerationStructure {
    pub fn new(description: AccelerationStructureDescription) -> TestAccelerationStructure {
        let instances_buffer = match &description.geometry {
            AccelerationStructureGeometry::Instances { max_instances, .. } => {
                Some(Arc::new(TestBuffer::new(BufferDescription {
                    name: format!("{}-instances", description.name),
                    size: *max_instances as u64 * 64,
                    stride: 64,
                    usage: BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::HOST_VISIBLE,
                    virtual_resource: false,
                })))
            }
            AccelerationStructureGeometry::Triangles { .. } => None,
        };

        TestAccelerationStructure {
            id: RESOURCE_IDS.allocate(),
            description,
            instances_buffer,
        }
    }
}

impl AccelerationStructure for TestAccelerationStructure {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn description(&self) -> &AccelerationStructureDescription {
        &self.description
    }

    fn build_sizes(&self) -> AccelerationStructureBuildSizes {
        AccelerationStructureBuildSizes {
            acceleration_structure_size: 4096,
            build_scratch_size: 1024,
            update_scratch_size: 512,
        }
    }

    fn instances_buffer(&self) -> Option<Arc<dyn BufferResource>> {
        self.instances_buffer
            .as_ref()
            .map(|buffer| buffer.clone() as Arc<dyn BufferResource>)
    }

    fn device_address(&self) -> u64 {
        0x2000_0000 + self.id.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestFence {
    signalled: AtomicBool,
}

impl TestFence {
    pub fn new(signalled: bool) -> TestFence {
        TestFence {
            signalled: AtomicBool::new(signalled),
        }
    }
}

impl Fence for TestFence {
    fn wait_for(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.signalled.store(false, Ordering::SeqCst);
    }

    fn is_signalled(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestSemaphore;

impl Semaphore for TestSemaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestSampler {
    id: ResourceId,
    description: SamplerDescription,
}

impl SamplerState for TestSampler {
    fn description(&self) -> &SamplerDescription {
        &self.description
    }

    fn raw(&self) -> u64 {
        self.id.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestDescriptorSet {
    layout: DescriptorSetLayoutHandle,
    allocation_type: DescriptorSetAllocationType,
    log: Log,
}

impl DescriptorSet for TestDescriptorSet {
    fn update(&self, writes: &[WriteDescriptor], _array_offset: u32) {
        record(&self.log, format!("update_descriptor_set writes={}", writes.len()));
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

pub struct TestResourceGroup {
    hash: u64,
    layout: DescriptorSetLayoutHandle,
    set: Arc<dyn DescriptorSet>,
}

impl ResourceGroup for TestResourceGroup {
    fn content_hash(&self) -> u64 {
        self.hash
    }

    fn descriptor_set(&self) -> Arc<dyn DescriptorSet> {
        self.set.clone()
    }

    fn layout(&self) -> DescriptorSetLayoutHandle {
        self.layout
    }
}

pub struct TestPipeline {
    pipeline_type: PipelineType,
}

impl Pipeline for TestPipeline {
    fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    fn layout(&self) -> PipelineLayoutHandle {
        PipelineLayoutHandle(0)
    }

    fn shader_binding_table(&self) -> Option<ShaderBindingTable> {
        if self.pipeline_type == PipelineType::RayTracing {
            Some(ShaderBindingTable::default())
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TestFramebuffer {
    description: FramebufferDescription,
}

impl Framebuffer for TestFramebuffer {
    fn description(&self) -> &FramebufferDescription {
        &self.description
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

//
// Allocators
//

pub struct TestBaseAllocator {
    log: Log,
    next_id: u64,
}

impl DeviceMemoryAllocator for TestBaseAllocator {
    fn allocate_buffer(&mut self, buffer: &dyn BufferResource) -> Result<AllocationInfo, AllocationError> {
        let requirements = buffer.memory_requirements();
        record(&self.log, format!("base_allocate_buffer size={}", requirements.size));

        self.next_id += 1;
        Ok(AllocationInfo {
            id: AllocationId(self.next_id),
            offset: 0,
            size: requirements.size,
        })
    }

    fn allocate_image(&mut self, image: &dyn ImageResource) -> Result<AllocationInfo, AllocationError> {
        let requirements = image.memory_requirements();
        record(&self.log, format!("base_allocate_image size={}", requirements.size));

        self.next_id += 1;
        Ok(AllocationInfo {
            id: AllocationId(self.next_id),
            offset: 0,
            size: requirements.size,
        })
    }

    fn mapped_memory(&self, _id: AllocationId) -> Option<*mut u8> {
        None
    }

    fn release(&mut self, _id: AllocationId) -> Result<(), AllocationError> {
        Ok(())
    }
}

pub struct TestAliasedAllocator {
    log: Log,
    name: String,
    plan: AliasedAllocationPlan,
    allocated_size: u64,
}

impl AliasedDeviceMemoryAllocator for TestAliasedAllocator {
    fn stage_buffer(&mut self, buffer: Arc<dyn BufferResource>, offset: u64) -> Result<(), AllocationError> {
        record(
            &self.log,
            format!("stage_buffer name={} offset={}", buffer.name(), offset),
        );
        self.plan.stage(offset, buffer.memory_requirements())
    }

    fn stage_image(&mut self, image: Arc<dyn ImageResource>, offset: u64) -> Result<(), AllocationError> {
        record(
            &self.log,
            format!("stage_image name={} offset={}", image.name(), offset),
        );
        self.plan.stage(offset, image.memory_requirements())
    }

    fn allocate(&mut self) -> Result<(), AllocationError> {
        let layout = self.plan.finalize()?;
        self.allocated_size = layout.size;
        record(
            &self.log,
            format!("aliased_allocate name={} size={}", self.name, layout.size),
        );
        Ok(())
    }

    fn allocated_size(&self) -> u64 {
        self.allocated_size
    }

    fn mapped_memory(&self) -> Option<*mut u8> {
        None
    }
}

//
// Command recorder
//

pub struct TestCommandRecorder {
    log: Log,
    kind: QueueType,
    bound_pipeline: Option<Arc<dyn Pipeline>>,
    bound_group_hashes: Vec<Option<u64>>,
    in_render_pass: bool,
}

impl TestCommandRecorder {
    pub fn new(log: Log, kind: QueueType) -> TestCommandRecorder {
        TestCommandRecorder {
            log,
            kind,
            bound_pipeline: None,
            bound_group_hashes: vec![None; 8],
            in_render_pass: false,
        }
    }
}

fn attachment_line(prefix: &str, attachment: &FramebufferAttachment) -> String {
    format!(
        "{} image={} load={:?} store={:?} initial={} final={} clear=({},{},{},{})",
        prefix,
        attachment.image.name(),
        attachment.load_op,
        attachment.store_op,
        state_name(attachment.initial_state),
        state_name(attachment.final_state),
        attachment.clear_value.x,
        attachment.clear_value.y,
        attachment.clear_value.z,
        attachment.clear_value.w,
    )
}

impl CommandRecorder for TestCommandRecorder {
    fn kind(&self) -> QueueType {
        self.kind
    }

    fn begin(&mut self) {
        record(&self.log, "begin".to_owned());
        self.bound_pipeline = None;
        self.bound_group_hashes = vec![None; 8];
    }

    fn end(&mut self) {
        record(&self.log, "end".to_owned());
        self.bound_pipeline = None;
        self.bound_group_hashes = vec![None; 8];
    }

    fn submit(&mut self, info: &SubmitInfo) -> Result<(), SubmitError> {
        record(
            &self.log,
            format!(
                "submit waits={} signals={} fence={}",
                info.wait_semaphores.len(),
                info.signal_semaphores.len(),
                info.signal_fence.is_some(),
            ),
        );
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) {
        record(&self.log, format!("bind_pipeline kind={:?}", pipeline.pipeline_type()));
        self.bound_pipeline = Some(pipeline.clone());
    }

    fn bind_resource_group(&mut self, group: &Arc<dyn ResourceGroup>, set_index: u32) {
        assert!(self.bound_pipeline.is_some(), "resource group bound without a pipeline");

        let slot = set_index as usize;
        if self.bound_group_hashes[slot] == Some(group.content_hash()) {
            record(&self.log, format!("bind_resource_group set={} elided", set_index));
            return;
        }

        self.bound_group_hashes[slot] = Some(group.content_hash());
        record(&self.log, format!("bind_resource_group set={}", set_index));
    }

    fn bind_descriptor_set(&mut self, _set: &Arc<dyn DescriptorSet>, set_index: u32) {
        record(&self.log, format!("bind_descriptor_set set={}", set_index));
    }

    fn push_constant(&mut self, data: &[u8]) {
        record(&self.log, format!("push_constant size={}", data.len()));
    }

    fn begin_render_pass(&mut self, framebuffer: &Arc<dyn Framebuffer>) {
        assert!(!self.in_render_pass, "nested render pass");
        self.in_render_pass = true;

        let description = framebuffer.description();
        record(
            &self.log,
            format!(
                "begin_render_pass name={} extent={}x{}",
                description.name, description.width, description.height
            ),
        );

        for attachment in &description.color_attachments {
            record(&self.log, attachment_line("attachment-color", attachment));
        }
        if let Some(depth) = &description.depth_stencil_attachment {
            record(&self.log, attachment_line("attachment-depth", depth));
        }
    }

    fn end_render_pass(&mut self) {
        assert!(self.in_render_pass, "end_render_pass without begin");
        self.in_render_pass = false;
        record(&self.log, "end_render_pass".to_owned());
    }

    fn bind_vertex_buffer(&mut self, buffer: &Arc<dyn BufferResource>) {
        record(&self.log, format!("bind_vertex_buffer name={}", buffer.name()));
    }

    fn bind_index_buffer(&mut self, buffer: &Arc<dyn BufferResource>) {
        record(&self.log, format!("bind_index_buffer name={}", buffer.name()));
    }

    fn draw(&mut self, vertex_count: u32) {
        assert!(self.in_render_pass, "draw outside a render pass");
        record(&self.log, format!("draw vertices={}", vertex_count));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        assert!(self.in_render_pass, "draw outside a render pass");
        record(&self.log, format!("draw_indexed indices={}", index_count));
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        assert!(self.in_render_pass, "draw outside a render pass");
        record(
            &self.log,
            format!("draw_instanced vertices={} instances={}", vertex_count, instance_count),
        );
    }

    fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) {
        assert!(self.in_render_pass, "draw outside a render pass");
        record(
            &self.log,
            format!("draw_indexed_instanced indices={} instances={}", index_count, instance_count),
        );
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        record(&self.log, format!("dispatch {}x{}x{}", x, y, z));
    }

    fn trace_rays(&mut self, width: u32, height: u32, depth: u32) {
        record(&self.log, format!("trace_rays {}x{}x{}", width, height, depth));
    }

    fn transition_image(&mut self, image: &Arc<dyn ImageResource>, old: ResourceState, new: ResourceState) {
        if old == new {
            record(&self.log, format!("transition-noop image={}", image.name()));
            return;
        }

        let info = transition_info(old, new).expect("transition must be registered");
        record(
            &self.log,
            format!(
                "transition image={} {}->{} src_stage={:?} dst_stage={:?} src_access={:?} dst_access={:?}",
                image.name(),
                state_name(old),
                state_name(new),
                info.src_stage,
                info.dst_stage,
                info.src_access,
                info.dst_access,
            ),
        );
    }

    fn transition_image_range(
        &mut self,
        image: &Arc<dyn ImageResource>,
        old: ResourceState,
        new: ResourceState,
        _range: ImageViewRange,
    ) {
        self.transition_image(image, old, new);
    }

    fn transition_buffer(&mut self, _buffer: &Arc<dyn BufferResource>, _old: ResourceState, _new: ResourceState) {}

    fn copy_buffer_to_buffer(&mut self, source: &Arc<dyn BufferResource>, destination: &Arc<dyn BufferResource>) {
        assert_eq!(source.size(), destination.size());
        record(
            &self.log,
            format!("copy_buffer src={} dst={}", source.name(), destination.name()),
        );
    }

    fn copy_buffer_to_image(&mut self, source: &Arc<dyn BufferResource>, destination: &Arc<dyn ImageResource>) {
        record(
            &self.log,
            format!("copy_buffer_to_image src={} dst={}", source.name(), destination.name()),
        );
    }

    fn build_bottom_level(&mut self, blas: &Arc<dyn AccelerationStructure>, _scratch: &Arc<dyn BufferResource>) {
        record(
            &self.log,
            format!("build_bottom_level name={}", blas.description().name),
        );
    }

    fn build_top_level(
        &mut self,
        tlas: &Arc<dyn AccelerationStructure>,
        instances: &[AccelerationStructureInstance],
        _scratch: &Arc<dyn BufferResource>,
        mode: AccelerationStructureBuildMode,
    ) {
        record(
            &self.log,
            format!(
                "build_top_level name={} instances={} mode={:?}",
                tlas.description().name,
                instances.len(),
                mode
            ),
        );
    }

    fn begin_gpu_marker(&mut self, label: &str) {
        record(&self.log, format!("marker-begin {}", label));
    }

    fn end_gpu_marker(&mut self) {
        record(&self.log, "marker-end".to_owned());
    }
}

//
// Device
//

impl RenderDevice for TestDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn graphics_api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn shader_registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    fn create_buffer(&self, description: BufferDescription) -> Result<Arc<dyn BufferResource>, ResourceCreationError> {
        record(
            &self.log,
            format!(
                "create_buffer name={} size={} virtual={}",
                description.name, description.size, description.virtual_resource
            ),
        );
        Ok(Arc::new(TestBuffer::new(description)))
    }

    fn create_image(&self, description: ImageDescription) -> Result<Arc<dyn ImageResource>, ResourceCreationError> {
        description.validate()?;
        record(
            &self.log,
            format!(
                "create_image name={} {}x{} virtual={}",
                description.name, description.width, description.height, description.virtual_resource
            ),
        );
        Ok(Arc::new(TestImage::new(description)))
    }

    fn create_sampler(&self, description: SamplerDescription) -> Result<Arc<dyn SamplerState>, ResourceCreationError> {
        Ok(Arc::new(TestSampler {
            id: RESOURCE_IDS.allocate(),
            description,
        }))
    }

    fn create_acceleration_structure(
        &self,
        description: AccelerationStructureDescription,
    ) -> Result<Arc<dyn AccelerationStructure>, ResourceCreationError> {
        record(&self.log, format!("create_acceleration_structure name={}", description.name));
        Ok(Arc::new(TestAccelerationStructure::new(description)))
    }

    fn create_fence(&self, signalled: bool) -> Result<Arc<dyn Fence>, ResourceCreationError> {
        Ok(Arc::new(TestFence::new(signalled)))
    }

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>, ResourceCreationError> {
        Ok(Arc::new(TestSemaphore))
    }

    fn create_base_allocator(&self) -> Box<dyn DeviceMemoryAllocator> {
        Box::new(TestBaseAllocator {
            log: self.log.clone(),
            next_id: 0,
        })
    }

    fn create_aliased_allocator(&self, host_visible: bool, name: &str) -> Box<dyn AliasedDeviceMemoryAllocator> {
        record(
            &self.log,
            format!("create_aliased_allocator name={} host_visible={}", name, host_visible),
        );
        Box::new(TestAliasedAllocator {
            log: self.log.clone(),
            name: name.to_owned(),
            plan: AliasedAllocationPlan::new(),
            allocated_size: 0,
        })
    }

    fn create_command_recorder(&self, kind: QueueType) -> Box<dyn CommandRecorder> {
        Box::new(TestCommandRecorder::new(self.log.clone(), kind))
    }

    fn create_graphics_pipeline(
        &self,
        description: &GraphicsPipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
        record(&self.log, format!("create_graphics_pipeline name={}", description.name));
        Ok(Arc::new(TestPipeline {
            pipeline_type: PipelineType::Graphics,
        }))
    }

    fn create_compute_pipeline(
        &self,
        description: &ComputePipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
        record(&self.log, format!("create_compute_pipeline name={}", description.name));
        Ok(Arc::new(TestPipeline {
            pipeline_type: PipelineType::Compute,
        }))
    }

    fn create_ray_tracing_pipeline(
        &self,
        description: &RayTracingPipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
        record(&self.log, format!("create_ray_tracing_pipeline name={}", description.name));
        Ok(Arc::new(TestPipeline {
            pipeline_type: PipelineType::RayTracing,
        }))
    }

    fn create_framebuffer(
        &self,
        description: FramebufferDescription,
    ) -> Result<Arc<dyn Framebuffer>, ResourceCreationError> {
        description.validate()?;

        // Framebuffers of identical attachment layout share a cached
        // render pass.
        let layout = description.render_pass_layout();
        let mut layouts = self.render_pass_layouts.lock().unwrap();
        if !layouts.contains(&layout) {
            layouts.push(layout);
            record(&self.log, format!("create_render_pass for={}", description.name));
        }

        record(&self.log, format!("create_framebuffer name={}", description.name));
        Ok(Arc::new(TestFramebuffer { description }))
    }

    fn create_resource_group(
        &self,
        description: &ResourceGroupDescription,
    ) -> Result<Arc<dyn ResourceGroup>, ResourceCreationError> {
        let layout = description.layout();
        let (handle, _) = self.layout_cache.lock().unwrap().create(&layout);

        Ok(Arc::new(TestResourceGroup {
            hash: description.content_hash(),
            layout: handle,
            set: Arc::new(TestDescriptorSet {
                layout: handle,
                allocation_type: DescriptorSetAllocationType::Persistent,
                log: self.log.clone(),
            }),
        }))
    }

    fn allocate_transient_descriptor_set(&self, layout: &[DescriptorItem]) -> Arc<dyn DescriptorSet> {
        self.transient_allocations.fetch_add(1, Ordering::SeqCst);

        let description = DescriptorSetLayoutDescription { items: layout.to_vec() };
        let (handle, _) = self.layout_cache.lock().unwrap().create(&description);

        record(&self.log, format!("allocate_transient_set layout={:?}", handle));
        Arc::new(TestDescriptorSet {
            layout: handle,
            allocation_type: DescriptorSetAllocationType::Transient,
            log: self.log.clone(),
        })
    }

    fn allocate_persistent_descriptor_set(&self, layout: &[DescriptorItem]) -> Arc<dyn DescriptorSet> {
        let description = DescriptorSetLayoutDescription { items: layout.to_vec() };
        let (handle, _) = self.layout_cache.lock().unwrap().create(&description);

        Arc::new(TestDescriptorSet {
            layout: handle,
            allocation_type: DescriptorSetAllocationType::Persistent,
            log: self.log.clone(),
        })
    }

    fn allocate_bindless_descriptor_set(&self, item: DescriptorItem, count: u32) -> Arc<dyn DescriptorSet> {
        let description = DescriptorSetLayoutDescription { items: vec![item] };
        let (handle, _) = self.layout_cache.lock().unwrap().create(&description);

        record(&self.log, format!("allocate_bindless_set count={}", count));
        Arc::new(TestDescriptorSet {
            layout: handle,
            allocation_type: DescriptorSetAllocationType::Bindless,
            log: self.log.clone(),
        })
    }

    fn reset_transient_descriptors(&self) {
        record(&self.log, "reset_transient".to_owned());
        self.transient_allocations.store(0, Ordering::SeqCst);
    }

    fn transient_descriptor_allocation_count(&self) -> u32 {
        self.transient_allocations.load(Ordering::SeqCst)
    }

    fn wait_idle(&self) {}
}
