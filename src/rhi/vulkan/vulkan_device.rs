#![allow(unsafe_code)]

//! The Vulkan logical device.
//!
//! `RawDevice` owns the ash handles and everything whose lifetime is the
//! device's: queues, the per-thread command pools, extension loaders.
//! `VulkanDevice` layers the engine-facing factory on top: resource
//! creation, the descriptor manager and the layout / pipeline /
//! render-pass / framebuffer / sampler caches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr;
use ash::vk;
use fxhash::FxHashMap;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::descriptors::{
    DescriptorItem, DescriptorSetLayoutCache, DescriptorSetLayoutDescription, DescriptorSetLayoutHandle,
    PipelineLayoutCache, PipelineLayoutDescription, PipelineLayoutHandle, PushConstantRange,
    ResourceGroupDescription,
};
use crate::rhi::rhi_enums::*;
use crate::rhi::rhi_structs::*;
use crate::rhi::rhi_traits::*;
use crate::rhi::vulkan::vulkan_acceleration_structure::VulkanAccelerationStructure;
use crate::rhi::vulkan::vulkan_buffer::VulkanBuffer;
use crate::rhi::vulkan::vulkan_command_list::VulkanCommandRecorder;
use crate::rhi::vulkan::vulkan_descriptors::{VulkanDescriptorManager, VulkanResourceGroup};
use crate::rhi::vulkan::vulkan_image::VulkanImage;
use crate::rhi::vulkan::vulkan_memory::{VulkanAliasedAllocator, VulkanBaseAllocator};
use crate::rhi::vulkan::vulkan_pipeline::{
    create_compute_pipeline, create_graphics_pipeline, create_ray_tracing_pipeline,
};
use crate::rhi::vulkan::vulkan_renderpass::VulkanFramebuffer;
use crate::rhi::vulkan::vulkan_sampler::VulkanSampler;
use crate::rhi::vulkan::vulkan_sync::{VulkanFence, VulkanSemaphore};
use crate::rhi::vulkan::vulkan_utils::*;
use crate::settings::BindingOffsets;
use crate::shader::ShaderRegistry;

const QUEUE_KIND_COUNT: usize = 3;

fn queue_kind_index(kind: QueueType) -> usize {
    match kind {
        QueueType::Graphics => 0,
        QueueType::Compute => 1,
        QueueType::Transfer => 2,
    }
}

/// Queue family indices selected at device creation.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn get(&self, kind: QueueType) -> u32 {
        match kind {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }
}

/// One thread's command pools, one per queue kind.
struct PoolSlot {
    pools: [vk::CommandPool; QUEUE_KIND_COUNT],
    available: [Vec<vk::CommandBuffer>; QUEUE_KIND_COUNT],
    buffers_in_use: u32,
}

/// Thread-to-pool-slot assignment with a free list. The mutex guards
/// assignment and the free list only; recording into an allocated buffer
/// takes no lock.
#[derive(Default)]
struct ThreadCommandPools {
    slots: Vec<PoolSlot>,
    free_slots: Vec<usize>,
    by_thread: HashMap<ThreadId, usize>,
}

/// The ash handles plus device-lifetime services.
pub struct RawDevice {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
    pub binding_offsets: BindingOffsets,
    pub properties: DeviceProperties,
    pub debug_utils: Option<DebugUtils>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub acceleration_structure_loader: Option<khr::AccelerationStructure>,
    pub ray_tracing_loader: Option<khr::RayTracingPipeline>,

    queues: [Mutex<vk::Queue>; QUEUE_KIND_COUNT],
    thread_command_pools: Mutex<ThreadCommandPools>,
}

impl RawDevice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_families: QueueFamilies,
        binding_offsets: BindingOffsets,
        properties: DeviceProperties,
        debug_utils: Option<DebugUtils>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
        acceleration_structure_loader: Option<khr::AccelerationStructure>,
        ray_tracing_loader: Option<khr::RayTracingPipeline>,
    ) -> RawDevice {
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let graphics = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let compute = unsafe { device.get_device_queue(queue_families.compute, 0) };
        let transfer = unsafe { device.get_device_queue(queue_families.transfer, 0) };

        RawDevice {
            entry,
            instance,
            physical_device,
            device,
            memory_properties,
            queue_families,
            binding_offsets,
            properties,
            debug_utils,
            debug_messenger,
            acceleration_structure_loader,
            ray_tracing_loader,
            queues: [Mutex::new(graphics), Mutex::new(compute), Mutex::new(transfer)],
            thread_command_pools: Mutex::new(ThreadCommandPools::default()),
        }
    }

    /// Finds a memory type matching `filter` and carrying `required`.
    pub fn find_memory_type(&self, filter: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        for index in 0..self.memory_properties.memory_type_count {
            let supported = filter & (1 << index) != 0;
            let satisfies = self.memory_properties.memory_types[index as usize]
                .property_flags
                .contains(required);

            if supported && satisfies {
                return Some(index);
            }
        }

        None
    }

    /// Submits through the per-queue mutex.
    pub fn submit_to_queue(
        &self,
        kind: QueueType,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let queue = self.queues[queue_kind_index(kind)].lock().unwrap();
        unsafe { self.device.queue_submit(*queue, submits, fence) }
    }

    pub fn present_to_queue(
        &self,
        loader: &khr::Swapchain,
        present_info: &vk::PresentInfoKHR,
    ) -> Result<bool, vk::Result> {
        let queue = self.queues[queue_kind_index(QueueType::Graphics)].lock().unwrap();
        unsafe { loader.queue_present(*queue, present_info) }
    }

    /// Allocates a primary command buffer from the calling thread's pool
    /// slot, assigning a slot on the thread's first request.
    pub fn allocate_command_buffer(&self, kind: QueueType) -> vk::CommandBuffer {
        let thread_id = std::thread::current().id();
        let kind_index = queue_kind_index(kind);

        let mut pools = self.thread_command_pools.lock().unwrap();

        let slot_index = match pools.by_thread.get(&thread_id) {
            Some(&index) => index,
            None => {
                let index = match pools.free_slots.pop() {
                    Some(index) => index,
                    None => {
                        let slot = self.create_pool_slot();
                        pools.slots.push(slot);
                        pools.slots.len() - 1
                    }
                };
                pools.by_thread.insert(thread_id, index);
                index
            }
        };

        let slot = &mut pools.slots[slot_index];
        slot.buffers_in_use += 1;

        if let Some(buffer) = slot.available[kind_index].pop() {
            return buffer;
        }

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(slot.pools[kind_index])
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1)
            .build();

        match unsafe { self.device.allocate_command_buffers(&allocate_info) } {
            Ok(mut buffers) => buffers.remove(0),
            Err(error) => render_fatal!(FatalKind::DriverError, "command buffer allocation failed: {:?}", error),
        }
    }

    /// Returns a command buffer to the calling thread's slot; the slot
    /// itself returns to the free list once the thread holds no buffers.
    pub fn free_command_buffer(&self, kind: QueueType, buffer: vk::CommandBuffer) {
        let thread_id = std::thread::current().id();
        let kind_index = queue_kind_index(kind);

        let mut pools = self.thread_command_pools.lock().unwrap();

        let slot_index = match pools.by_thread.get(&thread_id) {
            Some(&index) => index,
            None => {
                log::warn!("command buffer freed from a thread that never allocated one");
                return;
            }
        };

        let slot = &mut pools.slots[slot_index];
        slot.available[kind_index].push(buffer);
        slot.buffers_in_use -= 1;

        if slot.buffers_in_use == 0 {
            pools.by_thread.remove(&thread_id);
            pools.free_slots.push(slot_index);
        }
    }

    fn create_pool_slot(&self) -> PoolSlot {
        let mut pools = [vk::CommandPool::null(); QUEUE_KIND_COUNT];

        for (index, kind) in [QueueType::Graphics, QueueType::Compute, QueueType::Transfer]
            .iter()
            .enumerate()
        {
            let create_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(self.queue_families.get(*kind))
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .build();

            pools[index] = match unsafe { self.device.create_command_pool(&create_info, None) } {
                Ok(pool) => pool,
                Err(error) => render_fatal!(FatalKind::DriverError, "command pool creation failed: {:?}", error),
            };
        }

        PoolSlot {
            pools,
            available: [Vec::new(), Vec::new(), Vec::new()],
            buffers_in_use: 0,
        }
    }

    pub fn wait_idle(&self) {
        if let Err(error) = unsafe { self.device.device_wait_idle() } {
            if error == vk::Result::ERROR_DEVICE_LOST {
                render_fatal!(FatalKind::DeviceLost, "device lost while waiting idle");
            }
        }
    }
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let pools = self.thread_command_pools.lock().unwrap();
            for slot in &pools.slots {
                for pool in &slot.pools {
                    self.device.destroy_command_pool(*pool, None);
                }
            }
            drop(pools);

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

struct LayoutCaches {
    set_cache: DescriptorSetLayoutCache,
    vk_set_layouts: FxHashMap<DescriptorSetLayoutHandle, vk::DescriptorSetLayout>,
    pipeline_cache: PipelineLayoutCache,
    vk_pipeline_layouts: FxHashMap<PipelineLayoutHandle, vk::PipelineLayout>,
}

/// The engine-facing Vulkan device.
pub struct VulkanDevice {
    raw: Arc<RawDevice>,
    registry: Arc<ShaderRegistry>,
    descriptor_manager: VulkanDescriptorManager,
    layout_caches: Mutex<LayoutCaches>,
    pipelines: Mutex<FxHashMap<u64, Arc<dyn Pipeline>>>,
    render_passes: Mutex<FxHashMap<RenderPassLayout, vk::RenderPass>>,
    samplers: Mutex<FxHashMap<SamplerDescription, Arc<VulkanSampler>>>,
}

impl VulkanDevice {
    pub fn new(raw: Arc<RawDevice>, registry: Arc<ShaderRegistry>) -> VulkanDevice {
        let descriptor_manager = VulkanDescriptorManager::new(raw.clone());

        VulkanDevice {
            raw,
            registry,
            descriptor_manager,
            layout_caches: Mutex::new(LayoutCaches {
                set_cache: DescriptorSetLayoutCache::new(),
                vk_set_layouts: FxHashMap::default(),
                pipeline_cache: PipelineLayoutCache::new(),
                vk_pipeline_layouts: FxHashMap::default(),
            }),
            pipelines: Mutex::new(FxHashMap::default()),
            render_passes: Mutex::new(FxHashMap::default()),
            samplers: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn raw(&self) -> &Arc<RawDevice> {
        &self.raw
    }

    pub(crate) fn descriptor_manager(&self) -> &VulkanDescriptorManager {
        &self.descriptor_manager
    }

    /// Backend half of the descriptor-set-layout cache: the stable handle
    /// plus the `VkDescriptorSetLayout` behind it.
    pub(crate) fn get_or_create_set_layout(
        &self,
        description: &DescriptorSetLayoutDescription,
        bindless: bool,
    ) -> (DescriptorSetLayoutHandle, vk::DescriptorSetLayout) {
        let mut caches = self.layout_caches.lock().unwrap();
        let (handle, _) = caches.set_cache.create(description);

        if let Some(layout) = caches.vk_set_layouts.get(&handle) {
            return (handle, *layout);
        }

        let offsets = &self.raw.binding_offsets;

        let mut bindings = Vec::with_capacity(description.items.len());
        let mut binding_flags = Vec::with_capacity(description.items.len());

        for item in &description.items {
            let count = if bindless {
                self.raw.properties.max_bindless_descriptors
            } else {
                item.count
            };

            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(crate::rhi::descriptors::effective_binding(item.binding, item.kind, offsets))
                    .descriptor_type(to_vk_descriptor_type(item.kind))
                    .descriptor_count(count)
                    .stage_flags(to_vk_shader_stages(item.stages))
                    .build(),
            );

            binding_flags.push(if bindless {
                vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                    | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                    | vk::DescriptorBindingFlags::PARTIALLY_BOUND
            } else {
                vk::DescriptorBindingFlags::empty()
            });
        }

        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&binding_flags);

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(if bindless {
                vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
            } else {
                vk::DescriptorSetLayoutCreateFlags::empty()
            })
            .bindings(&bindings)
            .push_next(&mut flags_info);

        let layout = match unsafe { self.raw.device.create_descriptor_set_layout(&create_info, None) } {
            Ok(layout) => layout,
            Err(error) => render_fatal!(FatalKind::DriverError, "descriptor set layout creation failed: {:?}", error),
        };

        caches.vk_set_layouts.insert(handle, layout);
        (handle, layout)
    }

    pub(crate) fn vk_set_layout(&self, handle: DescriptorSetLayoutHandle) -> Option<vk::DescriptorSetLayout> {
        self.layout_caches.lock().unwrap().vk_set_layouts.get(&handle).copied()
    }

    /// Backend half of the pipeline-layout cache.
    pub(crate) fn get_or_create_pipeline_layout(
        &self,
        description: &PipelineLayoutDescription,
    ) -> (PipelineLayoutHandle, vk::PipelineLayout) {
        let mut caches = self.layout_caches.lock().unwrap();
        let (handle, _) = caches.pipeline_cache.create(description);

        if let Some(layout) = caches.vk_pipeline_layouts.get(&handle) {
            return (handle, *layout);
        }

        let mut set_layouts = Vec::with_capacity(description.set_layouts.len());
        for set_handle in &description.set_layouts {
            if set_handle.is_empty_layout() {
                // The reserved empty layout occupies unused set slots.
                let empty = self.empty_set_layout(&mut caches);
                set_layouts.push(empty);
                continue;
            }

            match caches.vk_set_layouts.get(set_handle) {
                Some(layout) => set_layouts.push(*layout),
                None => render_fatal!(
                    FatalKind::Invariant,
                    "pipeline layout references unknown set layout {:?}",
                    set_handle
                ),
            }
        }

        let mut push_constant_ranges = Vec::new();
        if let Some(push_constant) = &description.push_constant {
            push_constant_ranges.push(
                vk::PushConstantRange::builder()
                    .stage_flags(to_vk_shader_stages(push_constant.stages))
                    .offset(0)
                    .size(push_constant.size)
                    .build(),
            );
        }

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges)
            .build();

        let layout = match unsafe { self.raw.device.create_pipeline_layout(&create_info, None) } {
            Ok(layout) => layout,
            Err(error) => render_fatal!(FatalKind::DriverError, "pipeline layout creation failed: {:?}", error),
        };

        caches.vk_pipeline_layouts.insert(handle, layout);
        (handle, layout)
    }

    fn empty_set_layout(&self, caches: &mut LayoutCaches) -> vk::DescriptorSetLayout {
        if let Some(layout) = caches.vk_set_layouts.get(&DescriptorSetLayoutHandle::EMPTY) {
            return *layout;
        }

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().build();
        let layout = match unsafe { self.raw.device.create_descriptor_set_layout(&create_info, None) } {
            Ok(layout) => layout,
            Err(error) => render_fatal!(FatalKind::DriverError, "empty set layout creation failed: {:?}", error),
        };

        caches.vk_set_layouts.insert(DescriptorSetLayoutHandle::EMPTY, layout);
        layout
    }

    pub(crate) fn push_constant_info(&self, handle: PipelineLayoutHandle) -> Option<PushConstantRange> {
        self.layout_caches.lock().unwrap().pipeline_cache.push_constant_info(handle)
    }

    /// Render passes are shared between framebuffers of identical
    /// attachment layout.
    pub(crate) fn get_or_create_render_pass(&self, layout: &RenderPassLayout) -> vk::RenderPass {
        let mut render_passes = self.render_passes.lock().unwrap();

        if let Some(render_pass) = render_passes.get(layout) {
            return *render_pass;
        }

        let render_pass = crate::rhi::vulkan::vulkan_renderpass::create_render_pass(&self.raw, layout);
        render_passes.insert(layout.clone(), render_pass);
        render_pass
    }

    pub(crate) fn registry(&self) -> &Arc<ShaderRegistry> {
        &self.registry
    }
}

impl RenderDevice for VulkanDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.raw.properties
    }

    fn graphics_api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn shader_registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    fn create_buffer(&self, description: BufferDescription) -> Result<Arc<dyn BufferResource>, ResourceCreationError> {
        Ok(Arc::new(VulkanBuffer::new(self.raw.clone(), description)?))
    }

    fn create_image(&self, description: ImageDescription) -> Result<Arc<dyn ImageResource>, ResourceCreationError> {
        description.validate()?;
        Ok(Arc::new(VulkanImage::new(self.raw.clone(), description)?))
    }

    fn create_sampler(&self, description: SamplerDescription) -> Result<Arc<dyn SamplerState>, ResourceCreationError> {
        let mut samplers = self.samplers.lock().unwrap();

        if let Some(sampler) = samplers.get(&description) {
            return Ok(sampler.clone());
        }

        let sampler = Arc::new(VulkanSampler::new(self.raw.clone(), description)?);
        samplers.insert(description, sampler.clone());
        Ok(sampler)
    }

    fn create_acceleration_structure(
        &self,
        description: AccelerationStructureDescription,
    ) -> Result<Arc<dyn AccelerationStructure>, ResourceCreationError> {
        if !self.raw.properties.supports_ray_tracing {
            return Err(ResourceCreationError::FeatureNotAvailable(
                "ray tracing extensions are not present".to_owned(),
            ));
        }

        Ok(Arc::new(VulkanAccelerationStructure::new(self.raw.clone(), description)?))
    }

    fn create_fence(&self, signalled: bool) -> Result<Arc<dyn Fence>, ResourceCreationError> {
        VulkanFence::new(self.raw.clone(), signalled)
            .map(|fence| Arc::new(fence) as Arc<dyn Fence>)
            .map_err(map_oom)
    }

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>, ResourceCreationError> {
        VulkanSemaphore::new(self.raw.clone())
            .map(|semaphore| Arc::new(semaphore) as Arc<dyn Semaphore>)
            .map_err(map_oom)
    }

    fn create_base_allocator(&self) -> Box<dyn DeviceMemoryAllocator> {
        Box::new(VulkanBaseAllocator::new(self.raw.clone()))
    }

    fn create_aliased_allocator(&self, host_visible: bool, name: &str) -> Box<dyn AliasedDeviceMemoryAllocator> {
        Box::new(VulkanAliasedAllocator::new(self.raw.clone(), host_visible, name))
    }

    fn create_command_recorder(&self, kind: QueueType) -> Box<dyn CommandRecorder> {
        Box::new(VulkanCommandRecorder::new(self.raw.clone(), kind))
    }

    fn create_graphics_pipeline(
        &self,
        description: &GraphicsPipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
        let key = description.content_hash();
        if let Some(pipeline) = self.pipelines.lock().unwrap().get(&key) {
            return Ok(pipeline.clone());
        }

        let pipeline = create_graphics_pipeline(self, description)?;
        self.pipelines.lock().unwrap().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn create_compute_pipeline(
        &self,
        description: &ComputePipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
        let key = description.content_hash();
        if let Some(pipeline) = self.pipelines.lock().unwrap().get(&key) {
            return Ok(pipeline.clone());
        }

        let pipeline = create_compute_pipeline(self, description)?;
        self.pipelines.lock().unwrap().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn create_ray_tracing_pipeline(
        &self,
        description: &RayTracingPipelineDescription,
    ) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
        if !self.raw.properties.supports_ray_tracing {
            return Err(PipelineCreationError::FeatureNotAvailable(
                "ray tracing extensions are not present".to_owned(),
            ));
        }

        let key = description.content_hash();
        if let Some(pipeline) = self.pipelines.lock().unwrap().get(&key) {
            return Ok(pipeline.clone());
        }

        let pipeline = create_ray_tracing_pipeline(self, description)?;
        self.pipelines.lock().unwrap().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn create_framebuffer(
        &self,
        description: FramebufferDescription,
    ) -> Result<Arc<dyn Framebuffer>, ResourceCreationError> {
        description.validate()?;

        let render_pass = self.get_or_create_render_pass(&description.render_pass_layout());
        Ok(Arc::new(VulkanFramebuffer::new(self.raw.clone(), description, render_pass)?))
    }

    fn create_resource_group(
        &self,
        description: &ResourceGroupDescription,
    ) -> Result<Arc<dyn ResourceGroup>, ResourceCreationError> {
        Ok(Arc::new(VulkanResourceGroup::new(self, description)))
    }

    fn allocate_transient_descriptor_set(&self, layout: &[DescriptorItem]) -> Arc<dyn DescriptorSet> {
        let description = DescriptorSetLayoutDescription { items: layout.to_vec() };
        let (handle, vk_layout) = self.get_or_create_set_layout(&description, false);
        self.descriptor_manager.allocate_transient(handle, vk_layout)
    }

    fn allocate_persistent_descriptor_set(&self, layout: &[DescriptorItem]) -> Arc<dyn DescriptorSet> {
        let description = DescriptorSetLayoutDescription { items: layout.to_vec() };
        let (handle, vk_layout) = self.get_or_create_set_layout(&description, false);
        self.descriptor_manager.allocate_persistent(handle, vk_layout)
    }

    fn allocate_bindless_descriptor_set(&self, item: DescriptorItem, count: u32) -> Arc<dyn DescriptorSet> {
        let description = DescriptorSetLayoutDescription { items: vec![item] };
        let (handle, vk_layout) = self.get_or_create_set_layout(&description, true);
        self.descriptor_manager.allocate_bindless(handle, vk_layout, count)
    }

    fn reset_transient_descriptors(&self) {
        self.descriptor_manager.reset_transient();
    }

    fn transient_descriptor_allocation_count(&self) -> u32 {
        self.descriptor_manager.transient_allocation_count()
    }

    fn wait_idle(&self) {
        self.raw.wait_idle();
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw.device.device_wait_idle();

            let caches = self.layout_caches.lock().unwrap();
            for layout in caches.vk_pipeline_layouts.values() {
                self.raw.device.destroy_pipeline_layout(*layout, None);
            }
            for layout in caches.vk_set_layouts.values() {
                self.raw.device.destroy_descriptor_set_layout(*layout, None);
            }
            drop(caches);

            for render_pass in self.render_passes.lock().unwrap().values() {
                self.raw.device.destroy_render_pass(*render_pass, None);
            }
        }
    }
}

fn map_oom(error: vk::Result) -> ResourceCreationError {
    match error {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => ResourceCreationError::OutOfHostMemory,
        _ => ResourceCreationError::OutOfDeviceMemory,
    }
}
