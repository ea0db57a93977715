#![allow(unsafe_code)]

//! Graphics, compute and ray-tracing pipelines.
//!
//! Pipelines are constructed from descriptions and cached by content hash
//! in the device; this module builds the native objects. Pipeline layouts
//! come out of the reflected shader signatures, so a pass never declares
//! set layouts by hand.

use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::core::align;
use crate::rhi::descriptors::{PipelineLayoutDescription, PipelineLayoutHandle, PushConstantRange};
use crate::rhi::rhi_enums::{BufferUsage, PipelineCreationError, PipelineType, ResourceState};
use crate::rhi::rhi_structs::*;
use crate::rhi::rhi_traits::{BufferResource, Pipeline};
use crate::rhi::vulkan::vulkan_buffer::VulkanBuffer;
use crate::rhi::vulkan::vulkan_device::{RawDevice, VulkanDevice};
use crate::rhi::vulkan::vulkan_utils::*;
use crate::shader::{ShaderHandle, ShaderModule};

pub struct VulkanPipeline {
    raw: Arc<RawDevice>,
    handle: vk::Pipeline,
    pipeline_type: PipelineType,
    layout_handle: PipelineLayoutHandle,
    vk_layout: vk::PipelineLayout,
    push_constant: Option<PushConstantRange>,
    shader_binding_table: Option<ShaderBindingTable>,
    /// Keeps the SBT storage alive as long as the pipeline.
    _shader_binding_table_buffer: Option<Arc<VulkanBuffer>>,
}

impl VulkanPipeline {
    pub fn vk_handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn vk_layout(&self) -> vk::PipelineLayout {
        self.vk_layout
    }

    pub fn push_constant(&self) -> Option<PushConstantRange> {
        self.push_constant
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self.pipeline_type {
            PipelineType::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineType::Compute => vk::PipelineBindPoint::COMPUTE,
            PipelineType::RayTracing => vk::PipelineBindPoint::RAY_TRACING_KHR,
        }
    }
}

impl Pipeline for VulkanPipeline {
    fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    fn layout(&self) -> PipelineLayoutHandle {
        self.layout_handle
    }

    fn shader_binding_table(&self) -> Option<ShaderBindingTable> {
        self.shader_binding_table
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        // The layout belongs to the device cache.
        unsafe { self.raw.device.destroy_pipeline(self.handle, None) };
    }
}

fn resolve_shader(device: &VulkanDevice, function: &ShaderFunction) -> Result<ShaderModule, PipelineCreationError> {
    device
        .registry()
        .get(function.shader)
        .ok_or(PipelineCreationError::UnknownShader)
}

fn create_shader_module(raw: &RawDevice, module: &ShaderModule) -> Result<vk::ShaderModule, PipelineCreationError> {
    if module.bytecode.is_empty() {
        return Err(PipelineCreationError::InvalidShader);
    }

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&module.bytecode);
    unsafe { raw.device.create_shader_module(&create_info, None) }.map_err(|_| PipelineCreationError::OutOfMemory)
}

/// Derives the pipeline layout from the reflected signatures of `shaders`.
fn build_pipeline_layout(
    device: &VulkanDevice,
    shaders: &[ShaderHandle],
) -> (PipelineLayoutHandle, vk::PipelineLayout, Option<PushConstantRange>) {
    let set_descriptions = device.registry().merged_set_layouts(shaders);
    let push_constant = device.registry().merged_push_constant(shaders);

    let set_layouts = set_descriptions
        .iter()
        .map(|description| device.get_or_create_set_layout(description, false).0)
        .collect();

    let layout_description = PipelineLayoutDescription {
        set_layouts,
        push_constant,
    };

    let (handle, vk_layout) = device.get_or_create_pipeline_layout(&layout_description);
    (handle, vk_layout, push_constant)
}

/// A render pass only used for pipeline compatibility: same formats, ops
/// irrelevant.
fn compatibility_render_pass(device: &VulkanDevice, target: &FramebufferSignature) -> vk::RenderPass {
    let mut attachments: Vec<AttachmentLayout> = target
        .color_formats
        .iter()
        .map(|format| AttachmentLayout {
            format: *format,
            load_op: crate::rhi::rhi_enums::LoadOperation::DontCare,
            store_op: crate::rhi::rhi_enums::StoreOperation::DontCare,
            initial_state: ResourceState::ColorAttachment,
            final_state: ResourceState::ColorAttachment,
            is_depth: false,
        })
        .collect();

    if let Some(depth_format) = target.depth_format {
        attachments.push(AttachmentLayout {
            format: depth_format,
            load_op: crate::rhi::rhi_enums::LoadOperation::DontCare,
            store_op: crate::rhi::rhi_enums::StoreOperation::DontCare,
            initial_state: ResourceState::DepthStencilAttachment,
            final_state: ResourceState::DepthStencilAttachment,
            is_depth: true,
        });
    }

    device.get_or_create_render_pass(&RenderPassLayout { attachments })
}

pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    description: &GraphicsPipelineDescription,
) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
    let raw = device.raw().clone();

    let vertex_module = resolve_shader(device, &description.vertex)?;
    let fragment_module = resolve_shader(device, &description.fragment)?;

    if !vertex_module
        .signature
        .stage
        .contains(crate::rhi::rhi_enums::ShaderStageFlags::VERTEX)
    {
        return Err(PipelineCreationError::MissingShaderStage("vertex".to_owned()));
    }
    if !fragment_module
        .signature
        .stage
        .contains(crate::rhi::rhi_enums::ShaderStageFlags::FRAGMENT)
    {
        return Err(PipelineCreationError::MissingShaderStage("fragment".to_owned()));
    }

    let (layout_handle, vk_layout, push_constant) =
        build_pipeline_layout(device, &[description.vertex.shader, description.fragment.shader]);

    let vertex_shader = create_shader_module(&raw, &vertex_module)?;
    let fragment_shader = create_shader_module(&raw, &fragment_module)?;

    let vertex_entry = CString::new(description.vertex.entry_point.as_str()).unwrap();
    let fragment_entry = CString::new(description.fragment.entry_point.as_str()).unwrap();

    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader)
            .name(&vertex_entry)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_shader)
            .name(&fragment_entry)
            .build(),
    ];

    // Vertex input layout straight from the reflected attributes: one
    // tightly packed binding.
    let mut attribute_descriptions = Vec::new();
    let mut attribute_offset = 0u32;
    for attribute in &vertex_module.signature.vertex_inputs {
        attribute_descriptions.push(vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: 0,
            format: to_vk_format(attribute.format),
            offset: attribute_offset,
        });
        attribute_offset += attribute.format.texel_size() as u32;
    }

    let binding_descriptions = if attribute_descriptions.is_empty() {
        Vec::new()
    } else {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: attribute_offset,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    };

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = &description.rasterization;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(to_vk_polygon_mode(rasterization.polygon_mode))
        .cull_mode(to_vk_cull_mode(rasterization.cull_mode))
        .front_face(to_vk_front_face(rasterization.front_face))
        .depth_bias_enable(rasterization.depth_bias.enabled)
        .depth_bias_constant_factor(rasterization.depth_bias.constant_factor)
        .depth_bias_clamp(rasterization.depth_bias.clamp)
        .depth_bias_slope_factor(rasterization.depth_bias.slope_factor)
        .line_width(1.0);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = &description.depth_stencil;
    let stencil_op = vk::StencilOpState {
        fail_op: to_vk_stencil_op(depth_stencil.stencil.fail_op),
        pass_op: to_vk_stencil_op(depth_stencil.stencil.pass_op),
        depth_fail_op: to_vk_stencil_op(depth_stencil.stencil.depth_fail_op),
        compare_op: to_vk_compare_op(depth_stencil.stencil.compare_op),
        compare_mask: !0,
        write_mask: !0,
        reference: 0,
    };
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(depth_stencil.depth_test)
        .depth_write_enable(depth_stencil.depth_write)
        .depth_compare_op(to_vk_compare_op(depth_stencil.depth_compare_op))
        .depth_bounds_test_enable(depth_stencil.depth_bounds_test)
        .min_depth_bounds(depth_stencil.min_depth_bounds)
        .max_depth_bounds(depth_stencil.max_depth_bounds)
        .stencil_test_enable(depth_stencil.stencil.enabled)
        .front(stencil_op)
        .back(stencil_op);

    // An empty per-attachment list means default blending everywhere.
    let blend = &description.color_blend;
    let attachment_blends: Vec<ColorAttachmentBlend> = if blend.attachments.is_empty() {
        vec![ColorAttachmentBlend::default(); description.target.color_formats.len()]
    } else {
        blend.attachments.clone()
    };

    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = attachment_blends
        .iter()
        .map(|state| {
            vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(state.blend_enabled)
                .src_color_blend_factor(to_vk_blend_factor(state.src_color_factor))
                .dst_color_blend_factor(to_vk_blend_factor(state.dst_color_factor))
                .color_blend_op(to_vk_blend_op(state.color_op))
                .src_alpha_blend_factor(to_vk_blend_factor(state.src_alpha_factor))
                .dst_alpha_blend_factor(to_vk_blend_factor(state.dst_alpha_factor))
                .alpha_blend_op(to_vk_blend_op(state.alpha_op))
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .build()
        })
        .collect();

    let mut color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .attachments(&blend_attachments)
        .blend_constants(blend.blend_constants);
    if let Some(logic_op) = blend.logic_op {
        color_blend_state = color_blend_state.logic_op_enable(true).logic_op(to_vk_logic_op(logic_op));
    }

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let render_pass = compatibility_render_pass(device, &description.target);

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(vk_layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let result = unsafe {
        raw.device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    };

    unsafe {
        raw.device.destroy_shader_module(vertex_shader, None);
        raw.device.destroy_shader_module(fragment_shader, None);
    }

    let handle = match result {
        Ok(pipelines) => pipelines[0],
        Err(_) => return Err(PipelineCreationError::InvalidShader),
    };

    Ok(Arc::new(VulkanPipeline {
        raw,
        handle,
        pipeline_type: PipelineType::Graphics,
        layout_handle,
        vk_layout,
        push_constant,
        shader_binding_table: None,
        _shader_binding_table_buffer: None,
    }))
}

pub fn create_compute_pipeline(
    device: &VulkanDevice,
    description: &ComputePipelineDescription,
) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
    let raw = device.raw().clone();
    let module = resolve_shader(device, &description.shader)?;

    let (layout_handle, vk_layout, push_constant) = build_pipeline_layout(device, &[description.shader.shader]);

    let shader = create_shader_module(&raw, &module)?;
    let entry = CString::new(description.shader.entry_point.as_str()).unwrap();

    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader)
        .name(&entry)
        .build();

    let create_info = vk::ComputePipelineCreateInfo::builder()
        .stage(stage)
        .layout(vk_layout)
        .build();

    let result = unsafe {
        raw.device
            .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    };

    unsafe { raw.device.destroy_shader_module(shader, None) };

    let handle = match result {
        Ok(pipelines) => pipelines[0],
        Err(_) => return Err(PipelineCreationError::InvalidShader),
    };

    Ok(Arc::new(VulkanPipeline {
        raw,
        handle,
        pipeline_type: PipelineType::Compute,
        layout_handle,
        vk_layout,
        push_constant,
        shader_binding_table: None,
        _shader_binding_table_buffer: None,
    }))
}

pub fn create_ray_tracing_pipeline(
    device: &VulkanDevice,
    description: &RayTracingPipelineDescription,
) -> Result<Arc<dyn Pipeline>, PipelineCreationError> {
    let raw = device.raw().clone();
    let loader = match &raw.ray_tracing_loader {
        Some(loader) => loader.clone(),
        None => {
            return Err(PipelineCreationError::FeatureNotAvailable(
                "ray tracing pipeline extension missing".to_owned(),
            ))
        }
    };

    let mut shader_handles = vec![description.raygen.shader];
    shader_handles.extend(description.miss.iter().map(|function| function.shader));
    shader_handles.extend(description.hit_groups.iter().map(|group| group.closest_hit.shader));

    let (layout_handle, vk_layout, push_constant) = build_pipeline_layout(device, &shader_handles);

    // Stage order: raygen, misses, closest hits. Groups index into it.
    let mut modules = Vec::new();
    let mut entries = Vec::new();
    let mut stages = Vec::new();
    let mut groups = Vec::new();

    let mut push_stage = |function: &ShaderFunction,
                          stage: vk::ShaderStageFlags,
                          modules: &mut Vec<vk::ShaderModule>,
                          entries: &mut Vec<CString>|
     -> Result<u32, PipelineCreationError> {
        let module = resolve_shader(device, function)?;
        let shader = create_shader_module(&raw, &module)?;
        modules.push(shader);
        entries.push(CString::new(function.entry_point.as_str()).unwrap());

        let index = modules.len() - 1;
        stages.push((stage, index));
        Ok(index as u32)
    };

    let raygen_index = push_stage(
        &description.raygen,
        vk::ShaderStageFlags::RAYGEN_KHR,
        &mut modules,
        &mut entries,
    )?;
    groups.push(
        vk::RayTracingShaderGroupCreateInfoKHR::builder()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(raygen_index)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
            .build(),
    );

    for miss in &description.miss {
        let index = push_stage(miss, vk::ShaderStageFlags::MISS_KHR, &mut modules, &mut entries)?;
        groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(index)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
        );
    }

    for group in &description.hit_groups {
        let index = push_stage(
            &group.closest_hit,
            vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            &mut modules,
            &mut entries,
        )?;
        groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(index)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
        );
    }

    let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages
        .iter()
        .map(|(stage, index)| {
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(*stage)
                .module(modules[*index])
                .name(&entries[*index])
                .build()
        })
        .collect();

    let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
        .stages(&stage_infos)
        .groups(&groups)
        .max_pipeline_ray_recursion_depth(description.max_recursion_depth)
        .layout(vk_layout)
        .build();

    let result = unsafe {
        loader.create_ray_tracing_pipelines(
            vk::DeferredOperationKHR::null(),
            vk::PipelineCache::null(),
            &[create_info],
            None,
        )
    };

    for module in &modules {
        unsafe { raw.device.destroy_shader_module(*module, None) };
    }

    let handle = match result {
        Ok(pipelines) => pipelines[0],
        Err(_) => return Err(PipelineCreationError::InvalidShader),
    };

    let (shader_binding_table, sbt_buffer) = build_shader_binding_table(
        &raw,
        &loader,
        handle,
        1,
        description.miss.len() as u32,
        description.hit_groups.len() as u32,
    )?;

    Ok(Arc::new(VulkanPipeline {
        raw,
        handle,
        pipeline_type: PipelineType::RayTracing,
        layout_handle,
        vk_layout,
        push_constant,
        shader_binding_table: Some(shader_binding_table),
        _shader_binding_table_buffer: Some(sbt_buffer),
    }))
}

/// Lays out raygen / miss / hit record ranges per the device's handle
/// size and alignment rules and uploads the group handles.
fn build_shader_binding_table(
    raw: &Arc<RawDevice>,
    loader: &ash::extensions::khr::RayTracingPipeline,
    pipeline: vk::Pipeline,
    raygen_count: u32,
    miss_count: u32,
    hit_count: u32,
) -> Result<(ShaderBindingTable, Arc<VulkanBuffer>), PipelineCreationError> {
    let properties = &raw.properties;
    let handle_size = properties.shader_group_handle_size as u64;
    let handle_stride = align(handle_size, properties.shader_group_handle_alignment as u64);
    let base_alignment = properties.shader_group_base_alignment as u64;

    let group_count = raygen_count + miss_count + hit_count;

    let raygen_size = align(raygen_count as u64 * handle_stride, base_alignment);
    let miss_size = align(miss_count as u64 * handle_stride, base_alignment);
    let hit_size = align(hit_count as u64 * handle_stride, base_alignment);
    let total_size = raygen_size + miss_size + hit_size;

    let handles = unsafe {
        loader.get_ray_tracing_shader_group_handles(
            pipeline,
            0,
            group_count,
            (group_count as u64 * handle_size) as usize,
        )
    }
    .map_err(|_| PipelineCreationError::OutOfMemory)?;

    let buffer = Arc::new(
        VulkanBuffer::new(
            raw.clone(),
            BufferDescription {
                name: "shader-binding-table".to_owned(),
                size: total_size,
                stride: handle_stride,
                usage: BufferUsage::SHADER_BINDING_TABLE | BufferUsage::HOST_VISIBLE,
                virtual_resource: false,
            },
        )
        .map_err(|_| PipelineCreationError::OutOfMemory)?,
    );

    // Records are packed per class at their class's base offset.
    let mut staging = vec![0u8; total_size as usize];
    let class_offsets = [0, raygen_size, raygen_size + miss_size];
    let class_counts = [raygen_count as u64, miss_count as u64, hit_count as u64];

    let mut group_index = 0u64;
    for (class, &count) in class_counts.iter().enumerate() {
        for record in 0..count {
            let src_offset = (group_index * handle_size) as usize;
            let dst_offset = (class_offsets[class] + record * handle_stride) as usize;
            staging[dst_offset..dst_offset + handle_size as usize]
                .copy_from_slice(&handles[src_offset..src_offset + handle_size as usize]);
            group_index += 1;
        }
    }

    buffer
        .set_data(&staging, 0)
        .map_err(|_| PipelineCreationError::OutOfMemory)?;

    let base_address = buffer.device_address();

    let region = |offset: u64, size: u64, count: u64| StridedRegion {
        device_address: if count == 0 { 0 } else { base_address + offset },
        stride: handle_stride,
        size,
    };

    let table = ShaderBindingTable {
        raygen: StridedRegion {
            device_address: base_address,
            // The raygen record's stride must equal its size.
            stride: raygen_size,
            size: raygen_size,
        },
        miss: region(raygen_size, miss_size, miss_count as u64),
        hit: region(raygen_size + miss_size, hit_size, hit_count as u64),
        callable: StridedRegion::default(),
    };

    Ok((table, buffer))
}
