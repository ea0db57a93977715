//! Materialization and execution of a compiled render graph.
//!
//! `RenderGraph::build` turns a builder plus a device into concrete
//! resources: transient images and buffers placed in aliased memory,
//! framebuffers with their derived operations, pipelines out of the
//! device's caches, and per-pass descriptor plans. `execute` records the
//! whole frame into one command recorder and submits it once.

use std::sync::Arc;

use crate::core::diagnostics::FatalKind;
use crate::core::handle::SecondaryMap;
use crate::render_fatal;
use crate::render_graph::builder::*;
use crate::render_graph::compiler::{self, PlannedStep, RenderGraphPlan};
use crate::render_graph::handles::*;
use crate::render_graph::resources::PassResources;
use crate::rhi::allocator::{assign_aliased_offsets, AliasInterval};
use crate::rhi::descriptors::{DescriptorItem, DescriptorValue, WriteDescriptor};
use crate::rhi::rhi_enums::{BufferUsage, ResourceState, ViewKind};
use crate::rhi::rhi_structs::{
    BufferDescription, ComputePipelineDescription, FramebufferAttachment, FramebufferDescription,
    FramebufferSignature, GraphicsPipelineDescription, HitGroup, ImageDescription, RayTracingPipelineDescription,
    SubmitInfo,
};
use crate::rhi::rhi_traits::{
    AliasedDeviceMemoryAllocator, CommandRecorder, Framebuffer, ImageResource, Pipeline, RenderDevice,
    ResourceGroup,
};
use crate::rhi::SubmitError;

pub use crate::render_graph::compiler::RenderGraphError;

struct MaterializedSet {
    set_index: u32,
    items: Vec<DescriptorItem>,
    writes: Vec<WriteDescriptor>,
}

enum ExecutablePassKind {
    Raster {
        framebuffer: Arc<dyn Framebuffer>,
        pipeline: Option<Arc<dyn Pipeline>>,
    },
    Compute {
        pipeline: Option<Arc<dyn Pipeline>>,
    },
    RayTracing {
        pipeline: Option<Arc<dyn Pipeline>>,
    },
    Immediate,
}

struct ExecutablePass {
    name: String,
    kind: ExecutablePassKind,
    sets: Vec<MaterializedSet>,
    groups: Vec<(u32, Arc<dyn ResourceGroup>)>,
    callback: RGCallback,
}

enum ExecutableStep {
    Pass(ExecutablePass),
    Transition {
        image: Arc<dyn ImageResource>,
        old: ResourceState,
        new: ResourceState,
    },
}

/// A compiled frame, ready to record and submit.
pub struct RenderGraph {
    device: Arc<dyn RenderDevice>,
    steps: Vec<ExecutableStep>,
    resources: PassResources,
    /// Aliased blocks backing the transient resources; dropped with the
    /// graph.
    _aliased_allocators: Vec<Box<dyn AliasedDeviceMemoryAllocator>>,
}

impl RenderGraph {
    /// Compiles and materializes `builder` for `device`.
    pub fn build(device: Arc<dyn RenderDevice>, builder: RenderGraphBuilder) -> Result<RenderGraph, RenderGraphError> {
        let plan = compiler::plan(&builder, device.shader_registry())?;
        materialize(device, builder, plan)
    }

    /// Records every compiled step into `command` and submits once.
    ///
    /// The transient descriptor sets allocated here stay valid until the
    /// caller observes `submit_info.signal_fence` and resets the device's
    /// transient descriptors. A graph must not be executed concurrently
    /// with itself.
    pub fn execute(&self, command: &mut dyn CommandRecorder, submit_info: &SubmitInfo) -> Result<(), SubmitError> {
        command.begin();

        for step in &self.steps {
            match step {
                ExecutableStep::Transition { image, old, new } => {
                    command.transition_image(image, *old, *new);
                }
                ExecutableStep::Pass(pass) => self.execute_pass(command, pass),
            }
        }

        command.end();
        command.submit(submit_info)
    }

    fn execute_pass(&self, command: &mut dyn CommandRecorder, pass: &ExecutablePass) {
        command.begin_gpu_marker(&pass.name);

        match &pass.kind {
            ExecutablePassKind::Raster { framebuffer, pipeline } => {
                command.begin_render_pass(framebuffer);
                self.bind_pass_inputs(command, pass, pipeline.as_ref());
                (pass.callback)(command, &self.resources);
                command.end_render_pass();
            }
            ExecutablePassKind::Compute { pipeline } | ExecutablePassKind::RayTracing { pipeline } => {
                self.bind_pass_inputs(command, pass, pipeline.as_ref());
                (pass.callback)(command, &self.resources);
            }
            ExecutablePassKind::Immediate => {
                (pass.callback)(command, &self.resources);
            }
        }

        command.end_gpu_marker();
    }

    fn bind_pass_inputs(
        &self,
        command: &mut dyn CommandRecorder,
        pass: &ExecutablePass,
        pipeline: Option<&Arc<dyn Pipeline>>,
    ) {
        let pipeline = match pipeline {
            Some(pipeline) => pipeline,
            // The callback selects its own pipeline; declared resource
            // groups are reachable through `PassResources` instead.
            None => return,
        };

        command.bind_pipeline(pipeline);

        for set in &pass.sets {
            let descriptor_set = self.device.allocate_transient_descriptor_set(&set.items);
            descriptor_set.update(&set.writes, 0);
            command.bind_descriptor_set(&descriptor_set, set.set_index);
        }

        for (set_index, group) in &pass.groups {
            command.bind_resource_group(group, *set_index);
        }
    }
}

fn materialize(
    device: Arc<dyn RenderDevice>,
    builder: RenderGraphBuilder,
    plan: RenderGraphPlan,
) -> Result<RenderGraph, RenderGraphError> {
    let RenderGraphBuilder {
        buffers: buffer_decls,
        images: image_decls,
        cubemaps: cubemap_decls,
        acceleration_structures: acceleration_structure_decls,
        image_views: image_view_decls,
        buffer_views: buffer_view_decls,
        framebuffers: framebuffer_decls,
        resource_groups: resource_group_decls,
        passes: pass_decls,
    } = builder;

    let mut images: SecondaryMap<RGImageRef, Arc<dyn ImageResource>> = SecondaryMap::new();
    let mut buffers: SecondaryMap<RGBufferRef, Arc<dyn crate::rhi::rhi_traits::BufferResource>> = SecondaryMap::new();

    // Externals are borrowed for the frame, transients are created here.
    // Aliased candidates are created virtual and placed below; everything
    // else gets its own allocation at creation.
    let aliased_image_set: std::collections::HashSet<RGImageRef> =
        plan.aliased_images.iter().map(|span| span.resource).collect();
    let aliased_buffer_set: std::collections::HashSet<RGBufferRef> =
        plan.aliased_buffers.iter().map(|span| span.resource).collect();

    for (key, decl) in image_decls.iter() {
        match decl {
            RGImageDecl::External { image, .. } => {
                images.insert(key, image.clone());
            }
            RGImageDecl::Transient { description } => {
                if plan.dropped_images.contains(&key) {
                    continue;
                }

                let usage = plan.image_usage_bits[key];
                let image = device.create_image(ImageDescription {
                    name: description.name.clone(),
                    image_type: description.image_type,
                    format: description.format,
                    width: description.width,
                    height: description.height,
                    depth: 1,
                    num_mips: description.num_mips,
                    num_layers: description.num_layers,
                    usage,
                    virtual_resource: aliased_image_set.contains(&key),
                })?;
                images.insert(key, image);
            }
        }
    }

    let mut pending_uploads: Vec<(RGBufferRef, Vec<u8>)> = Vec::new();

    for (key, decl) in buffer_decls.iter() {
        match decl {
            RGBufferDecl::External { buffer } => {
                buffers.insert(key, buffer.clone());
            }
            RGBufferDecl::Transient {
                description,
                initial_data,
            } => {
                if plan.dropped_buffers.contains(&key) {
                    continue;
                }

                let usage = plan.buffer_usage_bits[key];
                let buffer = device.create_buffer(BufferDescription {
                    name: description.name.clone(),
                    size: description.size,
                    stride: description.stride,
                    usage,
                    virtual_resource: aliased_buffer_set.contains(&key),
                })?;
                buffers.insert(key, buffer);

                if let Some(data) = initial_data {
                    pending_uploads.push((key, data.clone()));
                }
            }
        }
    }

    // Aliased placement: one device-local block for images and device
    // buffers, one host-visible block for upload buffers.
    let mut aliased_allocators = Vec::new();
    {
        let mut device_local_intervals = Vec::new();
        let mut device_local_targets: Vec<AliasTarget<'_>> = Vec::new();
        let mut host_intervals = Vec::new();
        let mut host_targets: Vec<AliasTarget<'_>> = Vec::new();

        enum AliasTarget<'a> {
            Image(&'a Arc<dyn ImageResource>),
            Buffer(&'a Arc<dyn crate::rhi::rhi_traits::BufferResource>),
        }

        for span in &plan.aliased_images {
            let image = &images[span.resource];
            let requirements = image.memory_requirements();
            device_local_intervals.push(AliasInterval {
                first_use: span.first_use,
                last_use: span.last_use,
                size: requirements.size,
                alignment: requirements.alignment,
            });
            device_local_targets.push(AliasTarget::Image(image));
        }

        for span in &plan.aliased_buffers {
            let buffer = &buffers[span.resource];
            let requirements = buffer.memory_requirements();
            let host_visible = plan.buffer_usage_bits[span.resource].contains(BufferUsage::HOST_VISIBLE);
            let interval = AliasInterval {
                first_use: span.first_use,
                last_use: span.last_use,
                size: requirements.size,
                alignment: requirements.alignment,
            };

            if host_visible {
                host_intervals.push(interval);
                host_targets.push(AliasTarget::Buffer(buffer));
            } else {
                device_local_intervals.push(interval);
                device_local_targets.push(AliasTarget::Buffer(buffer));
            }
        }

        let mut place = |host_visible: bool,
                         name: &str,
                         intervals: &[AliasInterval],
                         targets: &[AliasTarget<'_>]|
         -> Result<(), RenderGraphError> {
            if targets.is_empty() {
                return Ok(());
            }

            let mut allocator = device.create_aliased_allocator(host_visible, name);
            let offsets = assign_aliased_offsets(intervals);

            for (target, offset) in targets.iter().zip(offsets) {
                match target {
                    AliasTarget::Image(image) => allocator.stage_image((*image).clone(), offset)?,
                    AliasTarget::Buffer(buffer) => allocator.stage_buffer((*buffer).clone(), offset)?,
                }
            }

            allocator.allocate()?;

            aliased_allocators.push(allocator);
            Ok(())
        };

        place(false, "rg-transient", &device_local_intervals, &device_local_targets)?;
        place(true, "rg-upload", &host_intervals, &host_targets)?;
    }

    // Uploads scheduled by `create_storage_buffer`, now that memory backs
    // the buffers.
    for (key, data) in pending_uploads {
        if let Some(buffer) = buffers.get(key) {
            if let Err(error) = buffer.set_data(&data, 0) {
                log::error!("storage buffer upload for '{}' failed: {}", buffer.name(), error);
            }
        }
    }

    // View and framebuffer tables for PassResources.
    let mut image_views = SecondaryMap::new();
    for (key, decl) in image_view_decls.iter() {
        image_views.insert(key, (decl.image, decl.range));
    }
    let mut buffer_views = SecondaryMap::new();
    for (key, decl) in buffer_view_decls.iter() {
        buffer_views.insert(key, (decl.buffer, decl.kind));
    }

    let mut cubemaps = SecondaryMap::new();
    for (key, decl) in cubemap_decls.iter() {
        cubemaps.insert(key, decl.cubemap.clone());
    }
    let mut acceleration_structures = SecondaryMap::new();
    for (key, decl) in acceleration_structure_decls.iter() {
        acceleration_structures.insert(key, decl.acceleration_structure.clone());
    }

    let mut resource_groups = SecondaryMap::new();
    for (key, description) in resource_group_decls.iter() {
        let group = device.create_resource_group(description)?;
        resource_groups.insert(key, group);
    }

    let mut resources = PassResources {
        device: device.clone(),
        images,
        buffers,
        cubemaps,
        acceleration_structures,
        image_views,
        buffer_views,
        framebuffers: SecondaryMap::new(),
        resource_groups,
    };

    // Passes: framebuffers with derived ops, pipelines from the caches,
    // and the per-pass descriptor plans resolved to concrete writes.
    let mut executable_passes: Vec<ExecutablePass> = Vec::with_capacity(pass_decls.len());

    for (pass_index, pass) in pass_decls.into_iter().enumerate() {
        let RGPassDecl {
            name,
            hint,
            parameters,
            pipeline,
            callback,
        } = pass;

        let framebuffer = match parameters.framebuffer {
            Some(reference) => {
                let decl = match framebuffer_decls.get(reference) {
                    Some(decl) => decl,
                    None => render_fatal!(
                        FatalKind::Invariant,
                        "pass '{}' carries framebuffer {:?} that planning never validated",
                        name,
                        reference
                    ),
                };
                let framebuffer = build_framebuffer(&name, decl, pass_index, &plan, &resources)?;
                resources.framebuffers.insert(reference, framebuffer.clone());
                Some(framebuffer)
            }
            None => None,
        };

        let materialized_pipeline = match &pipeline {
            RGPassPipeline::None => None,
            RGPassPipeline::Graphics(description) => {
                let framebuffer = match framebuffer.as_ref() {
                    Some(framebuffer) => framebuffer,
                    None => render_fatal!(
                        FatalKind::Invariant,
                        "raster sugar pass '{}' reached materialization without a framebuffer",
                        name
                    ),
                };
                Some(device.create_graphics_pipeline(&GraphicsPipelineDescription {
                    name: name.clone(),
                    vertex: description.vertex.clone(),
                    fragment: description.fragment.clone(),
                    rasterization: description.rasterization,
                    depth_stencil: description.depth_stencil,
                    color_blend: description.color_blend.clone(),
                    target: FramebufferSignature::of(framebuffer.description()),
                })?)
            }
            RGPassPipeline::Compute(shader) => Some(device.create_compute_pipeline(&ComputePipelineDescription {
                name: name.clone(),
                shader: shader.clone(),
            })?),
            RGPassPipeline::RayTracing(description) => {
                Some(device.create_ray_tracing_pipeline(&RayTracingPipelineDescription {
                    name: name.clone(),
                    raygen: description.raygen.clone(),
                    miss: description.miss.clone(),
                    hit_groups: description
                        .closest_hit
                        .iter()
                        .map(|closest_hit| HitGroup {
                            closest_hit: closest_hit.clone(),
                            any_hit: None,
                            intersection: None,
                        })
                        .collect(),
                    max_recursion_depth: description.max_recursion_depth,
                })?)
            }
        };

        let sets = plan.pass_sets[pass_index]
            .iter()
            .map(|planned| MaterializedSet {
                set_index: planned.set_index,
                items: planned.items.clone(),
                writes: planned
                    .writes
                    .iter()
                    .map(|write| WriteDescriptor {
                        binding: write.binding,
                        kind: write.kind,
                        value: member_value(&parameters.members[write.member_index].value, &resources),
                    })
                    .collect(),
            })
            .collect();

        let groups = parameters
            .resource_groups
            .iter()
            .map(|(set_index, reference)| (*set_index, resources.resource_group(*reference)))
            .collect();

        let kind = match hint {
            RGPassHint::Raster => ExecutablePassKind::Raster {
                framebuffer: match framebuffer {
                    Some(framebuffer) => framebuffer,
                    None => render_fatal!(
                        FatalKind::Invariant,
                        "raster pass '{}' reached materialization without a framebuffer",
                        name
                    ),
                },
                pipeline: materialized_pipeline,
            },
            RGPassHint::Compute => ExecutablePassKind::Compute {
                pipeline: materialized_pipeline,
            },
            RGPassHint::RayTracing => ExecutablePassKind::RayTracing {
                pipeline: materialized_pipeline,
            },
            RGPassHint::Immediate => ExecutablePassKind::Immediate,
        };

        executable_passes.push(ExecutablePass {
            name,
            kind,
            sets,
            groups,
            callback,
        });
    }

    // The linear step list, pass declarations replaced by their
    // materialized forms.
    let mut steps = Vec::with_capacity(plan.steps.len());
    let mut pass_iter = executable_passes.into_iter();
    for step in &plan.steps {
        match step {
            PlannedStep::Pass(_) => {
                let pass = match pass_iter.next() {
                    Some(pass) => pass,
                    None => render_fatal!(
                        FatalKind::Invariant,
                        "compiled plan names more passes than the builder declared"
                    ),
                };
                steps.push(ExecutableStep::Pass(pass));
            }
            PlannedStep::Transition { image, old, new } => {
                steps.push(ExecutableStep::Transition {
                    image: resources.image(*image),
                    old: *old,
                    new: *new,
                });
            }
        }
    }

    Ok(RenderGraph {
        device,
        steps,
        resources,
        _aliased_allocators: aliased_allocators,
    })
}

fn member_value(value: &RGMemberValue, resources: &PassResources) -> DescriptorValue {
    match value {
        RGMemberValue::SampledImage(view) => DescriptorValue::ImageView(resources.image_view(*view, ViewKind::Srv)),
        RGMemberValue::StorageImage(view) => DescriptorValue::ImageView(resources.image_view(*view, ViewKind::Uav)),
        RGMemberValue::SampledCubemap(cubemap) => {
            DescriptorValue::ImageView(resources.cubemap(*cubemap).whole_view(ViewKind::Srv))
        }
        RGMemberValue::BufferView(view) => DescriptorValue::BufferView(resources.buffer_view(*view)),
        RGMemberValue::AccelerationStructure(reference) => {
            DescriptorValue::AccelerationStructure(resources.acceleration_structure(*reference))
        }
        RGMemberValue::Sampler(sampler) => DescriptorValue::Sampler(sampler.clone()),
    }
}

fn build_framebuffer(
    pass_name: &str,
    decl: &RGFramebufferDecl,
    pass_index: usize,
    plan: &RenderGraphPlan,
    resources: &PassResources,
) -> Result<Arc<dyn Framebuffer>, RenderGraphError> {
    let ops_for = |view: RGImageViewRef| -> Result<compiler::AttachmentOps, RenderGraphError> {
        plan.attachment_ops[pass_index]
            .get(&view)
            .copied()
            .ok_or_else(|| RenderGraphError::AttachmentAbsentUsage {
                pass: pass_name.to_owned(),
                resource: format!("{:?}", view),
            })
    };

    let attachment = |view: RGImageViewRef| -> Result<FramebufferAttachment, RenderGraphError> {
        let ops = ops_for(view)?;
        let (image_ref, _) = resources.image_views[view];
        let image = resources.image(image_ref);
        let concrete_view = resources.image_view(view, ViewKind::Rtv);

        Ok(FramebufferAttachment {
            image,
            view: concrete_view,
            load_op: ops.load_op,
            store_op: ops.store_op,
            initial_state: ops.initial_state,
            final_state: ops.final_state,
            clear_value: ops.clear_value,
        })
    };

    let mut color_attachments = Vec::with_capacity(decl.color_attachments.len());
    for view in &decl.color_attachments {
        color_attachments.push(attachment(*view)?);
    }
    let depth_stencil_attachment = match decl.depth_stencil_attachment {
        Some(view) => Some(attachment(view)?),
        None => None,
    };

    let description = FramebufferDescription {
        name: format!("{}-target", pass_name),
        width: decl.width,
        height: decl.height,
        color_attachments,
        depth_stencil_attachment,
    };

    resources
        .device
        .create_framebuffer(description)
        .map_err(RenderGraphError::from)
}
