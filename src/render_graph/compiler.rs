//! The render-graph compiler.
//!
//! Planning is pure: it reads the builder's declaration tables and the
//! shader registry and produces a linear execution plan with derived
//! attachment operations, inserted transitions and aliasing intervals.
//! Nothing here touches a device; materialization of the plan lives in
//! `graph.rs`.

use failure::Fail;
use fxhash::FxHashMap;
use log::warn;

use crate::core::handle::{Key, SecondaryMap};
use crate::render_graph::builder::*;
use crate::render_graph::handles::*;
use crate::rhi::descriptors::DescriptorItem;
use crate::rhi::rhi_enums::{
    BufferUsage, ImageUsage, LoadOperation, PipelineCreationError, ResourceCreationError, ResourceState,
    ShaderResourceKind, StoreOperation, SubmitError, ViewKind,
};
use crate::shader::{ShaderHandle, ShaderRegistry};
use cgmath::Vector4;

/// Everything that can go wrong building a render graph: builder
/// validation, compilation rules, and materialization failures surfaced
/// from the device.
#[derive(Fail, Debug)]
pub enum RenderGraphError {
    #[fail(display = "Pass '{}' references handle '{}' that this builder never declared", pass, name)]
    UndeclaredDependency { pass: String, name: String },

    #[fail(display = "External resource '{}' was registered more than once", name)]
    DuplicateHandle { name: String },

    #[fail(display = "Pass '{}' references a null handle for '{}'", pass, name)]
    InvalidHandle { pass: String, name: String },

    #[fail(display = "Framebuffer attachment '{}' of pass '{}' has no usage", resource, pass)]
    AttachmentAbsentUsage { pass: String, resource: String },

    #[fail(display = "Pass '{}' uses '{}' both as an attachment and for storage", pass, resource)]
    ConflictingUsagePerPass { pass: String, resource: String },

    #[fail(display = "Pass '{}' declares member '{}' which none of its shaders bind", pass, binding)]
    UnknownBinding { pass: String, binding: String },

    #[fail(display = "Immediate pass '{}' writes '{}' which an earlier pass already consumed", pass, resource)]
    CyclicImmediate { pass: String, resource: String },

    #[fail(display = "Pass '{}' pipeline state does not match its framebuffer: {}", pass, detail)]
    IncompatibleFormat { pass: String, detail: String },

    #[fail(display = "Pass '{}' is missing shader stage: {}", pass, stage)]
    MissingShaderStage { pass: String, stage: String },

    #[fail(display = "Resource creation failed: {}", _0)]
    ResourceCreation(#[fail(cause)] ResourceCreationError),

    #[fail(display = "Transient memory placement failed: {}", _0)]
    Allocation(#[fail(cause)] crate::rhi::rhi_enums::AllocationError),

    #[fail(display = "Pipeline creation failed: {}", _0)]
    PipelineCreation(#[fail(cause)] PipelineCreationError),

    #[fail(display = "Submission failed: {}", _0)]
    Submit(#[fail(cause)] SubmitError),
}

impl From<ResourceCreationError> for RenderGraphError {
    fn from(error: ResourceCreationError) -> Self {
        RenderGraphError::ResourceCreation(error)
    }
}

impl From<crate::rhi::rhi_enums::AllocationError> for RenderGraphError {
    fn from(error: crate::rhi::rhi_enums::AllocationError) -> Self {
        RenderGraphError::Allocation(error)
    }
}

impl From<PipelineCreationError> for RenderGraphError {
    fn from(error: PipelineCreationError) -> Self {
        RenderGraphError::PipelineCreation(error)
    }
}

/// How a pass touches an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RGAccessKind {
    SampledRead,
    StorageRead,
    StorageWrite,
    AttachmentColor,
    AttachmentDepth,
    TransferSrc,
    TransferDst,
    /// Written as the output of an acceleration-structure build.
    IndirectBuild,
}

impl RGAccessKind {
    pub fn is_attachment(self) -> bool {
        matches!(self, RGAccessKind::AttachmentColor | RGAccessKind::AttachmentDepth)
    }

    /// The tracked image state this access requires.
    pub fn required_state(self) -> ResourceState {
        match self {
            RGAccessKind::SampledRead => ResourceState::ShaderReadOnly,
            RGAccessKind::StorageRead | RGAccessKind::StorageWrite | RGAccessKind::IndirectBuild => {
                ResourceState::General
            }
            RGAccessKind::AttachmentColor => ResourceState::ColorAttachment,
            RGAccessKind::AttachmentDepth => ResourceState::DepthStencilAttachment,
            RGAccessKind::TransferSrc => ResourceState::TransferSrc,
            RGAccessKind::TransferDst => ResourceState::TransferDst,
        }
    }
}

/// One entry of an image's usage timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUsageRecord {
    pub pass_index: usize,
    pub access: RGAccessKind,
    /// Usage happens inside an `Immediate` pass: no automatic transitions
    /// may be inserted next to it and the image is never aliased.
    pub immediate: bool,
    /// The attachment view, for attachment usages.
    pub view: Option<RGImageViewRef>,
}

/// Load/store operations and boundary states derived for one attachment
/// at one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentOps {
    pub load_op: LoadOperation,
    pub store_op: StoreOperation,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
    pub clear_value: Vector4<f32>,
}

/// One step of the compiled linear plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedStep {
    Pass(usize),
    Transition {
        image: RGImageRef,
        old: ResourceState,
        new: ResourceState,
    },
}

/// A transient resource's padded lifetime, ready for offset assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasSpan<K> {
    pub resource: K,
    pub first_use: usize,
    pub last_use: usize,
}

/// One descriptor write the executor will perform, pointing back at the
/// pass member that supplies the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedWrite {
    pub binding: u32,
    pub kind: ShaderResourceKind,
    pub member_index: usize,
}

/// A descriptor set the executor allocates transiently for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDescriptorSet {
    pub set_index: u32,
    pub items: Vec<DescriptorItem>,
    pub writes: Vec<PlannedWrite>,
}

/// Output of planning, consumed by materialization.
pub struct RenderGraphPlan {
    pub steps: Vec<PlannedStep>,
    pub image_timelines: SecondaryMap<RGImageRef, Vec<ImageUsageRecord>>,
    pub image_usage_bits: SecondaryMap<RGImageRef, ImageUsage>,
    pub buffer_usage_bits: SecondaryMap<RGBufferRef, BufferUsage>,
    /// Per pass: derived ops keyed by attachment view.
    pub attachment_ops: Vec<FxHashMap<RGImageViewRef, AttachmentOps>>,
    pub aliased_images: Vec<AliasSpan<RGImageRef>>,
    /// Transient images an `Immediate` pass touches; they get dedicated
    /// allocations instead of aliased placement.
    pub dedicated_images: Vec<RGImageRef>,
    pub aliased_buffers: Vec<AliasSpan<RGBufferRef>>,
    pub pass_sets: Vec<Vec<PlannedDescriptorSet>>,
    pub dropped_images: Vec<RGImageRef>,
    pub dropped_buffers: Vec<RGBufferRef>,
}

fn clear_value_for(is_depth: bool) -> Vector4<f32> {
    if is_depth {
        Vector4::new(1.0, 1.0, 1.0, 1.0)
    } else {
        Vector4::new(0.0, 0.0, 0.0, 1.0)
    }
}

fn pass_shaders(pass: &RGPassDecl) -> Vec<ShaderHandle> {
    match &pass.pipeline {
        RGPassPipeline::None => Vec::new(),
        RGPassPipeline::Graphics(description) => vec![description.vertex.shader, description.fragment.shader],
        RGPassPipeline::Compute(shader) => vec![shader.shader],
        RGPassPipeline::RayTracing(description) => {
            let mut shaders = vec![description.raygen.shader];
            shaders.extend(description.miss.iter().map(|function| function.shader));
            shaders.extend(description.closest_hit.iter().map(|function| function.shader));
            shaders
        }
    }
}

struct UsageCollection {
    image_timelines: SecondaryMap<RGImageRef, Vec<ImageUsageRecord>>,
    buffer_timelines: SecondaryMap<RGBufferRef, Vec<usize>>,
    buffer_usage_bits: SecondaryMap<RGBufferRef, BufferUsage>,
}

/// Walks the pass list in builder order recording every declared touch of
/// every resource.
fn collect_usages(builder: &RenderGraphBuilder) -> Result<UsageCollection, RenderGraphError> {
    let mut image_timelines: SecondaryMap<RGImageRef, Vec<ImageUsageRecord>> = SecondaryMap::new();
    let mut buffer_timelines: SecondaryMap<RGBufferRef, Vec<usize>> = SecondaryMap::new();
    let mut buffer_usage_bits: SecondaryMap<RGBufferRef, BufferUsage> = SecondaryMap::new();

    for key in builder.images.keys() {
        image_timelines.insert(key, Vec::new());
    }
    for (key, decl) in builder.buffers.iter() {
        buffer_timelines.insert(key, Vec::new());
        let mut usage = BufferUsage::empty();
        if let RGBufferDecl::Transient {
            initial_data: Some(_), ..
        } = decl
        {
            usage |= BufferUsage::HOST_VISIBLE;
        }
        buffer_usage_bits.insert(key, usage);
    }

    let resolve_image_view = |pass: &RGPassDecl, name: &str, view: RGImageViewRef| -> Result<RGImageRef, RenderGraphError> {
        if view.is_null() {
            return Err(RenderGraphError::InvalidHandle {
                pass: pass.name.clone(),
                name: name.to_owned(),
            });
        }

        let decl = builder
            .image_views
            .get(view)
            .ok_or_else(|| RenderGraphError::UndeclaredDependency {
                pass: pass.name.clone(),
                name: name.to_owned(),
            })?;

        if builder.images.get(decl.image).is_none() {
            return Err(RenderGraphError::UndeclaredDependency {
                pass: pass.name.clone(),
                name: name.to_owned(),
            });
        }

        Ok(decl.image)
    };

    for (pass_index, pass) in builder.passes.iter().enumerate() {
        let immediate = pass.hint == RGPassHint::Immediate;

        for member in &pass.parameters.members {
            match &member.value {
                RGMemberValue::SampledImage(view) => {
                    let image = resolve_image_view(pass, &member.name, *view)?;
                    image_timelines[image].push(ImageUsageRecord {
                        pass_index,
                        access: RGAccessKind::SampledRead,
                        immediate,
                        view: None,
                    });
                }
                RGMemberValue::StorageImage(view) => {
                    let image = resolve_image_view(pass, &member.name, *view)?;
                    image_timelines[image].push(ImageUsageRecord {
                        pass_index,
                        access: RGAccessKind::StorageWrite,
                        immediate,
                        view: None,
                    });
                }
                RGMemberValue::SampledCubemap(cubemap) => {
                    if cubemap.is_null() {
                        return Err(RenderGraphError::InvalidHandle {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        });
                    }
                    if builder.cubemaps.get(*cubemap).is_none() {
                        return Err(RenderGraphError::UndeclaredDependency {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        });
                    }
                }
                RGMemberValue::BufferView(view) => {
                    if view.is_null() {
                        return Err(RenderGraphError::InvalidHandle {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        });
                    }
                    let decl = builder.buffer_views.get(*view).ok_or_else(|| {
                        RenderGraphError::UndeclaredDependency {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        }
                    })?;
                    if builder.buffers.get(decl.buffer).is_none() {
                        return Err(RenderGraphError::UndeclaredDependency {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        });
                    }

                    buffer_timelines[decl.buffer].push(pass_index);
                    buffer_usage_bits[decl.buffer] |= match decl.kind {
                        ViewKind::Cbv => BufferUsage::CONSTANT,
                        ViewKind::Srv | ViewKind::Uav => BufferUsage::UNORDERED_ACCESS,
                        ViewKind::Rtv => BufferUsage::empty(),
                    };
                }
                RGMemberValue::AccelerationStructure(reference) => {
                    if reference.is_null() {
                        return Err(RenderGraphError::InvalidHandle {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        });
                    }
                    if builder.acceleration_structures.get(*reference).is_none() {
                        return Err(RenderGraphError::UndeclaredDependency {
                            pass: pass.name.clone(),
                            name: member.name.clone(),
                        });
                    }
                }
                RGMemberValue::Sampler(_) => {}
            }
        }

        for buffer in &pass.parameters.written_buffers {
            if builder.buffers.get(*buffer).is_none() {
                return Err(RenderGraphError::UndeclaredDependency {
                    pass: pass.name.clone(),
                    name: "written buffer".to_owned(),
                });
            }
            buffer_timelines[*buffer].push(pass_index);
            buffer_usage_bits[*buffer] |= BufferUsage::UNORDERED_ACCESS;
        }

        for image in &pass.parameters.written_images {
            if builder.images.get(*image).is_none() {
                return Err(RenderGraphError::UndeclaredDependency {
                    pass: pass.name.clone(),
                    name: "written image".to_owned(),
                });
            }
            image_timelines[*image].push(ImageUsageRecord {
                pass_index,
                access: RGAccessKind::StorageWrite,
                immediate,
                view: None,
            });
        }

        for acceleration_structure in &pass.parameters.written_acceleration_structures {
            if builder.acceleration_structures.get(*acceleration_structure).is_none() {
                return Err(RenderGraphError::UndeclaredDependency {
                    pass: pass.name.clone(),
                    name: "written acceleration structure".to_owned(),
                });
            }
        }

        if let Some(framebuffer) = pass.parameters.framebuffer {
            let decl = builder.framebuffers.get(framebuffer).ok_or_else(|| {
                RenderGraphError::UndeclaredDependency {
                    pass: pass.name.clone(),
                    name: "framebuffer".to_owned(),
                }
            })?;

            let attachments = decl
                .color_attachments
                .iter()
                .map(|view| (*view, RGAccessKind::AttachmentColor))
                .chain(
                    decl.depth_stencil_attachment
                        .iter()
                        .map(|view| (*view, RGAccessKind::AttachmentDepth)),
                );

            for (view, access) in attachments {
                let image = resolve_image_view(pass, "attachment", view)?;
                image_timelines[image].push(ImageUsageRecord {
                    pass_index,
                    access,
                    immediate,
                    view: Some(view),
                });
            }
        }
    }

    Ok(UsageCollection {
        image_timelines,
        buffer_timelines,
        buffer_usage_bits,
    })
}

fn validate(builder: &RenderGraphBuilder, usages: &UsageCollection) -> Result<(), RenderGraphError> {
    // A raster pass records inside a render pass; it must declare one.
    for pass in &builder.passes {
        if pass.hint == RGPassHint::Raster && pass.parameters.framebuffer.is_none() {
            return Err(RenderGraphError::InvalidHandle {
                pass: pass.name.clone(),
                name: "framebuffer".to_owned(),
            });
        }
    }

    // Externals registered twice alias each other silently; reject them.
    let mut seen = std::collections::HashSet::new();
    for (_, decl) in builder.images.iter() {
        if let RGImageDecl::External { image, .. } = decl {
            if !seen.insert(image.id()) {
                return Err(RenderGraphError::DuplicateHandle {
                    name: image.name().to_owned(),
                });
            }
        }
    }
    for (_, decl) in builder.buffers.iter() {
        if let RGBufferDecl::External { buffer } = decl {
            if !seen.insert(buffer.id()) {
                return Err(RenderGraphError::DuplicateHandle {
                    name: buffer.name().to_owned(),
                });
            }
        }
    }

    // A pass may not see an image both through a render target and a
    // storage binding.
    for (image, timeline) in usages.image_timelines.iter() {
        for record in timeline {
            if !record.access.is_attachment() {
                continue;
            }

            let conflicting = timeline.iter().any(|other| {
                other.pass_index == record.pass_index
                    && matches!(other.access, RGAccessKind::StorageRead | RGAccessKind::StorageWrite)
            });

            if conflicting {
                return Err(RenderGraphError::ConflictingUsagePerPass {
                    pass: builder.passes[record.pass_index].name.clone(),
                    resource: builder.images[image].name().to_owned(),
                });
            }
        }
    }

    // An immediate pass may not write what an earlier pass consumed: the
    // suppressed barriers would otherwise hide a real dependency cycle.
    for (pass_index, pass) in builder.passes.iter().enumerate() {
        if pass.hint != RGPassHint::Immediate {
            continue;
        }

        for image in &pass.parameters.written_images {
            let consumed_before = usages.image_timelines[*image]
                .iter()
                .any(|record| record.pass_index < pass_index && record.access != RGAccessKind::StorageWrite);
            if consumed_before {
                return Err(RenderGraphError::CyclicImmediate {
                    pass: pass.name.clone(),
                    resource: builder.images[*image].name().to_owned(),
                });
            }
        }

        for buffer in &pass.parameters.written_buffers {
            let consumed_before = usages.buffer_timelines[*buffer]
                .iter()
                .any(|&other| other < pass_index);
            if consumed_before {
                return Err(RenderGraphError::CyclicImmediate {
                    pass: pass.name.clone(),
                    resource: builder.buffers[*buffer].name().to_owned(),
                });
            }
        }
    }

    Ok(())
}

/// Resolves pass members against the shaders' reflected bindings and
/// groups them into per-set descriptor plans.
fn plan_descriptor_sets(
    builder: &RenderGraphBuilder,
    registry: &ShaderRegistry,
) -> Result<Vec<Vec<PlannedDescriptorSet>>, RenderGraphError> {
    let mut pass_sets = Vec::with_capacity(builder.passes.len());

    for pass in &builder.passes {
        let shaders = pass_shaders(pass);
        if shaders.is_empty() {
            pass_sets.push(Vec::new());
            continue;
        }

        let mut signatures = Vec::with_capacity(shaders.len());
        for shader in &shaders {
            match registry.signature(*shader) {
                Some(signature) => signatures.push(signature),
                None => {
                    return Err(RenderGraphError::MissingShaderStage {
                        pass: pass.name.clone(),
                        stage: format!("shader handle {:?} is not registered", shader),
                    })
                }
            }
        }

        let mut sets: FxHashMap<u32, PlannedDescriptorSet> = FxHashMap::default();

        for (member_index, member) in pass.parameters.members.iter().enumerate() {
            let binding = signatures
                .iter()
                .find_map(|signature| signature.find_binding(&member.name).cloned());

            let binding = match binding {
                Some(binding) => binding,
                None => {
                    return Err(RenderGraphError::UnknownBinding {
                        pass: pass.name.clone(),
                        binding: member.name.clone(),
                    })
                }
            };

            // Stage masks of the same binding in other stages are merged
            // so the descriptor is visible everywhere it is declared.
            let stages = signatures
                .iter()
                .filter_map(|signature| signature.find_binding(&member.name))
                .fold(binding.stages, |stages, info| stages | info.stages);

            let entry = sets.entry(binding.set).or_insert_with(|| PlannedDescriptorSet {
                set_index: binding.set,
                items: Vec::new(),
                writes: Vec::new(),
            });

            entry.items.push(DescriptorItem {
                binding: binding.binding,
                count: if binding.count == crate::shader::BINDLESS_DESCRIPTOR_COUNT {
                    1
                } else {
                    binding.count
                },
                stages,
                kind: binding.kind,
            });
            entry.writes.push(PlannedWrite {
                binding: binding.binding,
                kind: binding.kind,
                member_index,
            });
        }

        let mut ordered: Vec<PlannedDescriptorSet> = sets.into_iter().map(|(_, set)| set).collect();
        ordered.sort_by_key(|set| set.set_index);
        pass_sets.push(ordered);
    }

    Ok(pass_sets)
}

/// Derives per-attachment operations for every raster pass.
fn derive_attachment_ops(
    builder: &RenderGraphBuilder,
    usages: &UsageCollection,
) -> Result<Vec<FxHashMap<RGImageViewRef, AttachmentOps>>, RenderGraphError> {
    let mut per_pass: Vec<FxHashMap<RGImageViewRef, AttachmentOps>> =
        vec![FxHashMap::default(); builder.passes.len()];

    for (image, timeline) in usages.image_timelines.iter() {
        let decl = &builder.images[image];
        let is_external = decl.is_external();
        let incoming_state = match decl {
            RGImageDecl::External { incoming_state, .. } => *incoming_state,
            RGImageDecl::Transient { .. } => ResourceState::Undefined,
        };
        let is_depth = decl.format().is_depth();

        for (usage_pos, record) in timeline.iter().enumerate() {
            if !record.access.is_attachment() {
                continue;
            }

            let view = record.view.ok_or_else(|| RenderGraphError::AttachmentAbsentUsage {
                pass: builder.passes[record.pass_index].name.clone(),
                resource: decl.name().to_owned(),
            })?;

            let initial_state = if usage_pos == 0 {
                incoming_state
            } else {
                match timeline[usage_pos - 1].access {
                    RGAccessKind::AttachmentColor => ResourceState::ColorAttachment,
                    RGAccessKind::AttachmentDepth => ResourceState::DepthStencilAttachment,
                    RGAccessKind::SampledRead => ResourceState::ShaderReadOnly,
                    RGAccessKind::StorageRead | RGAccessKind::StorageWrite | RGAccessKind::IndirectBuild => {
                        ResourceState::General
                    }
                    RGAccessKind::TransferSrc => ResourceState::TransferSrc,
                    RGAccessKind::TransferDst => ResourceState::TransferDst,
                }
            };

            let load_op = if initial_state == ResourceState::Undefined {
                LoadOperation::Clear
            } else {
                LoadOperation::Load
            };

            let is_last = usage_pos == timeline.len() - 1;

            let (final_state, store_op) = if is_last && is_external {
                // Results of an external attachment outlive the graph.
                (ResourceState::ShaderReadOnly, StoreOperation::Store)
            } else if is_last {
                let final_state = if initial_state == ResourceState::Undefined {
                    ResourceState::General
                } else {
                    record.access.required_state()
                };
                (final_state, StoreOperation::DontCare)
            } else {
                let next = timeline[usage_pos + 1];
                // A following storage use (a depth attachment consumed by
                // a compute pass, say) needs the unordered-access state.
                let final_state = next.access.required_state();
                (final_state, StoreOperation::Store)
            };

            per_pass[record.pass_index].insert(
                view,
                AttachmentOps {
                    load_op,
                    store_op,
                    initial_state,
                    final_state,
                    clear_value: clear_value_for(is_depth),
                },
            );
        }
    }

    Ok(per_pass)
}

/// Builds the linear step list, inserting explicit transition passes
/// between adjacent non-attachment usages whose states differ.
fn plan_steps(builder: &RenderGraphBuilder, usages: &UsageCollection) -> Vec<PlannedStep> {
    // Transitions that must run before a given pass index.
    let mut transitions_before: Vec<Vec<(RGImageRef, ResourceState, ResourceState)>> =
        vec![Vec::new(); builder.passes.len()];

    for (image, timeline) in usages.image_timelines.iter() {
        let decl = &builder.images[image];
        let mut tracked_state = match decl {
            RGImageDecl::External { incoming_state, .. } => *incoming_state,
            RGImageDecl::Transient { .. } => ResourceState::Undefined,
        };

        for (usage_pos, record) in timeline.iter().enumerate() {
            let required = record.access.required_state();

            if record.access.is_attachment() {
                // The render pass itself performs the boundary
                // transitions; its final state is the next usage's
                // required state (or the derived last-use state).
                let is_last = usage_pos == timeline.len() - 1;
                tracked_state = if is_last && decl.is_external() {
                    ResourceState::ShaderReadOnly
                } else if is_last {
                    if tracked_state == ResourceState::Undefined {
                        ResourceState::General
                    } else {
                        required
                    }
                } else {
                    timeline[usage_pos + 1].access.required_state()
                };
                continue;
            }

            if tracked_state != required {
                let previous_immediate = usage_pos > 0 && timeline[usage_pos - 1].immediate;
                if !record.immediate && !previous_immediate {
                    transitions_before[record.pass_index].push((image, tracked_state, required));
                } else {
                    log::debug!(
                        "suppressing transition {:?} -> {:?} around immediate pass for '{}'",
                        tracked_state,
                        required,
                        decl.name()
                    );
                }
            }

            tracked_state = required;
        }
    }

    let mut steps = Vec::with_capacity(builder.passes.len());
    for pass_index in 0..builder.passes.len() {
        for (image, old, new) in transitions_before[pass_index].drain(..) {
            steps.push(PlannedStep::Transition { image, old, new });
        }
        steps.push(PlannedStep::Pass(pass_index));
    }

    steps
}

/// Compiles the builder's declarations into an executable plan.
pub fn plan(builder: &RenderGraphBuilder, registry: &ShaderRegistry) -> Result<RenderGraphPlan, RenderGraphError> {
    let usages = collect_usages(builder)?;
    validate(builder, &usages)?;

    // Usage-flag computation; resources nothing touches are dropped.
    let mut image_usage_bits: SecondaryMap<RGImageRef, ImageUsage> = SecondaryMap::new();
    let mut dropped_images = Vec::new();
    for (image, timeline) in usages.image_timelines.iter() {
        if timeline.is_empty() {
            if !builder.images[image].is_external() {
                warn!(
                    "dropping transient image '{}': no pass uses it",
                    builder.images[image].name()
                );
                dropped_images.push(image);
            }
            continue;
        }

        let mut bits = ImageUsage::empty();
        for record in timeline {
            bits |= match record.access {
                RGAccessKind::SampledRead => ImageUsage::SAMPLED,
                RGAccessKind::StorageRead | RGAccessKind::StorageWrite | RGAccessKind::IndirectBuild => {
                    ImageUsage::UNORDERED_ACCESS
                }
                RGAccessKind::AttachmentColor | RGAccessKind::AttachmentDepth => ImageUsage::ATTACHMENT,
                RGAccessKind::TransferSrc => ImageUsage::TRANSFER_SRC,
                RGAccessKind::TransferDst => ImageUsage::TRANSFER_DST,
            };
        }
        image_usage_bits.insert(image, bits);
    }

    let mut dropped_buffers = Vec::new();
    let mut buffer_usage_bits = usages.buffer_usage_bits.clone();
    for (buffer, timeline) in usages.buffer_timelines.iter() {
        if timeline.is_empty() && !builder.buffers[buffer].is_external() {
            warn!(
                "dropping transient buffer '{}': no pass uses it",
                builder.buffers[buffer].name()
            );
            dropped_buffers.push(buffer);
            buffer_usage_bits.remove(buffer);
        }
    }

    // Aliased-memory assignment. Timelines get one pass of padding on
    // each side to cover the barrier stages around first and last use.
    let mut aliased_images = Vec::new();
    let mut dedicated_images = Vec::new();
    for (image, timeline) in usages.image_timelines.iter() {
        if builder.images[image].is_external() || timeline.is_empty() {
            continue;
        }

        if timeline.iter().any(|record| record.immediate) {
            dedicated_images.push(image);
            continue;
        }

        aliased_images.push(AliasSpan {
            resource: image,
            first_use: timeline[0].pass_index.saturating_sub(1),
            last_use: timeline[timeline.len() - 1].pass_index + 1,
        });
    }

    let mut aliased_buffers = Vec::new();
    for (buffer, timeline) in usages.buffer_timelines.iter() {
        if builder.buffers[buffer].is_external() || timeline.is_empty() {
            continue;
        }

        let has_initial_data = matches!(
            &builder.buffers[buffer],
            RGBufferDecl::Transient {
                initial_data: Some(_),
                ..
            }
        );
        let immediate = timeline
            .iter()
            .any(|&pass_index| builder.passes[pass_index].hint == RGPassHint::Immediate);

        if immediate {
            continue;
        }

        // Buffers uploaded at build time are live from the start of the
        // frame; anything else is live around its passes.
        let first_use = if has_initial_data {
            0
        } else {
            timeline[0].saturating_sub(1)
        };

        aliased_buffers.push(AliasSpan {
            resource: buffer,
            first_use,
            last_use: timeline[timeline.len() - 1] + 1,
        });
    }

    let attachment_ops = derive_attachment_ops(builder, &usages)?;
    let steps = plan_steps(builder, &usages);
    let pass_sets = plan_descriptor_sets(builder, registry)?;

    // Raster pipeline state must fit the framebuffer it targets.
    for pass in &builder.passes {
        if let RGPassPipeline::Graphics(description) = &pass.pipeline {
            let framebuffer = pass
                .parameters
                .framebuffer
                .and_then(|reference| builder.framebuffers.get(reference));

            if let Some(framebuffer) = framebuffer {
                let blend_count = description.color_blend.attachments.len();
                if blend_count != 0 && blend_count != framebuffer.color_attachments.len() {
                    return Err(RenderGraphError::IncompatibleFormat {
                        pass: pass.name.clone(),
                        detail: format!(
                            "{} blend attachments for {} color attachments",
                            blend_count,
                            framebuffer.color_attachments.len()
                        ),
                    });
                }
            }
        }
    }

    Ok(RenderGraphPlan {
        steps,
        image_timelines: usages.image_timelines,
        image_usage_bits,
        buffer_usage_bits,
        attachment_ops,
        aliased_images,
        dedicated_images,
        aliased_buffers,
        pass_sets,
        dropped_images,
        dropped_buffers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::builder::RenderGraphBuilder;
    use crate::rhi::rhi_enums::ImageFormat;
    use crate::rhi::rhi_structs::ShaderFunction;
    use crate::shader::{ShaderBindingInfo, ShaderRegistry, ShaderSignature};
    use crate::rhi::rhi_enums::ShaderStageFlags;
    use cgmath::Vector2;

    fn no_op(
    ) -> fn(&mut dyn crate::rhi::rhi_traits::CommandRecorder, &crate::render_graph::resources::PassResources) {
        |_, _| {}
    }

    fn registry_with_fragment_texture(name: &str) -> (ShaderRegistry, ShaderFunction, ShaderFunction) {
        let registry = ShaderRegistry::new();
        let vertex = registry.register_signature(ShaderSignature {
            stage: ShaderStageFlags::VERTEX,
            ..ShaderSignature::default()
        });
        let fragment = registry.register_signature(ShaderSignature {
            stage: ShaderStageFlags::FRAGMENT,
            bindings: vec![ShaderBindingInfo {
                name: name.to_owned(),
                set: 0,
                binding: 0,
                kind: ShaderResourceKind::TextureSrv,
                count: 1,
                stages: ShaderStageFlags::FRAGMENT,
            }],
            ..ShaderSignature::default()
        });

        (
            registry,
            ShaderFunction::new(vertex, "vsMain"),
            ShaderFunction::new(fragment, "fsMain"),
        )
    }

    fn raster_params(framebuffer: RGFramebufferRef) -> RGPassParameters {
        RGPassParameters {
            framebuffer: Some(framebuffer),
            ..RGPassParameters::default()
        }
    }

    /// P1 writes A as color, P2 samples A, P3 writes A as color: the ops
    /// and boundary states of the attachment follow the usage timeline.
    #[test]
    fn load_store_derivation_across_sample() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let image = builder.create_texture(RGImageDescription::new_2d("A", 64, 64, ImageFormat::R8G8B8A8_UNORM));
        let view_one = builder.create_image_view(image, None);
        let view_three = builder.create_image_view(image, None);
        let fb_one = builder.create_framebuffer(Vector2::new(64, 64), vec![view_one], None);
        let fb_three = builder.create_framebuffer(Vector2::new(64, 64), vec![view_three], None);

        builder.add_pass("p1", raster_params(fb_one), RGPassHint::Raster, no_op());

        let sampled = builder.create_image_view(image, None);
        builder.add_pass(
            "p2",
            RGPassParameters {
                members: vec![RGPassMember::new("uInput", RGMemberValue::SampledImage(sampled))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );

        builder.add_pass("p3", raster_params(fb_three), RGPassHint::Raster, no_op());

        let plan = plan(&builder, &registry).unwrap();

        let ops_one = plan.attachment_ops[0][&view_one];
        assert_eq!(ops_one.load_op, LoadOperation::Clear);
        assert_eq!(ops_one.store_op, StoreOperation::Store);
        assert_eq!(ops_one.initial_state, ResourceState::Undefined);
        // The render pass completes the ColorAttachment -> ShaderReadOnly
        // transition separating P1 from P2.
        assert_eq!(ops_one.final_state, ResourceState::ShaderReadOnly);

        let ops_three = plan.attachment_ops[2][&view_three];
        assert_eq!(ops_three.load_op, LoadOperation::Load);
        assert_eq!(ops_three.store_op, StoreOperation::DontCare);
        assert_eq!(ops_three.initial_state, ResourceState::ShaderReadOnly);

        // No explicit transition steps: the render passes carry them all.
        assert!(plan
            .steps
            .iter()
            .all(|step| matches!(step, PlannedStep::Pass(_))));
    }

    /// Compute-into-raster on the same image needs one explicit barrier.
    #[test]
    fn storage_then_sample_inserts_transition() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let image = builder.create_texture(RGImageDescription::new_2d("I", 32, 32, ImageFormat::R16G16B16A16F));
        let storage_view = builder.create_image_view(image, None);
        let sampled_view = builder.create_image_view(image, None);

        builder.add_pass(
            "compute",
            RGPassParameters {
                members: vec![RGPassMember::new("uOutput", RGMemberValue::StorageImage(storage_view))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );
        builder.add_pass(
            "sample",
            RGPassParameters {
                members: vec![RGPassMember::new("uInput", RGMemberValue::SampledImage(sampled_view))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );

        let plan = plan(&builder, &registry).unwrap();

        assert_eq!(
            plan.steps,
            vec![
                PlannedStep::Transition {
                    image,
                    old: ResourceState::Undefined,
                    new: ResourceState::General,
                },
                PlannedStep::Pass(0),
                PlannedStep::Transition {
                    image,
                    old: ResourceState::General,
                    new: ResourceState::ShaderReadOnly,
                },
                PlannedStep::Pass(1),
            ]
        );
        assert_eq!(plan.image_usage_bits[image], ImageUsage::UNORDERED_ACCESS | ImageUsage::SAMPLED);
    }

    /// `Immediate` suppresses transitions next to the pass.
    #[test]
    fn immediate_pass_suppresses_transitions() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let image = builder.create_texture(RGImageDescription::new_2d("I", 32, 32, ImageFormat::R16G16B16A16F));
        let sampled_view = builder.create_image_view(image, None);

        builder.add_immediate_pass(
            "build",
            RGPassParameters {
                written_images: vec![image],
                ..RGPassParameters::default()
            },
            no_op(),
        );
        builder.add_pass(
            "consume",
            RGPassParameters {
                members: vec![RGPassMember::new("uInput", RGMemberValue::SampledImage(sampled_view))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );

        let plan = plan(&builder, &registry).unwrap();

        assert_eq!(plan.steps, vec![PlannedStep::Pass(0), PlannedStep::Pass(1)]);
        // Touched by an immediate pass: dedicated allocation, not aliased.
        assert_eq!(plan.dedicated_images, vec![image]);
        assert!(plan.aliased_images.is_empty());
    }

    #[test]
    fn disjoint_and_overlapping_alias_spans() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let early = builder.create_texture(RGImageDescription::new_2d("early", 8, 8, ImageFormat::R32F));
        let late = builder.create_texture(RGImageDescription::new_2d("late", 8, 8, ImageFormat::R32F));
        let early_view = builder.create_image_view(early, None);
        let late_view = builder.create_image_view(late, None);

        builder.add_pass(
            "p0",
            RGPassParameters {
                members: vec![RGPassMember::new("uOut", RGMemberValue::StorageImage(early_view))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );
        builder.add_pass("p1", RGPassParameters::default(), RGPassHint::Compute, no_op());
        builder.add_pass("p2", RGPassParameters::default(), RGPassHint::Compute, no_op());
        builder.add_pass(
            "p3",
            RGPassParameters {
                members: vec![RGPassMember::new("uOut", RGMemberValue::StorageImage(late_view))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );

        let plan = plan(&builder, &registry).unwrap();

        let early_span = plan.aliased_images.iter().find(|span| span.resource == early).unwrap();
        let late_span = plan.aliased_images.iter().find(|span| span.resource == late).unwrap();

        // One pass of padding on each side.
        assert_eq!((early_span.first_use, early_span.last_use), (0, 1));
        assert_eq!((late_span.first_use, late_span.last_use), (2, 4));
    }

    #[test]
    fn unused_transient_resources_are_dropped() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let unused = builder.create_texture(RGImageDescription::new_2d("unused", 8, 8, ImageFormat::R32F));
        builder.add_pass("p0", RGPassParameters::default(), RGPassHint::Compute, no_op());

        let plan = plan(&builder, &registry).unwrap();
        assert_eq!(plan.dropped_images, vec![unused]);
    }

    #[test]
    fn unknown_binding_is_rejected() {
        let (registry, vertex, fragment) = registry_with_fragment_texture("uAlbedo");
        let mut builder = RenderGraphBuilder::new();

        let image = builder.create_texture(RGImageDescription::new_2d("A", 8, 8, ImageFormat::R8G8B8A8_UNORM));
        let target = builder.create_image_view(image, None);
        let framebuffer = builder.create_framebuffer(Vector2::new(8, 8), vec![target], None);

        let other = builder.create_texture(RGImageDescription::new_2d("B", 8, 8, ImageFormat::R8G8B8A8_UNORM));
        let sampled = builder.create_image_view(other, None);

        builder.add_raster_pass(
            "draw",
            RGGraphicsPipelineDescription {
                vertex,
                fragment,
                rasterization: Default::default(),
                depth_stencil: Default::default(),
                color_blend: Default::default(),
            },
            framebuffer,
            RGPassParameters {
                members: vec![RGPassMember::new("uMissing", RGMemberValue::SampledImage(sampled))],
                ..RGPassParameters::default()
            },
            no_op(),
        );

        match plan(&builder, &registry) {
            Err(RenderGraphError::UnknownBinding { binding, .. }) => assert_eq!(binding, "uMissing"),
            other => panic!("expected UnknownBinding, got {:?}", other.err().map(|e| e.to_string())),
        }
    }

    #[test]
    fn attachment_and_storage_in_one_pass_conflict() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let image = builder.create_texture(RGImageDescription::new_2d("A", 8, 8, ImageFormat::R8G8B8A8_UNORM));
        let target = builder.create_image_view(image, None);
        let storage = builder.create_image_view(image, None);
        let framebuffer = builder.create_framebuffer(Vector2::new(8, 8), vec![target], None);

        builder.add_pass(
            "broken",
            RGPassParameters {
                framebuffer: Some(framebuffer),
                members: vec![RGPassMember::new("uSelf", RGMemberValue::StorageImage(storage))],
                ..RGPassParameters::default()
            },
            RGPassHint::Raster,
            no_op(),
        );

        assert!(matches!(
            plan(&builder, &registry),
            Err(RenderGraphError::ConflictingUsagePerPass { .. })
        ));
    }

    #[test]
    fn immediate_write_after_consumption_is_cyclic() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let image = builder.create_texture(RGImageDescription::new_2d("I", 8, 8, ImageFormat::R32F));
        let sampled = builder.create_image_view(image, None);

        builder.add_pass(
            "consume",
            RGPassParameters {
                members: vec![RGPassMember::new("uInput", RGMemberValue::SampledImage(sampled))],
                ..RGPassParameters::default()
            },
            RGPassHint::Compute,
            no_op(),
        );
        builder.add_immediate_pass(
            "late-write",
            RGPassParameters {
                written_images: vec![image],
                ..RGPassParameters::default()
            },
            no_op(),
        );

        assert!(matches!(
            plan(&builder, &registry),
            Err(RenderGraphError::CyclicImmediate { .. })
        ));
    }

    /// Shadow-cascade shape: three depth passes into distinct layer views
    /// of one image share the image and derive Clear-then-Load chains.
    #[test]
    fn depth_cascades_clear_then_load() {
        let registry = ShaderRegistry::new();
        let mut builder = RenderGraphBuilder::new();

        let depth = builder.create_texture(RGImageDescription {
            name: "cascades".to_owned(),
            image_type: crate::rhi::rhi_enums::ImageType::Image2D,
            format: ImageFormat::D32F,
            width: 2048,
            height: 2048,
            num_mips: 1,
            num_layers: 3,
        });

        let mut views = Vec::new();
        for layer in 0..3u32 {
            let view = builder.create_image_view(
                depth,
                Some(crate::rhi::rhi_structs::ImageViewRange::single(0, layer)),
            );
            views.push(view);
            let framebuffer = builder.create_framebuffer(Vector2::new(2048, 2048), Vec::new(), Some(view));
            builder.add_pass(
                format!("cascade-{}", layer),
                raster_params(framebuffer),
                RGPassHint::Raster,
                no_op(),
            );
        }

        let plan = plan(&builder, &registry).unwrap();

        let first = plan.attachment_ops[0][&views[0]];
        assert_eq!(first.load_op, LoadOperation::Clear);
        assert_eq!(first.initial_state, ResourceState::Undefined);

        for pass_index in 1..3 {
            let ops = plan.attachment_ops[pass_index][&views[pass_index]];
            assert_eq!(ops.load_op, LoadOperation::Load);
            assert_eq!(ops.initial_state, ResourceState::DepthStencilAttachment);
        }
    }
}
