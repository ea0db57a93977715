//! The declarative side of the render graph.
//!
//! A builder collects resource declarations and an ordered pass list; it
//! never touches the GPU. Dropping a builder discards the frame with no
//! cleanup to do. Compilation (`RenderGraph::build`) consumes the builder.

use std::sync::Arc;

use cgmath::Vector2;

use crate::core::handle::SlotMap;
use crate::render_graph::handles::*;
use crate::render_graph::resources::PassResources;
use crate::rhi::descriptors::ResourceGroupDescription;
use crate::rhi::rhi_enums::{ImageFormat, ImageType, ResourceState, ViewKind};
use crate::rhi::rhi_structs::{
    ColorBlendState, DepthStencilState, ImageViewRange, RasterizationState, ShaderFunction,
};
use crate::rhi::rhi_traits::{
    AccelerationStructure, BufferResource, CommandRecorder, ImageResource, SamplerState,
};

/// Callback recorded for a pass, invoked at graph-execute time.
pub type RGCallback = Box<dyn Fn(&mut dyn CommandRecorder, &PassResources)>;

/// How a pass wants to be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RGPassHint {
    Raster,
    Compute,
    RayTracing,
    /// Recorded into the command buffer in builder order with no automatic
    /// transitions around it.
    Immediate,
}

/// A transient buffer declaration.
#[derive(Debug, Clone)]
pub struct RGBufferDescription {
    pub name: String,
    pub size: u64,
    pub stride: u64,
}

/// A transient image declaration. Usage bits are not part of the
/// declaration; the compiler derives them from the pass list.
#[derive(Debug, Clone)]
pub struct RGImageDescription {
    pub name: String,
    pub image_type: ImageType,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub num_mips: u32,
    pub num_layers: u32,
}

impl RGImageDescription {
    pub fn new_2d(name: impl Into<String>, width: u32, height: u32, format: ImageFormat) -> Self {
        RGImageDescription {
            name: name.into(),
            image_type: ImageType::Image2D,
            format,
            width,
            height,
            num_mips: 1,
            num_layers: 1,
        }
    }
}

pub(crate) enum RGBufferDecl {
    External {
        buffer: Arc<dyn BufferResource>,
    },
    Transient {
        description: RGBufferDescription,
        initial_data: Option<Vec<u8>>,
    },
}

impl RGBufferDecl {
    pub(crate) fn name(&self) -> &str {
        match self {
            RGBufferDecl::External { buffer } => buffer.name(),
            RGBufferDecl::Transient { description, .. } => &description.name,
        }
    }

    pub(crate) fn is_external(&self) -> bool {
        matches!(self, RGBufferDecl::External { .. })
    }
}

pub(crate) enum RGImageDecl {
    External {
        image: Arc<dyn ImageResource>,
        /// State the caller promises the image is in when the graph runs.
        incoming_state: ResourceState,
    },
    Transient {
        description: RGImageDescription,
    },
}

impl RGImageDecl {
    pub(crate) fn name(&self) -> &str {
        match self {
            RGImageDecl::External { image, .. } => image.name(),
            RGImageDecl::Transient { description } => &description.name,
        }
    }

    pub(crate) fn is_external(&self) -> bool {
        matches!(self, RGImageDecl::External { .. })
    }

    pub(crate) fn format(&self) -> ImageFormat {
        match self {
            RGImageDecl::External { image, .. } => image.format(),
            RGImageDecl::Transient { description } => description.format,
        }
    }
}

pub(crate) struct RGCubemapDecl {
    pub cubemap: Arc<dyn ImageResource>,
}

pub(crate) struct RGAccelerationStructureDecl {
    pub acceleration_structure: Arc<dyn AccelerationStructure>,
}

pub(crate) struct RGImageViewDecl {
    pub image: RGImageRef,
    pub range: Option<ImageViewRange>,
}

pub(crate) struct RGBufferViewDecl {
    pub buffer: RGBufferRef,
    pub kind: ViewKind,
}

pub(crate) struct RGFramebufferDecl {
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<RGImageViewRef>,
    pub depth_stencil_attachment: Option<RGImageViewRef>,
}

/// What a pass parameter refers to.
#[derive(Clone)]
pub enum RGMemberValue {
    /// Read through a sampled-image binding.
    SampledImage(RGImageViewRef),
    /// Read and written through a storage-image binding.
    StorageImage(RGImageViewRef),
    SampledCubemap(RGCubemapRef),
    /// The view's own kind decides SRV / UAV / CBV.
    BufferView(RGBufferViewRef),
    AccelerationStructure(RGAccelerationStructureRef),
    Sampler(Arc<dyn SamplerState>),
}

/// One named parameter of a pass, matched against the pass shaders'
/// reflected bindings.
#[derive(Clone)]
pub struct RGPassMember {
    pub name: String,
    pub value: RGMemberValue,
}

impl RGPassMember {
    pub fn new(name: impl Into<String>, value: RGMemberValue) -> Self {
        RGPassMember {
            name: name.into(),
            value,
        }
    }
}

/// Everything a pass declares: members for descriptor construction and
/// dependency tracking, pre-built resource groups, the target framebuffer
/// for raster passes, and explicit write lists for passes whose effects
/// are not visible through shader bindings (`Immediate` work, transfers).
#[derive(Default, Clone)]
pub struct RGPassParameters {
    pub members: Vec<RGPassMember>,
    /// Pre-built descriptor sets bound at the given set indices.
    pub resource_groups: Vec<(u32, RGResourceGroupRef)>,
    pub framebuffer: Option<RGFramebufferRef>,
    pub written_buffers: Vec<RGBufferRef>,
    pub written_images: Vec<RGImageRef>,
    pub written_acceleration_structures: Vec<RGAccelerationStructureRef>,
}

/// Pipeline state a raster pass carries; the target signature comes from
/// the pass's framebuffer.
#[derive(Clone)]
pub struct RGGraphicsPipelineDescription {
    pub vertex: ShaderFunction,
    pub fragment: ShaderFunction,
    pub rasterization: RasterizationState,
    pub depth_stencil: DepthStencilState,
    pub color_blend: ColorBlendState,
}

#[derive(Clone)]
pub struct RGRayTracingPipelineDescription {
    pub raygen: ShaderFunction,
    pub miss: Vec<ShaderFunction>,
    pub closest_hit: Vec<ShaderFunction>,
    pub max_recursion_depth: u32,
}

pub(crate) enum RGPassPipeline {
    /// The callback selects and binds its own pipeline.
    None,
    Graphics(RGGraphicsPipelineDescription),
    Compute(ShaderFunction),
    RayTracing(RGRayTracingPipelineDescription),
}

pub(crate) struct RGPassDecl {
    pub name: String,
    pub hint: RGPassHint,
    pub parameters: RGPassParameters,
    pub pipeline: RGPassPipeline,
    pub callback: RGCallback,
}

/// Collects a frame's resource declarations and passes.
#[derive(Default)]
pub struct RenderGraphBuilder {
    pub(crate) buffers: SlotMap<RGBufferRef, RGBufferDecl>,
    pub(crate) images: SlotMap<RGImageRef, RGImageDecl>,
    pub(crate) cubemaps: SlotMap<RGCubemapRef, RGCubemapDecl>,
    pub(crate) acceleration_structures: SlotMap<RGAccelerationStructureRef, RGAccelerationStructureDecl>,
    pub(crate) image_views: SlotMap<RGImageViewRef, RGImageViewDecl>,
    pub(crate) buffer_views: SlotMap<RGBufferViewRef, RGBufferViewDecl>,
    pub(crate) framebuffers: SlotMap<RGFramebufferRef, RGFramebufferDecl>,
    pub(crate) resource_groups: SlotMap<RGResourceGroupRef, ResourceGroupDescription>,
    pub(crate) passes: Vec<RGPassDecl>,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        RenderGraphBuilder::default()
    }

    //
    // External registration. The graph borrows these for the frame: it
    // never aliases them and only transitions them from the declared
    // incoming state.
    //

    pub fn register_external_buffer(&mut self, buffer: Arc<dyn BufferResource>) -> RGBufferRef {
        self.buffers.insert(RGBufferDecl::External { buffer })
    }

    pub fn register_external_texture(
        &mut self,
        image: Arc<dyn ImageResource>,
        incoming_state: ResourceState,
    ) -> RGImageRef {
        self.images.insert(RGImageDecl::External { image, incoming_state })
    }

    pub fn register_external_cubemap(&mut self, cubemap: Arc<dyn ImageResource>) -> RGCubemapRef {
        self.cubemaps.insert(RGCubemapDecl { cubemap })
    }

    pub fn register_external_acceleration_structure(
        &mut self,
        acceleration_structure: Arc<dyn AccelerationStructure>,
    ) -> RGAccelerationStructureRef {
        self.acceleration_structures
            .insert(RGAccelerationStructureDecl { acceleration_structure })
    }

    //
    // Transient resources; candidates for memory aliasing.
    //

    pub fn create_buffer(&mut self, description: RGBufferDescription) -> RGBufferRef {
        self.buffers.insert(RGBufferDecl::Transient {
            description,
            initial_data: None,
        })
    }

    pub fn create_texture(&mut self, description: RGImageDescription) -> RGImageRef {
        self.images.insert(RGImageDecl::Transient { description })
    }

    pub fn create_cubemap(&mut self, mut description: RGImageDescription) -> RGImageRef {
        description.image_type = ImageType::Cubemap;
        description.num_layers = 6;
        self.images.insert(RGImageDecl::Transient { description })
    }

    /// Creates a transient storage buffer holding `data`, uploaded before
    /// its first use.
    pub fn create_storage_buffer<T: Copy>(&mut self, name: impl Into<String>, data: &[T]) -> RGBufferRef {
        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len() * std::mem::size_of::<T>())
        };

        self.buffers.insert(RGBufferDecl::Transient {
            description: RGBufferDescription {
                name: name.into(),
                size: bytes.len() as u64,
                stride: std::mem::size_of::<T>() as u64,
            },
            initial_data: Some(bytes.to_vec()),
        })
    }

    //
    // Views.
    //

    /// A view over `range` of an image; `None` covers every mip and layer.
    pub fn create_image_view(&mut self, image: RGImageRef, range: Option<ImageViewRange>) -> RGImageViewRef {
        self.image_views.insert(RGImageViewDecl { image, range })
    }

    pub fn create_buffer_srv(&mut self, buffer: RGBufferRef) -> RGBufferViewRef {
        self.buffer_views.insert(RGBufferViewDecl {
            buffer,
            kind: ViewKind::Srv,
        })
    }

    pub fn create_buffer_uav(&mut self, buffer: RGBufferRef) -> RGBufferViewRef {
        self.buffer_views.insert(RGBufferViewDecl {
            buffer,
            kind: ViewKind::Uav,
        })
    }

    pub fn create_buffer_cbv(&mut self, buffer: RGBufferRef) -> RGBufferViewRef {
        self.buffer_views.insert(RGBufferViewDecl {
            buffer,
            kind: ViewKind::Cbv,
        })
    }

    //
    // Framebuffers and resource groups.
    //

    pub fn create_framebuffer(
        &mut self,
        extent: Vector2<u32>,
        color_attachments: Vec<RGImageViewRef>,
        depth_stencil_attachment: Option<RGImageViewRef>,
    ) -> RGFramebufferRef {
        self.framebuffers.insert(RGFramebufferDecl {
            width: extent.x,
            height: extent.y,
            color_attachments,
            depth_stencil_attachment,
        })
    }

    /// A persistent descriptor set baked once at graph build.
    pub fn create_resource_group(&mut self, description: ResourceGroupDescription) -> RGResourceGroupRef {
        self.resource_groups.insert(description)
    }

    //
    // Passes.
    //

    /// Records a pass whose callback does its own pipeline selection.
    /// Raster passes must carry a framebuffer in their parameters.
    pub fn add_pass(
        &mut self,
        name: impl Into<String>,
        parameters: RGPassParameters,
        hint: RGPassHint,
        callback: impl Fn(&mut dyn CommandRecorder, &PassResources) + 'static,
    ) {
        self.passes.push(RGPassDecl {
            name: name.into(),
            hint,
            parameters,
            pipeline: RGPassPipeline::None,
            callback: Box::new(callback),
        });
    }

    /// Raster pass sugar: pipeline description and framebuffer in one
    /// declaration; the pipeline is built at graph build and bound before
    /// the callback runs.
    pub fn add_raster_pass(
        &mut self,
        name: impl Into<String>,
        pipeline: RGGraphicsPipelineDescription,
        framebuffer: RGFramebufferRef,
        mut parameters: RGPassParameters,
        callback: impl Fn(&mut dyn CommandRecorder, &PassResources) + 'static,
    ) {
        parameters.framebuffer = Some(framebuffer);
        self.passes.push(RGPassDecl {
            name: name.into(),
            hint: RGPassHint::Raster,
            parameters,
            pipeline: RGPassPipeline::Graphics(pipeline),
            callback: Box::new(callback),
        });
    }

    pub fn add_compute_pass(
        &mut self,
        name: impl Into<String>,
        shader: ShaderFunction,
        parameters: RGPassParameters,
        callback: impl Fn(&mut dyn CommandRecorder, &PassResources) + 'static,
    ) {
        self.passes.push(RGPassDecl {
            name: name.into(),
            hint: RGPassHint::Compute,
            parameters,
            pipeline: RGPassPipeline::Compute(shader),
            callback: Box::new(callback),
        });
    }

    pub fn add_ray_tracing_pass(
        &mut self,
        name: impl Into<String>,
        pipeline: RGRayTracingPipelineDescription,
        parameters: RGPassParameters,
        callback: impl Fn(&mut dyn CommandRecorder, &PassResources) + 'static,
    ) {
        self.passes.push(RGPassDecl {
            name: name.into(),
            hint: RGPassHint::RayTracing,
            parameters,
            pipeline: RGPassPipeline::RayTracing(pipeline),
            callback: Box::new(callback),
        });
    }

    /// Records a pass executed verbatim, with no automatic transitions
    /// around it. Declared writes still participate in validation.
    pub fn add_immediate_pass(
        &mut self,
        name: impl Into<String>,
        parameters: RGPassParameters,
        callback: impl Fn(&mut dyn CommandRecorder, &PassResources) + 'static,
    ) {
        self.passes.push(RGPassDecl {
            name: name.into(),
            hint: RGPassHint::Immediate,
            parameters,
            pipeline: RGPassPipeline::None,
            callback: Box::new(callback),
        });
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}
