use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cgmath::Vector4;

use super::rhi_enums::*;
use super::rhi_traits::{AccelerationStructure, BufferResource, Fence, ImageResource, Semaphore};
use crate::core::handle::ResourceId;
use crate::shader::ShaderHandle;

/// Size and placement constraints reported by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    /// Bitmask of memory types able to back the resource.
    pub memory_type_bits: u32,
}

/// Identifies one allocation inside a base allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(pub u64);

/// Result of placing a resource in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub id: AllocationId,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescription {
    pub name: String,
    pub size: u64,
    pub stride: u64,
    pub usage: BufferUsage,
    /// A virtual buffer is created without backing memory; an aliased
    /// allocator places it later.
    pub virtual_resource: bool,
}

impl Default for BufferDescription {
    fn default() -> Self {
        BufferDescription {
            name: String::new(),
            size: 0,
            stride: 0,
            usage: BufferUsage::empty(),
            virtual_resource: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    pub name: String,
    pub image_type: ImageType,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub num_mips: u32,
    pub num_layers: u32,
    pub usage: ImageUsage,
    pub virtual_resource: bool,
}

impl Default for ImageDescription {
    fn default() -> Self {
        ImageDescription {
            name: String::new(),
            image_type: ImageType::Image2D,
            format: ImageFormat::R8G8B8A8_UNORM,
            width: 1,
            height: 1,
            depth: 1,
            num_mips: 1,
            num_layers: 1,
            usage: ImageUsage::empty(),
            virtual_resource: false,
        }
    }
}

impl ImageDescription {
    /// Checks the structural invariants every image must satisfy.
    pub fn validate(&self) -> Result<(), ResourceCreationError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(ResourceCreationError::InvalidDescription(format!(
                "image '{}' has a zero extent",
                self.name
            )));
        }

        if self.image_type == ImageType::Cubemap && self.num_layers != 6 {
            return Err(ResourceCreationError::InvalidDescription(format!(
                "cubemap '{}' must have exactly 6 layers, has {}",
                self.name, self.num_layers
            )));
        }

        Ok(())
    }
}

/// Subresource range an image view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewRange {
    pub mip_base: u32,
    pub mip_count: u32,
    pub layer_base: u32,
    pub layer_count: u32,
}

impl ImageViewRange {
    pub fn whole(num_mips: u32, num_layers: u32) -> Self {
        ImageViewRange {
            mip_base: 0,
            mip_count: num_mips,
            layer_base: 0,
            layer_count: num_layers,
        }
    }

    pub fn single(mip: u32, layer: u32) -> Self {
        ImageViewRange {
            mip_base: mip,
            mip_count: 1,
            layer_base: layer,
            layer_count: 1,
        }
    }
}

/// The range a view refers into its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewRange {
    Image(ImageViewRange),
    Buffer { offset: u64, size: u64 },
}

/// A tagged reference into a resource.
///
/// Views are cheap value types. They carry the id of their owning resource
/// rather than a pointer, and a raw backend handle resolved by the backend
/// that minted them. A resource returns the identical view for an identical
/// `(kind, range, format)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceView {
    pub kind: ViewKind,
    pub resource: ResourceId,
    pub range: ViewRange,
    pub format_override: Option<ImageFormat>,
    /// Backend-specific view object, opaque at this layer.
    pub raw: u64,
}

/// Full key a view is cached under inside its owning resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDescription {
    pub kind: ViewKind,
    pub range: ImageViewRange,
    pub format_override: Option<ImageFormat>,
}

/// Sampler filtering and addressing description.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDescription {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub border_color: BorderColor,
    pub lod_min: f32,
    pub lod_max: f32,
    pub compare_op: Option<CompareOp>,
}

impl Default for SamplerDescription {
    fn default() -> Self {
        SamplerDescription {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            border_color: BorderColor::OpaqueBlack,
            lod_min: 0.0,
            lod_max: 32.0,
            compare_op: None,
        }
    }
}

impl PartialEq for SamplerDescription {
    fn eq(&self, other: &Self) -> bool {
        self.min_filter == other.min_filter
            && self.mag_filter == other.mag_filter
            && self.mip_filter == other.mip_filter
            && self.address_u == other.address_u
            && self.address_v == other.address_v
            && self.address_w == other.address_w
            && self.border_color == other.border_color
            && self.lod_min.to_bits() == other.lod_min.to_bits()
            && self.lod_max.to_bits() == other.lod_max.to_bits()
            && self.compare_op == other.compare_op
    }
}

impl Eq for SamplerDescription {}

impl Hash for SamplerDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.min_filter.hash(state);
        self.mag_filter.hash(state);
        self.mip_filter.hash(state);
        self.address_u.hash(state);
        self.address_v.hash(state);
        self.address_w.hash(state);
        self.border_color.hash(state);
        self.lod_min.to_bits().hash(state);
        self.lod_max.to_bits().hash(state);
        self.compare_op.hash(state);
    }
}

/// Geometry a bottom- or top-level acceleration structure is built over.
#[derive(Clone)]
pub enum AccelerationStructureGeometry {
    Triangles {
        vertex_buffer: Arc<dyn BufferResource>,
        vertex_format: ImageFormat,
        vertex_stride: u64,
        index_buffer: Option<Arc<dyn BufferResource>>,
    },
    Instances {
        max_instances: u32,
        allow_updates: bool,
    },
}

#[derive(Clone)]
pub struct AccelerationStructureDescription {
    pub name: String,
    pub as_type: AccelerationStructureType,
    pub geometry: AccelerationStructureGeometry,
}

/// Sizes reported for building an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccelerationStructureBuildSizes {
    pub acceleration_structure_size: u64,
    pub build_scratch_size: u64,
    pub update_scratch_size: u64,
}

/// One entry written into a top-level acceleration structure.
#[derive(Clone)]
pub struct AccelerationStructureInstance {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [[f32; 4]; 3],
    /// 24-bit custom index surfaced to shaders.
    pub custom_index: u32,
    pub mask: u8,
    /// 24-bit shader-binding-table record offset.
    pub sbt_offset: u32,
    pub flags: u8,
    pub blas: Arc<dyn AccelerationStructure>,
}

/// Hardware facts the core consults: limits and ray-tracing SBT layout
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub device_name: String,
    pub max_color_attachments: u32,
    pub max_bound_descriptor_sets: u32,
    pub max_bindless_descriptors: u32,
    pub supports_ray_tracing: bool,
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
}

impl Default for DeviceProperties {
    fn default() -> Self {
        DeviceProperties {
            device_name: String::new(),
            max_color_attachments: 8,
            max_bound_descriptor_sets: 8,
            max_bindless_descriptors: 4096,
            supports_ray_tracing: false,
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
        }
    }
}

/// One framebuffer attachment with its derived operations and states.
#[derive(Clone)]
pub struct FramebufferAttachment {
    pub image: Arc<dyn ImageResource>,
    pub view: ResourceView,
    pub load_op: LoadOperation,
    pub store_op: StoreOperation,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
    /// Color attachments read all four channels; depth attachments read
    /// `clear_value.x` as depth and clear stencil to zero.
    pub clear_value: Vector4<f32>,
}

impl FramebufferAttachment {
    pub fn format(&self) -> ImageFormat {
        self.view.format_override.unwrap_or_else(|| self.image.format())
    }
}

#[derive(Clone, Default)]
pub struct FramebufferDescription {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<FramebufferAttachment>,
    pub depth_stencil_attachment: Option<FramebufferAttachment>,
}

impl FramebufferDescription {
    /// Checks the framebuffer invariants: a non-zero extent, at least one
    /// attachment, depth formats only on the depth-stencil slot.
    pub fn validate(&self) -> Result<(), ResourceCreationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ResourceCreationError::InvalidDescription(format!(
                "framebuffer '{}' has a zero extent",
                self.name
            )));
        }

        if self.color_attachments.is_empty() && self.depth_stencil_attachment.is_none() {
            return Err(ResourceCreationError::InvalidDescription(format!(
                "framebuffer '{}' has no attachments",
                self.name
            )));
        }

        for attachment in &self.color_attachments {
            if attachment.format().is_depth() {
                return Err(ResourceCreationError::InvalidDescription(format!(
                    "framebuffer '{}' binds a depth format as a color attachment",
                    self.name
                )));
            }
        }

        if let Some(depth) = &self.depth_stencil_attachment {
            if !depth.format().is_depth() {
                return Err(ResourceCreationError::InvalidDescription(format!(
                    "framebuffer '{}' binds a color format as its depth-stencil attachment",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// The attachment layout two framebuffers must share to reuse one
    /// cached render pass.
    pub fn render_pass_layout(&self) -> RenderPassLayout {
        let mut attachments: Vec<AttachmentLayout> = self
            .color_attachments
            .iter()
            .map(|a| AttachmentLayout {
                format: a.format(),
                load_op: a.load_op,
                store_op: a.store_op,
                initial_state: a.initial_state,
                final_state: a.final_state,
                is_depth: false,
            })
            .collect();

        if let Some(depth) = &self.depth_stencil_attachment {
            attachments.push(AttachmentLayout {
                format: depth.format(),
                load_op: depth.load_op,
                store_op: depth.store_op,
                initial_state: depth.initial_state,
                final_state: depth.final_state,
                is_depth: true,
            });
        }

        RenderPassLayout { attachments }
    }
}

/// Format + op signature of one attachment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentLayout {
    pub format: ImageFormat,
    pub load_op: LoadOperation,
    pub store_op: StoreOperation,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
    pub is_depth: bool,
}

/// Key for the render-pass cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderPassLayout {
    pub attachments: Vec<AttachmentLayout>,
}

//
// Pipeline state
//

/// A shader stage reference: a registry handle plus an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderFunction {
    pub shader: ShaderHandle,
    pub entry_point: String,
}

impl ShaderFunction {
    pub fn new(shader: ShaderHandle, entry_point: impl Into<String>) -> Self {
        ShaderFunction {
            shader,
            entry_point: entry_point.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthBias {
    pub enabled: bool,
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

impl Default for DepthBias {
    fn default() -> Self {
        DepthBias {
            enabled: false,
            constant_factor: 0.0,
            clamp: 0.0,
            slope_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizationState {
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: DepthBias,
}

impl Default for RasterizationState {
    fn default() -> Self {
        RasterizationState {
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_bias: DepthBias::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StencilState {
    pub enabled: bool,
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
}

impl Default for StencilState {
    fn default() -> Self {
        StencilState {
            enabled: false,
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: CompareOp,
    pub depth_bounds_test: bool,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
    pub stencil: StencilState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        DepthStencilState {
            depth_test: true,
            depth_write: true,
            depth_compare_op: CompareOp::Less,
            depth_bounds_test: false,
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
            stencil: StencilState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColorAttachmentBlend {
    pub blend_enabled: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_op: BlendOp,
}

impl Default for ColorAttachmentBlend {
    fn default() -> Self {
        ColorAttachmentBlend {
            blend_enabled: false,
            src_color_factor: BlendFactor::One,
            dst_color_factor: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColorBlendState {
    pub logic_op: Option<LogicOp>,
    /// Per-attachment blending; an empty list means default blending on
    /// every color attachment of the target framebuffer.
    pub attachments: Vec<ColorAttachmentBlend>,
    pub blend_constants: [f32; 4],
}

/// Formats of the render target a graphics pipeline will draw into. Two
/// framebuffers with identical signatures are pipeline-compatible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FramebufferSignature {
    pub color_formats: Vec<ImageFormat>,
    pub depth_format: Option<ImageFormat>,
}

impl FramebufferSignature {
    pub fn of(description: &FramebufferDescription) -> Self {
        FramebufferSignature {
            color_formats: description.color_attachments.iter().map(|a| a.format()).collect(),
            depth_format: description.depth_stencil_attachment.as_ref().map(|a| a.format()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescription {
    pub name: String,
    pub vertex: ShaderFunction,
    pub fragment: ShaderFunction,
    pub rasterization: RasterizationState,
    pub depth_stencil: DepthStencilState,
    pub color_blend: ColorBlendState,
    pub target: FramebufferSignature,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDescription {
    pub name: String,
    pub shader: ShaderFunction,
}

#[derive(Debug, Clone)]
pub struct HitGroup {
    pub closest_hit: ShaderFunction,
    pub any_hit: Option<ShaderFunction>,
    pub intersection: Option<ShaderFunction>,
}

#[derive(Debug, Clone)]
pub struct RayTracingPipelineDescription {
    pub name: String,
    pub raygen: ShaderFunction,
    pub miss: Vec<ShaderFunction>,
    pub hit_groups: Vec<HitGroup>,
    pub max_recursion_depth: u32,
}

/// A strided device-address range of shader-binding-table records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StridedRegion {
    pub device_address: u64,
    pub stride: u64,
    pub size: u64,
}

/// The four record ranges `trace_rays` consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderBindingTable {
    pub raygen: StridedRegion,
    pub miss: StridedRegion,
    pub hit: StridedRegion,
    pub callable: StridedRegion,
}

/// Semaphores and the fence attached to one queue submission.
#[derive(Clone, Default)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<Arc<dyn Semaphore>>,
    pub signal_semaphores: Vec<Arc<dyn Semaphore>>,
    pub signal_fence: Option<Arc<dyn Fence>>,
}

fn hash_f32<H: Hasher>(value: f32, state: &mut H) {
    value.to_bits().hash(state);
}

impl Hash for DepthBias {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enabled.hash(state);
        hash_f32(self.constant_factor, state);
        hash_f32(self.clamp, state);
        hash_f32(self.slope_factor, state);
    }
}

impl Hash for RasterizationState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.polygon_mode.hash(state);
        self.cull_mode.hash(state);
        self.front_face.hash(state);
        self.depth_bias.hash(state);
    }
}

impl Hash for StencilState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enabled.hash(state);
        self.fail_op.hash(state);
        self.pass_op.hash(state);
        self.depth_fail_op.hash(state);
        self.compare_op.hash(state);
    }
}

impl Hash for DepthStencilState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.depth_test.hash(state);
        self.depth_write.hash(state);
        self.depth_compare_op.hash(state);
        self.depth_bounds_test.hash(state);
        hash_f32(self.min_depth_bounds, state);
        hash_f32(self.max_depth_bounds, state);
        self.stencil.hash(state);
    }
}

impl Hash for ColorAttachmentBlend {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.blend_enabled.hash(state);
        self.src_color_factor.hash(state);
        self.dst_color_factor.hash(state);
        self.color_op.hash(state);
        self.src_alpha_factor.hash(state);
        self.dst_alpha_factor.hash(state);
        self.alpha_op.hash(state);
    }
}

impl Hash for ColorBlendState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.logic_op.hash(state);
        self.attachments.hash(state);
        for constant in &self.blend_constants {
            hash_f32(*constant, state);
        }
    }
}

impl Hash for GraphicsPipelineDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vertex.hash(state);
        self.fragment.hash(state);
        self.rasterization.hash(state);
        self.depth_stencil.hash(state);
        self.color_blend.hash(state);
        self.target.hash(state);
    }
}

impl GraphicsPipelineDescription {
    /// Content hash the pipeline cache keys on. The name is excluded: two
    /// identically configured pipelines are the same pipeline.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = fxhash::FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl ComputePipelineDescription {
    pub fn content_hash(&self) -> u64 {
        let mut hasher = fxhash::FxHasher::default();
        self.shader.hash(&mut hasher);
        hasher.finish()
    }
}

impl RayTracingPipelineDescription {
    pub fn content_hash(&self) -> u64 {
        let mut hasher = fxhash::FxHasher::default();
        self.raygen.hash(&mut hasher);
        self.miss.hash(&mut hasher);
        for group in &self.hit_groups {
            group.closest_hit.hash(&mut hasher);
            group.any_hit.hash(&mut hasher);
            group.intersection.hash(&mut hasher);
        }
        self.max_recursion_depth.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubemap_layer_invariant() {
        let description = ImageDescription {
            name: "environment".to_owned(),
            image_type: ImageType::Cubemap,
            num_layers: 6,
            usage: ImageUsage::SAMPLED,
            ..ImageDescription::default()
        };
        assert!(description.validate().is_ok());

        let broken = ImageDescription {
            num_layers: 5,
            ..description
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn sampler_descriptions_hash_on_content() {
        use std::collections::hash_map::DefaultHasher;

        let a = SamplerDescription::default();
        let b = SamplerDescription::default();
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);

        assert_eq!(a, b);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn pipeline_content_hash_ignores_name() {
        let description = GraphicsPipelineDescription {
            name: "first".to_owned(),
            vertex: ShaderFunction::new(ShaderHandle(1), "vsMain"),
            fragment: ShaderFunction::new(ShaderHandle(2), "fsMain"),
            rasterization: RasterizationState::default(),
            depth_stencil: DepthStencilState::default(),
            color_blend: ColorBlendState::default(),
            target: FramebufferSignature {
                color_formats: vec![ImageFormat::R8G8B8A8_UNORM],
                depth_format: None,
            },
        };

        let renamed = GraphicsPipelineDescription {
            name: "second".to_owned(),
            ..description.clone()
        };

        assert_eq!(description.content_hash(), renamed.content_hash());
    }
}
