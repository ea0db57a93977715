use bitflags::bitflags;
use failure::Fail;

/// Graphics APIs the engine can drive.
///
/// Vulkan is the reference backend. Additional backends plug in behind the
/// capability traits in `rhi_traits` and must be observationally equivalent
/// for render-graph users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum GraphicsApi {
    Vulkan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Dimensionality of an image resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Image1D,
    Image2D,
    Image3D,
    Cubemap,
}

/// Texel formats understood by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    R32F,
    R16G16F,
    R32G32F,
    R32G32B32F,
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    R16G16B16A16F,
    R32G32B32A32F,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    D32F,
}

impl ImageFormat {
    /// Whether the format is usable as a depth-stencil attachment.
    pub fn is_depth(self) -> bool {
        matches!(self, ImageFormat::D32F)
    }

    /// Size of one texel in bytes.
    pub fn texel_size(self) -> u64 {
        match self {
            ImageFormat::R32F | ImageFormat::R16G16F | ImageFormat::D32F => 4,
            ImageFormat::R8G8B8A8_SRGB
            | ImageFormat::R8G8B8A8_UNORM
            | ImageFormat::B8G8R8A8_SRGB
            | ImageFormat::B8G8R8A8_UNORM => 4,
            ImageFormat::R32G32F | ImageFormat::R16G16B16A16F => 8,
            ImageFormat::R32G32B32F => 12,
            ImageFormat::R32G32B32A32F => 16,
        }
    }
}

bitflags! {
    /// What a buffer may be used for. Drives memory placement and, on the
    /// Vulkan backend, `VkBufferUsageFlags`.
    pub struct BufferUsage: u32 {
        const VERTEX = 0x0001;
        const INDEX = 0x0002;
        const CONSTANT = 0x0004;
        const UNORDERED_ACCESS = 0x0008;
        const TRANSFER_SRC = 0x0010;
        const TRANSFER_DST = 0x0020;
        const HOST_VISIBLE = 0x0040;
        const ACCELERATION_STRUCTURE_STORAGE = 0x0080;
        const ACCELERATION_STRUCTURE_INPUT = 0x0100;
        const SHADER_BINDING_TABLE = 0x0200;
    }
}

bitflags! {
    /// What an image may be used for.
    pub struct ImageUsage: u32 {
        const ATTACHMENT = 0x01;
        const SAMPLED = 0x02;
        const UNORDERED_ACCESS = 0x04;
        const TRANSFER_SRC = 0x08;
        const TRANSFER_DST = 0x10;
    }
}

/// The tracked state of an image subresource range.
///
/// `General` is the unordered-access state: the image is bound for shader
/// reads and writes outside of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceState {
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

bitflags! {
    pub struct PipelineStageFlags: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const FRAGMENT_SHADER = 0x0000_0080;
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_GRAPHICS = 0x0000_8000;
        const ALL_COMMANDS = 0x0001_0000;
        const RAY_TRACING_SHADER = 0x0020_0000;
        const ACCELERATION_STRUCTURE_BUILD = 0x0200_0000;
    }
}

bitflags! {
    pub struct ResourceAccessFlags: u32 {
        const NONE = 0x0000_0000;
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
    }
}

bitflags! {
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0x0001;
        const FRAGMENT = 0x0010;
        const COMPUTE = 0x0020;
        const RAYGEN = 0x0100;
        const ANY_HIT = 0x0200;
        const CLOSEST_HIT = 0x0400;
        const MISS = 0x0800;
        const INTERSECTION = 0x1000;
    }
}

/// Categories a shader-visible resource binding can have.
///
/// Each kind lives in its own register space; the per-kind binding offsets
/// configured at device creation keep the spaces non-overlapping inside one
/// descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderResourceKind {
    TextureSrv,
    TextureUav,
    BufferSrv,
    BufferUav,
    ConstantBuffer,
    Sampler,
    AccelerationStructure,
}

/// View categories a resource can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Srv,
    Uav,
    Cbv,
    Rtv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineType {
    Graphics,
    Compute,
    RayTracing,
}

/// How a descriptor set is allocated and released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSetAllocationType {
    /// Bulk-freed by `reset_transient`; valid for one frame.
    Transient,
    /// Individually allocated and freed.
    Persistent,
    /// Variable-count, partially-bound, update-after-bind.
    Bindless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOperation {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    Clear,
    And,
    Copy,
    NoOp,
    Xor,
    Or,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

/// Kind of an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureType {
    BottomLevel,
    TopLevel,
}

/// Whether an acceleration-structure build starts fresh or refits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureBuildMode {
    Build,
    Update,
}

//
// Errors
//

/// The API-specific configuration does not match the requested graphics API.
#[derive(Fail, Debug, Clone, PartialEq, Eq)]
#[fail(
    display = "API-specific configuration is for {:?} but device creation requested {:?}",
    configured, requested
)]
pub struct ApiMismatchError {
    pub requested: GraphicsApi,
    pub configured: GraphicsApi,
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum DeviceCreationError {
    #[fail(display = "API-specific configuration does not match the requested graphics API")]
    ApiMismatch,

    #[fail(display = "No physical device satisfies the engine's requirements")]
    NoSuitableDevice,

    #[fail(display = "A required device feature is not available: {}", _0)]
    FeatureNotAvailable(String),

    #[fail(display = "The native API failed to initialize: {}", _0)]
    InitializationFailed(String),
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum ResourceCreationError {
    #[fail(display = "There's not enough device memory to create the requested resource")]
    OutOfDeviceMemory,

    #[fail(display = "There's not enough host memory to create the requested resource")]
    OutOfHostMemory,

    #[fail(display = "No memory type satisfies the resource's requirements")]
    NoCompatibleMemoryType,

    #[fail(display = "The device does not support the requested feature: {}", _0)]
    FeatureNotAvailable(String),

    #[fail(display = "Invalid resource description: {}", _0)]
    InvalidDescription(String),
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[fail(display = "There's not enough device memory to make the requested allocation")]
    OutOfDeviceMemory,

    #[fail(display = "No memory type satisfies every staged resource")]
    NoCompatibleMemoryType,

    #[fail(display = "The aliased allocator has already been finalized")]
    AllocatorAlreadyFinalized,

    #[fail(display = "Memory mapping failed")]
    MappingFailed,

    #[fail(display = "Unknown allocation id")]
    UnknownAllocation,
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum BufferAccessError {
    #[fail(display = "The buffer is not host visible")]
    NotHostVisible,

    #[fail(display = "Write of {} bytes at offset {} exceeds buffer size {}", len, offset, size)]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum PipelineCreationError {
    #[fail(display = "There's not enough memory to create the pipeline")]
    OutOfMemory,

    #[fail(display = "A required shader stage is missing: {}", _0)]
    MissingShaderStage(String),

    #[fail(display = "Unknown shader handle")]
    UnknownShader,

    #[fail(display = "One or more shaders failed to compile or link")]
    InvalidShader,

    #[fail(display = "The device does not support the requested pipeline kind: {}", _0)]
    FeatureNotAvailable(String),
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[fail(display = "Submitting the command buffer to its queue failed")]
    QueueSubmitFailed,

    #[fail(display = "The device was lost")]
    DeviceLost,
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum SwapchainError {
    #[fail(display = "The swapchain no longer matches the surface and must be recreated")]
    OutOfDate,

    #[fail(display = "The surface was lost")]
    SurfaceLost,

    #[fail(display = "The device was lost")]
    DeviceLost,

    #[fail(display = "There's not enough device memory for the swapchain images")]
    OutOfDeviceMemory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_are_exactly_the_depth_enumerants() {
        assert!(ImageFormat::D32F.is_depth());
        assert!(!ImageFormat::R8G8B8A8_UNORM.is_depth());
        assert!(!ImageFormat::R32F.is_depth());
    }

    #[test]
    fn texel_sizes_match_component_layout() {
        assert_eq!(ImageFormat::R32G32B32A32F.texel_size(), 16);
        assert_eq!(ImageFormat::R8G8B8A8_SRGB.texel_size(), 4);
        assert_eq!(ImageFormat::D32F.texel_size(), 4);
    }
}
