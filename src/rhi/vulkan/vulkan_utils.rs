#![allow(unsafe_code)]

//! Conversions between the engine's enums and their Vulkan counterparts.

use ash::vk;

use crate::rhi::rhi_enums::*;
use crate::rhi::rhi_structs::{AttachmentLayout, ImageViewRange};

/// Stage and access bits are defined to match their Vulkan counterparts,
/// so mask conversion is a reinterpretation.
#[inline]
pub fn to_vk_pipeline_stages(stages: PipelineStageFlags) -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::from_raw(stages.bits())
}

#[inline]
pub fn to_vk_access_flags(access: ResourceAccessFlags) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(access.bits())
}

pub fn to_vk_format(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::R32F => vk::Format::R32_SFLOAT,
        ImageFormat::R16G16F => vk::Format::R16G16_SFLOAT,
        ImageFormat::R32G32F => vk::Format::R32G32_SFLOAT,
        ImageFormat::R32G32B32F => vk::Format::R32G32B32_SFLOAT,
        ImageFormat::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_SRGB,
        ImageFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::R16G16B16A16F => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::R32G32B32A32F => vk::Format::R32G32B32A32_SFLOAT,
        ImageFormat::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_SRGB,
        ImageFormat::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::D32F => vk::Format::D32_SFLOAT,
    }
}

pub fn from_vk_format(format: vk::Format) -> Option<ImageFormat> {
    let mapped = match format {
        vk::Format::R32_SFLOAT => ImageFormat::R32F,
        vk::Format::R16G16_SFLOAT => ImageFormat::R16G16F,
        vk::Format::R32G32_SFLOAT => ImageFormat::R32G32F,
        vk::Format::R32G32B32_SFLOAT => ImageFormat::R32G32B32F,
        vk::Format::R8G8B8A8_SRGB => ImageFormat::R8G8B8A8_SRGB,
        vk::Format::R8G8B8A8_UNORM => ImageFormat::R8G8B8A8_UNORM,
        vk::Format::R16G16B16A16_SFLOAT => ImageFormat::R16G16B16A16F,
        vk::Format::R32G32B32A32_SFLOAT => ImageFormat::R32G32B32A32F,
        vk::Format::B8G8R8A8_SRGB => ImageFormat::B8G8R8A8_SRGB,
        vk::Format::B8G8R8A8_UNORM => ImageFormat::B8G8R8A8_UNORM,
        vk::Format::D32_SFLOAT => ImageFormat::D32F,
        _ => return None,
    };

    Some(mapped)
}

pub fn to_vk_image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::General => vk::ImageLayout::GENERAL,
        ResourceState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub fn to_vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::UNORDERED_ACCESS) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE) {
        flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_INPUT) {
        flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if usage.contains(BufferUsage::SHADER_BINDING_TABLE) {
        flags |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }

    flags
}

pub fn to_vk_image_usage(usage: ImageUsage, format: ImageFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::ATTACHMENT) {
        flags |= if format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
    }
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::UNORDERED_ACCESS) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }

    flags
}

pub fn to_vk_image_type(image_type: ImageType) -> vk::ImageType {
    match image_type {
        ImageType::Image1D => vk::ImageType::TYPE_1D,
        ImageType::Image2D | ImageType::Cubemap => vk::ImageType::TYPE_2D,
        ImageType::Image3D => vk::ImageType::TYPE_3D,
    }
}

pub fn to_vk_image_view_type(image_type: ImageType, layer_count: u32) -> vk::ImageViewType {
    match image_type {
        ImageType::Image1D => vk::ImageViewType::TYPE_1D,
        ImageType::Image3D => vk::ImageViewType::TYPE_3D,
        ImageType::Cubemap if layer_count == 6 => vk::ImageViewType::CUBE,
        ImageType::Cubemap | ImageType::Image2D if layer_count > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

pub fn aspect_mask_for(format: ImageFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn to_vk_subresource_range(range: ImageViewRange, format: ImageFormat) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::builder()
        .aspect_mask(aspect_mask_for(format))
        .base_mip_level(range.mip_base)
        .level_count(range.mip_count)
        .base_array_layer(range.layer_base)
        .layer_count(range.layer_count)
        .build()
}

pub fn to_vk_shader_stages(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();

    if stages.contains(ShaderStageFlags::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    if stages.contains(ShaderStageFlags::RAYGEN) {
        flags |= vk::ShaderStageFlags::RAYGEN_KHR;
    }
    if stages.contains(ShaderStageFlags::ANY_HIT) {
        flags |= vk::ShaderStageFlags::ANY_HIT_KHR;
    }
    if stages.contains(ShaderStageFlags::CLOSEST_HIT) {
        flags |= vk::ShaderStageFlags::CLOSEST_HIT_KHR;
    }
    if stages.contains(ShaderStageFlags::MISS) {
        flags |= vk::ShaderStageFlags::MISS_KHR;
    }
    if stages.contains(ShaderStageFlags::INTERSECTION) {
        flags |= vk::ShaderStageFlags::INTERSECTION_KHR;
    }

    flags
}

pub fn to_vk_descriptor_type(kind: ShaderResourceKind) -> vk::DescriptorType {
    match kind {
        ShaderResourceKind::TextureSrv => vk::DescriptorType::SAMPLED_IMAGE,
        ShaderResourceKind::TextureUav => vk::DescriptorType::STORAGE_IMAGE,
        ShaderResourceKind::BufferSrv | ShaderResourceKind::BufferUav => vk::DescriptorType::STORAGE_BUFFER,
        ShaderResourceKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ShaderResourceKind::Sampler => vk::DescriptorType::SAMPLER,
        ShaderResourceKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

pub fn to_vk_load_op(op: LoadOperation) -> vk::AttachmentLoadOp {
    match op {
        LoadOperation::Load => vk::AttachmentLoadOp::LOAD,
        LoadOperation::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOperation::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn to_vk_store_op(op: StoreOperation) -> vk::AttachmentStoreOp {
    match op {
        StoreOperation::Store => vk::AttachmentStoreOp::STORE,
        StoreOperation::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn to_vk_attachment_description(layout: &AttachmentLayout) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(to_vk_format(layout.format))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(to_vk_load_op(layout.load_op))
        .store_op(to_vk_store_op(layout.store_op))
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(to_vk_image_layout(layout.initial_state))
        .final_layout(match layout.final_state {
            // A render pass may not leave an attachment in UNDEFINED.
            ResourceState::Undefined => vk::ImageLayout::GENERAL,
            state => to_vk_image_layout(state),
        })
        .build()
}

pub fn to_vk_filter(filter: FilterMode) -> vk::Filter {
    match filter {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn to_vk_mipmap_mode(filter: FilterMode) -> vk::SamplerMipmapMode {
    match filter {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn to_vk_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn to_vk_border_color(color: BorderColor) -> vk::BorderColor {
    match color {
        BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        BorderColor::OpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        BorderColor::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    }
}

pub fn to_vk_compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn to_vk_polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

pub fn to_vk_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn to_vk_front_face(front_face: FrontFace) -> vk::FrontFace {
    match front_face {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

pub fn to_vk_blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn to_vk_blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn to_vk_logic_op(op: LogicOp) -> vk::LogicOp {
    match op {
        LogicOp::Clear => vk::LogicOp::CLEAR,
        LogicOp::And => vk::LogicOp::AND,
        LogicOp::Copy => vk::LogicOp::COPY,
        LogicOp::NoOp => vk::LogicOp::NO_OP,
        LogicOp::Xor => vk::LogicOp::XOR,
        LogicOp::Or => vk::LogicOp::OR,
        LogicOp::Set => vk::LogicOp::SET,
    }
}

pub fn to_vk_stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementAndClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementAndClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementAndWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementAndWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_access_bits_match_vulkan() {
        assert_eq!(
            to_vk_pipeline_stages(PipelineStageFlags::FRAGMENT_SHADER),
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(
            to_vk_pipeline_stages(PipelineStageFlags::ALL_COMMANDS),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
        assert_eq!(
            to_vk_access_flags(ResourceAccessFlags::SHADER_READ | ResourceAccessFlags::SHADER_WRITE),
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        );
    }

    #[test]
    fn format_round_trip() {
        for format in [
            ImageFormat::R32F,
            ImageFormat::R8G8B8A8_SRGB,
            ImageFormat::B8G8R8A8_UNORM,
            ImageFormat::D32F,
        ]
        .iter()
        {
            assert_eq!(from_vk_format(to_vk_format(*format)), Some(*format));
        }
    }
}
