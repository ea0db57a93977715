//! SPIR-V reflection.
//!
//! Compiled shader bytecode is the single source of truth for resource
//! bindings: the reflected signature feeds the descriptor-set-layout cache,
//! push-constant declarations and the vertex input layout. Signatures can
//! also be built by hand where no bytecode exists (tests, precompiled
//! binding tables).

use failure::Fail;
use spirv_cross::{glsl, spirv};

use crate::rhi::descriptors::PushConstantRange;
use crate::rhi::rhi_enums::{ImageFormat, ShaderResourceKind, ShaderStageFlags};

/// Marker descriptor count for an unsized (bindless) binding array.
pub const BINDLESS_DESCRIPTOR_COUNT: u32 = u32::max_value();

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum ReflectionError {
    #[fail(display = "Failed to parse SPIR-V module: {}", _0)]
    ParseFailed(String),

    #[fail(display = "Resource '{}' is missing a set or binding decoration", _0)]
    MissingDecoration(String),

    #[fail(display = "Vertex input '{}' has an unsupported type", _0)]
    UnsupportedVertexInput(String),
}

/// One reflected resource binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBindingInfo {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub kind: ShaderResourceKind,
    /// Descriptor count; [`BINDLESS_DESCRIPTOR_COUNT`] for unsized arrays.
    pub count: u32,
    pub stages: ShaderStageFlags,
}

/// One reflected vertex input attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInputAttribute {
    pub name: String,
    pub location: u32,
    pub format: ImageFormat,
}

/// Everything the caches need to know about one shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSignature {
    pub stage: ShaderStageFlags,
    pub bindings: Vec<ShaderBindingInfo>,
    pub push_constant: Option<PushConstantRange>,
    /// Present only on vertex stages, ordered by location.
    pub vertex_inputs: Vec<VertexInputAttribute>,
}

impl Default for ShaderSignature {
    fn default() -> Self {
        ShaderSignature {
            stage: ShaderStageFlags::empty(),
            bindings: Vec::new(),
            push_constant: None,
            vertex_inputs: Vec::new(),
        }
    }
}

impl ShaderSignature {
    pub fn find_binding(&self, name: &str) -> Option<&ShaderBindingInfo> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    /// Tightly packed vertex stride implied by the input attributes.
    pub fn vertex_stride(&self) -> u64 {
        self.vertex_inputs.iter().map(|input| input.format.texel_size()).sum()
    }
}

fn map_parse_error(error: spirv_cross::ErrorCode) -> ReflectionError {
    let message = match error {
        spirv_cross::ErrorCode::Unhandled => "unhandled".to_owned(),
        spirv_cross::ErrorCode::CompilationError(message) => message,
    };

    ReflectionError::ParseFailed(message)
}

fn resource_count(ast: &spirv::Ast<glsl::Target>, resource: &spirv::Resource) -> u32 {
    let array = match ast.get_type(resource.type_id) {
        Ok(spirv::Type::Image { array, .. })
        | Ok(spirv::Type::SampledImage { array, .. })
        | Ok(spirv::Type::Sampler { array, .. })
        | Ok(spirv::Type::Struct { array, .. }) => array,
        _ => Vec::new(),
    };

    match array.first() {
        // A zero-sized dimension is a runtime array.
        Some(0) => BINDLESS_DESCRIPTOR_COUNT,
        Some(&count) => count,
        None => 1,
    }
}

fn reflect_binding(
    ast: &spirv::Ast<glsl::Target>,
    resource: &spirv::Resource,
    kind: ShaderResourceKind,
    stage: ShaderStageFlags,
) -> Result<ShaderBindingInfo, ReflectionError> {
    let set = ast
        .get_decoration(resource.id, spirv::Decoration::DescriptorSet)
        .map_err(|_| ReflectionError::MissingDecoration(resource.name.clone()))?;
    let binding = ast
        .get_decoration(resource.id, spirv::Decoration::Binding)
        .map_err(|_| ReflectionError::MissingDecoration(resource.name.clone()))?;

    Ok(ShaderBindingInfo {
        name: resource.name.clone(),
        set,
        binding,
        kind,
        count: resource_count(ast, resource),
        stages: stage,
    })
}

fn storage_buffer_kind(ast: &spirv::Ast<glsl::Target>, resource: &spirv::Resource) -> ShaderResourceKind {
    // Read-only storage buffers reflect as SRVs, writable ones as UAVs.
    match ast.get_decoration(resource.id, spirv::Decoration::NonWritable) {
        Ok(value) if value != 0 => ShaderResourceKind::BufferSrv,
        _ => ShaderResourceKind::BufferUav,
    }
}

fn vertex_input_format(
    ast: &spirv::Ast<glsl::Target>,
    resource: &spirv::Resource,
) -> Result<ImageFormat, ReflectionError> {
    let format = match ast.get_type(resource.base_type_id) {
        Ok(spirv::Type::Float { vecsize, .. }) => match vecsize {
            1 => ImageFormat::R32F,
            2 => ImageFormat::R32G32F,
            3 => ImageFormat::R32G32B32F,
            4 => ImageFormat::R32G32B32A32F,
            _ => return Err(ReflectionError::UnsupportedVertexInput(resource.name.clone())),
        },
        _ => return Err(ReflectionError::UnsupportedVertexInput(resource.name.clone())),
    };

    Ok(format)
}

/// Reflects one compiled stage into its binding signature.
pub fn reflect_spirv(bytecode: &[u32], stage: ShaderStageFlags) -> Result<ShaderSignature, ReflectionError> {
    let module = spirv::Module::from_words(bytecode);
    let ast = spirv::Ast::<glsl::Target>::parse(&module).map_err(map_parse_error)?;
    let resources = ast.get_shader_resources().map_err(map_parse_error)?;

    let mut bindings = Vec::new();

    for resource in &resources.sampled_images {
        bindings.push(reflect_binding(&ast, resource, ShaderResourceKind::TextureSrv, stage)?);
    }
    for resource in &resources.separate_images {
        bindings.push(reflect_binding(&ast, resource, ShaderResourceKind::TextureSrv, stage)?);
    }
    for resource in &resources.separate_samplers {
        bindings.push(reflect_binding(&ast, resource, ShaderResourceKind::Sampler, stage)?);
    }
    for resource in &resources.storage_images {
        bindings.push(reflect_binding(&ast, resource, ShaderResourceKind::TextureUav, stage)?);
    }
    for resource in &resources.uniform_buffers {
        bindings.push(reflect_binding(&ast, resource, ShaderResourceKind::ConstantBuffer, stage)?);
    }
    for resource in &resources.storage_buffers {
        let kind = storage_buffer_kind(&ast, resource);
        bindings.push(reflect_binding(&ast, resource, kind, stage)?);
    }

    let mut push_constant = None;
    if let Some(resource) = resources.push_constant_buffers.first() {
        let size = ast
            .get_declared_struct_size(resource.base_type_id)
            .map_err(map_parse_error)?;
        push_constant = Some(PushConstantRange { stages: stage, size });
    }

    let mut vertex_inputs = Vec::new();
    if stage.contains(ShaderStageFlags::VERTEX) {
        for resource in &resources.stage_inputs {
            let location = ast
                .get_decoration(resource.id, spirv::Decoration::Location)
                .map_err(|_| ReflectionError::MissingDecoration(resource.name.clone()))?;

            vertex_inputs.push(VertexInputAttribute {
                name: resource.name.clone(),
                location,
                format: vertex_input_format(&ast, resource)?,
            });
        }

        vertex_inputs.sort_by_key(|input| input.location);
    }

    bindings.sort_by_key(|binding| (binding.set, binding.binding));

    Ok(ShaderSignature {
        stage,
        bindings,
        push_constant,
        vertex_inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, set: u32, slot: u32, kind: ShaderResourceKind) -> ShaderBindingInfo {
        ShaderBindingInfo {
            name: name.to_owned(),
            set,
            binding: slot,
            kind,
            count: 1,
            stages: ShaderStageFlags::FRAGMENT,
        }
    }

    #[test]
    fn find_binding_matches_by_name() {
        let signature = ShaderSignature {
            stage: ShaderStageFlags::FRAGMENT,
            bindings: vec![
                binding("uAlbedo", 0, 0, ShaderResourceKind::TextureSrv),
                binding("uLights", 1, 0, ShaderResourceKind::ConstantBuffer),
            ],
            push_constant: None,
            vertex_inputs: Vec::new(),
        };

        assert_eq!(signature.find_binding("uLights").unwrap().set, 1);
        assert!(signature.find_binding("uMissing").is_none());
    }

    #[test]
    fn vertex_stride_sums_attribute_sizes() {
        let signature = ShaderSignature {
            stage: ShaderStageFlags::VERTEX,
            bindings: Vec::new(),
            push_constant: None,
            vertex_inputs: vec![
                VertexInputAttribute {
                    name: "aPosition".to_owned(),
                    location: 0,
                    format: ImageFormat::R32G32B32F,
                },
                VertexInputAttribute {
                    name: "aUv".to_owned(),
                    location: 1,
                    format: ImageFormat::R32G32F,
                },
            ],
        };

        assert_eq!(signature.vertex_stride(), 12 + 8);
    }
}
