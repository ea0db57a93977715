//! Shader bytecode reflection and the shader registry.

pub mod reflection;
pub mod registry;

pub use self::reflection::{
    reflect_spirv, ReflectionError, ShaderBindingInfo, ShaderSignature, VertexInputAttribute, BINDLESS_DESCRIPTOR_COUNT,
};
pub use self::registry::{ShaderHandle, ShaderModule, ShaderRegistry};
