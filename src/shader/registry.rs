//! The shader registry.
//!
//! Maps stable handles to reflected signatures plus the bytecode the
//! backend compiles. The render-graph compiler resolves pass parameter
//! names against these signatures, and pipeline creation pulls set-layout
//! descriptions out of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::rhi::descriptors::{DescriptorItem, DescriptorSetLayoutDescription, PushConstantRange};
use crate::shader::reflection::{reflect_spirv, ReflectionError, ShaderSignature};
use crate::rhi::rhi_enums::ShaderStageFlags;

/// Stable identity of a registered shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// A registered shader: its signature and (when it came from bytecode) the
/// words the backend will compile.
#[derive(Clone)]
pub struct ShaderModule {
    pub signature: ShaderSignature,
    pub bytecode: Arc<Vec<u32>>,
}

/// Thread-safe registry of shader modules.
#[derive(Default)]
pub struct ShaderRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    modules: HashMap<ShaderHandle, ShaderModule>,
    next_handle: u64,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        ShaderRegistry::default()
    }

    /// Registers compiled bytecode, reflecting its signature.
    pub fn register(&self, bytecode: Vec<u32>, stage: ShaderStageFlags) -> Result<ShaderHandle, ReflectionError> {
        let signature = reflect_spirv(&bytecode, stage)?;
        Ok(self.insert(ShaderModule {
            signature,
            bytecode: Arc::new(bytecode),
        }))
    }

    /// Registers a hand-built signature with no bytecode. Pipelines built
    /// from such shaders only work on backends that do not compile
    /// bytecode (the recording test device).
    pub fn register_signature(&self, signature: ShaderSignature) -> ShaderHandle {
        self.insert(ShaderModule {
            signature,
            bytecode: Arc::new(Vec::new()),
        })
    }

    fn insert(&self, module: ShaderModule) -> ShaderHandle {
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        let handle = ShaderHandle(inner.next_handle);
        inner.modules.insert(handle, module);
        handle
    }

    pub fn get(&self, handle: ShaderHandle) -> Option<ShaderModule> {
        self.inner.lock().unwrap().modules.get(&handle).cloned()
    }

    pub fn signature(&self, handle: ShaderHandle) -> Option<ShaderSignature> {
        self.get(handle).map(|module| module.signature)
    }

    /// Merges the signatures of several stages into one set-layout
    /// description per descriptor set, unioning stage masks of bindings
    /// shared between stages. The result is indexed by set number; sets
    /// with no bindings come out empty.
    pub fn merged_set_layouts(&self, handles: &[ShaderHandle]) -> Vec<DescriptorSetLayoutDescription> {
        let signatures: Vec<ShaderSignature> = handles
            .iter()
            .filter_map(|handle| self.signature(*handle))
            .collect();

        merged_set_layouts(&signatures)
    }

    /// The union of the stages' push-constant declarations, if any.
    pub fn merged_push_constant(&self, handles: &[ShaderHandle]) -> Option<PushConstantRange> {
        let mut merged: Option<PushConstantRange> = None;

        for handle in handles {
            let signature = match self.signature(*handle) {
                Some(signature) => signature,
                None => continue,
            };
            let push_constant = match signature.push_constant {
                Some(push_constant) => push_constant,
                None => continue,
            };

            merged = Some(match merged {
                None => push_constant,
                Some(existing) => PushConstantRange {
                    stages: existing.stages | push_constant.stages,
                    size: existing.size.max(push_constant.size),
                },
            });
        }

        merged
    }
}

/// See [`ShaderRegistry::merged_set_layouts`].
pub fn merged_set_layouts(signatures: &[ShaderSignature]) -> Vec<DescriptorSetLayoutDescription> {
    let max_set = signatures
        .iter()
        .flat_map(|signature| signature.bindings.iter())
        .map(|binding| binding.set)
        .max();

    let set_count = match max_set {
        Some(max) => max as usize + 1,
        None => 0,
    };

    let mut layouts = vec![DescriptorSetLayoutDescription::default(); set_count];

    for signature in signatures {
        for binding in &signature.bindings {
            let layout = &mut layouts[binding.set as usize];

            match layout
                .items
                .iter_mut()
                .find(|item| item.binding == binding.binding && item.kind == binding.kind)
            {
                Some(item) => item.stages |= binding.stages,
                None => layout.items.push(DescriptorItem {
                    binding: binding.binding,
                    count: binding.count,
                    stages: binding.stages,
                    kind: binding.kind,
                }),
            }
        }
    }

    layouts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::rhi_enums::ShaderResourceKind;
    use crate::shader::reflection::ShaderBindingInfo;

    fn signature(stage: ShaderStageFlags, bindings: Vec<ShaderBindingInfo>) -> ShaderSignature {
        ShaderSignature {
            stage,
            bindings,
            push_constant: None,
            vertex_inputs: Vec::new(),
        }
    }

    fn binding(name: &str, set: u32, slot: u32, stage: ShaderStageFlags) -> ShaderBindingInfo {
        ShaderBindingInfo {
            name: name.to_owned(),
            set,
            binding: slot,
            kind: ShaderResourceKind::TextureSrv,
            count: 1,
            stages: stage,
        }
    }

    #[test]
    fn registry_hands_out_distinct_handles() {
        let registry = ShaderRegistry::new();
        let first = registry.register_signature(signature(ShaderStageFlags::VERTEX, Vec::new()));
        let second = registry.register_signature(signature(ShaderStageFlags::FRAGMENT, Vec::new()));

        assert_ne!(first, second);
        assert!(registry.get(first).is_some());
    }

    #[test]
    fn merged_layouts_union_stage_masks() {
        let vertex = signature(
            ShaderStageFlags::VERTEX,
            vec![binding("uShared", 0, 0, ShaderStageFlags::VERTEX)],
        );
        let fragment = signature(
            ShaderStageFlags::FRAGMENT,
            vec![
                binding("uShared", 0, 0, ShaderStageFlags::FRAGMENT),
                binding("uAlbedo", 1, 0, ShaderStageFlags::FRAGMENT),
            ],
        );

        let layouts = merged_set_layouts(&[vertex, fragment]);

        assert_eq!(layouts.len(), 2);
        assert_eq!(layouts[0].items.len(), 1);
        assert_eq!(
            layouts[0].items[0].stages,
            ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT
        );
        assert_eq!(layouts[1].items.len(), 1);
    }

    #[test]
    fn merged_push_constant_takes_stage_union_and_max_size() {
        let registry = ShaderRegistry::new();
        let vertex = registry.register_signature(ShaderSignature {
            stage: ShaderStageFlags::VERTEX,
            bindings: Vec::new(),
            push_constant: Some(PushConstantRange {
                stages: ShaderStageFlags::VERTEX,
                size: 16,
            }),
            vertex_inputs: Vec::new(),
        });
        let fragment = registry.register_signature(ShaderSignature {
            stage: ShaderStageFlags::FRAGMENT,
            bindings: Vec::new(),
            push_constant: Some(PushConstantRange {
                stages: ShaderStageFlags::FRAGMENT,
                size: 32,
            }),
            vertex_inputs: Vec::new(),
        });

        let merged = registry.merged_push_constant(&[vertex, fragment]).unwrap();
        assert_eq!(merged.stages, ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT);
        assert_eq!(merged.size, 32);
    }
}
