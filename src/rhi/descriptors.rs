//! Descriptor-set and pipeline-layout bookkeeping shared by every backend:
//! the two layout caches, the per-kind binding-offset policy and the
//! write-merge planner. Backends own the native objects; the hashing and
//! merging rules live here where they can be tested without a device.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fxhash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use crate::rhi::rhi_enums::{ShaderResourceKind, ShaderStageFlags};
use crate::rhi::rhi_structs::ResourceView;
use crate::rhi::rhi_traits::{AccelerationStructure, SamplerState};
use crate::settings::BindingOffsets;

/// Stable identity of a cached descriptor-set layout. Handle `0` is the
/// reserved empty-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetLayoutHandle(pub u64);

impl DescriptorSetLayoutHandle {
    pub const EMPTY: DescriptorSetLayoutHandle = DescriptorSetLayoutHandle(0);

    pub fn is_empty_layout(self) -> bool {
        self == DescriptorSetLayoutHandle::EMPTY
    }
}

/// Stable identity of a cached pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineLayoutHandle(pub u64);

/// One binding slot in a descriptor-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorItem {
    pub binding: u32,
    pub count: u32,
    pub stages: ShaderStageFlags,
    pub kind: ShaderResourceKind,
}

impl DescriptorItem {
    fn feed<H: Hasher>(&self, state: &mut H) {
        self.binding.hash(state);
        self.count.hash(state);
        self.stages.bits().hash(state);
        self.kind.hash(state);
    }
}

/// A push-constant declaration attached to a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub size: u32,
}

/// The binding offset separating `kind`'s register space from the others.
pub fn binding_offset_for(kind: ShaderResourceKind, offsets: &BindingOffsets) -> u32 {
    match kind {
        ShaderResourceKind::TextureSrv | ShaderResourceKind::BufferSrv => offsets.srv,
        ShaderResourceKind::TextureUav | ShaderResourceKind::BufferUav => offsets.uav,
        ShaderResourceKind::ConstantBuffer => offsets.cbv,
        ShaderResourceKind::Sampler => offsets.sampler,
        ShaderResourceKind::AccelerationStructure => offsets.acceleration_structure,
    }
}

/// A declared binding number shifted into its kind's register space.
pub fn effective_binding(binding: u32, kind: ShaderResourceKind, offsets: &BindingOffsets) -> u32 {
    binding + binding_offset_for(kind, offsets)
}

/// Ordered description of a descriptor-set layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorSetLayoutDescription {
    pub items: Vec<DescriptorItem>,
}

impl DescriptorSetLayoutDescription {
    /// Content hash, independent of the insertion order of the bindings.
    pub fn stable_hash(&self) -> DescriptorSetLayoutHandle {
        if self.items.is_empty() {
            return DescriptorSetLayoutHandle::EMPTY;
        }

        let mut sorted: SmallVec<[DescriptorItem; 8]> = SmallVec::from_slice(&self.items);
        sorted.sort_by(|a, b| (a.kind, a.binding).cmp(&(b.kind, b.binding)));

        let mut hasher = FxHasher::default();
        for item in &sorted {
            item.feed(&mut hasher);
        }

        let hash = hasher.finish();
        // 0 is the empty-set sentinel.
        DescriptorSetLayoutHandle(if hash == 0 { 1 } else { hash })
    }
}

/// Maps layout descriptions to stable handles and remembers the
/// description behind each handle.
#[derive(Default)]
pub struct DescriptorSetLayoutCache {
    descriptions: FxHashMap<DescriptorSetLayoutHandle, DescriptorSetLayoutDescription>,
}

impl DescriptorSetLayoutCache {
    pub fn new() -> Self {
        DescriptorSetLayoutCache::default()
    }

    /// Returns the stable handle for `description`, registering it on
    /// first sight. Whether the backend object already exists is the
    /// backend's business; `newly_registered` tells it.
    pub fn create(&mut self, description: &DescriptorSetLayoutDescription) -> (DescriptorSetLayoutHandle, bool) {
        let handle = description.stable_hash();
        if handle.is_empty_layout() || self.descriptions.contains_key(&handle) {
            return (handle, false);
        }

        self.descriptions.insert(handle, description.clone());
        (handle, true)
    }

    pub fn contains(&self, handle: DescriptorSetLayoutHandle) -> bool {
        handle.is_empty_layout() || self.descriptions.contains_key(&handle)
    }

    pub fn get(&self, handle: DescriptorSetLayoutHandle) -> Option<&DescriptorSetLayoutDescription> {
        self.descriptions.get(&handle)
    }
}

/// Ordered description of a pipeline layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineLayoutDescription {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant: Option<PushConstantRange>,
}

impl PipelineLayoutDescription {
    pub fn stable_hash(&self) -> PipelineLayoutHandle {
        let mut hasher = FxHasher::default();
        for handle in &self.set_layouts {
            handle.0.hash(&mut hasher);
        }
        if let Some(push_constant) = &self.push_constant {
            push_constant.stages.bits().hash(&mut hasher);
            push_constant.size.hash(&mut hasher);
        }

        PipelineLayoutHandle(hasher.finish())
    }
}

/// Maps pipeline-layout descriptions to stable handles and keeps the
/// push-constant declaration around for the command recorder to consult.
#[derive(Default)]
pub struct PipelineLayoutCache {
    descriptions: FxHashMap<PipelineLayoutHandle, PipelineLayoutDescription>,
}

impl PipelineLayoutCache {
    pub fn new() -> Self {
        PipelineLayoutCache::default()
    }

    pub fn create(&mut self, description: &PipelineLayoutDescription) -> (PipelineLayoutHandle, bool) {
        let handle = description.stable_hash();
        if self.descriptions.contains_key(&handle) {
            return (handle, false);
        }

        self.descriptions.insert(handle, description.clone());
        (handle, true)
    }

    pub fn contains(&self, handle: PipelineLayoutHandle) -> bool {
        self.descriptions.contains_key(&handle)
    }

    pub fn get(&self, handle: PipelineLayoutHandle) -> Option<&PipelineLayoutDescription> {
        self.descriptions.get(&handle)
    }

    pub fn push_constant_info(&self, handle: PipelineLayoutHandle) -> Option<PushConstantRange> {
        self.descriptions.get(&handle).and_then(|d| d.push_constant)
    }
}

/// The payload of one descriptor write.
#[derive(Clone)]
pub enum DescriptorValue {
    ImageView(ResourceView),
    BufferView(ResourceView),
    Sampler(Arc<dyn SamplerState>),
    AccelerationStructure(Arc<dyn AccelerationStructure>),
}

impl DescriptorValue {
    /// Identity fed into resource-group content hashes.
    pub fn identity(&self) -> u64 {
        match self {
            DescriptorValue::ImageView(view) | DescriptorValue::BufferView(view) => {
                let mut hasher = FxHasher::default();
                view.hash(&mut hasher);
                hasher.finish()
            }
            DescriptorValue::Sampler(sampler) => sampler.raw(),
            DescriptorValue::AccelerationStructure(acceleration_structure) => {
                acceleration_structure.id().0
            }
        }
    }
}

/// One write against a descriptor set, in declared (un-offset) binding
/// numbers.
#[derive(Clone)]
pub struct WriteDescriptor {
    pub binding: u32,
    pub kind: ShaderResourceKind,
    pub value: DescriptorValue,
}

/// One backend write record after merging: `count` consecutive descriptors
/// starting at array element `array_offset` of `binding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedWriteRun {
    /// Effective binding, offsets applied.
    pub binding: u32,
    pub kind: ShaderResourceKind,
    /// Index of the run's first write in the sorted write order.
    pub start: usize,
    pub count: u32,
}

/// Sorts `writes` by effective binding and coalesces consecutive writes to
/// the same binding and kind into single runs.
///
/// Returns the sorted permutation (indices into `writes`) and the runs over
/// that order, so a backend can gather its per-write payload arrays in run
/// order.
pub fn merge_write_runs(
    writes: &[WriteDescriptor],
    offsets: &BindingOffsets,
) -> (Vec<usize>, Vec<MergedWriteRun>) {
    let mut order: Vec<usize> = (0..writes.len()).collect();
    order.sort_by_key(|&i| effective_binding(writes[i].binding, writes[i].kind, offsets));

    let mut runs: Vec<MergedWriteRun> = Vec::new();
    for (position, &index) in order.iter().enumerate() {
        let write = &writes[index];
        let binding = effective_binding(write.binding, write.kind, offsets);

        match runs.last_mut() {
            Some(run) if run.binding == binding && run.kind == write.kind => run.count += 1,
            _ => runs.push(MergedWriteRun {
                binding,
                kind: write.kind,
                start: position,
                count: 1,
            }),
        }
    }

    (order, runs)
}

/// One named member of a resource group.
#[derive(Clone)]
pub struct ResourceGroupEntry {
    pub name: String,
    pub binding: u32,
    pub stages: ShaderStageFlags,
    pub kind: ShaderResourceKind,
    pub value: DescriptorValue,
}

/// A named bundle of views and samplers baked into one persistent
/// descriptor set.
#[derive(Clone, Default)]
pub struct ResourceGroupDescription {
    pub name: String,
    pub entries: Vec<ResourceGroupEntry>,
}

impl ResourceGroupDescription {
    /// Layout implied by the members.
    pub fn layout(&self) -> DescriptorSetLayoutDescription {
        DescriptorSetLayoutDescription {
            items: self
                .entries
                .iter()
                .map(|entry| DescriptorItem {
                    binding: entry.binding,
                    count: 1,
                    stages: entry.stages,
                    kind: entry.kind,
                })
                .collect(),
        }
    }

    /// Content hash used by the command recorder's re-bind elision.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for entry in &self.entries {
            entry.binding.hash(&mut hasher);
            entry.kind.hash(&mut hasher);
            entry.value.identity().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn writes(&self) -> Vec<WriteDescriptor> {
        self.entries
            .iter()
            .map(|entry| WriteDescriptor {
                binding: entry.binding,
                kind: entry.kind,
                value: entry.value.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handle::ResourceId;
    use crate::rhi::rhi_enums::{ViewKind};
    use crate::rhi::rhi_structs::ViewRange;

    fn item(binding: u32, kind: ShaderResourceKind) -> DescriptorItem {
        DescriptorItem {
            binding,
            count: 1,
            stages: ShaderStageFlags::FRAGMENT,
            kind,
        }
    }

    fn buffer_write(binding: u32) -> WriteDescriptor {
        WriteDescriptor {
            binding,
            kind: ShaderResourceKind::BufferSrv,
            value: DescriptorValue::BufferView(ResourceView {
                kind: ViewKind::Srv,
                resource: ResourceId(1),
                range: ViewRange::Buffer { offset: 0, size: 64 },
                format_override: None,
                raw: 0,
            }),
        }
    }

    #[test]
    fn layout_hash_is_insertion_order_independent() {
        let forward = DescriptorSetLayoutDescription {
            items: vec![item(0, ShaderResourceKind::TextureSrv), item(1, ShaderResourceKind::ConstantBuffer)],
        };
        let backward = DescriptorSetLayoutDescription {
            items: vec![item(1, ShaderResourceKind::ConstantBuffer), item(0, ShaderResourceKind::TextureSrv)],
        };

        assert_eq!(forward.stable_hash(), backward.stable_hash());
    }

    #[test]
    fn empty_layout_is_handle_zero() {
        assert_eq!(
            DescriptorSetLayoutDescription::default().stable_hash(),
            DescriptorSetLayoutHandle::EMPTY
        );
    }

    #[test]
    fn layout_cache_returns_stable_handles() {
        let mut cache = DescriptorSetLayoutCache::new();
        let description = DescriptorSetLayoutDescription {
            items: vec![item(0, ShaderResourceKind::TextureSrv)],
        };

        let (first, fresh) = cache.create(&description);
        let (second, again) = cache.create(&description);

        assert_eq!(first, second);
        assert!(fresh);
        assert!(!again);
        assert!(cache.contains(first));
    }

    #[test]
    fn pipeline_layout_cache_round_trips_push_constants() {
        let mut cache = PipelineLayoutCache::new();
        let push_constant = PushConstantRange {
            stages: ShaderStageFlags::VERTEX,
            size: 64,
        };
        let description = PipelineLayoutDescription {
            set_layouts: vec![DescriptorSetLayoutHandle(7), DescriptorSetLayoutHandle::EMPTY],
            push_constant: Some(push_constant),
        };

        let (handle, _) = cache.create(&description);
        let (same, fresh) = cache.create(&description);

        assert_eq!(handle, same);
        assert!(!fresh);
        assert_eq!(cache.push_constant_info(handle), Some(push_constant));
    }

    #[test]
    fn write_runs_merge_consecutive_bindings() {
        let offsets = BindingOffsets::default();
        let writes: Vec<WriteDescriptor> =
            [0, 0, 0, 2, 2, 5].iter().map(|&binding| buffer_write(binding)).collect();

        let (order, runs) = merge_write_runs(&writes, &offsets);

        assert_eq!(order.len(), 6);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].count, 3);
        assert_eq!(runs[1].count, 2);
        assert_eq!(runs[2].count, 1);
    }

    #[test]
    fn srv_and_acceleration_structure_share_no_binding_range() {
        let offsets = BindingOffsets::default();

        // A ray-tracing set routinely declares a texture and the scene
        // structure at the same source binding; their register spaces
        // must keep them apart.
        assert_ne!(
            effective_binding(0, ShaderResourceKind::TextureSrv, &offsets),
            effective_binding(0, ShaderResourceKind::AccelerationStructure, &offsets)
        );

        let kinds = [
            ShaderResourceKind::TextureSrv,
            ShaderResourceKind::TextureUav,
            ShaderResourceKind::ConstantBuffer,
            ShaderResourceKind::Sampler,
            ShaderResourceKind::AccelerationStructure,
        ];
        let mut effective: Vec<u32> = kinds.iter().map(|kind| effective_binding(0, *kind, &offsets)).collect();
        effective.sort_unstable();
        effective.dedup();
        assert_eq!(effective.len(), kinds.len());

        let layout = DescriptorSetLayoutDescription {
            items: vec![item(0, ShaderResourceKind::TextureSrv), item(0, ShaderResourceKind::AccelerationStructure)],
        };
        assert!(!layout.stable_hash().is_empty_layout());
    }

    #[test]
    fn srv_and_acceleration_structure_writes_do_not_merge() {
        let offsets = BindingOffsets::default();
        let srv = buffer_write(0);
        let writes = vec![
            WriteDescriptor {
                binding: 0,
                kind: ShaderResourceKind::TextureSrv,
                value: srv.value.clone(),
            },
            WriteDescriptor {
                binding: 0,
                kind: ShaderResourceKind::AccelerationStructure,
                value: srv.value,
            },
        ];

        let (_, runs) = merge_write_runs(&writes, &offsets);

        // Same declared binding, different register spaces: two distinct
        // write records, never one merged run.
        assert_eq!(runs.len(), 2);
        assert_ne!(runs[0].binding, runs[1].binding);
    }

    #[test]
    fn write_runs_apply_binding_offsets_per_kind() {
        let offsets = BindingOffsets::default();
        let writes = vec![
            WriteDescriptor {
                binding: 0,
                kind: ShaderResourceKind::TextureUav,
                value: buffer_write(0).value,
            },
            buffer_write(0),
        ];

        let (order, runs) = merge_write_runs(&writes, &offsets);

        // The SRV sorts before the UAV because of its lower register space.
        assert_eq!(order, vec![1, 0]);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].binding, offsets.srv);
        assert_eq!(runs[1].binding, offsets.uav);
    }
}
