//! Generational handles.
//!
//! Everything the render graph hands out is an index plus a generation so a
//! stale handle can never resolve to a recycled slot. The storage is a
//! slotmap per resource kind; the key types themselves live next to the
//! tables that use them (see `render_graph::handles`).

pub use slotmap::{new_key_type, Key, KeyData, SecondaryMap, SlotMap};

/// Monotonic identity assigned to every RHI resource at creation.
///
/// Views refer to their owning resource through this id instead of a
/// pointer, which keeps the resource/view graph acyclic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Reserved id that no live resource ever carries.
    pub const INVALID: ResourceId = ResourceId(0);

    pub fn is_valid(self) -> bool {
        self != ResourceId::INVALID
    }
}

/// Hands out process-unique [`ResourceId`]s.
pub struct ResourceIdAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl ResourceIdAllocator {
    pub const fn new() -> Self {
        ResourceIdAllocator {
            next: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> ResourceId {
        ResourceId(self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }
}

/// The process-wide resource identity counter.
pub static RESOURCE_IDS: ResourceIdAllocator = ResourceIdAllocator::new();

#[cfg(test)]
mod tests {
    use super::*;

    new_key_type! {
        struct TestRef;
    }

    #[test]
    fn freed_slot_reuse_bumps_generation() {
        let mut map: SlotMap<TestRef, u32> = SlotMap::with_key();

        let first = map.insert(7);
        map.remove(first);
        let second = map.insert(9);

        // The slot index may be recycled but the bit pattern must differ.
        assert_ne!(first.data().as_ffi(), second.data().as_ffi());
        assert!(map.get(first).is_none());
        assert_eq!(map[second], 9);
    }

    #[test]
    fn null_key_is_reserved_sentinel() {
        let mut map: SlotMap<TestRef, u32> = SlotMap::with_key();
        let key = map.insert(1);

        assert!(TestRef::null().is_null());
        assert_ne!(key, TestRef::null());
    }

    #[test]
    fn resource_ids_are_unique_and_valid() {
        let a = RESOURCE_IDS.allocate();
        let b = RESOURCE_IDS.allocate();

        assert_ne!(a, b);
        assert!(a.is_valid() && b.is_valid());
        assert!(!ResourceId::INVALID.is_valid());
    }
}
