//! Typed render-graph handles.
//!
//! Every resource the graph knows is addressed by an opaque index +
//! generation key with a reserved null sentinel. Handles are only
//! meaningful to the builder that minted them; resolving a foreign or
//! stale handle is a validation error, never undefined behavior.

use crate::core::handle::new_key_type;

new_key_type! {
    /// A buffer declared in a render graph.
    pub struct RGBufferRef;

    /// A 2D (or 1D/3D) image declared in a render graph.
    pub struct RGImageRef;

    /// A cubemap declared in a render graph.
    pub struct RGCubemapRef;

    /// An externally owned acceleration structure registered with a
    /// render graph.
    pub struct RGAccelerationStructureRef;

    /// A view into a declared image; its SRV/UAV/RTV category follows
    /// from where the pass parameters use it.
    pub struct RGImageViewRef;

    /// A typed (SRV, UAV or CBV) view of a declared buffer.
    pub struct RGBufferViewRef;

    /// A framebuffer declaration: an extent plus ordered attachments.
    pub struct RGFramebufferRef;

    /// A pre-built persistent descriptor set.
    pub struct RGResourceGroupRef;
}
