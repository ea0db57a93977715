//! Concrete resources behind the handles a pass declared.
//!
//! Callbacks receive a [`PassResources`] and look up the resources they
//! declared by handle. Handles that were never declared in the builder do
//! not resolve; that is a contract violation and terminates through the
//! fatal-diagnostic channel, since the compiler derived barriers only for
//! declared dependencies.

use std::sync::Arc;

use crate::core::diagnostics::FatalKind;
use crate::core::handle::SecondaryMap;
use crate::render_fatal;
use crate::render_graph::handles::*;
use crate::rhi::rhi_enums::ViewKind;
use crate::rhi::rhi_structs::{ImageViewDescription, ImageViewRange, ResourceView};
use crate::rhi::rhi_traits::{
    AccelerationStructure, BufferResource, Framebuffer, ImageResource, RenderDevice, ResourceGroup,
};

/// The resolved resource tables of one compiled graph.
pub struct PassResources {
    pub(crate) device: Arc<dyn RenderDevice>,
    pub(crate) images: SecondaryMap<RGImageRef, Arc<dyn ImageResource>>,
    pub(crate) buffers: SecondaryMap<RGBufferRef, Arc<dyn BufferResource>>,
    pub(crate) cubemaps: SecondaryMap<RGCubemapRef, Arc<dyn ImageResource>>,
    pub(crate) acceleration_structures: SecondaryMap<RGAccelerationStructureRef, Arc<dyn AccelerationStructure>>,
    pub(crate) image_views: SecondaryMap<RGImageViewRef, (RGImageRef, Option<ImageViewRange>)>,
    pub(crate) buffer_views: SecondaryMap<RGBufferViewRef, (RGBufferRef, ViewKind)>,
    pub(crate) framebuffers: SecondaryMap<RGFramebufferRef, Arc<dyn Framebuffer>>,
    pub(crate) resource_groups: SecondaryMap<RGResourceGroupRef, Arc<dyn ResourceGroup>>,
}

impl PassResources {
    /// The device the graph was built for; callbacks use it for cached
    /// pipeline lookup.
    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn image(&self, reference: RGImageRef) -> Arc<dyn ImageResource> {
        match self.images.get(reference) {
            Some(image) => image.clone(),
            None => render_fatal!(FatalKind::RecordingContract, "undeclared image handle {:?}", reference),
        }
    }

    pub fn buffer(&self, reference: RGBufferRef) -> Arc<dyn BufferResource> {
        match self.buffers.get(reference) {
            Some(buffer) => buffer.clone(),
            None => render_fatal!(FatalKind::RecordingContract, "undeclared buffer handle {:?}", reference),
        }
    }

    pub fn cubemap(&self, reference: RGCubemapRef) -> Arc<dyn ImageResource> {
        match self.cubemaps.get(reference) {
            Some(cubemap) => cubemap.clone(),
            None => render_fatal!(FatalKind::RecordingContract, "undeclared cubemap handle {:?}", reference),
        }
    }

    pub fn acceleration_structure(&self, reference: RGAccelerationStructureRef) -> Arc<dyn AccelerationStructure> {
        match self.acceleration_structures.get(reference) {
            Some(acceleration_structure) => acceleration_structure.clone(),
            None => render_fatal!(
                FatalKind::RecordingContract,
                "undeclared acceleration structure handle {:?}",
                reference
            ),
        }
    }

    pub fn framebuffer(&self, reference: RGFramebufferRef) -> Arc<dyn Framebuffer> {
        match self.framebuffers.get(reference) {
            Some(framebuffer) => framebuffer.clone(),
            None => render_fatal!(
                FatalKind::RecordingContract,
                "undeclared framebuffer handle {:?}",
                reference
            ),
        }
    }

    pub fn resource_group(&self, reference: RGResourceGroupRef) -> Arc<dyn ResourceGroup> {
        match self.resource_groups.get(reference) {
            Some(group) => group.clone(),
            None => render_fatal!(
                FatalKind::RecordingContract,
                "undeclared resource group handle {:?}",
                reference
            ),
        }
    }

    /// Resolves a declared image view as `kind`, minting (or re-using) the
    /// concrete view on the owning image.
    pub fn image_view(&self, reference: RGImageViewRef, kind: ViewKind) -> ResourceView {
        let (image_ref, range) = match self.image_views.get(reference) {
            Some(entry) => *entry,
            None => render_fatal!(
                FatalKind::RecordingContract,
                "undeclared image view handle {:?}",
                reference
            ),
        };

        let image = self.image(image_ref);
        match range {
            Some(range) => image.view(ImageViewDescription {
                kind,
                range,
                format_override: None,
            }),
            None => image.whole_view(kind),
        }
    }

    /// Resolves a declared buffer view to the concrete typed view.
    pub fn buffer_view(&self, reference: RGBufferViewRef) -> ResourceView {
        let (buffer_ref, kind) = match self.buffer_views.get(reference) {
            Some(entry) => *entry,
            None => render_fatal!(
                FatalKind::RecordingContract,
                "undeclared buffer view handle {:?}",
                reference
            ),
        };

        let buffer = self.buffer(buffer_ref);
        match kind {
            ViewKind::Srv => buffer.srv(),
            ViewKind::Uav => buffer.uav(),
            ViewKind::Cbv => buffer.cbv(),
            ViewKind::Rtv => render_fatal!(
                FatalKind::RecordingContract,
                "buffer view {:?} cannot be a render target",
                reference
            ),
        }
    }
}
