//! The render graph: declarative per-frame GPU work.
//!
//! A frame is described once through a [`RenderGraphBuilder`] (resources,
//! passes, framebuffers), compiled into a [`RenderGraph`] that owns the
//! derived barriers, attachment operations and aliased transient memory,
//! and then executed into a single command-recorder submission.

pub mod builder;
pub mod compiler;
pub mod graph;
pub mod handles;
pub mod resources;

pub use self::builder::{
    RGBufferDescription, RGCallback, RGGraphicsPipelineDescription, RGImageDescription, RGMemberValue,
    RGPassHint, RGPassMember, RGPassParameters, RGRayTracingPipelineDescription, RenderGraphBuilder,
};
pub use self::compiler::{
    plan, AttachmentOps, ImageUsageRecord, PlannedStep, RGAccessKind, RenderGraphError, RenderGraphPlan,
};
pub use self::graph::RenderGraph;
pub use self::handles::*;
pub use self::resources::PassResources;

/// Pushes a GPU debug marker around a recording scope.
///
/// ```ignore
/// scoped_gpu_label!(command, "GBuffer", {
///     command.draw(3);
/// });
/// ```
#[macro_export]
macro_rules! scoped_gpu_label {
    ($command:expr, $label:expr, $body:block) => {{
        $command.begin_gpu_marker($label);
        let scoped_result = $body;
        $command.end_gpu_marker();
        scoped_result
    }};
}
