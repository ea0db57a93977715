//! The image state-transition table.
//!
//! Only transitions the engine expects are registered; asking a recorder
//! for anything else is a programmer error. The table is design-level data
//! shared by every backend: each entry carries the source and destination
//! stage and access masks for the single barrier the transition emits.

use crate::rhi::rhi_enums::{PipelineStageFlags, ResourceAccessFlags, ResourceState};

/// Stage and access masks of one registered transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionInfo {
    pub src_stage: PipelineStageFlags,
    pub dst_stage: PipelineStageFlags,
    pub src_access: ResourceAccessFlags,
    pub dst_access: ResourceAccessFlags,
}

type Entry = (ResourceState, ResourceState, TransitionInfo);

const fn entry(
    old: ResourceState,
    new: ResourceState,
    src_stage: PipelineStageFlags,
    src_access: ResourceAccessFlags,
    dst_stage: PipelineStageFlags,
    dst_access: ResourceAccessFlags,
) -> Entry {
    (
        old,
        new,
        TransitionInfo {
            src_stage,
            dst_stage,
            src_access,
            dst_access,
        },
    )
}

// `General` is the unordered-access state.
const TRANSITIONS: &[Entry] = &[
    entry(
        ResourceState::Undefined,
        ResourceState::General,
        PipelineStageFlags::TOP_OF_PIPE,
        ResourceAccessFlags::NONE,
        PipelineStageFlags::ALL_COMMANDS,
        ResourceAccessFlags::from_bits_truncate(
            ResourceAccessFlags::SHADER_READ.bits() | ResourceAccessFlags::SHADER_WRITE.bits(),
        ),
    ),
    entry(
        ResourceState::Undefined,
        ResourceState::TransferDst,
        PipelineStageFlags::TOP_OF_PIPE,
        ResourceAccessFlags::NONE,
        PipelineStageFlags::TRANSFER,
        ResourceAccessFlags::TRANSFER_WRITE,
    ),
    entry(
        ResourceState::Undefined,
        ResourceState::ColorAttachment,
        PipelineStageFlags::TOP_OF_PIPE,
        ResourceAccessFlags::NONE,
        PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceAccessFlags::COLOR_ATTACHMENT_WRITE,
    ),
    entry(
        ResourceState::Undefined,
        ResourceState::DepthStencilAttachment,
        PipelineStageFlags::TOP_OF_PIPE,
        ResourceAccessFlags::NONE,
        PipelineStageFlags::from_bits_truncate(
            PipelineStageFlags::COMPUTE_SHADER.bits() | PipelineStageFlags::FRAGMENT_SHADER.bits(),
        ),
        ResourceAccessFlags::SHADER_WRITE,
    ),
    entry(
        ResourceState::General,
        ResourceState::ShaderReadOnly,
        PipelineStageFlags::ALL_COMMANDS,
        ResourceAccessFlags::from_bits_truncate(
            ResourceAccessFlags::SHADER_READ.bits() | ResourceAccessFlags::SHADER_WRITE.bits(),
        ),
        PipelineStageFlags::from_bits_truncate(
            PipelineStageFlags::FRAGMENT_SHADER.bits() | PipelineStageFlags::COMPUTE_SHADER.bits(),
        ),
        ResourceAccessFlags::SHADER_READ,
    ),
    entry(
        ResourceState::General,
        ResourceState::Present,
        PipelineStageFlags::ALL_COMMANDS,
        ResourceAccessFlags::from_bits_truncate(
            ResourceAccessFlags::MEMORY_READ.bits() | ResourceAccessFlags::MEMORY_WRITE.bits(),
        ),
        PipelineStageFlags::BOTTOM_OF_PIPE,
        ResourceAccessFlags::NONE,
    ),
    entry(
        ResourceState::TransferDst,
        ResourceState::ShaderReadOnly,
        PipelineStageFlags::TRANSFER,
        ResourceAccessFlags::TRANSFER_WRITE,
        PipelineStageFlags::from_bits_truncate(
            PipelineStageFlags::FRAGMENT_SHADER.bits() | PipelineStageFlags::COMPUTE_SHADER.bits(),
        ),
        ResourceAccessFlags::SHADER_READ,
    ),
    entry(
        ResourceState::ShaderReadOnly,
        ResourceState::General,
        PipelineStageFlags::FRAGMENT_SHADER,
        ResourceAccessFlags::SHADER_READ,
        PipelineStageFlags::ALL_COMMANDS,
        ResourceAccessFlags::from_bits_truncate(
            ResourceAccessFlags::SHADER_READ.bits() | ResourceAccessFlags::SHADER_WRITE.bits(),
        ),
    ),
    entry(
        ResourceState::ShaderReadOnly,
        ResourceState::DepthStencilAttachment,
        PipelineStageFlags::from_bits_truncate(
            PipelineStageFlags::FRAGMENT_SHADER.bits() | PipelineStageFlags::COMPUTE_SHADER.bits(),
        ),
        ResourceAccessFlags::SHADER_READ,
        PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ResourceAccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    ),
    entry(
        ResourceState::ShaderReadOnly,
        ResourceState::Present,
        PipelineStageFlags::FRAGMENT_SHADER,
        ResourceAccessFlags::SHADER_READ,
        PipelineStageFlags::BOTTOM_OF_PIPE,
        ResourceAccessFlags::MEMORY_READ,
    ),
    entry(
        ResourceState::ColorAttachment,
        ResourceState::ShaderReadOnly,
        PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceAccessFlags::COLOR_ATTACHMENT_WRITE,
        PipelineStageFlags::from_bits_truncate(
            PipelineStageFlags::FRAGMENT_SHADER.bits() | PipelineStageFlags::COMPUTE_SHADER.bits(),
        ),
        ResourceAccessFlags::SHADER_READ,
    ),
    entry(
        ResourceState::ColorAttachment,
        ResourceState::Present,
        PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceAccessFlags::COLOR_ATTACHMENT_WRITE,
        PipelineStageFlags::BOTTOM_OF_PIPE,
        ResourceAccessFlags::MEMORY_READ,
    ),
    entry(
        ResourceState::DepthStencilAttachment,
        ResourceState::ShaderReadOnly,
        PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ResourceAccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        PipelineStageFlags::from_bits_truncate(
            PipelineStageFlags::FRAGMENT_SHADER.bits() | PipelineStageFlags::COMPUTE_SHADER.bits(),
        ),
        ResourceAccessFlags::SHADER_READ,
    ),
];

/// Looks up the registered barrier masks for `old -> new`. `None` means
/// the transition is undefined and the caller must treat it as fatal.
pub fn transition_info(old: ResourceState, new: ResourceState) -> Option<TransitionInfo> {
    TRANSITIONS
        .iter()
        .find(|(from, to, _)| *from == old && *to == new)
        .map(|(_, _, info)| *info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_pair_resolves_to_one_entry() {
        for (old, new, _) in TRANSITIONS {
            let matches = TRANSITIONS.iter().filter(|(a, b, _)| a == old && b == new).count();
            assert_eq!(matches, 1, "{:?} -> {:?} registered more than once", old, new);
            assert!(transition_info(*old, *new).is_some());
        }
    }

    #[test]
    fn unregistered_pairs_resolve_to_none() {
        assert!(transition_info(ResourceState::Present, ResourceState::TransferDst).is_none());
        assert!(transition_info(ResourceState::TransferDst, ResourceState::ColorAttachment).is_none());
        assert!(transition_info(ResourceState::ColorAttachment, ResourceState::ColorAttachment).is_none());
    }

    #[test]
    fn unordered_access_to_sampled_matches_design_masks() {
        let info = transition_info(ResourceState::General, ResourceState::ShaderReadOnly).unwrap();

        assert_eq!(info.src_stage, PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(
            info.src_access,
            ResourceAccessFlags::SHADER_READ | ResourceAccessFlags::SHADER_WRITE
        );
        assert_eq!(
            info.dst_stage,
            PipelineStageFlags::FRAGMENT_SHADER | PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(info.dst_access, ResourceAccessFlags::SHADER_READ);
    }
}
