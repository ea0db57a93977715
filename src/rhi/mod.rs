//! The Render Hardware Interface: the abstraction the render graph drives.

pub mod allocator;
pub mod descriptors;
pub mod rhi_enums;
pub mod rhi_structs;
pub mod rhi_traits;
pub mod transitions;
pub mod vulkan;

pub use self::rhi_enums::*;
pub use self::rhi_structs::*;
pub use self::rhi_traits::*;
