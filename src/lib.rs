//! Veil engine core: a render graph on top of a Vulkan hardware interface.
//!
//! The crate is split into two tightly coupled halves. The `rhi` module owns
//! the hardware interface: devices, resources, allocators, descriptors,
//! pipelines and command recording, with Vulkan as the reference backend.
//! The `render_graph` module composes per-frame GPU work into a dependency
//! ordered list of passes, deriving barriers, attachment load/store
//! operations and transient memory aliasing from the declared resource
//! usages instead of asking the caller to write them by hand.

#![deny(nonstandard_style)]
#![deny(future_incompatible)]
#![deny(rust_2018_idioms)]
#![warn(unused)]

pub mod core;
pub mod render_graph;
pub mod rhi;
pub mod settings;
pub mod shader;
