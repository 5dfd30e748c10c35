//! Render hardware interface.
//!
//! This crate is the boundary between the submission core and a graphics
//! device. It provides:
//! - Device, fence and command-buffer traits ([`device`], [`command`])
//! - Resource-view heaps and the slot pool over them ([`descriptor`])
//! - A host-side timeline fence ([`sync`])
//! - A software device that runs submissions on a worker thread ([`headless`])
//! - A Vulkan backend using `ash` and `gpu-allocator` ([`vulkan`], feature `vulkan`)
//! - A manually driven test device ([`testing`], feature `testing`)

mod error;

pub mod command;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use error::{RhiError, RhiResult};

#[cfg(feature = "vulkan")]
pub use ash::vk;
