//! Hangar Core - shared vocabulary for the Hangar capability store.
//!
//! This crate provides:
//! - [`CapabilityId`] and [`CapabilityKind`], the keys every other crate joins on
//! - [`HangarHome`], the on-disk layout of the private data directory
//! - [`HostContext`], the callback surface a host exposes to in-process capabilities
//! - Small string utilities

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod dirs;
pub mod error;
pub mod host;
pub mod id;
pub mod kind;
pub mod utils;

pub use dirs::HangarHome;
pub use error::{CoreError, CoreResult};
pub use host::{DocumentMatch, HostContext, HostError, HostResult, NullHost};
pub use id::CapabilityId;
pub use kind::CapabilityKind;
pub use utils::truncate_to_boundary;
