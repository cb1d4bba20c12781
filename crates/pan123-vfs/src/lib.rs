//! pan123-vfs - the virtual-filesystem layer over the 123Pan API
//!
//! Turns remote paths into opaque numeric IDs and exposes the uniform
//! filesystem interface the host engine consumes:
//!
//! - [`dircache`] - the passive name⇢ID map with parent-verification TTLs
//! - [`resolver`] - paginated path resolution, directory creation with
//!   propagation handling, and stale-parent repair
//! - [`naming`] - unique-name generation for collision handling
//! - [`facade`] - the [`pan123_core::ports::vfs::RemoteFs`] implementation
//! - [`commands`] - backend commands surfaced through the host CLI

pub mod commands;
pub mod dircache;
pub mod facade;
pub mod naming;
pub mod resolver;
