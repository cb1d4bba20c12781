//! pan123-core - domain types and ports for the 123Pan storage backend
//!
//! Defines everything the adapter crates share:
//! - Strongly-typed identifiers and paths ([`domain::newtypes`])
//! - The remote entry model and its validity rules ([`domain::entry`])
//! - The backend error taxonomy ([`domain::errors`])
//! - Filename validation and cleaning ([`domain::name`])
//! - Remote-name character encoding ([`domain::encoding`])
//! - Backend configuration ([`config`])
//! - Port traits consumed by the host engine ([`ports`])

pub mod config;
pub mod domain;
pub mod ports;

pub use domain::errors::{BackendError, Result};
