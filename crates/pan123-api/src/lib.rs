//! pan123-api - 123Pan open-platform API client
//!
//! Async client for the 123Pan open API:
//! - Per-endpoint pacing with exponential backoff ([`pacer`])
//! - Access-token lifecycle with forced refresh on 401 ([`token`])
//! - JSON and multipart transport with upload-domain routing ([`client`])
//! - The upload engine: dedup probe, single-step, and chunked sessions
//!   ([`upload`])
//! - The download engine: URL caching and parallel prefetch ([`download`])
//!
//! ## Modules
//!
//! - [`pacer`] - rate limiting and retry fabric
//! - [`token`] - credential lifecycle and persistence
//! - [`client`] - the call envelope every other module goes through
//! - [`types`] - wire payloads for each endpoint
//! - [`upload`] - upload strategy selection and execution
//! - [`download`] - URL acquisition and range reads

pub mod client;
pub mod download;
pub mod pacer;
pub mod token;
pub mod types;
pub mod upload;
