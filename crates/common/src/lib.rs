//! Common types shared across tlsgate crates
//!
//! # Module Organization
//!
//! - [`ids`]: Type-safe identifier newtypes ([`DomainName`])
//! - [`errors`]: Error types and result aliases

pub mod errors;
pub mod ids;

pub use errors::{TlsgateError, TlsgateResult};
pub use ids::DomainName;
