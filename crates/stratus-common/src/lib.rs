//! # Stratus Common
//!
//! Shared types, errors, and constants used across Stratus components.
//!
//! ## Modules
//! - `types` - Core data structures (Peer, ServiceType, TokenSet)
//! - `error` - Cluster formation error taxonomy
//! - `constants` - Discovery service names and default timings

pub mod constants;
pub mod error;
pub mod types;

pub use error::ClusterError;
pub use types::*;
