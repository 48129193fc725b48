#![forbid(unsafe_code)]
//! flowplan-core: ids, errors, configuration, hashing, typed attributes,
//! and the arena operator graph shared by every planning pass.

pub mod attr;
pub mod config;
pub mod depgraph;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod operator;
pub mod prelude;
pub mod schema;

/// Crate version, recorded in plan manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
