//! Core library for the refit Dockerfile converter
//!
//! This crate contains the structure-preserving Dockerfile parser, the
//! shell-command model, the mapping catalog and providers, the
//! conversion pipeline onto hardened base images, the catalog updater,
//! logging, and error handling.

pub mod busybox;
pub mod convert;
pub mod dockerfile;
pub mod errors;
pub mod image_ref;
pub mod logging;
pub mod mappings;
pub mod packages;
pub mod shell;
pub mod update;

// Re-export IndexMap for dependent crates (insertion order is part of
// the wildcard-matching contract).
pub use indexmap::IndexMap;

pub use convert::{FromLineConverter, Options};
pub use dockerfile::Dockerfile;
pub use mappings::{MappingProvider, MappingsConfig};

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
