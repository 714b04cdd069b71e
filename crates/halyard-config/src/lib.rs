//! halyard-config
//!
//! The declarative configuration boundary. Manifests are built either
//! structurally with [`ManifestBuilder`] or parsed from HCL resource blocks;
//! [`render`] serializes a manifest back to the same text format.

pub mod builder;
pub mod error;
pub mod parse;
pub mod render;

pub use crate::builder::{BlockBuilder, ManifestBuilder, ResourceBuilder};
pub use crate::error::ConfigError;
pub use crate::parse::{load_manifest, parse_manifest};
pub use crate::render::render;
