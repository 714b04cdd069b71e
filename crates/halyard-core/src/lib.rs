//! halyard-core
//!
//! Pure domain types shared by every Halyard crate: resource addresses,
//! attribute values, resource instances, manifests, and field schemas.
//! No I/O and no async runtime. This is the shared vocabulary of the engine.

pub mod addr;
pub mod error;
pub mod instance;
pub mod manifest;
pub mod schema;
pub mod value;

pub use crate::addr::{ResourceAddr, Scope};
pub use crate::error::ValidationError;
pub use crate::instance::{Presence, ResolvedReference, ResourceInstance};
pub use crate::manifest::Manifest;
pub use crate::schema::{FieldKind, FieldSchema, ResourceSchema, SchemaRegistry};
pub use crate::value::{Attributes, Reference, Value};
