//! tfacc Common Library
//!
//! Attribute trees, structured state and plan documents, and the flatmap
//! shim that bridges the structured state into the legacy flat shape.

pub mod document;
pub mod error;
pub mod shim;
pub mod state;
pub mod value;

// Re-export commonly used types
pub use document::{PlanDocument, ResourceMode, StateDocument};
pub use error::{Error, Result};
pub use shim::{to_flat_map, to_flat_map_at, FlatAttributeMap};
pub use state::{InstanceRecord, ModuleAddress, OutputKind, OutputState, PrimaryInstance, State};
pub use value::AttributeValue;

/// tfacc version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
