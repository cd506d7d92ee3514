//! Error types for state shimming and document handling

use thiserror::Error;

/// Result type alias using the shim Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning structured state documents into flat state
#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing attribute count for {address:?}")]
    MissingAttributeCount { address: String },

    #[error("no \"id\" found in attributes of {address:?}")]
    MissingId { address: String },

    #[error("unexpected output type {kind} for {name:?}")]
    UnsupportedOutputType { name: String, kind: &'static str },

    #[error("child modules are not supported (found {count} under {parent:?})")]
    NestedModules { parent: String, count: usize },

    #[error("invalid module address {address:?}: {reason}")]
    ModuleAddress { address: String, reason: String },

    #[error("unexpected index type {kind} for {address:?}")]
    UnsupportedIndex { address: String, kind: &'static str },

    #[error("string index {key:?} on {address:?} is not supported")]
    StringIndex { address: String, key: String },
}
