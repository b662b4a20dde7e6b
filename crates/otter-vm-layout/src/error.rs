//! Layout engine error types

use crate::property::PropertyKey;
use crate::shape::ShapeId;
use crate::value::ObjectId;
use thiserror::Error;

/// Errors surfaced by the layout engine to its host.
///
/// Structural mismatches and capacity exhaustion never show up here: they are
/// resolved internally by widening to a slower representation.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The memory manager refused an allocation
    #[error("OutOfMemory: requested {requested} bytes (limit {limit})")]
    OutOfMemory {
        /// Bytes requested by the failing allocation
        requested: usize,
        /// Configured byte limit
        limit: usize,
    },

    /// Object handle does not refer to a live object
    #[error("invalid object handle {0:?}")]
    InvalidObject(ObjectId),

    /// Shape handle does not refer to a shape in this context
    #[error("invalid shape handle {0:?}")]
    InvalidShape(ShapeId),

    /// Adding a property to a non-extensible object
    #[error("TypeError: cannot add property {0}, object is not extensible")]
    NotExtensible(PropertyKey),

    /// Writing to a read-only property
    #[error("TypeError: cannot assign to read only property {0}")]
    ReadOnly(PropertyKey),

    /// Data store to an accessor property (dispatch belongs to the caller)
    #[error("property {0} is an accessor")]
    AccessorProperty(PropertyKey),

    /// Deleting a non-configurable property
    #[error("TypeError: cannot delete property {0}")]
    NonConfigurable(PropertyKey),

    /// Operation needs a fast-mode shape
    #[error("operation requires a fast-mode shape, got dictionary shape {0:?}")]
    DictionaryMode(ShapeId),

    /// A verification pass found a broken invariant
    #[error("layout invariant violated: {0}")]
    Invariant(String),
}

impl LayoutError {
    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

/// Result type for layout operations
pub type LayoutResult<T> = std::result::Result<T, LayoutError>;
