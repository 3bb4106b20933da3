//! Error types.
//!
//! Only [`OptimizeError`] crosses the public `optimize` boundary. The other
//! enums describe unit-level failures that the pipeline records as
//! diagnostics and then recovers from.

use thiserror::Error;

/// Errors that abort a whole optimize call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizeError {
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Background optimization was interrupted: {0}")]
    Interrupted(String),
}

/// Violations of the geometry buffer invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("geometry has no position attribute")]
    MissingPositions,

    #[error("attribute {attribute} has {found} vertices, expected {expected}")]
    AttributeCountMismatch {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("attribute {attribute} has item size {item_size}, its data length {len} is not a multiple")]
    RaggedAttribute {
        attribute: &'static str,
        item_size: usize,
        len: usize,
    },

    #[error("index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("index count {0} is not a multiple of 3")]
    IndexCount(usize),

    #[error("attribute {attribute} has item size {found} in one part and {expected} in another")]
    InconsistentItemSize {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("nothing to merge")]
    Empty,
}

/// Failures of a single decimation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecimateError {
    #[error("non-indexed geometry cannot be decimated")]
    NonIndexed,

    #[error("malformed geometry: {0}")]
    Malformed(#[from] GeometryError),
}

/// Rejected LOD ladders.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LodError {
    #[error("no LOD levels given")]
    Empty,

    #[error("LOD distances must be finite and strictly increasing, got {previous} then {next}")]
    UnorderedDistances { previous: f32, next: f32 },

    #[error("LOD ratio {0} is outside [0, 1)")]
    InvalidRatio(f32),
}
