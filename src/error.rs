use thiserror::Error;

use crate::ring::FieldType;

/// Fatal protocol errors.
///
/// Every variant aborts the current computation; the kernels never retry,
/// since masking-opening correctness depends on exact single execution.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MpcError {
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    #[error("field mismatch: {0:?} vs {1:?}")]
    FieldMismatch(FieldType, FieldType),

    #[error("expected {expected} value, got {actual}")]
    ShareTypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("invalid rank {0}")]
    InvalidRank(usize),

    #[error("both private operands owned by rank {0}")]
    SameOwner(usize),

    #[error("gather returned {actual} shares, expected {expected}")]
    GatherCount { expected: usize, actual: usize },

    #[error("unsupported shift of {bits} bits for {field:?}")]
    TruncBits { field: FieldType, bits: usize },

    #[error("communication failed: {0}")]
    Comm(String),

    #[error("beaver source failed: {0}")]
    Beaver(String),
}

pub type Result<T> = std::result::Result<T, MpcError>;
