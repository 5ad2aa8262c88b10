//! Error types for `Proxima`.
//!
//! This module provides a unified error type for all index operations.
//! Error codes follow the pattern `PROX-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for `Proxima` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `Proxima` operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
#[derive(Error, Debug)]
pub enum Error {
    /// Vector dimension mismatch (PROX-001).
    #[error("[PROX-001] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Identifier already present in the index (PROX-002).
    #[error("[PROX-002] Vector with ID '{0}' already present")]
    DuplicateId(i32),

    /// Index is at capacity (PROX-003).
    #[error("[PROX-003] Index is full: capacity {0} reached")]
    CapacityExceeded(usize),

    /// Quantizer used before training (PROX-004).
    ///
    /// Indicates an internal contract violation: encode or table lookup
    /// was requested before `train` completed.
    #[error("[PROX-004] Product quantizer is not trained")]
    QuantizerUntrained,

    /// Quantizer trained twice (PROX-005).
    #[error("[PROX-005] Product quantizer is already trained; codebooks are frozen")]
    AlreadyTrained,

    /// Training requested with an empty sample set (PROX-006).
    #[error("[PROX-006] Cannot train quantizer on an empty sample set")]
    EmptyTrainingSet,

    /// Configuration error (PROX-007).
    #[error("[PROX-007] Configuration error: {0}")]
    Config(String),

    /// Graph integrity violation (PROX-008).
    ///
    /// Indicates that the proximity graph violates a structural invariant
    /// and should be rebuilt.
    #[error("[PROX-008] Graph corrupted: {0}")]
    Corrupted(String),

    /// Serialization error (PROX-009).
    #[error("[PROX-009] Serialization error: {0}")]
    Serialization(String),

    /// IO error (PROX-010).
    #[error("[PROX-010] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error code (e.g., "PROX-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "PROX-001",
            Self::DuplicateId(_) => "PROX-002",
            Self::CapacityExceeded(_) => "PROX-003",
            Self::QuantizerUntrained => "PROX-004",
            Self::AlreadyTrained => "PROX-005",
            Self::EmptyTrainingSet => "PROX-006",
            Self::Config(_) => "PROX-007",
            Self::Corrupted(_) => "PROX-008",
            Self::Serialization(_) => "PROX-009",
            Self::Io(_) => "PROX-010",
        }
    }

    /// Returns true if the caller can recover by adjusting the request.
    ///
    /// Corruption, serialization and IO failures are not recoverable at the
    /// call site.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Corrupted(_) | Self::Serialization(_) | Self::Io(_)
        )
    }
}
