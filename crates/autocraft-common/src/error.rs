//! Error types shared across Autocraft crates.

use thiserror::Error;

use crate::ids::PatternId;

/// Top-level error type for Autocraft operations.
#[derive(Debug, Error)]
pub enum AutocraftError {
    /// Pattern definition errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternDefinitionError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version found
        actual: String,
    },
}

/// Problems found while validating a pattern definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternDefinitionError {
    /// Pattern produces nothing
    #[error("{0} has no outputs")]
    NoOutputs(PatternId),

    /// An input or output entry has a zero quantity
    #[error("{pattern} has a zero quantity entry")]
    ZeroQuantity {
        /// Offending pattern
        pattern: PatternId,
    },

    /// Another pattern with the same ID was already registered
    #[error("Duplicate pattern ID: {0}")]
    Duplicate(PatternId),
}

/// Result type alias for Autocraft operations.
pub type AutocraftResult<T> = Result<T, AutocraftError>;
