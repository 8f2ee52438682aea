//! Error types for chain execution.

use thiserror::Error;

/// Errors raised while running a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    // --- Input/output shape ---
    #[error("Missing input variable: {0}")]
    MissingInput(String),

    #[error("Chain produced no `{0}` output")]
    MissingOutput(String),

    // --- Document combination ---
    #[error("A single document was longer than the context length, we cannot handle this.")]
    DocumentOverBudget,

    // --- Configuration ---
    #[error("Invalid chain configuration: {0}")]
    Invalid(String),

    // --- Inner layers ---
    #[error(transparent)]
    Core(#[from] tangle_core::Error),

    #[error("Memory error: {0}")]
    Memory(#[from] tangle_core::error::MemoryError),
}

/// Result type alias using ChainError.
pub type Result<T> = std::result::Result<T, ChainError>;
