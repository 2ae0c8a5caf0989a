//! Error types for core value parsing.

use thiserror::Error;

/// Errors raised while constructing core values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The capability id is malformed.
    #[error("invalid capability id: {0}")]
    InvalidId(String),

    /// The capability kind is not one of the known kinds.
    #[error("unknown capability kind '{0}'; expected agent, tool-server or application")]
    UnknownKind(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
