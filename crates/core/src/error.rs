//! Error types shared by the primitive chain types.

use thiserror::Error;

/// Errors raised while constructing or validating primitive types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A binary encoding could not be produced or parsed.
    #[error("codec error: {0}")]
    Io(#[from] neo3_io::IoError),

    /// A value violates the format expected of its type.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A public key, signature or script failed cryptographic validation.
    #[error("invalid signature material: {0}")]
    InvalidSignature(String),

    /// A transaction attribute violates its multiplicity or gating rules.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// A signer's witness scope combination is not allowed.
    #[error("invalid witness scope: {0}")]
    InvalidScope(String),
}

/// Result type for primitive-type operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
