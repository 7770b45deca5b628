//! Token error types.

use std::path::PathBuf;

/// Errors produced while loading keys or minting tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("private key not found at {}", path.display())]
    KeyNotFound { path: PathBuf },

    #[error("invalid private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("system clock is before the unix epoch")]
    Clock,

    #[error("token lifetime of {0:?} overflows the expiry timestamp")]
    LifetimeOverflow(std::time::Duration),
}
