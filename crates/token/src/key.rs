//! Private key resolution.
//!
//! Keys downloaded from App Store Connect are PKCS#8 PEM files named
//! `AuthKey_<key id>.p8`. Tools that ship with Xcode expect them under
//! `~/.appstoreconnect/private_keys/`, so that is the default location.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TokenError;

/// Directory (relative to `$HOME`) holding downloaded API keys.
pub const DEFAULT_KEY_DIR: &str = ".appstoreconnect/private_keys";

/// Where the EC private key is read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivateKeySource {
    /// Inline PEM text.
    Pem(String),
    /// A PEM file at an explicit path.
    File(PathBuf),
    /// `~/.appstoreconnect/private_keys/AuthKey_<key id>.p8`.
    #[default]
    Default,
}

impl PrivateKeySource {
    /// Returns the PEM bytes for `key_id`.
    pub fn load(&self, key_id: &str) -> Result<Vec<u8>, TokenError> {
        match self {
            Self::Pem(pem) => Ok(pem.as_bytes().to_vec()),
            Self::File(path) => read_key_file(path),
            Self::Default => read_key_file(&default_key_path(key_id)),
        }
    }
}

/// Returns the conventional key path for `key_id`.
pub fn default_key_path(key_id: &str) -> PathBuf {
    home_dir()
        .join(DEFAULT_KEY_DIR)
        .join(format!("AuthKey_{key_id}.p8"))
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, TokenError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            debug!(path = %path.display(), "loaded private key");
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TokenError::KeyNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
