//! Uploader configuration.
//!
//! Stored as TOML at `~/.config/ascflow/config.toml`. Every credential
//! field can be overridden from the environment:
//!
//! | Variable               | Field              |
//! |------------------------|--------------------|
//! | `ASC_ISSUER_ID`        | `issuer_id`        |
//! | `ASC_KEY_ID`           | `key_id`           |
//! | `ASC_PRIVATE_KEY_PATH` | `private_key_path` |
//! | `ASC_BASE_URL`         | `base_url`         |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ascflow_client::{DEFAULT_BASE_URL, RetryPolicy, SessionConfig};
use ascflow_token::PrivateKeySource;
use ascflow_upload::{PollConfig, UploadConfig};
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub issuer_id: String,

    #[serde(default)]
    pub key_id: String,

    /// Explicit key file; `~/.appstoreconnect/private_keys/AuthKey_<key_id>.p8` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Attempts per request on 401/429.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts per upload chunk.
    #[serde(default = "default_max_tries_per_part")]
    pub max_tries_per_part: u32,

    /// Delivery-state checks before giving up (0 = forever).
    #[serde(default = "default_poll_max_tries")]
    pub poll_max_tries: u32,

    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_tries_per_part() -> u32 {
    10
}

fn default_poll_max_tries() -> u32 {
    60
}

fn default_poll_delay_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer_id: String::new(),
            key_id: String::new(),
            private_key_path: None,
            base_url: default_base_url(),
            max_attempts: default_max_attempts(),
            max_tries_per_part: default_max_tries_per_part(),
            poll_max_tries: default_poll_max_tries(),
            poll_delay_ms: default_poll_delay_ms(),
        }
    }
}

impl Config {
    /// Loads the config file (if any), then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::from_file(&config_path())?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`; a missing file yields defaults.
    fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        if let Some(v) = var("ASC_ISSUER_ID") {
            self.issuer_id = v;
        }
        if let Some(v) = var("ASC_KEY_ID") {
            self.key_id = v;
        }
        if let Some(v) = var("ASC_PRIVATE_KEY_PATH") {
            self.private_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ASC_BASE_URL") {
            self.base_url = v;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.issuer_id.is_empty() {
            anyhow::bail!(
                "missing issuer id: set issuer_id in {} or ASC_ISSUER_ID",
                config_path().display()
            );
        }
        if self.key_id.is_empty() {
            anyhow::bail!(
                "missing key id: set key_id in {} or ASC_KEY_ID",
                config_path().display()
            );
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        let private_key = match &self.private_key_path {
            Some(path) => PrivateKeySource::File(path.clone()),
            None => PrivateKeySource::Default,
        };
        SessionConfig::new(&self.issuer_id, &self.key_id)
            .with_private_key(private_key)
            .with_base_url(&self.base_url)
            .with_retry(RetryPolicy::default().with_max_attempts(self.max_attempts))
    }

    pub fn upload(&self) -> UploadConfig {
        UploadConfig::default().with_max_tries_per_part(self.max_tries_per_part)
    }

    pub fn poll(&self) -> PollConfig {
        PollConfig {
            delay: Duration::from_millis(self.poll_delay_ms),
            max_tries: self.poll_max_tries,
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("ascflow")
        .join("config.toml")
}
