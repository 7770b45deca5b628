//! Session configuration.
//!
//! One [`SessionConfig`] describes everything a client session shares:
//! credentials, the API root, token lifetime and retry behaviour. It is
//! passed explicitly to every component constructor.

use std::time::Duration;

use ascflow_token::{DEFAULT_TOKEN_LIFETIME, PrivateKeySource};
use rand::Rng;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_BASE_URL;

/// Configuration shared by all requests of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub issuer_id: String,
    pub key_id: String,
    #[serde(default)]
    pub private_key: PrivateKeySource,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
    /// Re-mint the token when less than this much lifetime remains.
    #[serde(default = "default_renew_margin_secs")]
    pub renew_margin_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_token_lifetime_secs() -> u64 {
    DEFAULT_TOKEN_LIFETIME.as_secs()
}

fn default_renew_margin_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl SessionConfig {
    /// Creates a config with defaults for everything but the identity.
    pub fn new(issuer_id: impl Into<String>, key_id: impl Into<String>) -> Self {
        Self {
            issuer_id: issuer_id.into(),
            key_id: key_id.into(),
            private_key: PrivateKeySource::Default,
            base_url: default_base_url(),
            token_lifetime_secs: default_token_lifetime_secs(),
            renew_margin_secs: default_renew_margin_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_private_key(mut self, source: PrivateKeySource) -> Self {
        self.private_key = source;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime_secs = lifetime.as_secs();
        self
    }

    pub fn with_renew_margin(mut self, margin: Duration) -> Self {
        self.renew_margin_secs = margin.as_secs();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn renew_margin(&self) -> Duration {
        Duration::from_secs(self.renew_margin_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Bounded retry with exponential backoff.
///
/// Used for 401/429 rejections by the requester and for failed chunk
/// transfers by the uploader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Whether POST/PATCH are re-issued after a 401/429 rejection.
    pub retry_unsafe_methods: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
            retry_unsafe_methods: true,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` attempts with no delay in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after the given failed attempt (1-based), with
    /// +/-25% jitter. Zero when the policy has no initial delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = (self.initial_delay_ms as f64 / 1000.0) * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay_ms as f64 / 1000.0);
        let jitter = capped * 0.25 * rand::thread_rng().gen_range(-1.0..1.0);
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    /// Whether a request with `method` may be re-issued.
    pub fn allows(&self, method: &Method) -> bool {
        self.retry_unsafe_methods || is_idempotent(method)
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}
