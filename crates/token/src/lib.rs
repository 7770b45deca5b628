//! ES256 bearer tokens for the App Store Connect API.
//!
//! Every API call carries a short-lived JWT signed with the team's EC
//! private key. [`TokenIssuer`] parses the key once and mints
//! [`Credential`]s on demand; [`key`] resolves where the key comes from.

pub mod error;
pub mod issuer;
pub mod key;

pub use error::TokenError;
pub use issuer::{Claims, Credential, TokenIssuer, mint, unix_now};
pub use key::{PrivateKeySource, default_key_path};

use std::time::Duration;

/// Audience claim expected by the API.
pub const API_AUDIENCE: &str = "appstoreconnect-v1";

/// Default token lifetime (20 minutes, the maximum the API accepts).
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(1200);
