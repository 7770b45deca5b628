//! Authenticated transport for the App Store Connect API.
//!
//! [`ResilientRequester`] signs every call with a bearer token and
//! re-issues requests rejected with 401/429. [`JsonTransport`] layers
//! base-URL resolution and JSON:API decoding on top of it.

pub mod config;
pub mod error;
pub mod requester;
pub mod transport;
pub mod types;

pub use config::{RetryPolicy, SessionConfig};
pub use error::ClientError;
pub use requester::{RequestOptions, ResilientRequester};
pub use transport::{JsonTransport, Payload, is_json_media_type};
pub use types::{ApiError, Document, ErrorDocument, Resource, ResourceIdentifier, ResourceLinks};

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://api.appstoreconnect.apple.com/v1";
