//! JSON calls against the API root.

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::requester::{RequestOptions, ResilientRequester};
use crate::types::ErrorDocument;

/// Decoded success body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body served with a JSON media type.
    Json(Value),
    /// Any other body, verbatim.
    Text(String),
    /// No body (e.g. 204).
    Empty,
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// JSON transport bound to one API root.
///
/// Relative paths are joined to the base URL; absolute `http(s)://` URLs
/// (pre-signed links, `links.self` values) are used as given.
pub struct JsonTransport {
    requester: ResilientRequester,
    base_url: String,
}

impl JsonTransport {
    pub fn new(requester: ResilientRequester, base_url: impl Into<String>) -> Self {
        Self {
            requester,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Builds the full requester stack described by `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ClientError> {
        let requester = ResilientRequester::from_config(config)?;
        Ok(Self::new(requester, config.base_url.clone()))
    }

    pub fn requester(&self) -> &ResilientRequester {
        &self.requester
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves `path_or_url` against the base URL.
    pub fn resolve_url(&self, path_or_url: &str) -> String {
        if is_absolute(path_or_url) {
            path_or_url.to_string()
        } else {
            format!("{}/{}", self.base_url, path_or_url.trim_start_matches('/'))
        }
    }

    /// Performs the request and decodes the body.
    ///
    /// Success bodies are parsed as JSON only when the response declares a
    /// JSON media type. Failure bodies become [`ClientError::Api`] when
    /// they are JSON error envelopes, [`ClientError::Status`] otherwise.
    pub async fn fetch_json(
        &self,
        path_or_url: &str,
        options: RequestOptions,
    ) -> Result<Payload, ClientError> {
        let url = self.resolve_url(path_or_url);
        let resp = self.requester.request(&url, &options).await?;

        let status = resp.status();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_json_media_type);
        let text = resp.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Payload::Empty);
            }
            if is_json {
                return Ok(Payload::Json(serde_json::from_str(&text)?));
            }
            return Ok(Payload::Text(text));
        }

        debug!(%url, status = status.as_u16(), "request failed");
        if is_json {
            if let Ok(errors) = serde_json::from_str::<ErrorDocument>(&text) {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    url,
                    errors,
                    body: text,
                });
            }
        }
        Err(ClientError::Status {
            status: status.as_u16(),
            url,
            body: text,
        })
    }

    /// POSTs `data` as JSON.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &B,
        options: RequestOptions,
    ) -> Result<Payload, ClientError> {
        self.send_json(Method::POST, path, data, options).await
    }

    /// PATCHes `data` as JSON.
    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &B,
        options: RequestOptions,
    ) -> Result<Payload, ClientError> {
        self.send_json(Method::PATCH, path, data, options).await
    }

    /// GET and deserialize.
    pub async fn get<T: DeserializeOwned>(&self, path_or_url: &str) -> Result<T, ClientError> {
        let url = self.resolve_url(path_or_url);
        let payload = self.fetch_json(&url, RequestOptions::default()).await?;
        decode(&url, payload)
    }

    /// POST and deserialize.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &B,
    ) -> Result<T, ClientError> {
        let url = self.resolve_url(path);
        let payload = self.post_json(&url, data, RequestOptions::default()).await?;
        decode(&url, payload)
    }

    /// PATCH and deserialize.
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &B,
    ) -> Result<T, ClientError> {
        let url = self.resolve_url(path);
        let payload = self.patch_json(&url, data, RequestOptions::default()).await?;
        decode(&url, payload)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        data: &B,
        mut options: RequestOptions,
    ) -> Result<Payload, ClientError> {
        options.method = method;
        if !options.headers.contains_key(CONTENT_TYPE) {
            options
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        options.body = Some(serde_json::to_vec(data)?);
        self.fetch_json(path, options).await
    }
}

fn decode<T: DeserializeOwned>(url: &str, payload: Payload) -> Result<T, ClientError> {
    match payload {
        Payload::Json(v) => Ok(serde_json::from_value(v)?),
        Payload::Text(_) => Err(ClientError::UnexpectedPayload {
            url: url.to_string(),
            detail: "expected JSON, got text".into(),
        }),
        Payload::Empty => Err(ClientError::UnexpectedPayload {
            url: url.to_string(),
            detail: "expected JSON, got an empty body".into(),
        }),
    }
}

fn is_absolute(path_or_url: &str) -> bool {
    let lower = path_or_url.get(..8).unwrap_or(path_or_url).to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// Whether a `Content-Type` value names a JSON media type.
///
/// Matches `application/json`, `application/vnd.api+json` and any other
/// `+json` suffix; parameters such as `charset` are ignored.
pub fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}
