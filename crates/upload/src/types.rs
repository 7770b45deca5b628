//! Upload descriptors and delivery state.

use std::fmt;

use ascflow_client::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UploadError;

/// One byte range of an asset and where to send it.
///
/// Produced by the server when an asset is reserved. The URL is
/// pre-signed and time-limited; it must not carry the bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOperation {
    pub method: String,
    pub url: String,
    pub offset: u64,
    pub length: u64,
    #[serde(default)]
    pub request_headers: Vec<HttpHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl UploadOperation {
    /// Exclusive end of the byte range, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// A `(name, value)` header the upload destination requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// A reserved asset awaiting its binary content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUploadRequest {
    pub resource_type: String,
    pub resource_id: String,
    pub upload_operations: Vec<UploadOperation>,
}

impl AssetUploadRequest {
    /// Reads `attributes.uploadOperations` from a reserved resource.
    pub fn from_resource(resource: &Resource) -> Result<Self, UploadError> {
        let raw = resource.attribute("uploadOperations").ok_or_else(|| {
            UploadError::InvalidDescriptor(format!(
                "{} has no uploadOperations attribute",
                resource.path()
            ))
        })?;
        let upload_operations: Vec<UploadOperation> = serde_json::from_value(raw.clone())
            .map_err(|e| {
                UploadError::InvalidDescriptor(format!(
                    "{} uploadOperations: {e}",
                    resource.path()
                ))
            })?;

        Ok(Self {
            resource_type: resource.kind.clone(),
            resource_id: resource.id.clone(),
            upload_operations,
        })
    }

    /// `type/id`, relative to the API root.
    pub fn path(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }

}

impl TryFrom<&Resource> for AssetUploadRequest {
    type Error = UploadError;

    fn try_from(resource: &Resource) -> Result<Self, Self::Error> {
        Self::from_resource(resource)
    }
}

/// Server-side processing state of an uploaded asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Complete,
    Failed,
    /// Any other state (`AWAITING_UPLOAD`, `UPLOAD_COMPLETE`, ...).
    Pending(String),
}

impl DeliveryState {
    pub fn parse(state: &str) -> Self {
        match state {
            "COMPLETE" => Self::Complete,
            "FAILED" => Self::Failed,
            other => Self::Pending(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("COMPLETE"),
            Self::Failed => f.write_str("FAILED"),
            Self::Pending(s) => f.write_str(s),
        }
    }
}

/// `attributes.assetDeliveryState` as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetDeliveryState {
    pub state: Option<String>,
    pub errors: Vec<StateDetail>,
    pub warnings: Vec<StateDetail>,
}

impl AssetDeliveryState {
    /// Extracts `data.attributes.assetDeliveryState` from a document.
    ///
    /// Only the object itself is required. A non-string `state` reads as
    /// absent; `errors` and `warnings` that are missing, null or not
    /// arrays read as empty.
    pub fn from_document(doc: &Value) -> Option<Self> {
        let raw = doc.pointer("/data/attributes/assetDeliveryState")?;
        Some(Self {
            state: raw.get("state").and_then(Value::as_str).map(str::to_string),
            errors: details(raw.get("errors")),
            warnings: details(raw.get("warnings")),
        })
    }

    /// The state, treating an empty string as absent.
    pub fn delivery_state(&self) -> Option<DeliveryState> {
        self.state
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(DeliveryState::parse)
    }
}

fn details(list: Option<&Value>) -> Vec<StateDetail> {
    list.and_then(Value::as_array)
        .map(|entries| entries.iter().cloned().map(StateDetail).collect())
        .unwrap_or_default()
}

/// An error or warning attached to a delivery state, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDetail(pub Value);

impl StateDetail {
    pub fn code(&self) -> Option<&str> {
        self.0.get("code").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.0.get("description").and_then(Value::as_str)
    }
}
