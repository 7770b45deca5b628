//! Upload error types.

use ascflow_client::ClientError;

use crate::types::StateDetail;

/// Errors produced while uploading or polling an asset.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid upload descriptor: {0}")]
    InvalidDescriptor(String),

    #[error(
        "upload operation {index} range {offset}+{length} exceeds buffer of {buffer_len} bytes"
    )]
    InvalidRange {
        index: usize,
        offset: u64,
        length: u64,
        buffer_len: usize,
    },

    #[error("failed uploading chunk {index} of {resource_type}/{resource_id} after {attempts} attempts: {detail}")]
    ChunkFailed {
        index: usize,
        resource_type: String,
        resource_id: String,
        attempts: u32,
        detail: String,
    },

    #[error("{}{url} upload failed: {}", prefix(.label), details_json(.errors))]
    DeliveryFailed {
        label: String,
        url: String,
        errors: Vec<StateDetail>,
    },

    #[error("{}{url} couldn't find data.attributes.assetDeliveryState.state: {body}", prefix(.label))]
    MissingDeliveryState {
        label: String,
        url: String,
        body: String,
    },

    #[error(
        "{}{url} upload state was {} after {tries} tries",
        prefix(.label),
        .last_state.as_deref().unwrap_or("unknown")
    )]
    PollTimedOut {
        label: String,
        url: String,
        last_state: Option<String>,
        tries: u32,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn prefix(label: &str) -> String {
    if label.is_empty() {
        String::new()
    } else {
        format!("{label} ")
    }
}

fn details_json(errors: &[StateDetail]) -> String {
    serde_json::to_string(errors).unwrap_or_else(|_| format!("{errors:?}"))
}
