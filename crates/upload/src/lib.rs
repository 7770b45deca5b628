//! Chunked asset upload and delivery-state polling.
//!
//! # Pipeline
//!
//! 1. **Reserve**: the caller POSTs asset metadata and receives a
//!    resource with `uploadOperations`
//! 2. **Upload**: [`ChunkedUploadOrchestrator`] sends every byte range to
//!    its pre-signed URL concurrently, retrying each independently
//! 3. **Commit**: one PATCH marks the asset uploaded with the MD5 of the
//!    whole buffer
//! 4. **Poll**: [`DeliveryPoller`] waits for `assetDeliveryState` to
//!    become `COMPLETE` or `FAILED`

pub mod chunked;
pub mod client;
pub mod error;
pub mod poller;
pub mod types;

pub use chunked::{ChunkedUploadOrchestrator, UploadConfig, checksum_bytes};
pub use client::AssetClient;
pub use error::UploadError;
pub use poller::{DeliveryPoller, PollConfig};
pub use types::{
    AssetDeliveryState, AssetUploadRequest, DeliveryState, HttpHeader, StateDetail,
    UploadOperation,
};
