//! One-stop client: JSON calls, chunked uploads and delivery polling
//! sharing a single authenticated session.

use std::sync::Arc;

use ascflow_client::{ClientError, JsonTransport, Payload, RequestOptions, SessionConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::chunked::{ChunkedUploadOrchestrator, UploadConfig};
use crate::error::UploadError;
use crate::poller::{DeliveryPoller, PollConfig};
use crate::types::AssetUploadRequest;

/// API session with asset upload support.
pub struct AssetClient {
    transport: Arc<JsonTransport>,
    uploader: ChunkedUploadOrchestrator,
    poller: DeliveryPoller,
}

impl AssetClient {
    /// Builds the session from `config`, minting the first token.
    pub fn connect(config: &SessionConfig) -> Result<Self, ClientError> {
        Ok(Self::new(JsonTransport::from_config(config)?))
    }

    pub fn new(transport: JsonTransport) -> Self {
        let transport = Arc::new(transport);
        Self {
            uploader: ChunkedUploadOrchestrator::new(Arc::clone(&transport), UploadConfig::default()),
            poller: DeliveryPoller::new(Arc::clone(&transport), PollConfig::default()),
            transport,
        }
    }

    pub fn with_upload_config(mut self, config: UploadConfig) -> Self {
        self.uploader = ChunkedUploadOrchestrator::new(Arc::clone(&self.transport), config);
        self
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poller = DeliveryPoller::new(Arc::clone(&self.transport), config);
        self
    }

    pub fn transport(&self) -> &JsonTransport {
        &self.transport
    }

    /// Raw authenticated request; the response is returned whatever its status.
    pub async fn fetch(
        &self,
        path_or_url: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.transport.resolve_url(path_or_url);
        self.transport.requester().request(&url, options).await
    }

    pub async fn fetch_json(&self, path_or_url: &str) -> Result<Payload, ClientError> {
        self.transport
            .fetch_json(path_or_url, RequestOptions::default())
            .await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &B,
    ) -> Result<Payload, ClientError> {
        self.transport
            .post_json(path, data, RequestOptions::default())
            .await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &B,
    ) -> Result<Payload, ClientError> {
        self.transport
            .patch_json(path, data, RequestOptions::default())
            .await
    }

    /// See [`ChunkedUploadOrchestrator::upload_asset`].
    pub async fn upload_asset(
        &self,
        asset: &AssetUploadRequest,
        buffer: impl Into<Arc<[u8]>>,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        self.uploader.upload_asset(asset, buffer, cancel).await
    }

    /// See [`DeliveryPoller::poll_for_upload_success`].
    pub async fn poll_for_upload_success(
        &self,
        asset_url: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        self.poller
            .poll_for_upload_success(asset_url, label, cancel)
            .await
    }
}
