//! Chunked upload orchestrator.
//!
//! Each upload operation is sent by its own task to its own pre-signed
//! URL. Chunks retry independently; the first chunk to exhaust its budget
//! cancels the rest. The asset is committed with a single PATCH only after
//! every chunk succeeded.

use std::sync::Arc;

use ascflow_client::{JsonTransport, RequestOptions, RetryPolicy};
use md5::{Digest, Md5};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::types::AssetUploadRequest;

/// Default attempts per chunk.
pub const DEFAULT_MAX_TRIES_PER_PART: u32 = 10;

/// Computes MD5 of `data` and returns the lowercase hex digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Chunk retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// `max_attempts` is the per-chunk try budget.
    pub chunk_retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_retry: RetryPolicy::default().with_max_attempts(DEFAULT_MAX_TRIES_PER_PART),
        }
    }
}

impl UploadConfig {
    pub fn with_max_tries_per_part(mut self, tries: u32) -> Self {
        self.chunk_retry.max_attempts = tries;
        self
    }

    pub fn max_tries_per_part(&self) -> u32 {
        self.chunk_retry.max_attempts.max(1)
    }
}

/// A validated upload operation, ready to run in its own task.
struct ChunkJob {
    index: usize,
    method: Method,
    url: String,
    headers: HeaderMap,
    start: usize,
    end: usize,
    resource_type: String,
    resource_id: String,
}

/// Uploads reserved assets chunk by chunk and commits them.
pub struct ChunkedUploadOrchestrator {
    transport: Arc<JsonTransport>,
    http: reqwest::Client,
    config: UploadConfig,
}

impl ChunkedUploadOrchestrator {
    /// Chunks go out on the transport's HTTP client, without the token.
    pub fn new(transport: Arc<JsonTransport>, config: UploadConfig) -> Self {
        let http = transport.requester().http().clone();
        Self {
            transport,
            http,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads `buffer` according to `asset`'s operations, then commits.
    ///
    /// Returns the MD5 checksum sent with the commit. No commit is sent
    /// if any chunk fails or `cancel` fires.
    pub async fn upload_asset(
        &self,
        asset: &AssetUploadRequest,
        buffer: impl Into<Arc<[u8]>>,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let buffer: Arc<[u8]> = buffer.into();
        let checksum = checksum_bytes(&buffer);
        let jobs = plan_chunks(asset, buffer.len())?;

        info!(
            resource = %asset.path(),
            chunks = jobs.len(),
            bytes = buffer.len(),
            "uploading asset"
        );

        let chunk_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for job in jobs {
            tasks.spawn(upload_chunk(
                self.http.clone(),
                Arc::clone(&buffer),
                job,
                self.config.chunk_retry.clone(),
                chunk_cancel.clone(),
            ));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(UploadError::from).and_then(|r| r);
            if let Err(e) = result {
                if first_error.is_none() {
                    warn!(resource = %asset.path(), error = %e, "aborting asset upload");
                    chunk_cancel.cancel();
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let commit = json!({
            "data": {
                "type": asset.resource_type,
                "id": asset.resource_id,
                "attributes": {
                    "uploaded": true,
                    "sourceFileChecksum": checksum,
                }
            }
        });
        self.transport
            .patch_json(&asset.path(), &commit, RequestOptions::default())
            .await?;

        info!(resource = %asset.path(), %checksum, "asset committed");
        Ok(checksum)
    }
}

/// Validates every operation against the buffer before anything is sent.
///
/// An empty operation list plans no chunks; the asset is committed as is.
fn plan_chunks(asset: &AssetUploadRequest, buffer_len: usize) -> Result<Vec<ChunkJob>, UploadError> {
    let mut jobs = Vec::with_capacity(asset.upload_operations.len());
    for (index, op) in asset.upload_operations.iter().enumerate() {
        let invalid_range = || UploadError::InvalidRange {
            index,
            offset: op.offset,
            length: op.length,
            buffer_len,
        };
        let end = op
            .end()
            .and_then(|e| usize::try_from(e).ok())
            .filter(|&e| e <= buffer_len)
            .ok_or_else(invalid_range)?;
        let start = usize::try_from(op.offset).map_err(|_| invalid_range())?;

        let method = Method::from_bytes(op.method.as_bytes()).map_err(|_| {
            UploadError::InvalidDescriptor(format!("operation {index}: bad method {:?}", op.method))
        })?;

        let mut headers = HeaderMap::new();
        for h in &op.request_headers {
            let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| {
                UploadError::InvalidDescriptor(format!("operation {index}: bad header name {:?}", h.name))
            })?;
            let value = HeaderValue::from_str(&h.value).map_err(|_| {
                UploadError::InvalidDescriptor(format!("operation {index}: bad value for {}", h.name))
            })?;
            headers.append(name, value);
        }

        jobs.push(ChunkJob {
            index,
            method,
            url: op.url.clone(),
            headers,
            start,
            end,
            resource_type: asset.resource_type.clone(),
            resource_id: asset.resource_id.clone(),
        });
    }
    Ok(jobs)
}

/// Sends one chunk, retrying until success, budget exhaustion or cancel.
async fn upload_chunk(
    http: reqwest::Client,
    buffer: Arc<[u8]>,
    job: ChunkJob,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> Result<(), UploadError> {
    let body = buffer[job.start..job.end].to_vec();
    drop(buffer);

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let send = http
            .request(job.method.clone(), &job.url)
            .headers(job.headers.clone())
            .body(body.clone())
            .send();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = send => result,
        };

        let detail = match outcome {
            Ok(resp) if resp.status().is_success() => {
                debug!(index = job.index, attempt, bytes = body.len(), "chunk uploaded");
                return Ok(());
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_else(|e| e.to_string());
                format!("{status} {text}")
            }
            Err(e) => e.to_string(),
        };

        if attempt >= max_attempts {
            return Err(UploadError::ChunkFailed {
                index: job.index,
                resource_type: job.resource_type,
                resource_id: job.resource_id,
                attempts: attempt,
                detail: detail.trim_end().to_string(),
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            index = job.index,
            attempt,
            max_attempts,
            detail = %detail.trim_end(),
            "chunk upload failed, retrying"
        );
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
