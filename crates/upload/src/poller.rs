//! Delivery-state polling.
//!
//! After an asset is committed the server processes it asynchronously.
//! The poller re-reads the asset until its delivery state is terminal:
//!
//! ```text
//! POLLING --COMPLETE--> done
//!    |  \--FAILED----> DeliveryFailed
//!    \--max_tries----> PollTimedOut
//! ```
//!
//! A fetch that fails with a transient 500 envelope counts as one more
//! non-terminal observation.

use std::sync::Arc;
use std::time::Duration;

use ascflow_client::{JsonTransport, Payload, RequestOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::types::{AssetDeliveryState, DeliveryState};

/// Polling cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between observations.
    pub delay: Duration,
    /// Observations before giving up; 0 polls forever.
    pub max_tries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_tries: 60,
        }
    }
}

/// Waits for an asset's delivery state to become terminal.
pub struct DeliveryPoller {
    transport: Arc<JsonTransport>,
    config: PollConfig,
}

impl DeliveryPoller {
    pub fn new(transport: Arc<JsonTransport>, config: PollConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Polls `asset_url` until `COMPLETE` (Ok), `FAILED`, timeout or cancel.
    ///
    /// `label` prefixes log lines and error messages.
    pub async fn poll_for_upload_success(
        &self,
        asset_url: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let url = self.transport.resolve_url(asset_url);
        let mut tries: u32 = 0;
        let mut last_state: Option<String> = None;

        loop {
            tries += 1;

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                result = self.transport.fetch_json(&url, RequestOptions::default()) => result,
            };

            match fetched {
                Ok(payload) => {
                    let (state, delivery) = observe(payload, label, &url)?;
                    match state {
                        DeliveryState::Complete => {
                            info!(label, %url, tries, "asset delivered");
                            return Ok(());
                        }
                        DeliveryState::Failed => {
                            warn!(label, %url, tries, errors = delivery.errors.len(), "asset delivery failed");
                            return Err(UploadError::DeliveryFailed {
                                label: label.to_string(),
                                url,
                                errors: delivery.errors,
                            });
                        }
                        DeliveryState::Pending(state) => {
                            debug!(label, %url, %state, tries, "asset still processing");
                            last_state = Some(state);
                        }
                    }
                }
                Err(e) if e.is_transient_server() => {
                    warn!(label, %url, tries, "500 error while polling");
                }
                Err(e) => return Err(e.into()),
            }

            if self.config.max_tries != 0 && tries >= self.config.max_tries {
                return Err(UploadError::PollTimedOut {
                    label: label.to_string(),
                    url,
                    last_state,
                    tries,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(self.config.delay) => {}
            }
        }
    }
}

/// Reads the delivery state out of one fetched representation.
fn observe(
    payload: Payload,
    label: &str,
    url: &str,
) -> Result<(DeliveryState, AssetDeliveryState), UploadError> {
    let missing = |body: String| UploadError::MissingDeliveryState {
        label: label.to_string(),
        url: url.to_string(),
        body,
    };

    let doc = match payload {
        Payload::Json(doc) => doc,
        Payload::Text(text) => return Err(missing(text)),
        Payload::Empty => return Err(missing(String::new())),
    };

    let Some(delivery) = AssetDeliveryState::from_document(&doc) else {
        return Err(missing(doc.to_string()));
    };
    match delivery.delivery_state() {
        Some(state) => Ok((state, delivery)),
        None => Err(missing(doc.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_doc(state: &str) -> Payload {
        Payload::Json(json!({"data": {"type": "appPreviews", "id": "p1", "attributes": {
            "assetDeliveryState": {"state": state, "errors": [], "warnings": []}
        }}}))
    }

    #[test]
    fn observe_complete_and_pending() {
        assert_eq!(
            observe(state_doc("COMPLETE"), "", "u").unwrap().0,
            DeliveryState::Complete
        );
        assert_eq!(
            observe(state_doc("UPLOAD_COMPLETE"), "", "u").unwrap().0,
            DeliveryState::Pending("UPLOAD_COMPLETE".into())
        );
    }

    #[test]
    fn observe_failed_keeps_errors() {
        let payload = Payload::Json(json!({"data": {"attributes": {"assetDeliveryState": {
            "state": "FAILED",
            "errors": [{"code": "VIDEO_TOO_LONG", "description": "max 30s"}]
        }}}}));
        let (state, delivery) = observe(payload, "lbl", "u").unwrap();
        assert_eq!(state, DeliveryState::Failed);
        assert_eq!(delivery.errors[0].code(), Some("VIDEO_TOO_LONG"));
    }

    #[test]
    fn observe_empty_state_is_missing() {
        let err = observe(state_doc(""), "", "u").unwrap_err();
        assert!(matches!(err, UploadError::MissingDeliveryState { .. }));
    }

    #[test]
    fn observe_missing_state_keeps_body() {
        let payload = Payload::Json(json!({"data": {"attributes": {}}}));
        match observe(payload, "", "u").unwrap_err() {
            UploadError::MissingDeliveryState { body, .. } => {
                assert!(body.contains("attributes"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn observe_text_is_missing_state() {
        let err = observe(Payload::Text("<html>".into()), "", "u").unwrap_err();
        assert!(matches!(err, UploadError::MissingDeliveryState { .. }));
    }

    #[test]
    fn default_cadence() {
        let config = PollConfig::default();
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.max_tries, 60);
    }
}
