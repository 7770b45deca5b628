//! Bearer-authenticated HTTP with retry on 401/429.

use std::time::Duration;

use ascflow_token::{Credential, TokenIssuer, unix_now};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{RetryPolicy, SessionConfig};
use crate::error::ClientError;

/// Method, headers and body of one logical request.
///
/// The body is kept as owned bytes so the request can be rebuilt for
/// every attempt.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Issues requests with the session's bearer token attached.
///
/// A 401 or 429 response is re-issued unchanged (after a backoff delay)
/// until the policy's attempt budget runs out; the last response is
/// returned either way. Every other status goes straight back to the
/// caller.
pub struct ResilientRequester {
    http: reqwest::Client,
    issuer: TokenIssuer,
    credential: RwLock<Credential>,
    policy: RetryPolicy,
    renew_margin: Duration,
}

impl ResilientRequester {
    /// Creates a requester and mints the session's first credential.
    pub fn new(
        http: reqwest::Client,
        issuer: TokenIssuer,
        policy: RetryPolicy,
        renew_margin: Duration,
    ) -> Result<Self, ClientError> {
        let credential = issuer.mint()?;
        Ok(Self {
            http,
            issuer,
            credential: RwLock::new(credential),
            policy,
            renew_margin,
        })
    }

    /// Builds the HTTP client, loads the key and mints a credential.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ClientError> {
        let pem = config.private_key.load(&config.key_id)?;
        let issuer = TokenIssuer::new(
            config.issuer_id.clone(),
            config.key_id.clone(),
            &pem,
            config.token_lifetime(),
        )?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Self::new(http, issuer, config.retry.clone(), config.renew_margin())
    }

    /// Underlying HTTP client, for calls that must not carry the token.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Snapshot of the credential currently in use.
    pub async fn credential(&self) -> Credential {
        self.credential.read().await.clone()
    }

    /// Sends `options` to `url`, retrying on 401/429.
    pub async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, ClientError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let may_retry = self.policy.allows(&options.method);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let token = self.bearer_at(unix_now()?).await?;

            let mut headers = options.headers.clone();
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);

            let mut req = self
                .http
                .request(options.method.clone(), url)
                .headers(headers);
            if let Some(body) = &options.body {
                req = req.body(body.clone());
            }

            let resp = req.send().await?;
            let status = resp.status();
            debug!(method = %options.method, %url, status = status.as_u16(), attempt, "response");

            if !is_auth_transient(status) || !may_retry || attempt >= max_attempts {
                if is_auth_transient(status) {
                    warn!(%url, status = status.as_u16(), attempt, "giving up on rejected request");
                }
                return Ok(resp);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                %url,
                status = status.as_u16(),
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                "request rejected, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Returns a token valid at `now`, re-minting inside the renewal margin.
    async fn bearer_at(&self, now: u64) -> Result<String, ClientError> {
        {
            let current = self.credential.read().await;
            if !current.needs_renewal(now, self.renew_margin) {
                return Ok(current.token().to_string());
            }
        }

        let mut current = self.credential.write().await;
        // Another request may have renewed while we waited for the lock.
        if current.needs_renewal(now, self.renew_margin) {
            *current = self.issuer.mint_at(now)?;
            debug!(expires_at = current.expires_at, "renewed bearer token");
        }
        Ok(current.token().to_string())
    }
}

fn is_auth_transient(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PRIVATE_KEY: &str = include_str!("../../token/testdata/AuthKey_TESTKEY123.p8");

    fn issuer(lifetime: Duration) -> TokenIssuer {
        TokenIssuer::new("issuer-1", "TESTKEY123", PRIVATE_KEY.as_bytes(), lifetime).unwrap()
    }

    fn requester(policy: RetryPolicy) -> ResilientRequester {
        ResilientRequester::new(
            reqwest::Client::new(),
            issuer(Duration::from_secs(1200)),
            policy,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    /// Starts a mock HTTP server answering connections with `statuses` in
    /// order (the last one repeats). Returns the URL and a hit counter.
    async fn mock_sequence(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/resource");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses[n.min(statuses.len() - 1)];
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;

                let body = "{}";
                let resp = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, hits)
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let (url, hits) = mock_sequence(vec![200]).await;
        let resp = requester(RetryPolicy::immediate(5))
            .request(&url, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_401_then_succeeds() {
        let (url, hits) = mock_sequence(vec![401, 429, 200]).await;
        let resp = requester(RetryPolicy::immediate(5))
            .request(&url, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (url, hits) = mock_sequence(vec![401]).await;
        let resp = requester(RetryPolicy::immediate(5))
            .request(&url, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        for status in [400, 403, 404, 500, 503] {
            let (url, hits) = mock_sequence(vec![status, 200]).await;
            let resp = requester(RetryPolicy::immediate(5))
                .request(&url, &RequestOptions::default())
                .await
                .unwrap();
            assert_eq!(resp.status().as_u16(), status);
            assert_eq!(hits.load(Ordering::SeqCst), 1, "status {status}");
        }
    }

    #[tokio::test]
    async fn unsafe_method_not_retried_when_disabled() {
        let (url, hits) = mock_sequence(vec![429, 200]).await;
        let mut policy = RetryPolicy::immediate(5);
        policy.retry_unsafe_methods = false;

        let resp = requester(policy)
            .request(&url, &RequestOptions::new(Method::POST).with_body(b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 429);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_sleeps_between_attempts() {
        let (url, hits) = mock_sequence(vec![429, 429, 200]).await;
        let policy = RetryPolicy {
            initial_delay_ms: 40,
            ..RetryPolicy::default()
        };
        let started = std::time::Instant::now();
        let resp = requester(policy)
            .request(&url, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        // 40ms + 80ms, each at least 75% after jitter.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn keeps_credential_outside_margin() {
        let req = requester(RetryPolicy::default());
        let first = req.credential().await;
        let token = req.bearer_at(first.issued_at + 10).await.unwrap();
        assert_eq!(token, first.token());
        assert_eq!(req.credential().await, first);
    }

    #[tokio::test]
    async fn renews_credential_inside_margin() {
        let req = ResilientRequester::new(
            reqwest::Client::new(),
            issuer(Duration::from_secs(120)),
            RetryPolicy::default(),
            Duration::from_secs(60),
        )
        .unwrap();
        let first = req.credential().await;

        let later = first.issued_at + 100;
        req.bearer_at(later).await.unwrap();

        let renewed = req.credential().await;
        assert_eq!(renewed.issued_at, later);
        assert_eq!(renewed.expires_at, later + 120);
    }

    #[test]
    fn auth_transient_statuses() {
        assert!(is_auth_transient(StatusCode::UNAUTHORIZED));
        assert!(is_auth_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_auth_transient(StatusCode::FORBIDDEN));
        assert!(!is_auth_transient(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
