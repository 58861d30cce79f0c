//! HTTP execution: the transport seam, redirect handling, and retries.
//!
//! The engine never talks to the network directly. Everything goes through
//! the [`Transport`] trait so tests can script responses; the production
//! implementation wraps a `reqwest` client with manual redirect handling,
//! since forwarding headers across hops (minus a ban list) is not something
//! the built-in policy can express.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use pollcast_core::config::{Method, RedirectConfig, RequestConfig, RetryConfig};

use crate::error::EngineError;
use crate::rate_limit::RateLimiter;
use crate::transformable::Body;

/// A fully built request, ready for the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URL with query parameters applied.
    pub url: Url,
    /// Request headers.
    pub header: HeaderMap,
    /// Encoded request body, if any.
    pub body: Option<Vec<u8>>,
}

/// A raw response: status, headers, final URL, and the full body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub header: HeaderMap,
    /// The URL that produced this response, after redirects.
    pub url: Url,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Decodes the body as a JSON object. An empty body decodes to an empty
    /// map, which pagination treats as the end of data.
    pub fn json_body(&self) -> Result<Body, EngineError> {
        if self.body.is_empty() {
            return Ok(Body::new());
        }
        match serde_json::from_slice(&self.body)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(EngineError::NotAnObject),
        }
    }
}

/// The seam between the engine and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and reads the full response.
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse, EngineError>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    redirect: RedirectConfig,
}

impl ReqwestTransport {
    /// Builds a client from the request configuration: timeout, optional
    /// proxy, and redirects disabled (they are followed manually).
    pub fn new(cfg: &RequestConfig) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .redirect(reqwest::redirect::Policy::none());
        if let Some(proxy) = &cfg.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        Ok(Self {
            client: builder.build()?,
            redirect: cfg.redirect.clone(),
        })
    }

    fn next_location(current: &Url, resp_header: &HeaderMap) -> Result<Url, EngineError> {
        let location = resp_header
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| EngineError::Transport("redirect without Location header".into()))?;
        current
            .join(location)
            .map_err(|e| EngineError::Transport(format!("invalid redirect target {location:?}: {e}")))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse, EngineError> {
        let mut url = req.url.clone();
        let mut header = req.header.clone();
        let mut method = req.method;
        let mut body = req.body.clone();
        let mut hops = 0u32;

        loop {
            let reqwest_method = match method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
            };
            let mut builder = self
                .client
                .request(reqwest_method, url.clone())
                .headers(header.clone());
            if let Some(bytes) = &body {
                builder = builder.body(bytes.clone());
            }
            let resp = builder.send().await?;
            let status = resp.status();

            if status.is_redirection() {
                hops += 1;
                if hops > self.redirect.max_redirects {
                    return Err(EngineError::Transport(format!(
                        "stopped after {} redirects",
                        self.redirect.max_redirects
                    )));
                }
                url = Self::next_location(&url, resp.headers())?;
                if self.redirect.forward_headers {
                    for banned in &self.redirect.headers_ban_list {
                        header.remove(banned.as_str());
                    }
                } else {
                    header = HeaderMap::new();
                }
                // 301/302/303 downgrade to a body-less GET, like browsers do.
                if matches!(status.as_u16(), 301 | 302 | 303) {
                    method = Method::Get;
                    body = None;
                }
                debug!(hops, url = %url, "following redirect");
                continue;
            }

            let final_url = resp.url().clone();
            let resp_header = resp.headers().clone();
            let bytes = resp.bytes().await?;
            return Ok(HttpResponse {
                status: status.as_u16(),
                header: resp_header,
                url: final_url,
                body: bytes.to_vec(),
            });
        }
    }
}

/// The engine's view of HTTP: transport plus retry policy plus rate limiter.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    limiter: Option<RateLimiter>,
}

impl HttpClient {
    /// Wraps a transport with the retry policy and optional rate limiter.
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryConfig,
        limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            transport,
            retry,
            limiter,
        }
    }

    /// Executes a request to completion: retries transient failures, defers
    /// 429 handling to the rate limiter, and turns any remaining error
    /// status into [`EngineError::Status`].
    pub async fn fetch(
        &self,
        req: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, EngineError> {
        let resp = match &self.limiter {
            Some(limiter) => {
                limiter
                    .execute(cancel, || self.send_with_retry(req, cancel))
                    .await?
            }
            None => self.send_with_retry(req, cancel).await?,
        };
        if resp.status >= 400 {
            return Err(EngineError::Status {
                status: resp.status,
                body: String::from_utf8_lossy(&resp.body).into_owned(),
            });
        }
        Ok(resp)
    }

    /// Sends with exponential backoff between attempts. Transport failures
    /// and 5xx responses are retryable; anything else is returned as-is for
    /// the caller to judge.
    async fn send_with_retry(
        &self,
        req: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, EngineError> {
        let mut wait = self.retry.wait_min;
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let outcome = self.transport.send(req).await;
            let retryable = match &outcome {
                Ok(resp) => resp.status >= 500,
                Err(EngineError::Transport(_)) => true,
                Err(_) => false,
            };
            if !retryable || attempt == max_attempts {
                return outcome;
            }
            match &outcome {
                Ok(resp) => warn!(
                    attempt,
                    status = resp.status,
                    wait_ms = wait.as_millis() as u64,
                    "server error, retrying"
                ),
                Err(err) => warn!(
                    attempt,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "transport error, retrying"
                ),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            wait = (wait * 2).min(self.retry.wait_max);
        }
        Err(EngineError::Transport("retry budget exhausted".into()))
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", &self.retry)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}
