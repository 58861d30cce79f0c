//! Header-driven rate limiting.
//!
//! APIs advertise their quota through response headers; which headers is
//! API-specific, so the three fields (`limit`, `reset`, `remaining`) are
//! value templates evaluated against the response that carried them. When a
//! request comes back 429 and the quota is exhausted, the whole call chain
//! suspends in line until the advertised reset time, then retries.

use std::future::Future;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pollcast_core::config::RateLimitConfig;

use crate::client::HttpResponse;
use crate::context::{Page, TransformContext};
use crate::error::EngineError;
use crate::template::ValueTemplate;
use crate::transformable::{Body, Transformable};

/// Evaluates rate limit headers and suspends between retries.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: Option<ValueTemplate>,
    reset: Option<ValueTemplate>,
    remaining: Option<ValueTemplate>,
}

impl RateLimiter {
    /// Compiles the configured templates. Returns `None` when the block is
    /// absent so callers can skip the limiter entirely.
    pub fn new(cfg: Option<&RateLimitConfig>) -> Result<Option<Self>, EngineError> {
        let Some(cfg) = cfg else { return Ok(None) };
        let compile = |tpl: &Option<String>| -> Result<Option<ValueTemplate>, EngineError> {
            tpl.as_deref()
                .map(ValueTemplate::compile)
                .transpose()
                .map_err(EngineError::from)
        };
        Ok(Some(Self {
            limit: compile(&cfg.limit)?,
            reset: compile(&cfg.reset)?,
            remaining: compile(&cfg.remaining)?,
        }))
    }

    /// Runs `call` until it produces a usable response.
    ///
    /// A 200 is returned as-is. A 429 suspends until the reset time derived
    /// from the response headers (or retries immediately when the quota is
    /// not exhausted), then calls again. Any other status fails the poll.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<HttpResponse, EngineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<HttpResponse, EngineError>>,
    {
        loop {
            let resp = call().await?;
            if resp.status == 200 {
                return Ok(resp);
            }
            if resp.status != 429 {
                return Err(EngineError::Status {
                    status: resp.status,
                    body: String::from_utf8_lossy(&resp.body).into_owned(),
                });
            }
            let epoch = self.reset_epoch(&resp)?;
            let wait_secs = epoch - Utc::now().timestamp();
            if wait_secs <= 0 {
                debug!("rate limited but quota not exhausted, retrying");
                continue;
            }
            warn!(
                reset_epoch = epoch,
                wait_secs, "rate limit exceeded, suspending until reset"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(std::time::Duration::from_secs(wait_secs as u64)) => {}
            }
        }
    }

    /// Derives the Unix epoch second to wait until from a 429 response.
    ///
    /// Returns 0 (no wait) when the `remaining` template is absent or
    /// evaluates non-zero, or when the reset time is already past.
    fn reset_epoch(&self, resp: &HttpResponse) -> Result<i64, EngineError> {
        let ctx = TransformContext::new();
        ctx.update_last_response(Page {
            body: Body::new(),
            header: resp.header.clone(),
            url: resp.url.clone(),
            page: 1,
        });
        let tr = Transformable::new(resp.url.clone());

        if let Some(limit) = &self.limit {
            if let Ok(value) = limit.execute(&ctx, &tr, None) {
                debug!(limit = %value, "rate limit quota");
            }
        }

        let Some(remaining) = &self.remaining else {
            return Ok(0);
        };
        let remaining = remaining.execute(&ctx, &tr, None)?;
        let remaining: i64 = remaining.parse().map_err(|_| {
            EngineError::InvalidConfig(format!(
                "rate limit remaining is not a number: {remaining:?}"
            ))
        })?;
        if remaining != 0 {
            return Ok(0);
        }

        let Some(reset) = &self.reset else {
            return Ok(0);
        };
        let reset = reset.execute(&ctx, &tr, None)?;
        let epoch: i64 = reset.parse().map_err(|_| {
            EngineError::InvalidConfig(format!("rate limit reset is not an epoch: {reset:?}"))
        })?;
        if epoch <= Utc::now().timestamp() {
            return Ok(0);
        }
        Ok(epoch)
    }
}
