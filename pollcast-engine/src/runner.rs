//! The per-input run loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pollcast_core::config::InputConfig;
use pollcast_core::Publisher;

use crate::client::{HttpClient, ReqwestTransport, Transport};
use crate::context::TransformContext;
use crate::encode::EncoderRegistry;
use crate::error::EngineError;
use crate::probe;
use crate::rate_limit::RateLimiter;
use crate::request::Requester;

/// Owns everything one input needs to poll: the client stack, the compiled
/// request machinery, and the shared transform context.
///
/// All configuration is compiled up front; [`Runner::run`] itself can only
/// fail by cancellation. Poll failures are logged and the next interval
/// fires regardless.
pub struct Runner {
    cfg: InputConfig,
    requester: Requester,
    ctx: TransformContext,
    cancel: CancellationToken,
}

impl Runner {
    /// Builds a runner with the production `reqwest` transport.
    ///
    /// `cursor` holds the host's persisted checkpoint values, empty on a
    /// first run.
    pub fn new(cfg: InputConfig, cursor: HashMap<String, Value>) -> Result<Self, EngineError> {
        let transport = Arc::new(ReqwestTransport::new(&cfg.request)?);
        Self::with_transport(cfg, cursor, transport)
    }

    /// Builds a runner around an injected transport. Tests script responses
    /// this way.
    pub fn with_transport(
        cfg: InputConfig,
        cursor: HashMap<String, Value>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineError> {
        cfg.validate()?;
        let limiter = RateLimiter::new(cfg.request.rate_limit.as_ref())?;
        let client = HttpClient::new(transport, cfg.request.retry.clone(), limiter);
        let encoders = Arc::new(EncoderRegistry::new());
        let requester = Requester::new(&cfg, client, encoders)?;
        Ok(Self {
            cfg,
            requester,
            ctx: TransformContext::with_cursor(cursor),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the run loop. Clone it and cancel from anywhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The shared transform context, exposed so hosts can inspect cursor
    /// values after shutdown.
    pub fn context(&self) -> &TransformContext {
        &self.ctx
    }

    /// Dials the configured endpoint to catch unreachable hosts before the
    /// loop starts.
    pub async fn probe(&self) -> Result<(), EngineError> {
        probe::probe(&self.cfg.request.url, Some(self.cfg.request.timeout())).await
    }

    /// Polls immediately, then on every interval tick, until cancelled.
    pub async fn run(&self, publisher: &dyn Publisher) -> Result<(), EngineError> {
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("run loop cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            match self.requester.do_poll(&self.ctx, publisher, &self.cancel).await {
                Ok(events) => info!(events, url = %self.cfg.request.url, "poll complete"),
                Err(EngineError::Cancelled) => {
                    info!("poll cancelled");
                    return Ok(());
                }
                // A failed poll is not fatal; the next tick retries from the
                // current cursor.
                Err(err) => error!(error = %err, "poll failed"),
            }
        }
    }
}
