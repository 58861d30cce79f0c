//! Page iteration within a single poll.
//!
//! Without a `pagination` transform chain the iterator yields the initial
//! page and stops. With one, each `next()` builds a follow-up request from
//! the chain (which reads `last_response` to find the next URL or
//! parameters) and fetches it, until the chain signals
//! [`EngineError::NewUrlUnset`] or a page comes back with an empty body.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use pollcast_core::config::InputConfig;

use crate::client::{HttpClient, HttpRequest, HttpResponse};
use crate::context::{Page, TransformContext};
use crate::encode::EncoderRegistry;
use crate::error::EngineError;
use crate::request::RequestFactory;

/// Pagination mode for one input, built once from configuration.
#[derive(Debug, Clone)]
pub struct Pagination {
    factory: Option<RequestFactory>,
}

impl Pagination {
    /// Compiles the pagination request factory when a chain is configured.
    pub fn new(cfg: &InputConfig, encoders: Arc<EncoderRegistry>) -> Result<Self, EngineError> {
        let factory = if cfg.response.pagination.is_empty() {
            None
        } else {
            Some(RequestFactory::for_pagination(
                cfg,
                &cfg.response.pagination,
                encoders,
            )?)
        };
        Ok(Self { factory })
    }

    /// Starts iterating a poll from its initial request.
    pub fn iterator(
        &self,
        ctx: TransformContext,
        initial: HttpRequest,
        cancel: CancellationToken,
    ) -> PageIterator {
        PageIterator {
            factory: self.factory.clone(),
            ctx,
            pending: Some(initial),
            page: 0,
            done: false,
            cancel,
        }
    }
}

/// Yields decoded pages until the input is exhausted.
pub struct PageIterator {
    factory: Option<RequestFactory>,
    ctx: TransformContext,
    pending: Option<HttpRequest>,
    page: u64,
    done: bool,
    cancel: CancellationToken,
}

impl PageIterator {
    /// Fetches and decodes the next page. `Ok(None)` means the poll is
    /// complete; any error also ends the iteration.
    pub async fn next(&mut self, client: &HttpClient) -> Result<Option<Page>, EngineError> {
        if self.done || self.cancel.is_cancelled() {
            return Ok(None);
        }

        let request = match self.pending.take() {
            Some(initial) => initial,
            None => {
                let Some(factory) = &self.factory else {
                    self.done = true;
                    return Ok(None);
                };
                match factory.create(&self.ctx) {
                    Ok(req) => req,
                    Err(EngineError::NewUrlUnset) => {
                        debug!("pagination chain produced no next url, stopping");
                        self.done = true;
                        return Ok(None);
                    }
                    Err(err) => {
                        self.done = true;
                        return Err(err);
                    }
                }
            }
        };

        let resp = match client.fetch(&request, &self.cancel).await {
            Ok(resp) => resp,
            Err(err) => {
                self.done = true;
                return Err(err);
            }
        };
        let page = self.decode(resp)?;

        // An empty follow-up page means the API ran out of data.
        if page.page > 1 && page.body.is_empty() {
            debug!(page = page.page, "empty page body, stopping pagination");
            self.done = true;
            return Ok(None);
        }
        Ok(Some(page))
    }

    fn decode(&mut self, resp: HttpResponse) -> Result<Page, EngineError> {
        let body = match resp.json_body() {
            Ok(body) => body,
            Err(err) => {
                self.done = true;
                return Err(err);
            }
        };
        self.page += 1;
        Ok(Page {
            body,
            header: resp.header,
            url: resp.url,
            page: self.page,
        })
    }
}
