//! Request construction and the poll orchestration loop.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use pollcast_core::config::{AuthConfig, InputConfig, Method, TransformConfig};
use pollcast_core::make_event;
use pollcast_core::Publisher;

use crate::client::{HttpClient, HttpRequest};
use crate::context::TransformContext;
use crate::encode::EncoderRegistry;
use crate::error::EngineError;
use crate::pagination::Pagination;
use crate::split::{MaybeEvent, SplitSpec};
use crate::transform::{Namespace, TransformChain};
use crate::transformable::{Body, Transformable};

/// Builds concrete HTTP requests from configured seeds plus a transform
/// chain.
///
/// One factory is built for the initial request of each poll
/// ([`Namespace::Request`]) and, when pagination is configured, a second one
/// for follow-up pages ([`Namespace::Pagination`]). Both seed from the
/// configured URL, headers, and static body; only the transform chain
/// differs.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    url: Url,
    method: Method,
    header: HeaderMap,
    body: Option<Body>,
    chain: TransformChain,
    encoders: Arc<EncoderRegistry>,
}

impl RequestFactory {
    /// Builds the factory for the initial request of a poll.
    pub fn new(cfg: &InputConfig, encoders: Arc<EncoderRegistry>) -> Result<Self, EngineError> {
        Self::build(
            cfg,
            &cfg.request.transforms,
            Namespace::Request,
            encoders,
        )
    }

    /// Builds the factory for pagination follow-up requests.
    pub fn for_pagination(
        cfg: &InputConfig,
        transforms: &[TransformConfig],
        encoders: Arc<EncoderRegistry>,
    ) -> Result<Self, EngineError> {
        Self::build(cfg, transforms, Namespace::Pagination, encoders)
    }

    fn build(
        cfg: &InputConfig,
        transforms: &[TransformConfig],
        ns: Namespace,
        encoders: Arc<EncoderRegistry>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            url: cfg.request.url.clone(),
            method: cfg.request.method,
            header: static_headers(&cfg.request.headers, cfg.auth.as_ref())?,
            body: cfg.request.body.clone(),
            chain: TransformChain::compile(transforms, ns)?,
            encoders,
        })
    }

    /// Produces a request: seeds the transformable, runs the chain, and
    /// encodes the body for POST.
    ///
    /// Propagates [`EngineError::NewUrlUnset`] untouched; for the pagination
    /// factory that is the end-of-pages signal.
    pub fn create(&self, ctx: &TransformContext) -> Result<HttpRequest, EngineError> {
        let mut tr = Transformable::new(self.url.clone());
        tr.header = self.header.clone();
        if let Some(body) = &self.body {
            tr.body = body.clone();
        }
        self.chain.apply(ctx, &mut tr)?;

        let body = if self.method == Method::Post {
            if !tr.header.contains_key(CONTENT_TYPE) {
                tr.header
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            let content_type = tr
                .header
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Some(
                self.encoders
                    .get(content_type.as_deref())
                    .encode(&tr.body)?,
            )
        } else {
            None
        };

        Ok(HttpRequest {
            method: self.method,
            url: tr.url,
            header: tr.header,
            body,
        })
    }
}

fn static_headers(
    headers: &HashMap<String, String>,
    auth: Option<&AuthConfig>,
) -> Result<HeaderMap, EngineError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| EngineError::InvalidConfig(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EngineError::InvalidConfig(format!("invalid header value: {e}")))?;
        map.append(name, value);
    }
    if let Some(auth) = auth {
        if let Some(token) = &auth.token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| EngineError::InvalidConfig(format!("invalid auth token: {e}")))?;
            map.insert(AUTHORIZATION, value);
        } else if auth.basic_enabled() {
            let user = auth.user.as_deref().unwrap_or_default();
            let password = auth.password.as_deref().unwrap_or_default();
            let encoded = BASE64.encode(format!("{user}:{password}"));
            let value = HeaderValue::from_str(&format!("Basic {encoded}"))
                .map_err(|e| EngineError::InvalidConfig(format!("invalid basic auth: {e}")))?;
            map.insert(AUTHORIZATION, value);
        }
    }
    Ok(map)
}

/// Drives one poll end to end: fetch pages, split them into events, publish,
/// and advance the cursor.
pub struct Requester {
    client: HttpClient,
    factory: RequestFactory,
    pagination: Pagination,
    response_chain: TransformChain,
    split: Option<SplitSpec>,
    cursor: crate::cursor::Cursor,
}

impl Requester {
    /// Builds every per-poll component once from configuration.
    pub fn new(
        cfg: &InputConfig,
        client: HttpClient,
        encoders: Arc<EncoderRegistry>,
    ) -> Result<Self, EngineError> {
        let factory = RequestFactory::new(cfg, encoders.clone())?;
        let pagination = Pagination::new(cfg, encoders)?;
        let response_chain =
            TransformChain::compile(&cfg.response.transforms, Namespace::Response)?;
        let split = cfg
            .response
            .split
            .as_ref()
            .map(SplitSpec::compile)
            .transpose()?;
        let cursor = crate::cursor::Cursor::compile(&cfg.cursor)?;
        Ok(Self {
            client,
            factory,
            pagination,
            response_chain,
            split,
            cursor,
        })
    }

    /// Runs one poll. Returns the number of published events.
    ///
    /// Pages stream through the split engine into a rendezvous channel; the
    /// consumer side publishes each event and only then lets the producer
    /// continue, so the cursor always reflects the last event actually
    /// handed off.
    pub async fn do_poll(
        &self,
        ctx: &TransformContext,
        publisher: &dyn Publisher,
        cancel: &CancellationToken,
    ) -> Result<u64, EngineError> {
        let initial = self.factory.create(ctx)?;
        let mut iterator = self.pagination.iterator(ctx.clone(), initial, cancel.clone());
        let mut published = 0u64;

        while let Some(page) = iterator.next(&self.client).await? {
            ctx.update_last_response(page.clone());
            debug!(page = page.page, url = %page.url, "processing page");

            let mut tr = Transformable::new(page.url.clone());
            tr.body = page.body.clone();
            tr.header = page.header.clone();
            self.response_chain.apply(ctx, &mut tr)?;

            let (sender, mut receiver) = tokio::sync::mpsc::channel::<MaybeEvent>(1);
            let producer: tokio::task::JoinHandle<Result<(), EngineError>> = match &self.split {
                Some(split) => {
                    let split = split.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let result = split.run(&ctx, tr, &sender).await;
                        match result {
                            Err(crate::error::SplitError::EmptyRootField) => {
                                debug!("split root field empty, nothing to publish");
                                Ok(())
                            }
                            Err(err) => {
                                let _ = sender.send(MaybeEvent::Error(err.to_string())).await;
                                Ok(())
                            }
                            Ok(()) => Ok(()),
                        }
                    })
                }
                None => tokio::spawn(async move {
                    if sender.send(MaybeEvent::Body(tr.body)).await.is_err() {
                        return Err(EngineError::Split(
                            crate::error::SplitError::ChannelClosed,
                        ));
                    }
                    Ok(())
                }),
            };

            while let Some(message) = receiver.recv().await {
                let body = match message {
                    MaybeEvent::Body(body) => body,
                    MaybeEvent::Error(msg) => {
                        warn!(error = %msg, "split failed for page");
                        continue;
                    }
                };
                let event = make_event(&body)?;
                match publisher.publish(event, ctx.cursor_map()).await {
                    Ok(()) => {
                        ctx.update_last_event(body);
                        self.cursor.advance(ctx);
                        published += 1;
                    }
                    Err(err) => {
                        warn!(error = %err, "publish failed, event dropped");
                    }
                }
            }

            match producer.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(err) => {
                    return Err(EngineError::Transport(format!(
                        "split producer panicked: {err}"
                    )))
                }
            }
        }

        Ok(published)
    }
}
