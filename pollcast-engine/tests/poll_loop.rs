//! End-to-end poll tests with a scripted transport and an in-memory
//! publisher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use pollcast_core::{CoreError, Event, InputConfig, Publisher};
use pollcast_engine::{
    EncoderRegistry, EngineError, HttpClient, HttpRequest, HttpResponse, Requester, Runner,
    TransformContext, Transport,
};

// ============================================================================
// Test doubles
// ============================================================================

struct ScriptedResponse {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Value,
}

impl ScriptedResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }
}

struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    repeat_last: Option<Value>,
}

impl ScriptedTransport {
    fn new(script: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            repeat_last: None,
        })
    }

    fn repeating(body: Value) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            repeat_last: Some(body),
        })
    }

    fn request_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse, EngineError> {
        self.requests.lock().unwrap().push(req.clone());
        let step = self.script.lock().unwrap().pop_front();
        let (status, headers, body) = match step {
            Some(step) => (step.status, step.headers, step.body),
            None => match &self.repeat_last {
                Some(body) => (200, Vec::new(), body.clone()),
                None => panic!("transport script exhausted for {}", req.url),
            },
        };
        let mut header = HeaderMap::new();
        for (name, value) in headers {
            header.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).unwrap(),
            );
        }
        Ok(HttpResponse {
            status,
            header,
            url: req.url.clone(),
            body: serde_json::to_vec(&body).unwrap(),
        })
    }
}

#[derive(Default)]
struct MemoryPublisher {
    events: Mutex<Vec<(Value, HashMap<String, Value>)>>,
    fail_on: AtomicUsize,
}

impl MemoryPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the n-th publish call fail (1-indexed).
    fn failing_on(n: usize) -> Arc<Self> {
        let p = Self::default();
        p.fail_on.store(n, Ordering::SeqCst);
        Arc::new(p)
    }

    fn bodies(&self) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(body, _)| body.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        event: Event,
        cursor: HashMap<String, Value>,
    ) -> Result<(), CoreError> {
        let mut events = self.events.lock().unwrap();
        if self.fail_on.load(Ordering::SeqCst) == events.len() + 1 {
            return Err(CoreError::Publish("sink unavailable".into()));
        }
        let body: Value = serde_json::from_str(&event.message).unwrap();
        events.push((body, cursor));
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollcast_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn requester(yaml: &str, transport: Arc<dyn Transport>) -> Requester {
    init_tracing();
    let cfg: InputConfig = serde_yaml::from_str(yaml).unwrap();
    cfg.validate().unwrap();
    let limiter =
        pollcast_engine::RateLimiter::new(cfg.request.rate_limit.as_ref()).unwrap();
    let client = HttpClient::new(transport, cfg.request.retry.clone(), limiter);
    Requester::new(&cfg, client, Arc::new(EncoderRegistry::new())).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_poll_splits_and_publishes_across_pages() {
    let transport = ScriptedTransport::new(vec![
        ScriptedResponse::ok(json!({
            "items": [{"id": "1"}, {"id": "2"}],
            "next": "https://api.example.com/items?page=2"
        })),
        ScriptedResponse::ok(json!({"items": [{"id": "3"}]})),
    ]);
    let requester = requester(
        r#"
request:
  url: "https://api.example.com/items"
response:
  pagination:
    - set:
        target: url.value
        value: '[[ .last_response.body.next ]]'
  split:
    target: body.items
cursor:
  last_id:
    value: '[[ .last_event.id ]]'
"#,
        transport.clone(),
    );
    let publisher = MemoryPublisher::new();
    let ctx = TransformContext::new();

    let published = requester
        .do_poll(&ctx, publisher.as_ref(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(published, 3);
    assert_eq!(
        publisher.bodies(),
        vec![json!({"id": "1"}), json!({"id": "2"}), json!({"id": "3"})]
    );
    assert_eq!(ctx.cursor_value("last_id"), Some(json!("3")));
    assert_eq!(transport.request_urls().len(), 2);
}

#[tokio::test]
async fn test_publish_failure_skips_event_and_cursor() {
    let transport = ScriptedTransport::new(vec![ScriptedResponse::ok(json!({
        "items": [{"id": "1"}, {"id": "2"}]
    }))]);
    let requester = requester(
        r#"
request:
  url: "https://api.example.com/items"
response:
  split:
    target: body.items
cursor:
  last_id:
    value: '[[ .last_event.id ]]'
"#,
        transport,
    );
    let publisher = MemoryPublisher::failing_on(2);
    let ctx = TransformContext::new();

    let published = requester
        .do_poll(&ctx, publisher.as_ref(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(published, 1);
    assert_eq!(publisher.bodies(), vec![json!({"id": "1"})]);
    assert_eq!(ctx.cursor_value("last_id"), Some(json!("1")));
}

#[tokio::test]
async fn test_cursor_feeds_next_poll_request() {
    let transport = ScriptedTransport::new(vec![
        ScriptedResponse::ok(json!({"items": [{"id": "7"}]})),
        ScriptedResponse::ok(json!({"items": [{"id": "9"}]})),
    ]);
    let requester = requester(
        r#"
request:
  url: "https://api.example.com/items"
  transforms:
    - set:
        target: url.params.after
        value: '[[ .cursor.last_id ]]'
        default: "0"
response:
  split:
    target: body.items
cursor:
  last_id:
    value: '[[ .last_event.id ]]'
"#,
        transport.clone(),
    );
    let publisher = MemoryPublisher::new();
    let ctx = TransformContext::new();
    let cancel = CancellationToken::new();

    requester
        .do_poll(&ctx, publisher.as_ref(), &cancel)
        .await
        .unwrap();
    requester
        .do_poll(&ctx, publisher.as_ref(), &cancel)
        .await
        .unwrap();

    let urls = transport.request_urls();
    assert_eq!(urls[0], "https://api.example.com/items?after=0");
    assert_eq!(urls[1], "https://api.example.com/items?after=7");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_poll_suspends_then_completes() {
    let reset = (Utc::now().timestamp() + 2).to_string();
    let transport = ScriptedTransport::new(vec![
        ScriptedResponse {
            status: 429,
            headers: vec![
                ("x-rate-limit-remaining", "0".to_string()),
                ("x-rate-limit-reset", reset),
            ],
            body: json!({}),
        },
        ScriptedResponse::ok(json!({"items": [{"id": "1"}]})),
    ]);
    let requester = requester(
        r#"
request:
  url: "https://api.example.com/items"
  rate_limit:
    remaining: '[[ .last_response.header.X-Rate-Limit-Remaining ]]'
    reset: '[[ .last_response.header.X-Rate-Limit-Reset ]]'
response:
  split:
    target: body.items
"#,
        transport,
    );
    let publisher = MemoryPublisher::new();

    let published = requester
        .do_poll(
            &TransformContext::new(),
            publisher.as_ref(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(published, 1);
    assert_eq!(publisher.bodies(), vec![json!({"id": "1"})]);
}

#[tokio::test]
async fn test_empty_split_target_suppresses_page() {
    let transport = ScriptedTransport::new(vec![ScriptedResponse::ok(json!({"meta": "only"}))]);
    let requester = requester(
        r#"
request:
  url: "https://api.example.com/items"
response:
  split:
    target: body.items
"#,
        transport,
    );
    let publisher = MemoryPublisher::new();

    let published = requester
        .do_poll(
            &TransformContext::new(),
            publisher.as_ref(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(published, 0);
    assert_eq!(publisher.count(), 0);
}

#[tokio::test]
async fn test_whole_page_published_without_split() {
    let transport =
        ScriptedTransport::new(vec![ScriptedResponse::ok(json!({"status": "green"}))]);
    let requester = requester(
        r#"
request:
  url: "https://api.example.com/health"
"#,
        transport,
    );
    let publisher = MemoryPublisher::new();

    let published = requester
        .do_poll(
            &TransformContext::new(),
            publisher.as_ref(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(published, 1);
    assert_eq!(publisher.bodies(), vec![json!({"status": "green"})]);
}

#[tokio::test(start_paused = true)]
async fn test_runner_polls_on_interval_until_cancelled() {
    let transport = ScriptedTransport::repeating(json!({"items": [{"id": "x"}]}));
    let cfg: InputConfig = serde_yaml::from_str(
        r#"
interval: 1
request:
  url: "https://api.example.com/items"
response:
  split:
    target: body.items
"#,
    )
    .unwrap();
    let runner = Runner::with_transport(cfg, HashMap::new(), transport).unwrap();
    let cancel = runner.cancellation_token();
    let publisher = MemoryPublisher::new();

    let handle = {
        let publisher = publisher.clone();
        tokio::spawn(async move { runner.run(publisher.as_ref()).await })
    };

    while publisher.count() < 3 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert!(publisher.count() >= 3);
}

#[tokio::test]
async fn test_persisted_cursor_seeds_first_request() {
    let transport = ScriptedTransport::repeating(json!({"items": []}));
    let cfg: InputConfig = serde_yaml::from_str(
        r#"
request:
  url: "https://api.example.com/items"
  transforms:
    - set:
        target: url.params.after
        value: '[[ .cursor.last_id ]]'
        default: "0"
response:
  split:
    target: body.items
    ignore_empty_value: true
"#,
    )
    .unwrap();
    let mut cursor = HashMap::new();
    cursor.insert("last_id".to_string(), json!("41"));
    let runner = Runner::with_transport(cfg, cursor, transport.clone()).unwrap();
    let publisher = MemoryPublisher::new();

    // One manual poll through the runner's context.
    let cancel = runner.cancellation_token();
    let run = runner.run(publisher.as_ref());
    tokio::pin!(run);
    tokio::select! {
        _ = &mut run => {}
        _ = async {
            while transport.request_urls().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            cancel.cancel();
        } => {}
    }

    assert_eq!(
        transport.request_urls()[0],
        "https://api.example.com/items?after=41"
    );
}
