//! Per-poll transform context shared by template evaluations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use reqwest::header::HeaderMap;
use serde_json::Value;
use url::Url;

use crate::transformable::{header_to_json, Body};

/// One HTTP page: the transient result of a single round trip.
#[derive(Debug, Clone)]
pub struct Page {
    /// Decoded JSON body. Empty when the response had no body.
    pub body: Body,
    /// Response headers.
    pub header: HeaderMap,
    /// The URL the page was fetched from.
    pub url: Url,
    /// 1-indexed page number within the poll.
    pub page: u64,
}

impl Page {
    /// JSON view of this page, as exposed to templates under
    /// `last_response`.
    pub fn to_json(&self) -> Value {
        let mut obj = Body::new();
        obj.insert("body".to_string(), Value::Object(self.body.clone()));
        obj.insert("header".to_string(), header_to_json(&self.header));
        obj.insert("url".to_string(), Value::String(self.url.to_string()));
        obj.insert("page".to_string(), Value::from(self.page));
        Value::Object(obj)
    }
}

#[derive(Debug, Default)]
struct ContextInner {
    cursor: HashMap<String, Value>,
    last_event: Body,
    last_response: Option<Page>,
}

/// Read-mostly per-poll state visible to every template evaluation.
///
/// Holds the prior checkpoint values (`cursor`), the previous emitted event
/// (`last_event`, surviving across polls), and the most recent raw page
/// (`last_response`). Cloning shares the same state; the split producer task
/// reads it while the poll-driving task updates it between publish
/// confirmations. Lock scopes are short and never held across an await.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    inner: Arc<RwLock<ContextInner>>,
}

impl TransformContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context seeded with persisted cursor values.
    pub fn with_cursor(cursor: HashMap<String, Value>) -> Self {
        let ctx = Self::new();
        ctx.inner.write().unwrap_or_else(|e| e.into_inner()).cursor = cursor;
        ctx
    }

    /// Snapshot of the cursor values, as handed to the publisher.
    pub fn cursor_map(&self) -> HashMap<String, Value> {
        self.read().cursor.clone()
    }

    /// Returns one cursor value.
    pub fn cursor_value(&self, name: &str) -> Option<Value> {
        self.read().cursor.get(name).cloned()
    }

    /// Stores one cursor value.
    pub fn set_cursor_value(&self, name: &str, value: Value) {
        self.write().cursor.insert(name.to_string(), value);
    }

    /// Replaces the last emitted event.
    pub fn update_last_event(&self, event: Body) {
        self.write().last_event = event;
    }

    /// Replaces the most recent page.
    pub fn update_last_response(&self, page: Page) {
        self.write().last_response = Some(page);
    }

    /// Clone of the most recent page, if any.
    pub fn last_response(&self) -> Option<Page> {
        self.read().last_response.clone()
    }

    /// JSON view of the context, merged into the template namespace.
    pub fn to_json(&self) -> Value {
        let inner = self.read();
        let mut obj = Body::new();
        let mut cursor = Body::new();
        for (k, v) in &inner.cursor {
            cursor.insert(k.clone(), v.clone());
        }
        obj.insert("cursor".to_string(), Value::Object(cursor));
        obj.insert("last_event".to_string(), Value::Object(inner.last_event.clone()));
        let last_response = match &inner.last_response {
            Some(page) => page.to_json(),
            None => Value::Object(Body::new()),
        };
        obj.insert("last_response".to_string(), last_response);
        Value::Object(obj)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ContextInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ContextInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
