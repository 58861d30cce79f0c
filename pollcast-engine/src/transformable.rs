//! The mutable request/response bundle passed through a transform chain.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

use crate::error::EngineError;

/// Ordered JSON object used for request and response bodies.
pub type Body = serde_json::Map<String, Value>;

/// A mutable bundle of body, headers, and URL.
///
/// Each transform in a chain may read and overwrite any of the three fields.
/// Cloning deep-copies body and headers so a page or split branch can proceed
/// without mutating a sibling's state.
#[derive(Debug, Clone)]
pub struct Transformable {
    /// JSON body under construction or inspection.
    pub body: Body,
    /// Multi-value headers.
    pub header: HeaderMap,
    /// Parsed URL.
    pub url: Url,
}

impl Transformable {
    /// Creates a transformable seeded with the given URL and empty
    /// body/headers.
    pub fn new(url: Url) -> Self {
        Self {
            body: Body::new(),
            header: HeaderMap::new(),
            url,
        }
    }

    /// Appends a header value, keeping any existing values for the name.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| EngineError::InvalidConfig(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EngineError::InvalidConfig(format!("invalid header value: {e}")))?;
        self.header.append(name, value);
        Ok(())
    }

    /// Removes all values for a header name.
    pub fn remove_header(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.header.remove(name);
        }
    }

    /// Adds a repeated query parameter to the URL.
    pub fn append_url_param(&mut self, name: &str, value: &str) {
        self.url.query_pairs_mut().append_pair(name, value);
    }

    /// Overwrites a query parameter, dropping previous values for the name.
    pub fn set_url_param(&mut self, name: &str, value: &str) {
        let others: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = self.url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &others {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(name, value);
        }
        if self.url.query() == Some("") {
            self.url.set_query(None);
        }
    }

    /// Removes a query parameter.
    pub fn delete_url_param(&mut self, name: &str) {
        let others: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if others.is_empty() {
            self.url.set_query(None);
        } else {
            let mut pairs = self.url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &others {
                pairs.append_pair(k, v);
            }
        }
    }

    /// Headers as a JSON object of name to value list, for template lookups.
    pub fn header_json(&self) -> Value {
        header_to_json(&self.header)
    }

    /// URL value and params as a JSON object, for template lookups.
    pub fn url_json(&self) -> Value {
        let mut params = Body::new();
        for (k, v) in self.url.query_pairs() {
            match params.get_mut(k.as_ref()) {
                Some(Value::Array(arr)) => arr.push(Value::String(v.into_owned())),
                _ => {
                    params.insert(k.into_owned(), Value::Array(vec![Value::String(v.into_owned())]));
                }
            }
        }
        let mut obj = Body::new();
        obj.insert("value".to_string(), Value::String(self.url.to_string()));
        obj.insert("params".to_string(), Value::Object(params));
        Value::Object(obj)
    }
}

/// Converts a header map to a JSON object of name to value list.
pub fn header_to_json(header: &HeaderMap) -> Value {
    let mut obj = Body::new();
    for name in header.keys() {
        let values: Vec<Value> = header
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .collect();
        obj.insert(name.as_str().to_string(), Value::Array(values));
    }
    Value::Object(obj)
}

/// Where a transform writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A body field.
    Body,
    /// A header name.
    Header,
    /// A URL query parameter.
    UrlParams,
    /// The whole URL.
    UrlValue,
}

/// A parsed, validated transform target.
///
/// Targets arrive in configuration as string paths (`"body.foo"`,
/// `"header.X-Token"`, `"url.params.page"`, `"url.value"`) and are resolved
/// once when the pipeline is built, never re-parsed per evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Which part of the transformable this addresses.
    pub kind: TargetKind,
    /// Field, header, or parameter name. Empty for `url.value`.
    pub name: String,
}

impl Target {
    /// Parses a target path string.
    pub fn parse(path: &str) -> Result<Self, EngineError> {
        if let Some(name) = path.strip_prefix("body.") {
            if name.is_empty() {
                return Err(EngineError::InvalidConfig("empty body target".into()));
            }
            return Ok(Target {
                kind: TargetKind::Body,
                name: name.to_string(),
            });
        }
        if let Some(name) = path.strip_prefix("header.") {
            if name.is_empty() {
                return Err(EngineError::InvalidConfig("empty header target".into()));
            }
            return Ok(Target {
                kind: TargetKind::Header,
                name: name.to_string(),
            });
        }
        if let Some(name) = path.strip_prefix("url.params.") {
            if name.is_empty() {
                return Err(EngineError::InvalidConfig("empty url.params target".into()));
            }
            return Ok(Target {
                kind: TargetKind::UrlParams,
                name: name.to_string(),
            });
        }
        if path == "url.value" {
            return Ok(Target {
                kind: TargetKind::UrlValue,
                name: String::new(),
            });
        }
        Err(EngineError::InvalidConfig(format!(
            "invalid transform target: {path:?}"
        )))
    }
}

/// Looks up a dotted path inside a body map.
pub fn get_path<'a>(map: &'a Body, path: &str) -> Option<&'a Value> {
    let mut current: &Value = map.get(path.split('.').next()?)?;
    for key in path.split('.').skip(1) {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Writes a value at a dotted path, creating intermediate objects as needed.
/// Non-object intermediates are replaced.
pub fn put_path(map: &mut Body, path: &str, value: Value) {
    let mut keys = path.split('.').collect::<Vec<_>>();
    let last = keys.pop().unwrap_or(path);
    let mut current = map;
    for key in keys {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Body::new()));
        if !entry.is_object() {
            *entry = Value::Object(Body::new());
        }
        match entry.as_object_mut() {
            Some(next) => current = next,
            None => return,
        }
    }
    current.insert(last.to_string(), value);
}

/// Removes the value at a dotted path. Returns true if something was removed.
pub fn delete_path(map: &mut Body, path: &str) -> bool {
    let mut keys = path.split('.').collect::<Vec<_>>();
    let Some(last) = keys.pop() else { return false };
    let mut current = map;
    for key in keys {
        match current.get_mut(key).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current.remove(last).is_some()
}
