//! Split engine: decomposes one response body into many event bodies.
//!
//! A split is a small tree. Each node names a body field holding a
//! container (array, map, or delimited string), produces one message per
//! element, runs its transforms on each, and either hands the message to a
//! nested split or emits it. Messages flow through a bounded channel so the
//! producer keeps pace with publishing.
//!
//! Every message gets its own clone of the surrounding body, so a change
//! made deep in one branch never leaks into a sibling.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::Sender;

use pollcast_core::config::{SplitConfig, SplitKind};

use crate::context::TransformContext;
use crate::error::{EngineError, SplitError};
use crate::transform::{Namespace, TransformChain};
use crate::transformable::{get_path, put_path, Body, Transformable};

/// Field suffix for non-object array elements kept under the parent.
const DATA_SUFFIX: &str = "data";

/// A message on its way out of the split engine.
#[derive(Debug)]
pub enum MaybeEvent {
    /// A complete event body, ready for publishing.
    Body(Body),
    /// A per-branch failure the consumer should log and skip.
    Error(String),
}

/// One compiled node of the split tree.
#[derive(Debug, Clone)]
pub struct SplitSpec {
    path: String,
    kind: SplitKind,
    delimiter: Option<String>,
    key_field: Option<String>,
    keep_parent: bool,
    ignore_empty_value: bool,
    transforms: TransformChain,
    child: Option<Box<SplitSpec>>,
    is_root: bool,
}

impl SplitSpec {
    /// Compiles a split configuration tree.
    pub fn compile(cfg: &SplitConfig) -> Result<Self, EngineError> {
        Self::compile_node(cfg, true)
    }

    fn compile_node(cfg: &SplitConfig, is_root: bool) -> Result<Self, EngineError> {
        let path = cfg
            .target
            .strip_prefix("body.")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidConfig(format!(
                    "split target must name a body field, got {:?}",
                    cfg.target
                ))
            })?
            .to_string();
        if cfg.kind == SplitKind::String && cfg.delimiter.is_none() {
            return Err(EngineError::InvalidConfig(
                "string split requires a delimiter".into(),
            ));
        }
        let child = cfg
            .split
            .as_deref()
            .map(|c| Self::compile_node(c, false))
            .transpose()?
            .map(Box::new);
        Ok(Self {
            path,
            kind: cfg.kind,
            delimiter: cfg.delimiter.clone(),
            key_field: cfg.key_field.clone(),
            keep_parent: cfg.keep_parent,
            ignore_empty_value: cfg.ignore_empty_value,
            transforms: TransformChain::compile(&cfg.transforms, Namespace::Response)?,
            child,
            is_root,
        })
    }

    /// Splits a page into messages, sending each through `sender`.
    ///
    /// [`SplitError::EmptyRootField`] is only returned for the outermost
    /// node; it means the page produced nothing and its emission is
    /// suppressed, not that the poll failed.
    pub fn run<'a>(
        &'a self,
        ctx: &'a TransformContext,
        tr: Transformable,
        sender: &'a Sender<MaybeEvent>,
    ) -> BoxFuture<'a, Result<(), SplitError>> {
        async move {
            let value = get_path(&tr.body, &self.path).cloned();
            if is_empty(value.as_ref()) {
                if self.ignore_empty_value {
                    if let Some(child) = &self.child {
                        return child.run(ctx, tr, sender).await;
                    }
                    return emit(sender, tr.body).await;
                }
                if self.is_root && !self.keep_parent {
                    return Err(SplitError::EmptyRootField);
                }
                // A nested branch with nothing to split emits the body it
                // was given.
                return emit(sender, tr.body).await;
            }
            let value = value.unwrap_or(Value::Null);

            match self.kind {
                SplitKind::Array => match value {
                    Value::Array(items) => {
                        for item in items {
                            self.handle_element(ctx, &tr, None, item, sender).await?;
                        }
                        Ok(())
                    }
                    _ => Err(SplitError::ExpectedArray(self.path.clone())),
                },
                SplitKind::Map => match value {
                    Value::Object(map) => {
                        for (key, item) in map {
                            self.handle_element(ctx, &tr, Some(key), item, sender).await?;
                        }
                        Ok(())
                    }
                    _ => Err(SplitError::ExpectedMap(self.path.clone())),
                },
                SplitKind::String => match value {
                    Value::String(s) => {
                        let delimiter = self.delimiter.as_deref().unwrap_or("\n");
                        for piece in s.split(delimiter) {
                            let mut msg = tr.clone();
                            put_path(&mut msg.body, &self.path, Value::String(piece.to_string()));
                            self.finish_message(ctx, msg, sender).await?;
                        }
                        Ok(())
                    }
                    _ => Err(SplitError::ExpectedString(self.path.clone())),
                },
            }
        }
        .boxed()
    }

    /// Builds and dispatches one message for an array or map element.
    async fn handle_element(
        &self,
        ctx: &TransformContext,
        tr: &Transformable,
        key: Option<String>,
        item: Value,
        sender: &Sender<MaybeEvent>,
    ) -> Result<(), SplitError> {
        let mut msg = tr.clone();
        match item {
            Value::Object(mut element) => {
                if let (Some(key), Some(key_field)) = (key, &self.key_field) {
                    put_path(&mut element, key_field, Value::String(key));
                }
                if self.keep_parent {
                    put_path(&mut msg.body, &self.path, Value::Object(element));
                } else {
                    msg.body = element;
                }
            }
            // Scalars and arrays have no fields to become a body of their
            // own; with keep_parent they land under `<target>.data`.
            other if self.keep_parent => {
                put_path(&mut msg.body, &format!("{}.{}", self.path, DATA_SUFFIX), other);
            }
            _ => return Err(SplitError::ExpectedObjectElement(self.path.clone())),
        }
        self.finish_message(ctx, msg, sender).await
    }

    /// Runs node transforms, then either descends into the child split or
    /// emits.
    async fn finish_message(
        &self,
        ctx: &TransformContext,
        mut msg: Transformable,
        sender: &Sender<MaybeEvent>,
    ) -> Result<(), SplitError> {
        self.transforms
            .apply(ctx, &mut msg)
            .map_err(|e| SplitError::Transform(e.to_string()))?;
        match &self.child {
            Some(child) => child.run(ctx, msg, sender).await,
            None => emit(sender, msg.body).await,
        }
    }
}

async fn emit(sender: &Sender<MaybeEvent>, body: Body) -> Result<(), SplitError> {
    sender
        .send(MaybeEvent::Body(body))
        .await
        .map_err(|_| SplitError::ChannelClosed)
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    fn spec(yaml: &str) -> SplitSpec {
        let cfg: SplitConfig = serde_yaml::from_str(yaml).unwrap();
        SplitSpec::compile(&cfg).unwrap()
    }

    fn page(body: Value) -> Transformable {
        let mut tr = Transformable::new(Url::parse("http://localhost").unwrap());
        tr.body = body.as_object().cloned().unwrap_or_default();
        tr
    }

    async fn collect(spec: &SplitSpec, body: Value) -> Result<Vec<Value>, SplitError> {
        let (sender, mut receiver) = tokio::sync::mpsc::channel(64);
        let result = spec.run(&TransformContext::new(), page(body), &sender).await;
        drop(sender);
        let mut out = Vec::new();
        while let Some(msg) = receiver.recv().await {
            match msg {
                MaybeEvent::Body(body) => out.push(Value::Object(body)),
                MaybeEvent::Error(e) => panic!("unexpected split error message: {e}"),
            }
        }
        result.map(|()| out)
    }

    #[tokio::test]
    async fn test_nested_arrays_with_keep_parent() {
        let spec = spec(
            r#"
target: body.alerts
type: array
keep_parent: true
split:
  target: body.alerts.entities
  type: array
  keep_parent: true
"#,
        );
        let got = collect(
            &spec,
            json!({
                "this": "is kept",
                "alerts": [
                    {"id": "a1", "entities": [{"id": "e1"}, {"id": "e2"}]},
                    {"id": "a2", "entities": [{"id": "e3"}]}
                ]
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![
                json!({"this": "is kept", "alerts": {"id": "a1", "entities": {"id": "e1"}}}),
                json!({"this": "is kept", "alerts": {"id": "a1", "entities": {"id": "e2"}}}),
                json!({"this": "is kept", "alerts": {"id": "a2", "entities": {"id": "e3"}}}),
            ]
        );
    }

    #[tokio::test]
    async fn test_map_split_injects_key() {
        let spec = spec(
            r#"
target: body.hosts
type: map
key_field: hostname
"#,
        );
        let got = collect(
            &spec,
            json!({"hosts": {"web-1": {"cpu": 10}}}),
        )
        .await
        .unwrap();
        assert_eq!(got, vec![json!({"cpu": 10, "hostname": "web-1"})]);
    }

    #[tokio::test]
    async fn test_missing_root_target_without_keep_parent_is_empty_field() {
        let spec = spec(
            r#"
target: body.alerts
type: array
"#,
        );
        let err = collect(&spec, json!({"other": 1})).await.unwrap_err();
        assert_eq!(err, SplitError::EmptyRootField);
    }

    #[tokio::test]
    async fn test_missing_root_target_with_keep_parent_emits_body() {
        let spec = spec(
            r#"
target: body.alerts
type: array
keep_parent: true
"#,
        );
        let got = collect(&spec, json!({"other": 1})).await.unwrap();
        assert_eq!(got, vec![json!({"other": 1})]);
    }

    #[tokio::test]
    async fn test_missing_nested_target_emits_parent_message() {
        let spec = spec(
            r#"
target: body.alerts
type: array
keep_parent: true
split:
  target: body.alerts.entities
  type: array
  keep_parent: true
"#,
        );
        let got = collect(
            &spec,
            json!({"alerts": [{"id": "a1"}]}),
        )
        .await
        .unwrap();
        assert_eq!(got, vec![json!({"alerts": {"id": "a1"}})]);
    }

    #[tokio::test]
    async fn test_ignore_empty_value_descends_into_child() {
        let spec = spec(
            r#"
target: body.response
type: array
split:
  target: body.Event.Attributes
  ignore_empty_value: true
  keep_parent: true
  split:
    target: body.Event.OtherAttributes
    keep_parent: true
"#,
        );
        let got = collect(
            &spec,
            json!({
                "response": [
                    {"Event": {
                        "timestamp": "1606324417",
                        "Attributes": [],
                        "OtherAttributes": [{"key": "value"}, {"key2": "value2"}]
                    }}
                ]
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![
                json!({"Event": {
                    "timestamp": "1606324417",
                    "Attributes": [],
                    "OtherAttributes": {"key": "value"}
                }}),
                json!({"Event": {
                    "timestamp": "1606324417",
                    "Attributes": [],
                    "OtherAttributes": {"key2": "value2"}
                }}),
            ]
        );
    }

    #[tokio::test]
    async fn test_changes_stay_local_to_each_branch() {
        let spec = spec(
            r#"
target: body.splitHere.splitMore
type: array
keep_parent: true
"#,
        );
        let got = collect(
            &spec,
            json!({
                "baz": "buzz",
                "splitHere": {"splitMore": [
                    {"deepest1": "data"},
                    {"deepest2": "data"}
                ]}
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![
                json!({"baz": "buzz", "splitHere": {"splitMore": {"deepest1": "data"}}}),
                json!({"baz": "buzz", "splitHere": {"splitMore": {"deepest2": "data"}}}),
            ]
        );
    }

    #[tokio::test]
    async fn test_scalar_elements_with_keep_parent_go_under_data() {
        let spec = spec(
            r#"
target: body.alerts
type: array
keep_parent: true
"#,
        );
        let got = collect(
            &spec,
            json!({"this": "is kept", "alerts": ["test1", ["a", "b"]]}),
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![
                json!({"this": "is kept", "alerts": {"data": "test1"}}),
                json!({"this": "is kept", "alerts": {"data": ["a", "b"]}}),
            ]
        );
    }

    #[tokio::test]
    async fn test_scalar_elements_without_keep_parent_fail() {
        let spec = spec(
            r#"
target: body.alerts
type: array
"#,
        );
        let err = collect(&spec, json!({"alerts": ["test1"]}))
            .await
            .unwrap_err();
        assert_eq!(err, SplitError::ExpectedObjectElement("alerts".into()));
    }

    #[tokio::test]
    async fn test_string_split_replaces_target_per_line() {
        let spec = spec(
            r#"
target: body.items
type: string
delimiter: "\n"
"#,
        );
        let got = collect(
            &spec,
            json!({"@timestamp": "1234567890", "items": "Line 1\nLine 2"}),
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![
                json!({"@timestamp": "1234567890", "items": "Line 1"}),
                json!({"@timestamp": "1234567890", "items": "Line 2"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_transforms_run_per_message() {
        let spec = spec(
            r#"
target: body.alerts
type: array
transforms:
  - set: {target: body.kind, value: alert}
  - delete: {target: body.internal}
"#,
        );
        let got = collect(
            &spec,
            json!({"alerts": [{"id": 1, "internal": true}, {"id": 2}]}),
        )
        .await
        .unwrap();
        assert_eq!(
            got,
            vec![
                json!({"id": 1, "kind": "alert"}),
                json!({"id": 2, "kind": "alert"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_container_type_is_hard_error() {
        let spec = spec(
            r#"
target: body.alerts
type: array
"#,
        );
        let err = collect(&spec, json!({"alerts": {"not": "an array"}}))
            .await
            .unwrap_err();
        assert_eq!(err, SplitError::ExpectedArray("alerts".into()));
    }

    #[test]
    fn test_compile_rejects_non_body_target() {
        let cfg: SplitConfig = serde_yaml::from_str("target: header.Link").unwrap();
        assert!(SplitSpec::compile(&cfg).is_err());
    }

    #[test]
    fn test_compile_rejects_string_split_without_delimiter() {
        let cfg: SplitConfig = serde_yaml::from_str("target: body.items\ntype: string").unwrap();
        assert!(SplitSpec::compile(&cfg).is_err());
    }
}
