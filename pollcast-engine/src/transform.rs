//! Transform pipeline: ordered `append` / `set` / `delete` steps applied to
//! a [`Transformable`].
//!
//! Transforms are compiled once from configuration and validated against the
//! namespace they run in. Request transforms shape the outgoing request
//! (body, headers, query parameters), response transforms may only touch the
//! decoded body, and pagination transforms additionally control `url.value`
//! to drive the next page.

use tracing::debug;

use pollcast_core::config::{TransformActionConfig, TransformConfig};

use crate::context::TransformContext;
use crate::error::{EngineError, TemplateError};
use crate::template::ValueTemplate;
use crate::transformable::{delete_path, get_path, put_path, Target, TargetKind, Transformable};

/// The namespace a transform chain runs in. Determines which targets are
/// valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Builds the outgoing request.
    Request,
    /// Reshapes a decoded response body.
    Response,
    /// Builds the next page request.
    Pagination,
}

impl Namespace {
    fn as_str(&self) -> &'static str {
        match self {
            Namespace::Request => "request",
            Namespace::Response => "response",
            Namespace::Pagination => "pagination",
        }
    }

    fn allows(&self, kind: TargetKind) -> bool {
        match self {
            Namespace::Request => kind != TargetKind::UrlValue,
            Namespace::Response => kind == TargetKind::Body,
            Namespace::Pagination => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Append,
    Set,
    Delete,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Append => "append",
            Op::Set => "set",
            Op::Delete => "delete",
        }
    }
}

/// One compiled transform step.
#[derive(Debug, Clone)]
pub struct Transform {
    op: Op,
    target: Target,
    value: Option<ValueTemplate>,
    default: Option<ValueTemplate>,
}

impl Transform {
    fn compile(cfg: &TransformConfig, ns: Namespace) -> Result<Self, EngineError> {
        let (op, target_path) = match cfg {
            TransformConfig::Append(action) => (Op::Append, action.target.as_str()),
            TransformConfig::Set(action) => (Op::Set, action.target.as_str()),
            TransformConfig::Delete(del) => (Op::Delete, del.target.as_str()),
        };
        let target = Target::parse(target_path)?;
        if !ns.allows(target.kind) {
            return Err(EngineError::InvalidConfig(format!(
                "target {target_path:?} is not valid for {} transforms",
                ns.as_str()
            )));
        }
        if target.kind == TargetKind::UrlValue && op != Op::Set {
            return Err(EngineError::InvalidConfig(format!(
                "{} cannot target url.value",
                op.as_str()
            )));
        }
        let (value, default) = match cfg {
            TransformConfig::Append(action) | TransformConfig::Set(action) => {
                compile_templates(action)?
            }
            TransformConfig::Delete(_) => (None, None),
        };
        Ok(Self {
            op,
            target,
            value,
            default,
        })
    }

    /// Applies this transform in place.
    ///
    /// Value templates that fail or come up empty do not abort the chain:
    /// the step is skipped, except for `set url.value` where an empty result
    /// is the distinguished end-of-pagination signal.
    pub fn apply(
        &self,
        ctx: &TransformContext,
        tr: &mut Transformable,
    ) -> Result<(), EngineError> {
        if self.op == Op::Delete {
            match self.target.kind {
                TargetKind::Body => {
                    delete_path(&mut tr.body, &self.target.name);
                }
                TargetKind::Header => tr.remove_header(&self.target.name),
                TargetKind::UrlParams => tr.delete_url_param(&self.target.name),
                TargetKind::UrlValue => {}
            }
            return Ok(());
        }

        let value = match &self.value {
            Some(tpl) => match tpl.execute(ctx, tr, self.default.as_ref()) {
                Ok(v) => v,
                Err(TemplateError::EmptyResult) | Err(TemplateError::Execution(_))
                    if self.target.kind == TargetKind::UrlValue =>
                {
                    return Err(EngineError::NewUrlUnset);
                }
                Err(err) => {
                    debug!(
                        op = self.op.as_str(),
                        target = %self.target.name,
                        error = %err,
                        "transform value unresolved, skipping"
                    );
                    return Ok(());
                }
            },
            None => String::new(),
        };

        match (self.op, self.target.kind) {
            (Op::Set, TargetKind::Body) => {
                put_path(&mut tr.body, &self.target.name, value.into());
            }
            (Op::Append, TargetKind::Body) => {
                append_to_body(&mut tr.body, &self.target.name, value);
            }
            // `set` on a header adds a value alongside existing ones instead
            // of replacing them. Configurations depend on this to stack
            // multi-value headers, so both operations append.
            (Op::Set, TargetKind::Header) | (Op::Append, TargetKind::Header) => {
                tr.append_header(&self.target.name, &value)?;
            }
            (Op::Set, TargetKind::UrlParams) => tr.set_url_param(&self.target.name, &value),
            (Op::Append, TargetKind::UrlParams) => tr.append_url_param(&self.target.name, &value),
            (Op::Set, TargetKind::UrlValue) => {
                if value.is_empty() {
                    return Err(EngineError::NewUrlUnset);
                }
                tr.url = value.parse().map_err(|e| {
                    EngineError::Template(TemplateError::Execution(format!(
                        "set url.value produced an invalid url {value:?}: {e}"
                    )))
                })?;
            }
            (Op::Delete, _) | (Op::Append, TargetKind::UrlValue) => {}
        }
        Ok(())
    }
}

fn compile_templates(
    action: &TransformActionConfig,
) -> Result<(Option<ValueTemplate>, Option<ValueTemplate>), EngineError> {
    let value = action
        .value
        .as_deref()
        .map(ValueTemplate::compile)
        .transpose()?;
    let default = action
        .default
        .as_deref()
        .map(ValueTemplate::compile)
        .transpose()?;
    Ok((value, default))
}

/// Appends to a body field: absent becomes a one-element list, a scalar
/// becomes a two-element list, a list grows.
fn append_to_body(body: &mut crate::transformable::Body, path: &str, value: String) {
    let new = serde_json::Value::String(value);
    match get_path(body, path).cloned() {
        None => put_path(body, path, serde_json::Value::Array(vec![new])),
        Some(serde_json::Value::Array(mut arr)) => {
            arr.push(new);
            put_path(body, path, serde_json::Value::Array(arr));
        }
        Some(existing) => {
            put_path(body, path, serde_json::Value::Array(vec![existing, new]));
        }
    }
}

/// An ordered chain of compiled transforms for one namespace.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    /// Compiles a configuration list, validating every target against the
    /// namespace.
    pub fn compile(cfgs: &[TransformConfig], ns: Namespace) -> Result<Self, EngineError> {
        let transforms = cfgs
            .iter()
            .map(|cfg| Transform::compile(cfg, ns))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { transforms })
    }

    /// Applies every transform in declared order.
    pub fn apply(
        &self,
        ctx: &TransformContext,
        tr: &mut Transformable,
    ) -> Result<(), EngineError> {
        for transform in &self.transforms {
            transform.apply(ctx, tr)?;
        }
        Ok(())
    }

    /// Returns true when no transforms are configured.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    fn chain(yaml: &str, ns: Namespace) -> TransformChain {
        let cfgs: Vec<TransformConfig> = serde_yaml::from_str(yaml).unwrap();
        TransformChain::compile(&cfgs, ns).unwrap()
    }

    fn tr() -> Transformable {
        Transformable::new(Url::parse("https://example.com/api").unwrap())
    }

    #[test]
    fn test_set_body_nested() {
        let chain = chain(
            r#"
- set:
    target: body.a.b
    value: ok
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert_eq!(tr.body["a"]["b"], json!("ok"));
    }

    #[test]
    fn test_append_body_grows_list() {
        let chain = chain(
            r#"
- append: {target: body.ids, value: "1"}
- append: {target: body.ids, value: "2"}
- append: {target: body.ids, value: "3"}
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert_eq!(tr.body["ids"], json!(["1", "2", "3"]));
    }

    #[test]
    fn test_append_absent_key_stores_list() {
        let chain = chain(
            r#"
- append: {target: body.ids, value: "1"}
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert_eq!(tr.body["ids"], json!(["1"]));
    }

    #[test]
    fn test_set_header_appends_values() {
        let chain = chain(
            r#"
- set: {target: header.X-Scope, value: read}
- set: {target: header.X-Scope, value: write}
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        let values: Vec<&str> = tr
            .header
            .get_all("X-Scope")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(values, vec!["read", "write"]);
    }

    #[test]
    fn test_delete_targets() {
        let chain = chain(
            r#"
- delete: {target: body.drop}
- delete: {target: header.X-Internal}
- delete: {target: url.params.debug}
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        tr.body.insert("drop".into(), json!(1));
        tr.body.insert("keep".into(), json!(2));
        tr.append_header("X-Internal", "yes").unwrap();
        tr.append_url_param("debug", "1");
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert!(!tr.body.contains_key("drop"));
        assert!(tr.body.contains_key("keep"));
        assert!(tr.header.get("X-Internal").is_none());
        assert_eq!(tr.url.query(), None);
    }

    #[test]
    fn test_set_url_params_replaces() {
        let chain = chain(
            r#"
- set: {target: url.params.page, value: "1"}
- set: {target: url.params.page, value: "2"}
"#,
            Namespace::Pagination,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert_eq!(tr.url.query(), Some("page=2"));
    }

    #[test]
    fn test_set_url_value() {
        let chain = chain(
            r#"
- set: {target: url.value, value: "https://example.com/api?page=2"}
"#,
            Namespace::Pagination,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert_eq!(tr.url.as_str(), "https://example.com/api?page=2");
    }

    #[test]
    fn test_set_url_value_empty_signals_unset() {
        let chain = chain(
            r#"
- set:
    target: url.value
    value: '[[ .last_response.body.next ]]'
"#,
            Namespace::Pagination,
        );
        let mut tr = tr();
        let err = chain.apply(&TransformContext::new(), &mut tr).unwrap_err();
        assert!(matches!(err, EngineError::NewUrlUnset));
    }

    #[test]
    fn test_unresolved_value_skips_step() {
        let chain = chain(
            r#"
- set: {target: body.missing, value: '[[ .cursor.nope ]]'}
- set: {target: body.present, value: here}
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert!(!tr.body.contains_key("missing"));
        assert_eq!(tr.body["present"], json!("here"));
    }

    #[test]
    fn test_default_recovers_missing_value() {
        let chain = chain(
            r#"
- set:
    target: url.params.since
    value: '[[ .cursor.last ]]'
    default: '2020-01-01'
"#,
            Namespace::Request,
        );
        let mut tr = tr();
        chain.apply(&TransformContext::new(), &mut tr).unwrap();
        assert_eq!(tr.url.query(), Some("since=2020-01-01"));

        let ctx = TransformContext::new();
        ctx.set_cursor_value("last", json!("2021-06-01"));
        let mut tr2 = Transformable::new(Url::parse("https://example.com/api").unwrap());
        chain.apply(&ctx, &mut tr2).unwrap();
        assert_eq!(tr2.url.query(), Some("since=2021-06-01"));
    }

    #[test]
    fn test_response_namespace_rejects_header_target() {
        let cfgs: Vec<TransformConfig> = serde_yaml::from_str(
            r#"
- set: {target: header.X-Nope, value: x}
"#,
        )
        .unwrap();
        assert!(TransformChain::compile(&cfgs, Namespace::Response).is_err());
    }

    #[test]
    fn test_request_namespace_rejects_url_value() {
        let cfgs: Vec<TransformConfig> = serde_yaml::from_str(
            r#"
- set: {target: url.value, value: "https://example.com"}
"#,
        )
        .unwrap();
        assert!(TransformChain::compile(&cfgs, Namespace::Request).is_err());
    }

    #[test]
    fn test_append_rejects_url_value() {
        let cfgs: Vec<TransformConfig> = serde_yaml::from_str(
            r#"
- append: {target: url.value, value: "https://example.com"}
"#,
        )
        .unwrap();
        assert!(TransformChain::compile(&cfgs, Namespace::Pagination).is_err());
    }
}
