//! Cursor state: named values recomputed after each published event.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;
use url::Url;

use pollcast_core::config::CursorFieldConfig;

use crate::context::TransformContext;
use crate::error::EngineError;
use crate::template::ValueTemplate;
use crate::transformable::Transformable;

#[derive(Debug, Clone)]
struct CursorField {
    name: String,
    value: ValueTemplate,
    ignore_empty_value: bool,
}

/// Compiled cursor definition for one input.
///
/// The engine never persists anything itself: the values handed to the
/// publisher alongside each event are the checkpoint, and the host stores
/// whichever it acknowledged last. On restart those values seed the
/// [`TransformContext`] and templates pick up where the previous run ended.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    fields: Vec<CursorField>,
}

impl Cursor {
    /// Compiles the configured cursor fields.
    pub fn compile(cfg: &HashMap<String, CursorFieldConfig>) -> Result<Self, EngineError> {
        let mut fields = Vec::with_capacity(cfg.len());
        for (name, field) in cfg {
            fields.push(CursorField {
                name: name.clone(),
                value: ValueTemplate::compile(&field.value)?,
                ignore_empty_value: field.ignore_empty_value,
            });
        }
        Ok(Self { fields })
    }

    /// Recomputes every field from the context after a successful publish.
    ///
    /// With `ignore_empty_value` (the default) a field whose template comes
    /// up empty keeps its previous value, so a page that lacks the source
    /// data cannot wipe the checkpoint.
    pub fn advance(&self, ctx: &TransformContext) {
        if self.fields.is_empty() {
            return;
        }
        let tr = Transformable::new(placeholder_url());
        for field in &self.fields {
            match field.value.execute(ctx, &tr, None) {
                Ok(value) => ctx.set_cursor_value(&field.name, Value::String(value)),
                Err(err) => {
                    if field.ignore_empty_value {
                        debug!(field = %field.name, error = %err, "cursor value empty, keeping previous");
                    } else {
                        ctx.set_cursor_value(&field.name, Value::String(String::new()));
                    }
                }
            }
        }
    }

    /// Returns true when no cursor fields are configured.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// Cursor templates only read from the context, but evaluation still needs a
// transformable for the namespace.
fn placeholder_url() -> Url {
    Url::parse("http://localhost").unwrap_or_else(|_| unreachable!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformable::Body;
    use serde_json::json;

    fn cursor(yaml: &str) -> Cursor {
        let cfg: HashMap<String, CursorFieldConfig> = serde_yaml::from_str(yaml).unwrap();
        Cursor::compile(&cfg).unwrap()
    }

    #[test]
    fn test_advance_reads_last_event() {
        let cursor = cursor(
            r#"
last_published:
  value: '[[ .last_event.timestamp ]]'
"#,
        );
        let ctx = TransformContext::new();
        let mut event = Body::new();
        event.insert("timestamp".into(), json!("2021-03-01T00:00:00Z"));
        ctx.update_last_event(event);

        cursor.advance(&ctx);
        assert_eq!(
            ctx.cursor_value("last_published"),
            Some(json!("2021-03-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_empty_value_keeps_previous_by_default() {
        let cursor = cursor(
            r#"
last_published:
  value: '[[ .last_event.timestamp ]]'
"#,
        );
        let ctx = TransformContext::new();
        ctx.set_cursor_value("last_published", json!("keep-me"));

        cursor.advance(&ctx);
        assert_eq!(ctx.cursor_value("last_published"), Some(json!("keep-me")));
    }

    #[test]
    fn test_empty_value_overwrites_when_not_ignored() {
        let cursor = cursor(
            r#"
last_published:
  value: '[[ .last_event.timestamp ]]'
  ignore_empty_value: false
"#,
        );
        let ctx = TransformContext::new();
        ctx.set_cursor_value("last_published", json!("stale"));

        cursor.advance(&ctx);
        assert_eq!(ctx.cursor_value("last_published"), Some(json!("")));
    }
}
