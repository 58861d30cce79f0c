//! Configuration model for a polling input.
//!
//! The host process decodes its configuration file (YAML or JSON) into these
//! structs and hands them to the engine. Validation is performed once, at
//! construction time; a configuration that fails [`InputConfig::validate`]
//! never starts polling.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::CoreError;

/// Default poll interval when none is configured.
const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Serde helper: durations expressed as integer seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper: optional durations expressed as integer seconds.
mod opt_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// HTTP method for the polled request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// HTTP GET. A request body is not allowed.
    #[default]
    Get,
    /// HTTP POST. The body is JSON-encoded unless a different encoder is
    /// registered for the configured `Content-Type`.
    Post,
}

impl Method {
    /// Returns the method as an uppercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Top-level configuration for one polling input instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Poll interval in seconds. Must be greater than zero.
    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,
    /// Optional authentication block, resolved by the host before the engine
    /// sees it (secrets arrive as plain values).
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Request construction and transport options.
    pub request: RequestConfig,
    /// Response processing options.
    #[serde(default)]
    pub response: ResponseConfig,
    /// Named cursor fields, recomputed after each successfully published
    /// event.
    #[serde(default)]
    pub cursor: HashMap<String, CursorFieldConfig>,
}

fn default_interval() -> Duration {
    Duration::from_secs(DEFAULT_INTERVAL_SECS)
}

/// Authentication settings for the polled API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Basic auth user.
    #[serde(default)]
    pub user: Option<String>,
    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-resolved bearer/API token placed in the `Authorization` header.
    #[serde(default)]
    pub token: Option<String>,
}

impl AuthConfig {
    /// Returns true if basic auth credentials are present.
    pub fn basic_enabled(&self) -> bool {
        self.user.is_some() || self.password.is_some()
    }
}

/// Request construction and transport options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestConfig {
    /// Base URL of the polled endpoint.
    pub url: Url,
    /// HTTP method. Only GET and POST are supported.
    #[serde(default)]
    pub method: Method,
    /// Static JSON body, merged before request transforms run. Forbidden
    /// with GET.
    #[serde(default)]
    pub body: Option<serde_json::Map<String, serde_json::Value>>,
    /// Static headers set before request transforms run.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds.
    #[serde(with = "opt_duration_secs", default)]
    pub timeout: Option<Duration>,
    /// Retry policy for transient transport failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Redirect handling across hops.
    #[serde(default)]
    pub redirect: RedirectConfig,
    /// Header-driven rate limit detection.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Request transform chain, run in declared order.
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    /// Optional proxy URL.
    #[serde(default)]
    pub proxy_url: Option<Url>,
}

impl RequestConfig {
    /// Effective request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Minimum wait between attempts, in seconds.
    #[serde(with = "duration_secs", default = "default_wait_min")]
    pub wait_min: Duration,
    /// Maximum wait between attempts, in seconds.
    #[serde(with = "duration_secs", default = "default_wait_max")]
    pub wait_max: Duration,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_wait_min() -> Duration {
    Duration::from_secs(1)
}

fn default_wait_max() -> Duration {
    Duration::from_secs(60)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_min: default_wait_min(),
            wait_max: default_wait_max(),
        }
    }
}

/// Redirect handling options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectConfig {
    /// Forward request headers to the redirect target.
    #[serde(default)]
    pub forward_headers: bool,
    /// Headers never forwarded across a redirect hop.
    #[serde(default)]
    pub headers_ban_list: Vec<String>,
    /// Maximum number of redirect hops.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
}

fn default_max_redirects() -> u32 {
    10
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            forward_headers: false,
            headers_ban_list: Vec::new(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// Header-driven rate limit detection. Each field is a value template
/// evaluated against the response headers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Template producing the total request quota.
    #[serde(default)]
    pub limit: Option<String>,
    /// Template producing the Unix epoch second at which the quota resets.
    #[serde(default)]
    pub reset: Option<String>,
    /// Template producing the remaining request quota.
    #[serde(default)]
    pub remaining: Option<String>,
}

/// A single transform step. The YAML form is externally tagged:
///
/// ```yaml
/// - set:
///     target: url.params.page
///     value: '[[ .last_response.body.next ]]'
/// ```
#[derive(Debug, Clone)]
pub enum TransformConfig {
    /// Append a value; absent targets become one-element lists, scalars
    /// become two-element lists.
    Append(TransformActionConfig),
    /// Set a value. On headers this adds rather than replaces.
    Set(TransformActionConfig),
    /// Delete a key.
    Delete(TransformDeleteConfig),
}

// Decoded by hand: the documented YAML form is a single-entry map keyed by
// the operation name, which a derived externally tagged enum does not
// accept from serde_yaml.
impl<'de> Deserialize<'de> for TransformConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StepVisitor;

        impl<'de> serde::de::Visitor<'de> for StepVisitor {
            type Value = TransformConfig;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a single-entry map keyed by `append`, `set` or `delete`")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let key: String = match map.next_key()? {
                    Some(key) => key,
                    None => return Err(serde::de::Error::invalid_length(0, &self)),
                };
                let step = match key.as_str() {
                    "append" => TransformConfig::Append(map.next_value()?),
                    "set" => TransformConfig::Set(map.next_value()?),
                    "delete" => TransformConfig::Delete(map.next_value()?),
                    other => {
                        return Err(serde::de::Error::unknown_variant(
                            other,
                            &["append", "set", "delete"],
                        ))
                    }
                };
                if map.next_key::<String>()?.is_some() {
                    return Err(serde::de::Error::custom(
                        "transform step must name exactly one operation",
                    ));
                }
                Ok(step)
            }
        }

        deserializer.deserialize_map(StepVisitor)
    }
}

impl TransformConfig {
    /// The operation name, as used in configuration and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            TransformConfig::Append(_) => "append",
            TransformConfig::Set(_) => "set",
            TransformConfig::Delete(_) => "delete",
        }
    }

    /// The target path of this transform.
    pub fn target(&self) -> &str {
        match self {
            TransformConfig::Append(a) | TransformConfig::Set(a) => &a.target,
            TransformConfig::Delete(d) => &d.target,
        }
    }
}

/// Configuration shared by `append` and `set`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformActionConfig {
    /// Target path, e.g. `body.foo`, `header.X-Token`, `url.params.page`,
    /// `url.value`.
    pub target: String,
    /// Value template.
    #[serde(default)]
    pub value: Option<String>,
    /// Default template applied when the value evaluates empty or fails.
    #[serde(default)]
    pub default: Option<String>,
}

/// Configuration for `delete`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformDeleteConfig {
    /// Target path to remove.
    pub target: String,
}

/// Response processing options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseConfig {
    /// Response transform chain, applied to every page body.
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    /// Pagination transform chain; presence enables pagination-request mode.
    #[serde(default)]
    pub pagination: Vec<TransformConfig>,
    /// Recursive split specification.
    #[serde(default)]
    pub split: Option<SplitConfig>,
}

/// How a split target is decomposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    /// Target is an array; elements are iterated in order.
    #[default]
    Array,
    /// Target is an object; values are iterated in unspecified order.
    Map,
    /// Target is a string; it is cut on a delimiter and each piece replaces
    /// the target in a copy of the surrounding body.
    String,
}

/// Recursive specification for decomposing a response body into events.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    /// Target field path. Only `body.*` targets may be split.
    pub target: String,
    /// Container kind at the target.
    #[serde(rename = "type", default)]
    pub kind: SplitKind,
    /// For map splits, the field under which the map key is injected into
    /// each element. Without it the key is lost.
    #[serde(default)]
    pub key_field: Option<String>,
    /// For string splits, the delimiter to cut on. Required for that kind.
    #[serde(default)]
    pub delimiter: Option<String>,
    /// Keep the surrounding body and place each element under the target,
    /// instead of replacing the body with the element.
    #[serde(default)]
    pub keep_parent: bool,
    /// Treat an empty or missing target as "nothing to split" and continue
    /// with the current body instead of signalling an empty field.
    #[serde(default)]
    pub ignore_empty_value: bool,
    /// Transforms applied to every message produced at this level.
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    /// Nested split applied to every message produced at this level.
    #[serde(default)]
    pub split: Option<Box<SplitConfig>>,
}

/// One named cursor field.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CursorFieldConfig {
    /// Value template evaluated against the transform context after each
    /// published event.
    pub value: String,
    /// Keep the previous value when the template evaluates empty.
    #[serde(default = "default_true")]
    pub ignore_empty_value: bool,
}

fn default_true() -> bool {
    true
}

impl InputConfig {
    /// Validates the configuration. Returns the first problem found.
    ///
    /// This covers the constraints that do not require compiling templates;
    /// template syntax and transform target namespaces are checked by the
    /// engine when it builds the pipeline.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "interval must be greater than zero".into(),
            ));
        }
        if self.request.method == Method::Get && self.request.body.is_some() {
            return Err(CoreError::InvalidConfig(
                "body cannot be used with a GET request".into(),
            ));
        }
        if let Some(split) = &self.response.split {
            validate_split(split)?;
        }
        Ok(())
    }
}

fn validate_split(split: &SplitConfig) -> Result<(), CoreError> {
    if split
        .target
        .strip_prefix("body.")
        .map_or(true, str::is_empty)
    {
        return Err(CoreError::InvalidConfig(format!(
            "split target must be a body field, got {:?}",
            split.target
        )));
    }
    if split.kind == SplitKind::String && split.delimiter.is_none() {
        return Err(CoreError::InvalidConfig(
            "string split requires a delimiter".into(),
        ));
    }
    if let Some(child) = &split.split {
        validate_split(child)?;
    }
    Ok(())
}
