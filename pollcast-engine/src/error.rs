//! Engine error types.

use thiserror::Error;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration detected while building the pipeline.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP transport failure (connection, TLS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server responded with an error status.
    #[error("Server responded with status code {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text, possibly empty.
        body: String,
    },

    /// Response body could not be decoded as JSON.
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Response body decoded to something other than a JSON object.
    #[error("Response body must be a JSON object")]
    NotAnObject,

    /// Template evaluation failed and no default recovered it.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Split engine failure for the current page.
    #[error("Split error: {0}")]
    Split(#[from] SplitError),

    /// A `set url.value` transform evaluated to no value. This is the clean
    /// pagination stop signal, not a failure.
    #[error("The new url is unset")]
    NewUrlUnset,

    /// The poll was cancelled.
    #[error("Poll cancelled")]
    Cancelled,

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] pollcast_core::CoreError),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

/// Error type for template compilation and evaluation.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template text could not be parsed.
    #[error("Invalid template syntax: {0}")]
    Syntax(String),

    /// A dotted lookup did not resolve to a value.
    #[error("Key not found: {0}")]
    MissingKey(String),

    /// A builtin was called with the wrong argument types or count.
    #[error("Invalid arguments to {func}: {reason}")]
    BadArgs {
        /// Builtin function name.
        func: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// An unknown function name was used.
    #[error("Unknown template function: {0}")]
    UnknownFunction(String),

    /// Evaluation produced an empty result and no default was configured.
    #[error("The template result is empty")]
    EmptyResult,

    /// Template execution failed.
    #[error("Template execution failed: {0}")]
    Execution(String),
}

/// Error type for the split engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    /// The outermost split target was empty or missing and `keep_parent` was
    /// false. The page's emission is suppressed; this is the distinguished
    /// empty-field signal, not a crash.
    #[error("The requested root field is empty")]
    EmptyRootField,

    /// An array split target did not hold an array.
    #[error("Split was expecting field {0:?} to be an array")]
    ExpectedArray(String),

    /// A map split target did not hold an object.
    #[error("Split was expecting field {0:?} to be an object")]
    ExpectedMap(String),

    /// A string split target did not hold a string.
    #[error("Split was expecting field {0:?} to be a string")]
    ExpectedString(String),

    /// An element at the split target was not an object.
    #[error("Split found a non-object element at field {0:?}")]
    ExpectedObjectElement(String),

    /// A transform inside the split chain failed.
    #[error("Split transform failed: {0}")]
    Transform(String),

    /// The event channel was closed by the consumer.
    #[error("Event channel closed")]
    ChannelClosed,
}
