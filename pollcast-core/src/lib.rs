// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Pollcast Core
//!
//! Core types for the Pollcast HTTP JSON polling engine:
//!
//! - [`config`] - the declarative configuration model for one input instance
//! - [`event`] - the output event model
//! - [`publisher`] - the trait the output pipeline implements
//! - [`error`] - core error type

pub mod config;
pub mod error;
pub mod event;
pub mod publisher;

pub use config::{
    AuthConfig, CursorFieldConfig, InputConfig, Method, RateLimitConfig, RedirectConfig,
    RequestConfig, ResponseConfig, RetryConfig, SplitConfig, SplitKind, TransformActionConfig,
    TransformConfig, TransformDeleteConfig,
};
pub use error::CoreError;
pub use event::{make_event, Event};
pub use publisher::Publisher;
