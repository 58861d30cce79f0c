// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

//! # Pollcast Engine
//!
//! The polling engine behind Pollcast: fetches JSON from HTTP APIs on an
//! interval and turns responses into discrete events.
//!
//! The moving parts, in the order a poll touches them:
//!
//! - [`template`] - value templates evaluated against the transform context
//! - [`transform`] - append/set/delete chains shaping requests and responses
//! - [`request`] - request construction and the poll orchestration
//! - [`client`] - the transport seam, redirects, and retries
//! - [`rate_limit`] - header-driven quota suspension
//! - [`pagination`] - page iteration within one poll
//! - [`split`] - decomposing response bodies into event bodies
//! - [`cursor`] - checkpoint values recomputed per published event
//! - [`runner`] - the interval loop tying it all together
//! - [`probe`] - pre-flight TCP reachability check

pub mod client;
pub mod context;
pub mod cursor;
pub mod encode;
pub mod error;
pub mod pagination;
pub mod probe;
pub mod rate_limit;
pub mod request;
pub mod runner;
pub mod split;
pub mod template;
pub mod transform;
pub mod transformable;

pub use client::{HttpClient, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use context::{Page, TransformContext};
pub use cursor::Cursor;
pub use encode::{Encoder, EncoderRegistry, JsonEncoder};
pub use error::{EngineError, SplitError, TemplateError};
pub use pagination::{PageIterator, Pagination};
pub use probe::probe;
pub use rate_limit::RateLimiter;
pub use request::{RequestFactory, Requester};
pub use runner::Runner;
pub use split::{MaybeEvent, SplitSpec};
pub use template::ValueTemplate;
pub use transform::{Namespace, Transform, TransformChain};
pub use transformable::{Target, TargetKind, Transformable};
