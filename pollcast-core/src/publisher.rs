//! Publisher trait: the seam between the engine and the output pipeline.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::event::Event;

/// Accepts finished events for delivery.
///
/// Implementors own batching, network delivery, and acknowledgement. The
/// engine calls [`Publisher::publish`] once per emitted message together with
/// the cursor values that were current *before* the event; it never retries a
/// failed publish, and it only advances the cursor after a successful one.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hands one event to the output pipeline.
    ///
    /// `cursor` is the checkpoint state the host should persist once the
    /// event is safely delivered.
    async fn publish(
        &self,
        event: Event,
        cursor: HashMap<String, serde_json::Value>,
    ) -> Result<(), CoreError>;
}
