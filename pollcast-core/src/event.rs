//! Output event model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;

/// A discrete output event, ready for the publisher.
///
/// The message payload is the JSON serialization of the final body produced
/// by the split engine; `created` records when the engine built the event,
/// independent of any timestamps inside the payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// When the engine created this event.
    pub created: DateTime<Utc>,
    /// Serialized body payload.
    pub message: String,
}

/// Builds an [`Event`] from a final body map.
pub fn make_event(body: &serde_json::Map<String, serde_json::Value>) -> Result<Event, CoreError> {
    let message = serde_json::to_string(body)?;
    let now = Utc::now();
    Ok(Event {
        timestamp: now,
        created: now,
        message,
    })
}
