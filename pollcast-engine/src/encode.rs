//! Request body encoders, selected by `Content-Type`.
//!
//! The engine speaks JSON by default; hosts embedding it can register an
//! encoder for another media type without touching the request cycle.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::transformable::Body;

/// Serializes a transformed request body into bytes for the wire.
pub trait Encoder: Send + Sync {
    /// Encodes the body.
    fn encode(&self, body: &Body) -> Result<Vec<u8>, EngineError>;
}

/// JSON encoder, the default for every request.
#[derive(Debug, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, body: &Body) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec(body)?)
    }
}

/// Maps media types to encoders. Unknown or absent content types fall back
/// to JSON.
pub struct EncoderRegistry {
    by_media_type: HashMap<String, Box<dyn Encoder>>,
    fallback: Box<dyn Encoder>,
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self {
            by_media_type: HashMap::new(),
            fallback: Box::new(JsonEncoder),
        }
    }
}

impl EncoderRegistry {
    /// Creates a registry with the JSON fallback only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an encoder for a media type, replacing any previous one.
    pub fn register(&mut self, media_type: &str, encoder: Box<dyn Encoder>) {
        self.by_media_type
            .insert(normalize_media_type(media_type), encoder);
    }

    /// Picks the encoder for a `Content-Type` header value. Parameters such
    /// as `charset` are ignored for the lookup.
    pub fn get(&self, content_type: Option<&str>) -> &dyn Encoder {
        let found = content_type
            .map(normalize_media_type)
            .and_then(|mt| self.by_media_type.get(&mt));
        match found {
            Some(encoder) => &**encoder,
            None => &*self.fallback,
        }
    }
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderRegistry")
            .field("media_types", &self.by_media_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn normalize_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_fallback() {
        let registry = EncoderRegistry::new();
        let mut body = Body::new();
        body.insert("q".into(), json!("all"));
        let bytes = registry.get(None).encode(&body).unwrap();
        assert_eq!(bytes, br#"{"q":"all"}"#);
    }

    #[test]
    fn test_media_type_parameters_ignored() {
        struct Upper;
        impl Encoder for Upper {
            fn encode(&self, _body: &Body) -> Result<Vec<u8>, EngineError> {
                Ok(b"upper".to_vec())
            }
        }
        let mut registry = EncoderRegistry::new();
        registry.register("application/x-custom", Box::new(Upper));
        let got = registry
            .get(Some("Application/X-Custom; charset=utf-8"))
            .encode(&Body::new())
            .unwrap();
        assert_eq!(got, b"upper");
    }
}
