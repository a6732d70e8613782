//! The opaque, typed event relayed between the browser and the upstream
//! realtime service.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload is missing a string `type` field")]
    MissingType,
}

/// A relay event: a JSON object with a string `type` discriminator.
///
/// The relay only ever looks at `type`, for logging. The full object is
/// forwarded verbatim in whichever direction it was travelling; no schema
/// validation happens beyond decodability.
#[derive(Debug, Clone)]
pub struct RelayEvent {
    value: Value,
}

impl RelayEvent {
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        match object.get("type") {
            Some(Value::String(_)) => Ok(Self { value }),
            _ => Err(DecodeError::MissingType),
        }
    }

    /// The `type` discriminator. Guaranteed present by construction.
    pub fn event_type(&self) -> &str {
        self.value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Serializes the event back to wire text.
    pub fn to_text(&self) -> String {
        self.value.to_string()
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}
