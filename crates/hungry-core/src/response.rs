//! The normalized response shape returned by every façade operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::SessionId;
use crate::status::{Platform, ResponseSource, ResponseStatus};

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Human-readable text, suitable for speech synthesis.
    pub message: String,

    pub status: ResponseStatus,

    pub source: ResponseSource,

    /// Operation-specific fields (`search_term`, `area`, `restaurant_name`, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResponseData {
    /// Create a payload with no extra fields.
    pub fn new(message: impl Into<String>, status: ResponseStatus, source: ResponseSource) -> Self {
        Self {
            message: message.into(),
            status,
            source,
            fields: Map::new(),
        }
    }

    /// Builder method to attach an operation-specific field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up an operation-specific field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Result of a domain operation.
///
/// This is the only shape callers outside the worker client observe: low-level
/// errors are folded into `success: false` with an `error` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub platform: Platform,

    pub session_id: SessionId,
}

impl DomainResponse {
    /// Create a successful response.
    pub fn ok(session_id: SessionId, data: ResponseData) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            platform: Platform::UberEats,
            session_id,
        }
    }

    /// Create a failed response.
    pub fn failed(session_id: SessionId, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            platform: Platform::UberEats,
            session_id,
        }
    }

    /// Source tag of the payload, if any.
    pub fn source(&self) -> Option<ResponseSource> {
        self.data.as_ref().map(|d| d.source)
    }

    /// Status tag of the payload, if any.
    pub fn status(&self) -> Option<ResponseStatus> {
        self.data.as_ref().map(|d| d.status)
    }

    /// Human-readable message of the payload, if any.
    pub fn message(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.message.as_str())
    }

    /// Returns true if this response was served from static fallback content.
    pub fn is_fallback(&self) -> bool {
        self.source() == Some(ResponseSource::StaticFallback)
    }
}
