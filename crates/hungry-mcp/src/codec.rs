//! Line protocol codec.
//!
//! Workers speak JSON-RPC 2.0 over stdin/stdout, one JSON object per line.
//! They also tend to print log output on stdout; such lines are recognized by
//! their leading level token and skipped, as is anything that does not decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag written on every outgoing message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used when a worker reports an error without one.
pub const SERVER_ERROR: i64 = -32000;

const NOISE_PREFIXES: [&str; 5] = ["INFO", "WARNING", "WARN", "ERROR", "DEBUG"];

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default = "server_error")]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

fn server_error() -> i64 {
    SERVER_ERROR
}

/// Workers are not consistent about the error shape. Anything in the error
/// slot still fails the request it answers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawError {
    Structured(RpcError),
    Text(String),
    Other(Value),
}

impl From<RawError> for RpcError {
    fn from(raw: RawError) -> Self {
        match raw {
            RawError::Structured(e) => e,
            RawError::Text(message) => RpcError::new(SERVER_ERROR, message),
            RawError::Other(value) => RpcError {
                data: Some(value.clone()),
                ..RpcError::new(SERVER_ERROR, value.to_string())
            },
        }
    }
}

/// A protocol message, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a response with the same id.
    Request {
        id: u64,
        method: String,
        params: Value,
    },

    /// Fire-and-forget call.
    Notification { method: String, params: Value },

    /// Answer to the request carrying `id`.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
}

impl Message {
    /// Create a request.
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Request or response id, if the message carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(*id),
            Self::Notification { .. } => None,
        }
    }

    /// Encode as a single newline-terminated line.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let wire = match self {
            Self::Request { id, method, params } => WireOut {
                id: Some(*id),
                method: Some(method),
                params: Some(params),
                ..WireOut::default()
            },
            Self::Notification { method, params } => WireOut {
                method: Some(method),
                params: Some(params),
                ..WireOut::default()
            },
            Self::Response { id, outcome } => match outcome {
                Ok(result) => WireOut {
                    id: Some(*id),
                    result: Some(result),
                    ..WireOut::default()
                },
                Err(error) => WireOut {
                    id: Some(*id),
                    error: Some(error),
                    ..WireOut::default()
                },
            },
        };
        let mut line = serde_json::to_string(&wire)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Serialize)]
struct WireOut<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

impl Default for WireOut<'_> {
    fn default() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, alias = "arguments")]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
}

/// Outcome of decoding one line of worker output.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Message),
    /// Blank line or log output.
    Noise,
    /// Not a protocol message; carries the reason.
    Invalid(String),
}

/// Returns true for lines that are log output rather than protocol messages.
pub fn is_noise(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || NOISE_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// Decode one line of worker output.
pub fn decode_line(line: &str) -> Frame {
    let trimmed = line.trim();
    if is_noise(trimmed) {
        return Frame::Noise;
    }

    let wire: WireIn = match serde_json::from_str(trimmed) {
        Ok(wire) => wire,
        Err(e) => return Frame::Invalid(e.to_string()),
    };

    let params = wire.params.unwrap_or(Value::Null);
    let id = wire.id.as_ref().map(parse_id);

    match (wire.method, id) {
        (Some(method), None) => Frame::Message(Message::Notification { method, params }),
        (Some(method), Some(Some(id))) => Frame::Message(Message::Request { id, method, params }),
        (None, Some(Some(id))) => {
            let outcome = match wire.error {
                Some(error) => Err(error.into()),
                None => Ok(wire.result.unwrap_or(Value::Null)),
            };
            Frame::Message(Message::Response { id, outcome })
        }
        (_, Some(None)) => Frame::Invalid("unsupported message id".to_string()),
        (None, None) => Frame::Invalid("message has neither id nor method".to_string()),
    }
}

fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
