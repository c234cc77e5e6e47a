//! JSON-RPC 2.0 message types spoken with the media server

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request (or notification when `id` is absent)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    pub params: Value,

    /// Request ID for matching with response (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i64,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<ErrorObject> for Error {
    fn from(err: ErrorObject) -> Self {
        Error::MediaServerRpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Union of every shape the server may send; classified by [`Incoming::parse`]
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// A frame received from the media server
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Successful reply to one of our requests
    Response { id: u64, result: Value },

    /// Error reply; `id` is absent when the server could not parse the request
    Error { id: Option<u64>, error: ErrorObject },

    /// Server-initiated call, e.g. `onEvent`
    Notification { method: String, params: Value },
}

impl Incoming {
    /// Classify a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;
        let id = raw.id.as_ref().and_then(Value::as_u64);

        if let Some(error) = raw.error {
            return Ok(Incoming::Error { id, error });
        }

        if let Some(method) = raw.method {
            return Ok(Incoming::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            });
        }

        match id {
            Some(id) => Ok(Incoming::Response {
                id,
                result: raw.result.unwrap_or(Value::Null),
            }),
            None => Err(Error::MediaServer(format!(
                "Unrecognized JSON-RPC frame: {}",
                text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new("create", json!({"type": "MediaPipeline"}), 7);
        let value: Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "create");
        assert_eq!(value["id"], 7);
        assert_eq!(value["params"]["type"], "MediaPipeline");
    }

    #[test]
    fn test_parse_response() {
        let frame = r#"{"jsonrpc":"2.0","id":3,"result":{"value":"abc","sessionId":"s1"}}"#;
        match Incoming::parse(frame).unwrap() {
            Incoming::Response { id, result } => {
                assert_eq!(id, 3);
                assert_eq!(result["value"], "abc");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error() {
        let frame = r#"{"jsonrpc":"2.0","id":4,"error":{"code":40101,"message":"Object not found"}}"#;
        let incoming = Incoming::parse(frame).unwrap();
        let Incoming::Error { id, error } = incoming else {
            panic!("expected error frame");
        };
        assert_eq!(id, Some(4));

        let err: Error = error.into();
        assert_eq!(err.to_string(), "Media server error 40101: Object not found");
    }

    #[test]
    fn test_parse_notification() {
        let frame = r#"{"jsonrpc":"2.0","method":"onEvent","params":{"value":{"type":"IceCandidateFound"}}}"#;
        assert!(matches!(
            Incoming::parse(frame).unwrap(),
            Incoming::Notification { ref method, .. } if method == "onEvent"
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Incoming::parse(r#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(Incoming::parse("][").is_err());
    }
}
