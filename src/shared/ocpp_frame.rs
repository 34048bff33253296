//! OCPP-J message framing
//!
//! The envelope is identical across OCPP 1.6 and 2.0.1:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ErrorCode, OcppError};

// ── Message-type ids ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTypeId {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageTypeId {
    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::CallResult => "call_result",
            Self::CallError => "call_error",
        }
    }
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame (version-agnostic transport envelope).
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Interpret an already-decoded JSON value as a frame.
    pub fn from_value(value: &Value) -> Result<Self, OcppFrameError> {
        let arr = value.as_array().ok_or(OcppFrameError::NotAnArray)?;

        if arr.is_empty() {
            return Err(OcppFrameError::EmptyArray);
        }

        let msg_type = arr[0].as_u64().ok_or(OcppFrameError::InvalidMessageType)?;

        match MessageTypeId::from_u64(msg_type) {
            Some(MessageTypeId::Call) => Self::parse_call(arr),
            Some(MessageTypeId::CallResult) => Self::parse_call_result(arr),
            Some(MessageTypeId::CallError) => Self::parse_call_error(arr),
            None => Err(OcppFrameError::UnknownMessageType(msg_type)),
        }
    }

    /// Best-effort recovery of the unique id from a frame that failed to
    /// parse, so a CallError can still be addressed to the sender.
    pub fn recover_unique_id(value: &Value) -> Option<String> {
        value
            .as_array()
            .and_then(|arr| arr.get(1))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn unique_id_of(arr: &[Value]) -> Result<String, OcppFrameError> {
        arr[1]
            .as_str()
            .map(str::to_string)
            .ok_or(OcppFrameError::FieldTypeMismatch("uniqueId must be a string"))
    }

    fn parse_call(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = Self::unique_id_of(arr)?;
        let action = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("action must be a string"))?
            .to_string();
        let payload = arr[3].clone();

        Ok(Self::Call {
            unique_id,
            action,
            payload,
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 3 {
            return Err(OcppFrameError::MissingFields {
                expected: 3,
                got: arr.len(),
            });
        }

        let unique_id = Self::unique_id_of(arr)?;
        let payload = arr[2].clone();

        Ok(Self::CallResult { unique_id, payload })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = Self::unique_id_of(arr)?;
        let error_code = arr[2]
            .as_str()
            .unwrap_or(ErrorCode::GenericError.as_str())
            .to_string();
        let error_description = arr[3].as_str().unwrap_or("").to_string();
        let error_details = arr
            .get(4)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        })
    }

    // ── Serialization ──────────────────────────────────────

    /// JSON array form, with `null` object members stripped.
    pub fn to_value(&self) -> Value {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => vec![
                Value::from(MessageTypeId::Call as u64),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                strip_nulls(payload.clone()),
            ],

            Self::CallResult { unique_id, payload } => vec![
                Value::from(MessageTypeId::CallResult as u64),
                Value::String(unique_id.clone()),
                strip_nulls(payload.clone()),
            ],

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => vec![
                Value::from(MessageTypeId::CallError as u64),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                strip_nulls(error_details.clone()),
            ],
        };
        Value::Array(arr)
    }

    /// Serialize this frame to wire text.
    pub fn serialize(&self) -> String {
        self.to_value().to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn message_type(&self) -> MessageTypeId {
        match self {
            Self::Call { .. } => MessageTypeId::Call,
            Self::CallResult { .. } => MessageTypeId::CallResult,
            Self::CallError { .. } => MessageTypeId::CallError,
        }
    }

    /// Build a `CallError` frame answering `unique_id`.
    pub fn from_error(unique_id: impl Into<String>, error: &OcppError) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error.code.as_str().to_string(),
            error_description: error.description.clone(),
            error_details: error.details.clone(),
        }
    }
}

/// Remove `null` members from objects, recursively. OCPP schemas mark
/// optional fields as absent, never as `null`.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("OCPP message is not a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            other => panic!("Expected Call frame, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "Action not supported");
            }
            other => panic!("Expected CallError frame, got {:?}", other),
        }
    }

    #[test]
    fn unknown_message_type_keeps_id_recoverable() {
        let text = r#"[99,"id-7","Heartbeat",{}]"#;
        assert_eq!(
            OcppFrame::parse(text),
            Err(OcppFrameError::UnknownMessageType(99))
        );
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(OcppFrame::recover_unique_id(&value).as_deref(), Some("id-7"));
    }

    #[test]
    fn garbage_is_invalid_json() {
        assert!(matches!(
            OcppFrame::parse("not json"),
            Err(OcppFrameError::InvalidJson(_))
        ));
        assert_eq!(OcppFrame::parse("{}"), Err(OcppFrameError::NotAnArray));
        assert_eq!(
            OcppFrame::parse(r#"[2,"id"]"#),
            Err(OcppFrameError::MissingFields { expected: 4, got: 2 })
        );
    }

    #[test]
    fn serialize_strips_nulls() {
        let frame = OcppFrame::Call {
            unique_id: "id1".into(),
            action: "Reset".into(),
            payload: json!({"type": "Immediate", "evseId": null, "nested": [{"a": null, "b": 1}]}),
        };
        assert_eq!(
            frame.serialize(),
            r#"[2,"id1","Reset",{"nested":[{"b":1}],"type":"Immediate"}]"#
        );
    }

    #[test]
    fn from_error_builds_call_error() {
        let err = OcppError::new(ErrorCode::SecurityError, "nope");
        let frame = OcppFrame::from_error("id3", &err);
        assert_eq!(frame.message_type(), MessageTypeId::CallError);
        assert_eq!(frame.serialize(), r#"[4,"id3","SecurityError","nope",{}]"#);
    }
}
