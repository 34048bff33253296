//! Message bus envelope
//!
//! Every OCPP message crossing the bus, in either direction, is wrapped in a
//! [`BusMessage`] so modules never see raw OCPP-J frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::OcppError;
use super::identifier::StationIdentifier;
use super::ocpp::{ErrorCode, EventGroup, OcppVersion};

/// Who produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageOrigin {
    ChargingStation,
    ChargingStationManagementSystem,
}

/// Request (a Call) or response (CallResult / CallError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    pub correlation_id: String,
    pub tenant_id: i32,
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageContext {
    pub fn new(identifier: &StationIdentifier, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            tenant_id: identifier.tenant_id,
            station_id: identifier.station_id.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn identifier(&self) -> StationIdentifier {
        StationIdentifier::new(self.tenant_id, self.station_id.clone())
    }
}

/// CallError body as it travels over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallErrorPayload {
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl From<OcppError> for CallErrorPayload {
    fn from(e: OcppError) -> Self {
        Self {
            error_code: e.code,
            error_description: e.description,
            error_details: e.details,
        }
    }
}

impl From<CallErrorPayload> for OcppError {
    fn from(p: CallErrorPayload) -> Self {
        OcppError::new(p.error_code, p.error_description).with_details(p.error_details)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase")]
pub enum BusPayload {
    Request(Value),
    Response(Value),
    Error(CallErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub origin: MessageOrigin,
    pub event_group: EventGroup,
    pub action: String,
    pub protocol: OcppVersion,
    pub context: MessageContext,
    pub payload: BusPayload,
}

impl BusMessage {
    /// Build a message carrying traffic received from a station.
    pub fn from_station(
        identifier: &StationIdentifier,
        correlation_id: &str,
        action: &str,
        protocol: OcppVersion,
        timestamp: DateTime<Utc>,
        payload: BusPayload,
    ) -> Self {
        let mut context = MessageContext::new(identifier, correlation_id);
        context.timestamp = timestamp;
        Self {
            origin: MessageOrigin::ChargingStation,
            event_group: EventGroup::for_action(action),
            action: action.to_string(),
            protocol,
            context,
            payload,
        }
    }

    /// Build a message a module addresses to a station.
    pub fn to_station(
        identifier: &StationIdentifier,
        correlation_id: &str,
        action: &str,
        protocol: OcppVersion,
        payload: BusPayload,
    ) -> Self {
        Self {
            origin: MessageOrigin::ChargingStationManagementSystem,
            event_group: EventGroup::for_action(action),
            action: action.to_string(),
            protocol,
            context: MessageContext::new(identifier, correlation_id),
            payload,
        }
    }

    pub fn state(&self) -> MessageState {
        match self.payload {
            BusPayload::Request(_) => MessageState::Request,
            BusPayload::Response(_) | BusPayload::Error(_) => MessageState::Response,
        }
    }

    pub fn identifier(&self) -> StationIdentifier {
        self.context.identifier()
    }
}

/// Structured outcome of every send attempt handed back to modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageConfirmation {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl MessageConfirmation {
    pub fn ok() -> Self {
        Self {
            success: true,
            payload: None,
        }
    }

    pub fn ok_with(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Some(Value::String(reason.into())),
        }
    }
}
