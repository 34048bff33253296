//! Provisioning module
//!
//! Answers the station lifecycle calls every deployment needs: boot,
//! heartbeat and connector status. It also follows the outcome of the
//! Reset and TriggerMessage calls it is used to send.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use rust_ocpp::v1_6::messages as v16;
use rust_ocpp::v1_6::types::RegistrationStatus;
use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use rust_ocpp::v2_0_1::messages as v201;

use super::{ActionHandler, HandlerContext, HandlerRegistry};
use crate::domain::ocpp::actions::{BOOT_NOTIFICATION, HEARTBEAT, STATUS_NOTIFICATION, TRIGGER_MESSAGE};
use crate::domain::{ErrorCode, MessageState, OcppError, OcppVersion};

const RESET: &str = "Reset";
const DEFAULT_HEARTBEAT_INTERVAL: u32 = 60;

fn parse<T: DeserializeOwned>(ctx: &HandlerContext, payload: Value) -> Result<T, OcppError> {
    serde_json::from_value(payload).map_err(|e| {
        OcppError::new(ctx.protocol.format_violation(), "Payload does not match schema")
            .with_details(serde_json::json!({ "reason": e.to_string() }))
    })
}

fn encode<T: Serialize>(response: &T) -> Result<Value, OcppError> {
    serde_json::to_value(response)
        .map_err(|e| OcppError::new(ErrorCode::InternalError, e.to_string()))
}

pub struct ProvisioningModule {
    heartbeat_interval: u32,
}

impl ProvisioningModule {
    pub fn new(heartbeat_interval: u32) -> Self {
        Self { heartbeat_interval }
    }

    /// Handlers for both supported protocol versions.
    pub fn registry(&self) -> HandlerRegistry {
        let boot: Arc<dyn ActionHandler> = Arc::new(BootNotificationHandler {
            interval: self.heartbeat_interval,
        });
        let heartbeat: Arc<dyn ActionHandler> = Arc::new(HeartbeatHandler);
        let status: Arc<dyn ActionHandler> = Arc::new(StatusNotificationHandler);
        let outcome: Arc<dyn ActionHandler> = Arc::new(CommandOutcomeHandler);

        let mut registry = HandlerRegistry::new();
        for protocol in OcppVersion::ALL.iter().copied() {
            registry
                .register(protocol, BOOT_NOTIFICATION, MessageState::Request, boot.clone())
                .register(protocol, HEARTBEAT, MessageState::Request, heartbeat.clone())
                .register(protocol, STATUS_NOTIFICATION, MessageState::Request, status.clone())
                .register(protocol, RESET, MessageState::Response, outcome.clone())
                .register(protocol, TRIGGER_MESSAGE, MessageState::Response, outcome.clone());
        }
        registry
    }
}

impl Default for ProvisioningModule {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

struct BootNotificationHandler {
    interval: u32,
}

#[async_trait]
impl ActionHandler for BootNotificationHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, OcppError> {
        match ctx.protocol {
            OcppVersion::V16 => {
                let request: v16::boot_notification::BootNotificationRequest = parse(ctx, payload)?;
                info!(
                    station_id = %ctx.identifier,
                    vendor = request.charge_point_vendor.as_str(),
                    model = request.charge_point_model.as_str(),
                    "BootNotification"
                );
                encode(&v16::boot_notification::BootNotificationResponse {
                    current_time: Utc::now(),
                    interval: self.interval,
                    status: RegistrationStatus::Accepted,
                })
            }
            OcppVersion::V201 => {
                let request: v201::boot_notification::BootNotificationRequest = parse(ctx, payload)?;
                info!(
                    station_id = %ctx.identifier,
                    vendor = request.charging_station.vendor_name.as_str(),
                    model = request.charging_station.model.as_str(),
                    reason = ?request.reason,
                    "V201 BootNotification"
                );
                encode(&v201::boot_notification::BootNotificationResponse {
                    current_time: Utc::now(),
                    // 2.0.1 carries the interval as a u16.
                    interval: u16::try_from(self.interval).unwrap_or(u16::MAX),
                    status: RegistrationStatusEnumType::Accepted,
                    status_info: None,
                })
            }
        }
    }
}

struct HeartbeatHandler;

#[async_trait]
impl ActionHandler for HeartbeatHandler {
    async fn handle(&self, ctx: &HandlerContext, _payload: Value) -> Result<Value, OcppError> {
        info!(station_id = %ctx.identifier, "Heartbeat");
        match ctx.protocol {
            OcppVersion::V16 => encode(&v16::heart_beat::HeartbeatResponse {
                current_time: Utc::now(),
            }),
            OcppVersion::V201 => encode(&v201::heartbeat::HeartbeatResponse {
                current_time: Utc::now(),
            }),
        }
    }
}

struct StatusNotificationHandler;

#[async_trait]
impl ActionHandler for StatusNotificationHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, OcppError> {
        match ctx.protocol {
            OcppVersion::V16 => {
                let request: v16::status_notification::StatusNotificationRequest = parse(ctx, payload)?;
                info!(
                    station_id = %ctx.identifier,
                    connector_id = request.connector_id,
                    status = ?request.status,
                    error_code = ?request.error_code,
                    "StatusNotification"
                );
                encode(&v16::status_notification::StatusNotificationResponse {})
            }
            OcppVersion::V201 => {
                let request: v201::status_notification::StatusNotificationRequest = parse(ctx, payload)?;
                info!(
                    station_id = %ctx.identifier,
                    evse_id = request.evse_id,
                    connector_id = request.connector_id,
                    status = ?request.connector_status,
                    "V201 StatusNotification"
                );
                encode(&v201::status_notification::StatusNotificationResponse {})
            }
        }
    }
}

/// Logs what the station did with a command.
struct CommandOutcomeHandler;

#[async_trait]
impl ActionHandler for CommandOutcomeHandler {
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, OcppError> {
        match payload.get("status").and_then(Value::as_str) {
            Some("Accepted") => info!(station_id = %ctx.identifier, message_id = %ctx.correlation_id, "Command accepted"),
            status => warn!(station_id = %ctx.identifier, message_id = %ctx.correlation_id, ?status, "Command not accepted"),
        }
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StationIdentifier;
    use serde_json::json;

    fn ctx(protocol: OcppVersion) -> HandlerContext {
        HandlerContext {
            identifier: StationIdentifier::new(1, "CS-001"),
            correlation_id: "m-1".into(),
            protocol,
            timestamp: Utc::now(),
        }
    }

    async fn request(protocol: OcppVersion, action: &str, payload: Value) -> Result<Value, OcppError> {
        let registry = ProvisioningModule::new(120).registry();
        let handler = registry
            .get(protocol, action, MessageState::Request)
            .expect("handler registered");
        handler.handle(&ctx(protocol), payload).await
    }

    #[tokio::test]
    async fn boot_is_accepted_with_configured_interval() {
        let v16 = request(
            OcppVersion::V16,
            "BootNotification",
            json!({"chargePointVendor": "Acme", "chargePointModel": "X1"}),
        )
        .await
        .unwrap();
        assert_eq!(v16["status"], "Accepted");
        assert_eq!(v16["interval"], 120);

        let v201 = request(
            OcppVersion::V201,
            "BootNotification",
            json!({"chargingStation": {"model": "X1", "vendorName": "Acme"}, "reason": "PowerUp"}),
        )
        .await
        .unwrap();
        assert_eq!(v201["status"], "Accepted");
        assert_eq!(v201["interval"], 120);
    }

    #[tokio::test]
    async fn heartbeat_reports_current_time() {
        for protocol in OcppVersion::ALL.iter().copied() {
            let response = request(protocol, "Heartbeat", json!({})).await.unwrap();
            assert!(response["currentTime"].is_string());
        }
    }

    #[tokio::test]
    async fn status_notification_answers_empty_object() {
        let v16 = request(
            OcppVersion::V16,
            "StatusNotification",
            json!({"connectorId": 1, "errorCode": "NoError", "status": "Available"}),
        )
        .await
        .unwrap();
        assert_eq!(v16, json!({}));

        let v201 = request(
            OcppVersion::V201,
            "StatusNotification",
            json!({
                "timestamp": "2024-01-01T00:00:00Z",
                "connectorStatus": "Available",
                "evseId": 1,
                "connectorId": 1
            }),
        )
        .await
        .unwrap();
        assert_eq!(v201, json!({}));
    }

    #[tokio::test]
    async fn malformed_boot_is_a_format_violation() {
        let err = request(OcppVersion::V16, "BootNotification", json!({"chargePointVendor": "Acme"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FormationViolation);
    }

    #[tokio::test]
    async fn oversized_interval_saturates_for_v201() {
        let registry = ProvisioningModule::new(100_000).registry();
        let handler = registry
            .get(OcppVersion::V201, "BootNotification", MessageState::Request)
            .unwrap();
        let response = handler
            .handle(
                &ctx(OcppVersion::V201),
                json!({"chargingStation": {"model": "X1", "vendorName": "Acme"}, "reason": "PowerUp"}),
            )
            .await
            .unwrap();
        assert_eq!(response["interval"], u16::MAX);
    }

    #[test]
    fn registry_covers_both_versions() {
        let registry = ProvisioningModule::default().registry();
        assert_eq!(registry.len(), 10);
        assert!(registry.get(OcppVersion::V201, "Reset", MessageState::Response).is_some());
        assert!(registry.get(OcppVersion::V16, "Reset", MessageState::Request).is_none());
    }
}
