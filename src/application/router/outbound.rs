//! CSMS → station traffic
//!
//! `send_call` reserves the station's pending-call slot; `send_call_result`
//! and `send_call_error` only answer the call currently recorded there.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{parse_pending_record, pending_record, MessageRouter};
use crate::domain::ocpp::actions::{self, BOOT_NOTIFICATION, TRIGGER_MESSAGE};
use crate::domain::ports::cache::{namespace, BOOT_STATUS};
use crate::domain::ports::{MessageHandler, OcppSender, OutboundCall};
use crate::domain::{
    BusMessage, BusPayload, ErrorCode, MessageConfirmation, OcppError, OcppVersion, RetryMessageError,
    StationIdentifier,
};
use crate::shared::OcppFrame;

const REJECTED: &str = "Rejected";
const ACCEPTED: &str = "Accepted";

impl MessageRouter {
    /// A station whose last boot was rejected may only be asked to boot
    /// again.
    async fn boot_gate_allows(&self, call: &OutboundCall) -> bool {
        let status = match self
            .cache
            .get(BOOT_STATUS, &call.identifier.to_string())
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(station_id = %call.identifier, error = %e, "Boot status lookup failed");
                None
            }
        };
        if status.as_deref() != Some(REJECTED) {
            return true;
        }
        call.action == TRIGGER_MESSAGE
            && call.payload.get("requestedMessage").and_then(Value::as_str) == Some(BOOT_NOTIFICATION)
    }

    /// Check the pending-call slot against the call being answered.
    async fn pending_matches(
        &self,
        identifier: &StationIdentifier,
        correlation_id: &str,
        action: &str,
    ) -> Result<(), String> {
        let record = self
            .cache
            .get(&identifier.to_string(), namespace::TRANSACTIONS)
            .await
            .map_err(|e| format!("Correlation cache unavailable: {e}"))?
            .ok_or_else(|| format!("No pending call for {identifier}"))?;

        match parse_pending_record(&record) {
            Some((cached_action, cached_id)) if cached_action == action && cached_id == correlation_id => {
                Ok(())
            }
            _ => Err(format!(
                "Pending call {record} does not match {action}:{correlation_id}"
            )),
        }
    }

    /// Write an answer to a station Call and free its slot.
    async fn answer_call(
        &self,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        correlation_id: &str,
        action: &str,
        frame: OcppFrame,
    ) -> MessageConfirmation {
        if let Err(reason) = self.pending_matches(identifier, correlation_id, action).await {
            warn!(station_id = %identifier, message_id = correlation_id, action, %reason, "Refusing to answer");
            return MessageConfirmation::failed(reason);
        }

        if let Err(e) = self.write_frame(identifier, protocol, &frame).await {
            warn!(station_id = %identifier, message_id = correlation_id, action, error = %e, "Answer not delivered");
            return MessageConfirmation::failed(e.to_string());
        }

        if let Err(e) = self
            .cache
            .remove(&identifier.to_string(), namespace::TRANSACTIONS)
            .await
        {
            warn!(station_id = %identifier, error = %e, "Failed to clear pending call");
        }
        MessageConfirmation::ok()
    }

    /// Tell the module that issued a Call over the bus that it never reached
    /// the station. `details.retryable` marks a busy station.
    async fn report_refused_call(
        &self,
        identifier: &StationIdentifier,
        correlation_id: &str,
        action: &str,
        protocol: OcppVersion,
        error: OcppError,
    ) {
        warn!(
            station_id = %identifier,
            message_id = correlation_id,
            action,
            code = %error.code,
            description = %error.description,
            "Bus call refused"
        );
        let reply = BusMessage::from_station(
            identifier,
            correlation_id,
            action,
            protocol,
            Utc::now(),
            BusPayload::Error(error.into()),
        );
        match self.sender.send(reply).await {
            Ok(confirmation) if confirmation.success => {}
            Ok(confirmation) => {
                warn!(station_id = %identifier, message_id = correlation_id, payload = ?confirmation.payload, "Refusal not delivered")
            }
            Err(e) => {
                warn!(station_id = %identifier, message_id = correlation_id, error = %e, "Refusal not delivered")
            }
        }
    }

    /// Remember the outcome of a BootNotification for the `Rejected` gate.
    async fn record_boot_status(&self, identifier: &StationIdentifier, payload: &Value) {
        let Some(status) = payload.get("status").and_then(Value::as_str) else {
            return;
        };
        let station_namespace = identifier.to_string();
        let result = if status == ACCEPTED {
            self.cache.remove(BOOT_STATUS, &station_namespace).await.map(|_| ())
        } else {
            self.cache
                .set(BOOT_STATUS, status, &station_namespace, None)
                .await
                .map(|_| ())
        };
        match result {
            Ok(()) => debug!(station_id = %identifier, status, "Boot status recorded"),
            Err(e) => warn!(station_id = %identifier, error = %e, "Failed to record boot status"),
        }
    }
}

#[async_trait]
impl OcppSender for MessageRouter {
    async fn send_call(
        &self,
        call: OutboundCall,
    ) -> Result<MessageConfirmation, RetryMessageError> {
        let correlation_id = call
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let identifier = &call.identifier;

        if !actions::is_csms_initiated(call.protocol, &call.action) {
            return Ok(MessageConfirmation::failed(format!(
                "{} is not a CSMS-initiated {} action",
                call.action, call.protocol
            )));
        }

        if !self.boot_gate_allows(&call).await {
            info!(station_id = %identifier, action = %call.action, "Blocked by rejected boot status");
            return Ok(MessageConfirmation::failed(
                "Station boot status is Rejected; only TriggerMessage(BootNotification) is allowed",
            ));
        }

        let key = identifier.to_string();
        let reserved = self
            .cache
            .set_if_not_exist(
                &key,
                &pending_record(&call.action, &correlation_id),
                namespace::TRANSACTIONS,
                Some(self.config.max_call_length),
            )
            .await;
        match reserved {
            Ok(true) => {}
            Ok(false) => {
                return Err(RetryMessageError {
                    identifier: identifier.clone(),
                    action: call.action.clone(),
                })
            }
            Err(e) => {
                warn!(station_id = %identifier, error = %e, "Pending-call reservation failed");
                return Ok(MessageConfirmation::failed(e.to_string()));
            }
        }

        let frame = OcppFrame::Call {
            unique_id: correlation_id.clone(),
            action: call.action.clone(),
            payload: call.payload.clone(),
        };
        if let Err(e) = self.write_frame(identifier, call.protocol, &frame).await {
            warn!(station_id = %identifier, action = %call.action, error = %e, "Call not delivered");
            if let Err(e) = self.cache.remove(&key, namespace::TRANSACTIONS).await {
                warn!(station_id = %identifier, error = %e, "Failed to release pending call");
            }
            return Ok(MessageConfirmation::failed(e.to_string()));
        }

        if let Some(url) = call.callback_url.as_deref() {
            if let Err(e) = self
                .cache
                .set(
                    &correlation_id,
                    url,
                    namespace::CALLBACK_URL,
                    Some(self.config.max_caching),
                )
                .await
            {
                warn!(message_id = %correlation_id, error = %e, "Failed to register callback URL");
            }
        }

        info!(station_id = %identifier, message_id = %correlation_id, action = %call.action, "Call sent");
        Ok(MessageConfirmation::ok_with(json!({ "correlationId": correlation_id })))
    }

    async fn send_call_result(
        &self,
        correlation_id: &str,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        action: &str,
        payload: Value,
    ) -> MessageConfirmation {
        let frame = OcppFrame::CallResult {
            unique_id: correlation_id.to_string(),
            payload: payload.clone(),
        };
        let confirmation = self
            .answer_call(identifier, protocol, correlation_id, action, frame)
            .await;
        if confirmation.success && action == BOOT_NOTIFICATION {
            self.record_boot_status(identifier, &payload).await;
        }
        confirmation
    }

    async fn send_call_error(
        &self,
        correlation_id: &str,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        action: &str,
        error: OcppError,
    ) -> MessageConfirmation {
        let frame = OcppFrame::from_error(correlation_id, &error);
        self.answer_call(identifier, protocol, correlation_id, action, frame)
            .await
    }
}

/// Module traffic addressed to a station connected to this router.
#[async_trait]
impl MessageHandler for MessageRouter {
    async fn handle(&self, message: BusMessage) {
        let identifier = message.identifier();
        let correlation_id = message.context.correlation_id.clone();
        let action = message.action.clone();
        let protocol = message.protocol;

        let confirmation = match message.payload {
            BusPayload::Request(payload) => {
                let call = OutboundCall::new(identifier.clone(), protocol, &action, payload)
                    .with_correlation_id(&correlation_id);
                let refusal = match self.send_call(call).await {
                    Ok(confirmation) if confirmation.success => return,
                    Ok(confirmation) => OcppError::new(ErrorCode::GenericError, "Call not sent")
                        .with_details(json!({
                            "retryable": false,
                            "reason": confirmation.payload.unwrap_or(Value::Null),
                        })),
                    Err(e) => OcppError::new(ErrorCode::RpcFrameworkError, e.to_string())
                        .with_details(json!({
                            "retryable": true,
                            "maxCallLengthSeconds": self.config.max_call_length.as_secs(),
                        })),
                };
                self.report_refused_call(&identifier, &correlation_id, &action, protocol, refusal)
                    .await;
                return;
            }
            BusPayload::Response(payload) => {
                self.send_call_result(&correlation_id, &identifier, protocol, &action, payload)
                    .await
            }
            BusPayload::Error(error) => {
                self.send_call_error(&correlation_id, &identifier, protocol, &action, error.into())
                    .await
            }
        };

        if !confirmation.success {
            warn!(
                station_id = %identifier,
                message_id = %correlation_id,
                action = %action,
                payload = ?confirmation.payload,
                "Bus message not delivered to station"
            );
        }
    }
}
