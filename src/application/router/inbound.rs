//! Station → CSMS traffic

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::{parse_pending_record, pending_record, MessageRouter, PayloadKind};
use crate::domain::ocpp::actions;
use crate::domain::ports::cache::namespace;
use crate::domain::ports::OcppSender;
use crate::domain::{
    BusMessage, BusPayload, CallErrorPayload, ErrorCode, OcppError, OcppVersion,
    StationIdentifier,
};
use crate::shared::OcppFrame;

impl MessageRouter {
    /// Route one text frame received from a station.
    ///
    /// Returns `true` when the frame was structurally processed, even if the
    /// answer was a CallError. Webhook dispatch and the station's last-seen
    /// timestamp update happen for every frame and never affect the result.
    pub async fn on_message(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> bool {
        let value: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(e) => {
                warn!(station_id = %identifier, error = %e, "Unparsable message");
                if let Err(e) = self
                    .webhooks
                    .dispatch_message_received_unparsed(identifier, message, timestamp, protocol)
                    .await
                {
                    warn!(station_id = %identifier, error = %e, "Received-message webhook failed");
                }
                self.touch_station(identifier, timestamp).await;
                return false;
            }
        };

        let frame = OcppFrame::from_value(&value);
        let rpc = frame.is_ok().then_some(&value);
        if let Err(e) = self
            .webhooks
            .dispatch_message_received(identifier, message, timestamp, protocol, rpc)
            .await
        {
            warn!(station_id = %identifier, error = %e, "Received-message webhook failed");
        }

        let handled = match frame {
            Ok(frame) => {
                metrics::counter!(
                    "ocpp_messages_received_total",
                    "message_type" => frame.message_type().as_str()
                )
                .increment(1);
                self.route_frame(identifier, frame, timestamp, protocol).await
            }
            Err(e) => {
                warn!(station_id = %identifier, error = %e, "Malformed OCPP frame");
                if let Some(unique_id) = OcppFrame::recover_unique_id(&value) {
                    let error = OcppError::new(protocol.format_violation(), e.to_string());
                    self.reject_call(identifier, protocol, &unique_id, &error).await;
                }
                false
            }
        };

        self.touch_station(identifier, timestamp).await;
        handled
    }

    async fn route_frame(
        &self,
        identifier: &StationIdentifier,
        frame: OcppFrame,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> bool {
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                self.on_call(identifier, &unique_id, &action, payload, timestamp, protocol)
                    .await
            }
            OcppFrame::CallResult { unique_id, payload } => {
                self.on_call_result(identifier, &unique_id, payload, timestamp, protocol)
                    .await
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                let error = CallErrorPayload {
                    error_code: ErrorCode::from_wire(&error_code),
                    error_description,
                    error_details,
                };
                self.on_call_error(identifier, &unique_id, error, timestamp, protocol)
                    .await
            }
        }
    }

    async fn on_call(
        &self,
        identifier: &StationIdentifier,
        unique_id: &str,
        action: &str,
        payload: Value,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> bool {
        debug!(station_id = %identifier, message_id = unique_id, action, "Call received");

        if self.is_blacklisted(identifier, action).await {
            let error = OcppError::new(
                ErrorCode::SecurityError,
                format!("Action {action} is blacklisted"),
            );
            self.reject_call(identifier, protocol, unique_id, &error).await;
            return true;
        }

        if !actions::is_station_initiated(protocol, action) {
            let error = OcppError::new(
                ErrorCode::NotImplemented,
                format!("{action} is not a station-initiated {protocol} action"),
            );
            self.reject_call(identifier, protocol, unique_id, &error).await;
            return true;
        }

        if let Err(error) =
            self.validator
                .validate(protocol, action, PayloadKind::Request, &payload)
        {
            self.reject_call(identifier, protocol, unique_id, &error).await;
            return true;
        }

        match self.reserve_inbound_slot(identifier, action, unique_id).await {
            Ok(true) => {}
            Ok(false) => {
                let error = OcppError::new(ErrorCode::RpcFrameworkError, "Call already in progress")
                    .with_details(json!({ "maxCallLengthSeconds": self.config.max_call_length.as_secs() }));
                self.reject_call(identifier, protocol, unique_id, &error).await;
                return true;
            }
            Err(error) => {
                self.reject_call(identifier, protocol, unique_id, &error).await;
                return true;
            }
        }

        let message = BusMessage::from_station(
            identifier,
            unique_id,
            action,
            protocol,
            timestamp,
            BusPayload::Request(payload),
        );
        let failure = match self.sender.send(message).await {
            Ok(confirmation) if confirmation.success => None,
            Ok(confirmation) => Some(confirmation.payload.unwrap_or(Value::Null)),
            Err(e) => Some(Value::String(e.to_string())),
        };

        if let Some(details) = failure {
            error!(station_id = %identifier, message_id = unique_id, action, ?details, "Failed to forward call");
            let error = OcppError::new(ErrorCode::InternalError, "Call failed")
                .with_details(json!({ "failure": details }));
            let confirmation = self
                .send_call_error(unique_id, identifier, protocol, action, error)
                .await;
            if !confirmation.success {
                warn!(station_id = %identifier, message_id = unique_id, "Could not report forwarding failure");
            }
        }
        true
    }

    /// Reserve the pending-call slot, waiting once for it to change if taken.
    async fn reserve_inbound_slot(
        &self,
        identifier: &StationIdentifier,
        action: &str,
        unique_id: &str,
    ) -> Result<bool, OcppError> {
        let key = identifier.to_string();
        let record = pending_record(action, unique_id);
        let ttl = Some(self.config.max_call_length);
        let internal = |e: crate::domain::CacheError| {
            OcppError::new(ErrorCode::InternalError, "Correlation cache unavailable")
                .with_details(json!({ "reason": e.to_string() }))
        };

        if self
            .cache
            .set_if_not_exist(&key, &record, namespace::TRANSACTIONS, ttl)
            .await
            .map_err(internal)?
        {
            return Ok(true);
        }

        debug!(station_id = %identifier, message_id = unique_id, "Slot busy, waiting once");
        self.cache
            .on_change(&key, self.config.max_call_length, namespace::TRANSACTIONS)
            .await
            .map_err(internal)?;

        self.cache
            .set_if_not_exist(&key, &record, namespace::TRANSACTIONS, ttl)
            .await
            .map_err(internal)
    }

    async fn is_blacklisted(&self, identifier: &StationIdentifier, action: &str) -> bool {
        match self.cache.exists(action, &identifier.to_string()).await {
            Ok(blacklisted) => blacklisted,
            Err(e) => {
                warn!(station_id = %identifier, action, error = %e, "Blacklist lookup failed");
                false
            }
        }
    }

    /// Take the pending record for `unique_id`, returning its action.
    ///
    /// The record is removed whenever one exists, matching or not, so a
    /// stray response always frees the slot.
    async fn take_pending(&self, identifier: &StationIdentifier, unique_id: &str) -> Option<String> {
        let key = identifier.to_string();
        let record = match self.cache.get(&key, namespace::TRANSACTIONS).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(
                    station_id = %identifier,
                    message_id = unique_id,
                    max_call_length_secs = self.config.max_call_length.as_secs(),
                    "No pending call, it may have timed out"
                );
                return None;
            }
            Err(e) => {
                warn!(station_id = %identifier, error = %e, "Pending-call lookup failed");
                return None;
            }
        };

        if let Err(e) = self.cache.remove(&key, namespace::TRANSACTIONS).await {
            warn!(station_id = %identifier, error = %e, "Failed to clear pending call");
        }

        match parse_pending_record(&record) {
            Some((action, correlation_id)) if correlation_id == unique_id => Some(action.to_string()),
            Some((_, expected)) => {
                warn!(station_id = %identifier, message_id = unique_id, expected, "Response does not match pending call");
                None
            }
            None => {
                warn!(station_id = %identifier, record = %record, "Corrupt pending-call record");
                None
            }
        }
    }

    async fn on_call_result(
        &self,
        identifier: &StationIdentifier,
        unique_id: &str,
        payload: Value,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> bool {
        let Some(action) = self.take_pending(identifier, unique_id).await else {
            return false;
        };

        if let Err(e) = self
            .validator
            .validate(protocol, &action, PayloadKind::Response, &payload)
        {
            warn!(
                station_id = %identifier,
                message_id = unique_id,
                action = %action,
                error = %e,
                details = ?e.details,
                "Invalid CallResult"
            );
            return false;
        }

        let message = BusMessage::from_station(
            identifier,
            unique_id,
            &action,
            protocol,
            timestamp,
            BusPayload::Response(payload),
        );
        self.forward_response(identifier, unique_id, message).await
    }

    async fn on_call_error(
        &self,
        identifier: &StationIdentifier,
        unique_id: &str,
        error: CallErrorPayload,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> bool {
        let Some(action) = self.take_pending(identifier, unique_id).await else {
            return false;
        };
        warn!(
            station_id = %identifier,
            message_id = unique_id,
            action = %action,
            code = %error.error_code,
            description = %error.error_description,
            "Station answered with CallError"
        );

        let body = json!([4, unique_id, error.error_code.as_str(), error.error_description, error.error_details]);
        let message = BusMessage::from_station(
            identifier,
            unique_id,
            &action,
            protocol,
            timestamp,
            BusPayload::Error(error),
        );
        let forwarded = self.forward_response(identifier, unique_id, message).await;
        self.notify_callback(unique_id, &body).await;
        forwarded
    }

    async fn forward_response(
        &self,
        identifier: &StationIdentifier,
        unique_id: &str,
        message: BusMessage,
    ) -> bool {
        match self.sender.send(message).await {
            Ok(confirmation) if confirmation.success => true,
            Ok(confirmation) => {
                warn!(station_id = %identifier, message_id = unique_id, payload = ?confirmation.payload, "Bus rejected response");
                false
            }
            Err(e) => {
                warn!(station_id = %identifier, message_id = unique_id, error = %e, "Failed to forward response");
                false
            }
        }
    }

    async fn notify_callback(&self, correlation_id: &str, body: &Value) {
        let url = match self.cache.get(correlation_id, namespace::CALLBACK_URL).await {
            Ok(Some(url)) => url,
            Ok(None) => return,
            Err(e) => {
                warn!(message_id = correlation_id, error = %e, "Callback lookup failed");
                return;
            }
        };
        if let Err(e) = self.callbacks.notify(&url, body).await {
            warn!(message_id = correlation_id, error = %e, "Callback delivery failed");
        }
    }

    async fn touch_station(&self, identifier: &StationIdentifier, timestamp: DateTime<Utc>) {
        if let Err(e) = self.stations.update_timestamp(identifier, timestamp).await {
            debug!(station_id = %identifier, error = %e, "Timestamp update failed");
        }
    }
}
