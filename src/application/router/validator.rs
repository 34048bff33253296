//! Payload schema validation
//!
//! A payload is valid when it deserializes into the matching `rust-ocpp`
//! message struct. Catalogue actions without a typed struct only need to be
//! a JSON object.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use rust_ocpp::v1_6::messages as v16;
use rust_ocpp::v2_0_1::messages as v201;

use crate::domain::{OcppError, OcppVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Body of a Call sent by the station.
    Request,
    /// Body of a CallResult answering a CSMS call.
    Response,
}

type SchemaCheck = fn(&Value) -> Result<(), String>;

fn check<T: DeserializeOwned>(payload: &Value) -> Result<(), String> {
    T::deserialize(payload).map(|_| ()).map_err(|e| e.to_string())
}

macro_rules! register {
    ($schemas:ident, $version:expr, $kind:expr, { $( $action:literal => $ty:ty ),* $(,)? }) => {
        $( $schemas.insert(($version, $action, $kind), check::<$ty> as SchemaCheck); )*
    };
}

pub struct SchemaValidator {
    schemas: HashMap<(OcppVersion, &'static str, PayloadKind), SchemaCheck>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        use OcppVersion::{V16, V201};
        use PayloadKind::{Request, Response};

        let mut schemas = HashMap::new();

        register!(schemas, V16, Request, {
            "Authorize" => v16::authorize::AuthorizeRequest,
            "BootNotification" => v16::boot_notification::BootNotificationRequest,
            "DataTransfer" => v16::data_transfer::DataTransferRequest,
            "DiagnosticsStatusNotification" => v16::diagnostics_status_notification::DiagnosticsStatusNotificationRequest,
            "FirmwareStatusNotification" => v16::firmware_status_notification::FirmwareStatusNotificationRequest,
            "MeterValues" => v16::meter_values::MeterValuesRequest,
            "StartTransaction" => v16::start_transaction::StartTransactionRequest,
            "StatusNotification" => v16::status_notification::StatusNotificationRequest,
            "StopTransaction" => v16::stop_transaction::StopTransactionRequest,
        });

        register!(schemas, V16, Response, {
            "CancelReservation" => v16::cancel_reservation::CancelReservationResponse,
            "ChangeAvailability" => v16::change_availability::ChangeAvailabilityResponse,
            "ChangeConfiguration" => v16::change_configuration::ChangeConfigurationResponse,
            "ClearCache" => v16::clear_cache::ClearCacheResponse,
            "ClearChargingProfile" => v16::clear_charging_profile::ClearChargingProfileResponse,
            "DataTransfer" => v16::data_transfer::DataTransferResponse,
            "GetCompositeSchedule" => v16::get_composite_schedule::GetCompositeScheduleResponse,
            "GetConfiguration" => v16::get_configuration::GetConfigurationResponse,
            "GetDiagnostics" => v16::get_diagnostics::GetDiagnosticsResponse,
            "RemoteStopTransaction" => v16::remote_stop_transaction::RemoteStopTransactionResponse,
            "ReserveNow" => v16::reserve_now::ReserveNowResponse,
            "Reset" => v16::reset::ResetResponse,
            "SendLocalList" => v16::send_local_list::SendLocalListResponse,
            "SetChargingProfile" => v16::set_charging_profile::SetChargingProfileResponse,
            "TriggerMessage" => v16::trigger_message::TriggerMessageResponse,
            "UnlockConnector" => v16::unlock_connector::UnlockConnectorResponse,
        });

        register!(schemas, V201, Request, {
            "Authorize" => v201::authorize::AuthorizeRequest,
            "BootNotification" => v201::boot_notification::BootNotificationRequest,
            "DataTransfer" => v201::datatransfer::DataTransferRequest,
            "FirmwareStatusNotification" => v201::firmware_status_notification::FirmwareStatusNotificationRequest,
            "MeterValues" => v201::meter_values::MeterValuesRequest,
            "NotifyEvent" => v201::notify_event::NotifyEventRequest,
            "NotifyMonitoringReport" => v201::notify_monitoring_report::NotifyMonitoringReportRequest,
            "NotifyReport" => v201::notify_report::NotifyReportRequest,
            "ReportChargingProfiles" => v201::report_charging_profiles::ReportChargingProfilesRequest,
            "SecurityEventNotification" => v201::security_event_notification::SecurityEventNotificationRequest,
            "StatusNotification" => v201::status_notification::StatusNotificationRequest,
            "TransactionEvent" => v201::transaction_event::TransactionEventRequest,
        });

        register!(schemas, V201, Response, {
            "ChangeAvailability" => v201::change_availability::ChangeAvailabilityResponse,
            "ClearCache" => v201::clear_cache::ClearCacheResponse,
            "ClearChargingProfile" => v201::clear_charging_profile::ClearChargingProfileResponse,
            "ClearVariableMonitoring" => v201::clear_variable_monitoring::ClearVariableMonitoringResponse,
            "DataTransfer" => v201::datatransfer::DataTransferResponse,
            "GetBaseReport" => v201::get_base_report::GetBaseReportResponse,
            "GetChargingProfiles" => v201::get_charging_profiles::GetChargingProfilesResponse,
            "GetCompositeSchedule" => v201::get_composite_schedule::GetCompositeScheduleResponse,
            "GetLocalListVersion" => v201::get_local_list_version::GetLocalListVersionResponse,
            "GetLog" => v201::get_log::GetLogResponse,
            "GetTransactionStatus" => v201::get_transaction_status::GetTransactionStatusResponse,
            "GetVariables" => v201::get_variables::GetVariablesResponse,
            "RequestStartTransaction" => v201::request_start_transaction::RequestStartTransactionResponse,
            "RequestStopTransaction" => v201::request_stop_transaction::RequestStopTransactionResponse,
            "ReserveNow" => v201::reserve_now::ReserveNowResponse,
            "Reset" => v201::reset::ResetResponse,
            "SendLocalList" => v201::send_local_list::SendLocalListResponse,
            "SetChargingProfile" => v201::set_charging_profile::SetChargingProfileResponse,
            "SetMonitoringBase" => v201::set_monitoring_base::SetMonitoringBaseResponse,
            "SetVariableMonitoring" => v201::set_variable_monitoring::SetVariableMonitoringResponse,
            "SetVariables" => v201::set_variables::SetVariablesResponse,
            "TriggerMessage" => v201::trigger_message::TriggerMessageResponse,
            "UnlockConnector" => v201::unlock_connector::UnlockConnectorResponse,
            "UpdateFirmware" => v201::update_firmware::UpdateFirmwareResponse,
        });

        Self { schemas }
    }

    pub fn has_schema(&self, protocol: OcppVersion, action: &str, kind: PayloadKind) -> bool {
        self.schemas.contains_key(&(protocol, action, kind))
    }

    /// Validate `payload` for `action`. The error carries the version's
    /// format-violation code and the deserializer message as details.
    pub fn validate(
        &self,
        protocol: OcppVersion,
        action: &str,
        kind: PayloadKind,
        payload: &Value,
    ) -> Result<(), OcppError> {
        if !payload.is_object() {
            return Err(OcppError::new(
                protocol.format_violation(),
                format!("{action} payload must be a JSON object"),
            ));
        }
        let Some(check) = self.schemas.get(&(protocol, action, kind)) else {
            return Ok(());
        };
        check(payload).map_err(|reason| {
            OcppError::new(
                protocol.format_violation(),
                format!("Invalid {action} payload"),
            )
            .with_details(serde_json::json!({ "reason": reason }))
        })
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}
