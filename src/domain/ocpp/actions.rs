//! OCPP action catalogue and event-group routing
//!
//! Actions stay plain strings on the wire and in bus messages; this module
//! only answers "is this action valid for this version and direction" and
//! "which backend module category owns it".

use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::OcppVersion;

pub const BOOT_NOTIFICATION: &str = "BootNotification";
pub const HEARTBEAT: &str = "Heartbeat";
pub const STATUS_NOTIFICATION: &str = "StatusNotification";
pub const TRIGGER_MESSAGE: &str = "TriggerMessage";

/// Station → CSMS actions, OCPP 1.6 (core + security extension).
const V16_STATION_INITIATED: &[&str] = &[
    "Authorize",
    "BootNotification",
    "DataTransfer",
    "DiagnosticsStatusNotification",
    "FirmwareStatusNotification",
    "Heartbeat",
    "LogStatusNotification",
    "MeterValues",
    "SecurityEventNotification",
    "SignCertificate",
    "SignedFirmwareStatusNotification",
    "StartTransaction",
    "StatusNotification",
    "StopTransaction",
];

/// CSMS → station actions, OCPP 1.6 (core + security extension).
const V16_CSMS_INITIATED: &[&str] = &[
    "CancelReservation",
    "CertificateSigned",
    "ChangeAvailability",
    "ChangeConfiguration",
    "ClearCache",
    "ClearChargingProfile",
    "DataTransfer",
    "DeleteCertificate",
    "ExtendedTriggerMessage",
    "GetCompositeSchedule",
    "GetConfiguration",
    "GetDiagnostics",
    "GetInstalledCertificateIds",
    "GetLocalListVersion",
    "GetLog",
    "InstallCertificate",
    "RemoteStartTransaction",
    "RemoteStopTransaction",
    "ReserveNow",
    "Reset",
    "SendLocalList",
    "SetChargingProfile",
    "SignedUpdateFirmware",
    "TriggerMessage",
    "UnlockConnector",
    "UpdateFirmware",
];

/// Station → CSMS actions, OCPP 2.0.1.
const V201_STATION_INITIATED: &[&str] = &[
    "Authorize",
    "BootNotification",
    "ClearedChargingLimit",
    "DataTransfer",
    "FirmwareStatusNotification",
    "Get15118EVCertificate",
    "GetCertificateStatus",
    "Heartbeat",
    "LogStatusNotification",
    "MeterValues",
    "NotifyChargingLimit",
    "NotifyCustomerInformation",
    "NotifyDisplayMessages",
    "NotifyEVChargingNeeds",
    "NotifyEVChargingSchedule",
    "NotifyEvent",
    "NotifyMonitoringReport",
    "NotifyReport",
    "PublishFirmwareStatusNotification",
    "ReportChargingProfiles",
    "ReservationStatusUpdate",
    "SecurityEventNotification",
    "SignCertificate",
    "StatusNotification",
    "TransactionEvent",
];

/// CSMS → station actions, OCPP 2.0.1.
const V201_CSMS_INITIATED: &[&str] = &[
    "CancelReservation",
    "CertificateSigned",
    "ChangeAvailability",
    "ClearCache",
    "ClearChargingProfile",
    "ClearDisplayMessage",
    "ClearVariableMonitoring",
    "CostUpdated",
    "CustomerInformation",
    "DataTransfer",
    "DeleteCertificate",
    "GetBaseReport",
    "GetChargingProfiles",
    "GetCompositeSchedule",
    "GetDisplayMessages",
    "GetInstalledCertificateIds",
    "GetLocalListVersion",
    "GetLog",
    "GetMonitoringReport",
    "GetReport",
    "GetTransactionStatus",
    "GetVariables",
    "InstallCertificate",
    "PublishFirmware",
    "RequestStartTransaction",
    "RequestStopTransaction",
    "ReserveNow",
    "Reset",
    "SendLocalList",
    "SetChargingProfile",
    "SetDisplayMessage",
    "SetMonitoringBase",
    "SetMonitoringLevel",
    "SetNetworkProfile",
    "SetVariableMonitoring",
    "SetVariables",
    "TriggerMessage",
    "UnlockConnector",
    "UnpublishFirmware",
    "UpdateFirmware",
];

/// Whether a station may initiate `action` under `version`.
pub fn is_station_initiated(version: OcppVersion, action: &str) -> bool {
    let list = match version {
        OcppVersion::V16 => V16_STATION_INITIATED,
        OcppVersion::V201 => V201_STATION_INITIATED,
    };
    list.contains(&action)
}

/// Whether the CSMS may initiate `action` under `version`.
pub fn is_csms_initiated(version: OcppVersion, action: &str) -> bool {
    let list = match version {
        OcppVersion::V16 => V16_CSMS_INITIATED,
        OcppVersion::V201 => V201_CSMS_INITIATED,
    };
    list.contains(&action)
}

// ── Event groups ───────────────────────────────────────────────

/// Backend module category an action is routed to over the message bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventGroup {
    General,
    Certificates,
    Configuration,
    EVDriver,
    Monitoring,
    Reporting,
    SmartCharging,
    Transactions,
}

impl EventGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Certificates => "Certificates",
            Self::Configuration => "Configuration",
            Self::EVDriver => "EVDriver",
            Self::Monitoring => "Monitoring",
            Self::Reporting => "Reporting",
            Self::SmartCharging => "SmartCharging",
            Self::Transactions => "Transactions",
        }
    }

    /// Routing table from action name to owning module.
    pub fn for_action(action: &str) -> Self {
        match action {
            "Get15118EVCertificate" | "GetCertificateStatus" | "SignCertificate"
            | "CertificateSigned" | "DeleteCertificate" | "GetInstalledCertificateIds"
            | "InstallCertificate" => Self::Certificates,

            "BootNotification" | "Heartbeat" | "FirmwareStatusNotification"
            | "SignedFirmwareStatusNotification" | "PublishFirmwareStatusNotification"
            | "DiagnosticsStatusNotification" | "NotifyDisplayMessages"
            | "ChangeAvailability" | "ChangeConfiguration" | "GetConfiguration"
            | "GetDiagnostics" | "ClearDisplayMessage" | "GetDisplayMessages"
            | "SetDisplayMessage" | "PublishFirmware" | "UnpublishFirmware" | "Reset"
            | "SetNetworkProfile" | "TriggerMessage" | "ExtendedTriggerMessage"
            | "UpdateFirmware" | "SignedUpdateFirmware" => Self::Configuration,

            "Authorize" | "ReservationStatusUpdate" | "CancelReservation" | "ClearCache"
            | "GetLocalListVersion" | "RequestStartTransaction" | "RequestStopTransaction"
            | "RemoteStartTransaction" | "RemoteStopTransaction" | "ReserveNow"
            | "SendLocalList" | "UnlockConnector" => Self::EVDriver,

            "NotifyEvent" | "ClearVariableMonitoring" | "GetVariables" | "SetMonitoringBase"
            | "SetMonitoringLevel" | "SetVariableMonitoring" | "SetVariables" => {
                Self::Monitoring
            }

            "LogStatusNotification" | "NotifyCustomerInformation" | "NotifyMonitoringReport"
            | "NotifyReport" | "SecurityEventNotification" | "CustomerInformation"
            | "GetBaseReport" | "GetLog" | "GetMonitoringReport" | "GetReport" => {
                Self::Reporting
            }

            "ClearedChargingLimit" | "NotifyChargingLimit" | "NotifyEVChargingNeeds"
            | "NotifyEVChargingSchedule" | "ReportChargingProfiles" | "ClearChargingProfile"
            | "GetChargingProfiles" | "GetCompositeSchedule" | "SetChargingProfile" => {
                Self::SmartCharging
            }

            "MeterValues" | "StatusNotification" | "TransactionEvent" | "StartTransaction"
            | "StopTransaction" | "GetTransactionStatus" | "CostUpdated" => Self::Transactions,

            _ => Self::General,
        }
    }
}

impl fmt::Display for EventGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
