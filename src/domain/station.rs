//! Station-side records the router reads and writes through its ports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::StationIdentifier;
use super::ocpp::OcppVersion;

/// Device-model component holding the Basic-Auth password.
pub const SECURITY_CTRLR: &str = "SecurityCtrlr";
/// Device-model variable holding the Basic-Auth password.
pub const BASIC_AUTH_PASSWORD: &str = "BasicAuthPassword";

/// Persisted registration state of a charging station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub identifier: StationIdentifier,
    pub is_online: bool,
    pub protocol: Option<OcppVersion>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Station {
    pub fn new(identifier: StationIdentifier) -> Self {
        Self {
            identifier,
            is_online: false,
            protocol: None,
            last_seen: None,
        }
    }
}

/// Outcome recorded for a device-model value the CSMS tried to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeStatus {
    Accepted,
    Rejected,
    RebootRequired,
    UnknownComponent,
    UnknownVariable,
}

/// One stored value of a device-model variable.
///
/// Repositories keep the history; the newest non-rejected entry is the one
/// the station actually runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableAttribute {
    pub component: String,
    pub variable: String,
    pub value: Option<String>,
    pub status: AttributeStatus,
    pub updated_at: DateTime<Utc>,
}

/// Live socket bookkeeping kept in the cache's `Connections` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub identifier: StationIdentifier,
    pub connection_id: String,
    pub ip: String,
    pub port: u16,
    pub is_alive: bool,
}
