//! OCPP protocol version
//!
//! Defines the protocol versions the router can terminate.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error_code::ErrorCode;

/// Supported OCPP protocol versions.
///
/// Serialized as the WebSocket subprotocol string so the same value works in
/// config files, bus messages and the `Sec-WebSocket-Protocol` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    #[serde(rename = "ocpp1.6")]
    V16,
    /// OCPP 2.0.1
    #[serde(rename = "ocpp2.0.1")]
    V201,
}

impl OcppVersion {
    /// WebSocket subprotocol identifier for this OCPP version.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
        }
    }

    /// Parse an OCPP version from a WebSocket subprotocol string.
    pub fn from_subprotocol(s: &str) -> Option<Self> {
        match s.trim() {
            "ocpp1.6" => Some(Self::V16),
            "ocpp2.0.1" => Some(Self::V201),
            _ => None,
        }
    }

    /// All supported OCPP versions, ordered from newest to oldest.
    pub const ALL: &'static [OcppVersion] = &[Self::V201, Self::V16];

    /// Human-readable version string.
    pub fn version_string(&self) -> &'static str {
        match self {
            Self::V16 => "1.6",
            Self::V201 => "2.0.1",
        }
    }

    /// Error code used when a frame cannot be understood.
    ///
    /// OCPP 1.6 spells it `FormationViolation`, 2.x renamed it to
    /// `FormatViolation`.
    pub fn format_violation(&self) -> ErrorCode {
        match self {
            Self::V16 => ErrorCode::FormationViolation,
            Self::V201 => ErrorCode::FormatViolation,
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.version_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocol_round_trip() {
        for v in OcppVersion::ALL {
            assert_eq!(OcppVersion::from_subprotocol(v.subprotocol()), Some(*v));
        }
        assert_eq!(OcppVersion::from_subprotocol("ocpp2.1"), None);
    }

    #[test]
    fn serde_uses_subprotocol_names() {
        let json = serde_json::to_string(&OcppVersion::V201).unwrap();
        assert_eq!(json, "\"ocpp2.0.1\"");
        let v: OcppVersion = serde_json::from_str("\"ocpp1.6\"").unwrap();
        assert_eq!(v, OcppVersion::V16);
    }

    #[test]
    fn format_violation_depends_on_version() {
        assert_eq!(OcppVersion::V16.format_violation(), ErrorCode::FormationViolation);
        assert_eq!(OcppVersion::V201.format_violation(), ErrorCode::FormatViolation);
    }
}
