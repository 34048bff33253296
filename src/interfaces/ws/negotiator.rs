//! OCPP subprotocol negotiation
//!
//! The station lists the subprotocols it speaks in `Sec-WebSocket-Protocol`.
//! A gateway endpoint accepts the versions it is configured for, preferring
//! the first one, and rejects the upgrade when there is no overlap.

use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::HeaderMap;

use crate::domain::OcppVersion;

pub struct ProtocolNegotiator {
    /// In preference order.
    supported_versions: Vec<OcppVersion>,
}

impl ProtocolNegotiator {
    pub fn new(supported_versions: Vec<OcppVersion>) -> Self {
        Self { supported_versions }
    }

    pub fn single(version: OcppVersion) -> Self {
        Self::new(vec![version])
    }

    /// Pick a version from a comma-separated subprotocol list.
    pub fn negotiate(&self, requested_protocols: &str) -> Option<OcppVersion> {
        let requested: Vec<&str> = requested_protocols.split(',').map(str::trim).collect();
        self.supported_versions
            .iter()
            .copied()
            .find(|version| requested.contains(&version.subprotocol()))
    }

    pub fn negotiate_headers(&self, headers: &HeaderMap) -> Option<OcppVersion> {
        let requested = headers
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        self.negotiate(&requested)
    }

    pub fn supported_subprotocols(&self) -> Vec<&'static str> {
        self.supported_versions.iter().map(|v| v.subprotocol()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn negotiate_single_match() {
        let negotiator = ProtocolNegotiator::single(OcppVersion::V16);
        assert_eq!(negotiator.negotiate("ocpp1.6"), Some(OcppVersion::V16));
        assert_eq!(negotiator.negotiate("ocpp2.0.1, ocpp1.6"), Some(OcppVersion::V16));
    }

    #[test]
    fn negotiate_prefers_first_configured() {
        let negotiator = ProtocolNegotiator::new(vec![OcppVersion::V201, OcppVersion::V16]);
        assert_eq!(negotiator.negotiate("ocpp1.6, ocpp2.0.1"), Some(OcppVersion::V201));
    }

    #[test]
    fn negotiate_no_match() {
        let negotiator = ProtocolNegotiator::single(OcppVersion::V16);
        assert_eq!(negotiator.negotiate("ocpp2.0.1"), None);
        assert_eq!(negotiator.negotiate(""), None);
        assert_eq!(negotiator.negotiate("ocpp1.6j"), None);
    }

    #[test]
    fn negotiate_from_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("ocpp1.5"));
        headers.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("ocpp2.0.1"));
        let negotiator = ProtocolNegotiator::single(OcppVersion::V201);
        assert_eq!(negotiator.negotiate_headers(&headers), Some(OcppVersion::V201));
        assert_eq!(negotiator.supported_subprotocols(), vec!["ocpp2.0.1"]);
    }
}
