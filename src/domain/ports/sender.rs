//! Send contract the router exposes to backend modules
//!
//! None of these operations retry internally. `send_call` reports a busy
//! station as [`RetryMessageError`]; every other failure comes back as a
//! `success = false` confirmation.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::{OcppError, RetryMessageError};
use crate::domain::identifier::StationIdentifier;
use crate::domain::message::MessageConfirmation;
use crate::domain::ocpp::OcppVersion;

/// A CSMS-initiated Call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub identifier: StationIdentifier,
    pub protocol: OcppVersion,
    pub action: String,
    pub payload: Value,
    /// Generated when absent.
    pub correlation_id: Option<String>,
    /// Notified with the station's answer.
    pub callback_url: Option<String>,
}

impl OutboundCall {
    pub fn new(
        identifier: StationIdentifier,
        protocol: OcppVersion,
        action: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            identifier,
            protocol,
            action: action.into(),
            payload,
            correlation_id: None,
            callback_url: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

#[async_trait]
pub trait OcppSender: Send + Sync {
    async fn send_call(&self, call: OutboundCall)
        -> Result<MessageConfirmation, RetryMessageError>;

    async fn send_call_result(
        &self,
        correlation_id: &str,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        action: &str,
        payload: Value,
    ) -> MessageConfirmation;

    async fn send_call_error(
        &self,
        correlation_id: &str,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        action: &str,
        error: OcppError,
    ) -> MessageConfirmation;
}
