//! Domain errors
//!
//! One error enum per port, plus the two protocol-level signals the router
//! hands to its callers: [`OcppError`] (becomes a CallError frame) and
//! [`RetryMessageError`] (the station already has a call in flight).

use serde_json::Value;
use thiserror::Error;

use super::identifier::StationIdentifier;
use super::ocpp::ErrorCode;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription failed: {0}")]
    Subscription(String),
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Delivery to {url} failed: {reason}")]
    Delivery { url: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Station {0} is not connected")]
    NotConnected(StationIdentifier),

    #[error("Failed to write to station {identifier}: {reason}")]
    SendFailed {
        identifier: StationIdentifier,
        reason: String,
    },
}

/// A protocol violation reported to the peer as a CallError.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct OcppError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl OcppError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Raised by `send_call` when the station's pending-call slot is taken.
///
/// Callers are expected to retry later; every other outbound failure is
/// terminal and reported through a `success = false` confirmation instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot send {action} to {identifier}: a call is already in progress")]
pub struct RetryMessageError {
    pub identifier: StationIdentifier,
    pub action: String,
}
