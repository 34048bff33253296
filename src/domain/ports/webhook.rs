//! Webhook and callback-URL ports
//!
//! Both are best effort: the router logs their errors and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::error::WebhookError;
use crate::domain::identifier::StationIdentifier;
use crate::domain::ocpp::OcppVersion;

#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// Activate the station's subscriptions and announce the connection.
    async fn register(&self, identifier: &StationIdentifier) -> Result<(), WebhookError>;

    /// Announce the disconnect and deactivate the station's subscriptions.
    async fn deregister(&self, identifier: &StationIdentifier) -> Result<(), WebhookError>;

    /// A frame received from the station. `rpc` is the parsed frame when it
    /// could be parsed.
    async fn dispatch_message_received(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
        rpc: Option<&Value>,
    ) -> Result<(), WebhookError>;

    /// A frame that could not even be parsed as JSON.
    async fn dispatch_message_received_unparsed(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> Result<(), WebhookError>;

    /// A frame written to the station.
    async fn dispatch_message_sent(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
        rpc: Option<&Value>,
    ) -> Result<(), WebhookError>;
}

/// POSTs a JSON body to a caller-supplied callback URL.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, url: &str, body: &Value) -> Result<(), WebhookError>;
}
