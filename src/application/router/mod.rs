//! Protocol router
//!
//! Owns OCPP-J framing, per-station call correlation and forwarding between
//! station sockets and the message bus.
//!
//! - `inbound`: frames received from a station (`on_message`)
//! - `outbound`: frames sent to a station (`OcppSender`), including module
//!   traffic arriving over the bus
//! - `validator`: payload schema checks
//!
//! The correlation cache is the only shared state. Every pending call lives
//! in the `Transactions` namespace under the station identifier as
//! `"{action}:{correlation_id}"`, reserved with set-if-not-exists so at most
//! one call per station is in flight in either direction.

mod inbound;
mod outbound;
pub mod validator;


use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    Cache, CallbackNotifier, MessageReceiver, MessageSender, NetworkConnection, StationRepository,
    SubscriptionFilter, WebhookDispatcher,
};
use crate::domain::{BusError, NetworkError, OcppError, OcppVersion, StationIdentifier};
use crate::shared::OcppFrame;

pub use validator::{PayloadKind, SchemaValidator};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// TTL of a pending-call slot; the only call timeout.
    pub max_call_length: Duration,
    /// TTL of callback-URL registrations.
    pub max_caching: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_call_length: Duration::from_secs(5),
            max_caching: Duration::from_secs(10),
        }
    }
}

/// The ports the router is composed from.
#[derive(Clone)]
pub struct RouterPorts {
    pub cache: Arc<dyn Cache>,
    pub sender: Arc<dyn MessageSender>,
    pub receiver: Arc<dyn MessageReceiver>,
    pub webhooks: Arc<dyn WebhookDispatcher>,
    pub callbacks: Arc<dyn CallbackNotifier>,
    pub stations: Arc<dyn StationRepository>,
    /// Writes frames to the live socket of a station.
    pub network: Arc<dyn NetworkConnection>,
}

pub struct MessageRouter {
    config: RouterConfig,
    cache: Arc<dyn Cache>,
    sender: Arc<dyn MessageSender>,
    receiver: Arc<dyn MessageReceiver>,
    webhooks: Arc<dyn WebhookDispatcher>,
    callbacks: Arc<dyn CallbackNotifier>,
    stations: Arc<dyn StationRepository>,
    network: Arc<dyn NetworkConnection>,
    validator: SchemaValidator,
}

impl MessageRouter {
    pub fn new(config: RouterConfig, ports: RouterPorts) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache: ports.cache,
            sender: ports.sender,
            receiver: ports.receiver,
            webhooks: ports.webhooks,
            callbacks: ports.callbacks,
            stations: ports.stations,
            network: ports.network,
            validator: SchemaValidator::new(),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn subscription_id(identifier: &StationIdentifier) -> String {
        format!("router:{identifier}")
    }

    /// Subscribe to module traffic for the station, then mark it online and
    /// activate its webhooks. The socket must not be read before this
    /// returns `Ok`.
    pub async fn register_connection(
        self: &Arc<Self>,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
    ) -> Result<(), BusError> {
        self.receiver
            .subscribe(
                &Self::subscription_id(identifier),
                SubscriptionFilter::for_station(identifier),
                self.clone(),
            )
            .await?;

        if let Err(e) = self
            .stations
            .set_station_online(identifier, true, Some(protocol))
            .await
        {
            warn!(station_id = %identifier, error = %e, "Failed to mark station online");
        }
        if let Err(e) = self.webhooks.register(identifier).await {
            warn!(station_id = %identifier, error = %e, "Webhook registration failed");
        }

        info!(station_id = %identifier, %protocol, "Connection registered");
        Ok(())
    }

    /// Undo `register_connection`. Every step is best effort, so this never
    /// fails and is safe to call more than once.
    pub async fn deregister_connection(&self, identifier: &StationIdentifier) {
        match self.stations.read_station(identifier).await {
            Ok(Some(station)) => {
                debug!(station_id = %identifier, was_online = station.is_online, "Deregistering station")
            }
            Ok(None) => debug!(station_id = %identifier, "Deregistering unknown station"),
            Err(e) => warn!(station_id = %identifier, error = %e, "Station lookup failed during teardown"),
        }

        if let Err(e) = self.stations.set_station_online(identifier, false, None).await {
            warn!(station_id = %identifier, error = %e, "Failed to mark station offline");
        }
        if let Err(e) = self.webhooks.deregister(identifier).await {
            warn!(station_id = %identifier, error = %e, "Webhook deregistration failed");
        }
        if let Err(e) = self.receiver.unsubscribe(&Self::subscription_id(identifier)).await {
            warn!(station_id = %identifier, error = %e, "Bus unsubscribe failed");
        }

        info!(station_id = %identifier, "Connection deregistered");
    }

    /// Serialize and write a frame, then report it to the webhooks.
    async fn write_frame(
        &self,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        frame: &OcppFrame,
    ) -> Result<(), NetworkError> {
        let value = frame.to_value();
        let text = value.to_string();
        self.network.send_message(identifier, text.clone()).await?;

        metrics::counter!("ocpp_messages_sent_total", "message_type" => frame.message_type().as_str())
            .increment(1);
        if let OcppFrame::CallError { error_code, .. } = frame {
            metrics::counter!("ocpp_call_errors_total", "code" => error_code.clone()).increment(1);
        }

        self.dispatch_sent(identifier, &text, protocol, Some(&value)).await;
        Ok(())
    }

    async fn dispatch_sent(
        &self,
        identifier: &StationIdentifier,
        text: &str,
        protocol: OcppVersion,
        rpc: Option<&Value>,
    ) {
        if let Err(e) = self
            .webhooks
            .dispatch_message_sent(identifier, text, Utc::now(), protocol, rpc)
            .await
        {
            warn!(station_id = %identifier, error = %e, "Sent-message webhook failed");
        }
    }

    /// Answer a station Call with a CallError without touching the
    /// pending-call slot. Used for rejections raised before reservation.
    async fn reject_call(
        &self,
        identifier: &StationIdentifier,
        protocol: OcppVersion,
        unique_id: &str,
        error: &OcppError,
    ) {
        warn!(
            station_id = %identifier,
            message_id = unique_id,
            code = %error.code,
            description = %error.description,
            "Rejecting call"
        );
        let frame = OcppFrame::from_error(unique_id, error);
        if let Err(e) = self.write_frame(identifier, protocol, &frame).await {
            warn!(station_id = %identifier, error = %e, "Failed to deliver CallError");
        }
    }
}

/// Value stored in a pending-call slot.
pub(crate) fn pending_record(action: &str, correlation_id: &str) -> String {
    format!("{action}:{correlation_id}")
}

/// Split a pending-call record on the first `:` into action and
/// correlation id. Correlation ids may contain further colons.
pub(crate) fn parse_pending_record(record: &str) -> Option<(&str, &str)> {
    record.split_once(':')
}
