//! Backend modules
//!
//! A module owns a set of OCPP actions. It registers one [`ActionHandler`]
//! per `(protocol, action, state)` in a [`HandlerRegistry`] and a
//! [`ModuleDispatcher`] connects that registry to the message bus: station
//! Calls are answered through the bus, station responses reach the handler
//! registered for them and the caller's callback URL.

pub mod provisioning;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::ports::cache::namespace;
use crate::domain::ports::{
    Cache, CallbackNotifier, MessageHandler, MessageReceiver, MessageSender, OcppSender,
    OutboundCall, SubscriptionFilter,
};
use crate::domain::{
    BusError, BusMessage, BusPayload, ErrorCode, EventGroup, MessageConfirmation, MessageOrigin,
    MessageState, OcppError, OcppVersion, RetryMessageError, StationIdentifier,
};
use crate::shared::{retry_with_backoff, RetryConfig};

pub use provisioning::ProvisioningModule;

/// What a handler knows about the message it is processing.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub identifier: StationIdentifier,
    pub correlation_id: String,
    pub protocol: OcppVersion,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// For requests the returned value is the CallResult payload. For
    /// responses it is ignored.
    async fn handle(&self, ctx: &HandlerContext, payload: Value) -> Result<Value, OcppError>;
}

type HandlerKey = (OcppVersion, String, MessageState);

/// Explicit `(protocol, action, state)` → handler table, built when the
/// module is constructed.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        protocol: OcppVersion,
        action: &str,
        state: MessageState,
        handler: Arc<dyn ActionHandler>,
    ) -> &mut Self {
        self.handlers
            .insert((protocol, action.to_string(), state), handler);
        self
    }

    pub fn get(
        &self,
        protocol: OcppVersion,
        action: &str,
        state: MessageState,
    ) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(&(protocol, action.to_string(), state))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Every action with at least one handler, sorted.
    pub fn actions(&self) -> Vec<String> {
        self.handlers
            .keys()
            .map(|(_, action, _)| action.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Event groups the registered actions belong to.
    pub fn event_groups(&self) -> Vec<EventGroup> {
        let mut groups: Vec<EventGroup> = Vec::new();
        for action in self.actions() {
            let group = EventGroup::for_action(&action);
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups
    }
}

/// Bus endpoint of one module.
pub struct ModuleDispatcher {
    name: String,
    registry: HandlerRegistry,
    sender: Arc<dyn MessageSender>,
    cache: Arc<dyn Cache>,
    callbacks: Arc<dyn CallbackNotifier>,
}

impl ModuleDispatcher {
    pub fn new(
        name: impl Into<String>,
        registry: HandlerRegistry,
        sender: Arc<dyn MessageSender>,
        cache: Arc<dyn Cache>,
        callbacks: Arc<dyn CallbackNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            registry,
            sender,
            cache,
            callbacks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn subscription_id(&self) -> String {
        format!("module:{}", self.name)
    }

    /// Station traffic for the module's actions.
    pub fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            origin: Some(MessageOrigin::ChargingStation),
            event_groups: Some(self.registry.event_groups()),
            actions: Some(self.registry.actions()),
            ..Default::default()
        }
    }

    pub async fn subscribe(self: &Arc<Self>, receiver: &dyn MessageReceiver) -> Result<(), BusError> {
        receiver
            .subscribe(&self.subscription_id(), self.filter(), self.clone())
            .await?;
        info!(
            module = %self.name,
            handlers = self.registry.len(),
            groups = ?self.registry.event_groups(),
            "Module subscribed"
        );
        Ok(())
    }

    pub async fn unsubscribe(&self, receiver: &dyn MessageReceiver) -> Result<bool, BusError> {
        receiver.unsubscribe(&self.subscription_id()).await
    }

    async fn answer_call(&self, ctx: &HandlerContext, action: &str, payload: Value) {
        let reply = match self.registry.get(ctx.protocol, action, MessageState::Request) {
            Some(handler) => match handler.handle(ctx, payload).await {
                Ok(body) => BusPayload::Response(body),
                Err(e) => {
                    warn!(module = %self.name, station_id = %ctx.identifier, action, error = %e, "Handler failed");
                    BusPayload::Error(e.into())
                }
            },
            None => BusPayload::Error(
                OcppError::new(
                    ErrorCode::NotImplemented,
                    format!("No {} handler for {action}", ctx.protocol),
                )
                .into(),
            ),
        };

        let message = BusMessage::to_station(
            &ctx.identifier,
            &ctx.correlation_id,
            action,
            ctx.protocol,
            reply,
        );
        match self.sender.send(message).await {
            Ok(confirmation) if confirmation.success => {
                debug!(module = %self.name, station_id = %ctx.identifier, action, "Reply published")
            }
            Ok(confirmation) => {
                warn!(module = %self.name, station_id = %ctx.identifier, action, payload = ?confirmation.payload, "Reply rejected by bus")
            }
            Err(e) => {
                warn!(module = %self.name, station_id = %ctx.identifier, action, error = %e, "Reply not published")
            }
        }
    }

    async fn accept_response(&self, ctx: &HandlerContext, action: &str, payload: Value) {
        if let Some(handler) = self.registry.get(ctx.protocol, action, MessageState::Response) {
            if let Err(e) = handler.handle(ctx, payload.clone()).await {
                warn!(module = %self.name, station_id = %ctx.identifier, action, error = %e, "Response handler failed");
            }
        }

        let url = match self
            .cache
            .get(&ctx.correlation_id, namespace::CALLBACK_URL)
            .await
        {
            Ok(Some(url)) => url,
            Ok(None) => return,
            Err(e) => {
                warn!(message_id = %ctx.correlation_id, error = %e, "Callback lookup failed");
                return;
            }
        };
        if let Err(e) = self.callbacks.notify(&url, &payload).await {
            warn!(message_id = %ctx.correlation_id, error = %e, "Callback delivery failed");
        }
    }
}

#[async_trait]
impl MessageHandler for ModuleDispatcher {
    async fn handle(&self, message: BusMessage) {
        let ctx = HandlerContext {
            identifier: message.identifier(),
            correlation_id: message.context.correlation_id.clone(),
            protocol: message.protocol,
            timestamp: message.context.timestamp,
        };
        match message.payload {
            BusPayload::Request(payload) => self.answer_call(&ctx, &message.action, payload).await,
            BusPayload::Response(payload) => {
                self.accept_response(&ctx, &message.action, payload).await
            }
            // Either the station's CallError, already posted to the callback
            // URL by the router, or the router refusing to send our Call.
            BusPayload::Error(error) => {
                let retryable = error
                    .error_details
                    .get("retryable")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                info!(
                    module = %self.name,
                    station_id = %ctx.identifier,
                    message_id = %ctx.correlation_id,
                    action = %message.action,
                    code = %error.error_code,
                    retryable,
                    "Call failed"
                );
            }
        }
    }
}

/// `send_call`, retried with backoff while the station is busy.
pub async fn send_call_with_retry(
    sender: &dyn OcppSender,
    call: OutboundCall,
    config: &RetryConfig,
) -> Result<MessageConfirmation, RetryMessageError> {
    let name = format!("send_call:{}", call.action);
    retry_with_backoff(
        config,
        || sender.send_call(call.clone()),
        |_: &RetryMessageError| true,
        &name,
    )
    .await
}
