//! In-process message bus
//!
//! Delivers every published [`BusMessage`] to each subscription whose filter
//! matches, on its own task. Publishing fails fast while the circuit breaker
//! is not closed. A message no subscription matches is not confirmed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::application::circuit_breaker::{CircuitBreaker, Reconnect, ReconnectError};
use crate::domain::ports::{MessageHandler, MessageReceiver, MessageSender, SubscriptionFilter};
use crate::domain::{BusError, BusMessage, MessageConfirmation};

struct Subscription {
    filter: SubscriptionFilter,
    handler: Arc<dyn MessageHandler>,
}

pub struct LocalMessageBus {
    subscriptions: DashMap<String, Subscription>,
    link_up: AtomicBool,
    breaker: Arc<CircuitBreaker>,
}

impl LocalMessageBus {
    /// Build the bus and register it as the breaker's reconnect target.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        let bus = Arc::new(Self {
            subscriptions: DashMap::new(),
            link_up: AtomicBool::new(true),
            breaker,
        });
        let target: Arc<dyn Reconnect> = bus.clone();
        bus.breaker.attach(Arc::downgrade(&target));
        bus
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Take the link down. Publishing fails until [`reopen`](Self::reopen).
    pub fn close(&self, reason: &str) {
        if self.link_up.swap(false, Ordering::SeqCst) {
            info!(reason, "Message bus link closed");
            self.breaker.trigger_failure(reason);
        }
    }

    pub fn reopen(&self) {
        if !self.link_up.swap(true, Ordering::SeqCst) {
            info!("Message bus link reopened");
        }
    }
}

#[async_trait]
impl MessageSender for LocalMessageBus {
    async fn send(&self, message: BusMessage) -> Result<MessageConfirmation, BusError> {
        if !self.breaker.is_closed() {
            return Err(BusError::Unavailable(format!(
                "circuit breaker is {}",
                self.breaker.state()
            )));
        }
        if !self.link_up.load(Ordering::SeqCst) {
            self.breaker.trigger_failure("publish on closed link");
            return Err(BusError::Unavailable("link is down".into()));
        }

        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subscriptions
            .iter()
            .filter(|s| s.filter.matches(&message))
            .map(|s| s.handler.clone())
            .collect();

        if handlers.is_empty() {
            debug!(
                action = %message.action,
                event_group = %message.event_group,
                station_id = %message.context.station_id,
                "No subscriber for bus message"
            );
            return Ok(MessageConfirmation::failed(format!(
                "no subscriber for {}",
                message.action
            )));
        }

        for handler in handlers {
            let message = message.clone();
            tokio::spawn(async move { handler.handle(message).await });
        }
        Ok(MessageConfirmation::ok())
    }
}

#[async_trait]
impl MessageReceiver for LocalMessageBus {
    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: SubscriptionFilter,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(BusError::Subscription(format!(
                "{subscription_id}: link is down"
            )));
        }
        if self
            .subscriptions
            .insert(subscription_id.to_string(), Subscription { filter, handler })
            .is_some()
        {
            warn!(subscription_id, "Replaced existing subscription");
        }
        debug!(subscription_id, total = self.subscriptions.len(), "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<bool, BusError> {
        let removed = self.subscriptions.remove(subscription_id).is_some();
        debug!(subscription_id, removed, "Unsubscribed");
        Ok(removed)
    }
}

#[async_trait]
impl Reconnect for LocalMessageBus {
    async fn reconnect(&self) -> Result<(), ReconnectError> {
        if self.link_up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReconnectError::Transient("link is down".into()))
        }
    }
}
