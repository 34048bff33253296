//! Message bus ports
//!
//! Decouple the router from individual backend modules: the router publishes
//! station traffic through a [`MessageSender`] and receives module traffic for
//! its stations through a [`MessageReceiver`] subscription.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::BusError;
use crate::domain::identifier::StationIdentifier;
use crate::domain::message::{BusMessage, MessageConfirmation, MessageOrigin, MessageState};
use crate::domain::ocpp::EventGroup;

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: BusMessage) -> Result<MessageConfirmation, BusError>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BusMessage);
}

#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Register `handler` under `subscription_id`, replacing any previous
    /// subscription with the same id.
    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: SubscriptionFilter,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError>;

    /// Returns `true` if a subscription was removed.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<bool, BusError>;
}

/// Conjunction of optional criteria; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionFilter {
    pub origin: Option<MessageOrigin>,
    pub state: Option<MessageState>,
    pub station: Option<StationIdentifier>,
    pub event_groups: Option<Vec<EventGroup>>,
    pub actions: Option<Vec<String>>,
}

impl SubscriptionFilter {
    /// Module traffic addressed to one station.
    pub fn for_station(identifier: &StationIdentifier) -> Self {
        Self {
            origin: Some(MessageOrigin::ChargingStationManagementSystem),
            station: Some(identifier.clone()),
            ..Default::default()
        }
    }

    pub fn matches(&self, message: &BusMessage) -> bool {
        if self.origin.is_some_and(|o| o != message.origin) {
            return false;
        }
        if self.state.is_some_and(|s| s != message.state()) {
            return false;
        }
        if let Some(ref station) = self.station {
            if station.tenant_id != message.context.tenant_id
                || station.station_id != message.context.station_id
            {
                return false;
            }
        }
        if let Some(ref groups) = self.event_groups {
            if !groups.contains(&message.event_group) {
                return false;
            }
        }
        if let Some(ref actions) = self.actions {
            if !actions.iter().any(|a| a == &message.action) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::BusPayload;
    use crate::domain::ocpp::OcppVersion;
    use chrono::Utc;
    use serde_json::json;

    fn station_call(action: &str) -> BusMessage {
        BusMessage::from_station(
            &StationIdentifier::new(1, "CS1"),
            "m1",
            action,
            OcppVersion::V201,
            Utc::now(),
            BusPayload::Request(json!({})),
        )
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(SubscriptionFilter::default().matches(&station_call("Heartbeat")));
    }

    #[test]
    fn station_filter_ignores_station_origin() {
        let filter = SubscriptionFilter::for_station(&StationIdentifier::new(1, "CS1"));
        assert!(!filter.matches(&station_call("Heartbeat")));
    }

    #[test]
    fn action_and_group_filters() {
        let filter = SubscriptionFilter {
            event_groups: Some(vec![EventGroup::Configuration]),
            actions: Some(vec!["Heartbeat".into()]),
            ..Default::default()
        };
        assert!(filter.matches(&station_call("Heartbeat")));
        assert!(!filter.matches(&station_call("BootNotification")));
        assert!(!filter.matches(&station_call("MeterValues")));
    }
}
