//! HTTP webhook dispatcher
//!
//! Subscriptions come from configuration. A subscription is active for a
//! station between `register` and `deregister`; while active it receives
//! `connected` / `closed` lifecycle events and, optionally, every message in
//! either direction whose raw text matches its `message_filter`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::build_client;
use crate::domain::ports::WebhookDispatcher;
use crate::domain::{MessageOrigin, OcppVersion, StationIdentifier, WebhookError};

/// One configured webhook endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookSubscription {
    pub url: String,
    /// Restrict to one tenant. `None` matches every tenant.
    #[serde(default)]
    pub tenant_id: Option<i32>,
    /// Restrict to one station. `None` matches every station.
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub on_connect: bool,
    #[serde(default)]
    pub on_close: bool,
    #[serde(default)]
    pub on_message: bool,
    #[serde(default)]
    pub sent_message: bool,
    /// Regex applied to the raw message text.
    #[serde(default)]
    pub message_filter: Option<String>,
}

impl WebhookSubscription {
    fn applies_to(&self, identifier: &StationIdentifier) -> bool {
        self.tenant_id.map_or(true, |t| t == identifier.tenant_id)
            && self
                .station_id
                .as_deref()
                .map_or(true, |s| s == identifier.station_id)
    }
}

#[derive(Debug, Error)]
pub enum WebhookConfigError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid message_filter for {url}: {source}")]
    Filter {
        url: String,
        #[source]
        source: regex::Error,
    },
}

struct CompiledSubscription {
    config: WebhookSubscription,
    filter: Option<Regex>,
}

impl CompiledSubscription {
    fn accepts(&self, message: &str) -> bool {
        self.filter.as_ref().map_or(true, |re| re.is_match(message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum EventKind {
    Connected,
    Closed,
    Message,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent<'a> {
    event: EventKind,
    station_id: &'a str,
    tenant_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<MessageOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<OcppVersion>,
    info: Value,
}

pub struct HttpWebhookDispatcher {
    client: Client,
    subscriptions: Vec<CompiledSubscription>,
    /// Indices into `subscriptions`, per registered station.
    active: DashMap<StationIdentifier, Vec<usize>>,
}

impl HttpWebhookDispatcher {
    pub fn new(
        subscriptions: Vec<WebhookSubscription>,
        timeout: Duration,
    ) -> Result<Self, WebhookConfigError> {
        let compiled = subscriptions
            .into_iter()
            .map(|config| {
                let filter = config
                    .message_filter
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|source| WebhookConfigError::Filter {
                        url: config.url.clone(),
                        source,
                    })?;
                Ok(CompiledSubscription { config, filter })
            })
            .collect::<Result<Vec<_>, WebhookConfigError>>()?;

        Ok(Self {
            client: build_client(timeout)?,
            subscriptions: compiled,
            active: DashMap::new(),
        })
    }

    pub fn is_registered(&self, identifier: &StationIdentifier) -> bool {
        self.active.contains_key(identifier)
    }

    fn active_for(
        &self,
        identifier: &StationIdentifier,
        select: impl Fn(&CompiledSubscription) -> bool,
    ) -> Vec<String> {
        self.active
            .get(identifier)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| self.subscriptions.get(i))
                    .filter(|s| select(s))
                    .map(|s| s.config.url.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn post_all(&self, urls: Vec<String>, event: &WebhookEvent<'_>) -> Result<(), WebhookError> {
        if urls.is_empty() {
            return Ok(());
        }
        let results = join_all(urls.iter().map(|url| post_json(&self.client, url, event))).await;
        // Every endpoint is attempted; the first failure is reported.
        results.into_iter().collect::<Result<Vec<_>, _>>().map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_message(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
        origin: MessageOrigin,
        info: Value,
        select: impl Fn(&WebhookSubscription) -> bool,
    ) -> Result<(), WebhookError> {
        let urls = self.active_for(identifier, |s| select(&s.config) && s.accepts(message));
        let event = WebhookEvent {
            event: EventKind::Message,
            station_id: &identifier.station_id,
            tenant_id: identifier.tenant_id,
            origin: Some(origin),
            message: Some(message),
            timestamp,
            protocol: Some(protocol),
            info,
        };
        self.post_all(urls, &event).await
    }
}

pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &T,
) -> Result<(), WebhookError> {
    let delivery_error = |reason: String| WebhookError::Delivery {
        url: url.to_string(),
        reason,
    };
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| delivery_error(e.to_string()))?;
    response
        .error_for_status()
        .map_err(|e| delivery_error(e.to_string()))?;
    debug!(url, "Webhook delivered");
    Ok(())
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn register(&self, identifier: &StationIdentifier) -> Result<(), WebhookError> {
        let indices: Vec<usize> = self
            .subscriptions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.config.applies_to(identifier))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Ok(());
        }
        self.active.insert(identifier.clone(), indices);

        let urls = self.active_for(identifier, |s| s.config.on_connect);
        let event = WebhookEvent {
            event: EventKind::Connected,
            station_id: &identifier.station_id,
            tenant_id: identifier.tenant_id,
            origin: None,
            message: None,
            timestamp: Utc::now(),
            protocol: None,
            info: Value::Object(Default::default()),
        };
        self.post_all(urls, &event).await
    }

    async fn deregister(&self, identifier: &StationIdentifier) -> Result<(), WebhookError> {
        let urls = self.active_for(identifier, |s| s.config.on_close);
        if self.active.remove(identifier).is_none() {
            return Ok(());
        }
        let event = WebhookEvent {
            event: EventKind::Closed,
            station_id: &identifier.station_id,
            tenant_id: identifier.tenant_id,
            origin: None,
            message: None,
            timestamp: Utc::now(),
            protocol: None,
            info: Value::Object(Default::default()),
        };
        self.post_all(urls, &event).await
    }

    async fn dispatch_message_received(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
        rpc: Option<&Value>,
    ) -> Result<(), WebhookError> {
        let info = serde_json::json!({ "parsed": rpc.is_some(), "rpc": rpc });
        self.dispatch_message(
            identifier,
            message,
            timestamp,
            protocol,
            MessageOrigin::ChargingStation,
            info,
            |s| s.on_message,
        )
        .await
    }

    async fn dispatch_message_received_unparsed(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
    ) -> Result<(), WebhookError> {
        warn!(station_id = %identifier, "Forwarding unparsable message to webhooks");
        self.dispatch_message(
            identifier,
            message,
            timestamp,
            protocol,
            MessageOrigin::ChargingStation,
            serde_json::json!({ "parsed": false }),
            |s| s.on_message,
        )
        .await
    }

    async fn dispatch_message_sent(
        &self,
        identifier: &StationIdentifier,
        message: &str,
        timestamp: DateTime<Utc>,
        protocol: OcppVersion,
        rpc: Option<&Value>,
    ) -> Result<(), WebhookError> {
        let info = serde_json::json!({ "parsed": rpc.is_some(), "rpc": rpc });
        self.dispatch_message(
            identifier,
            message,
            timestamp,
            protocol,
            MessageOrigin::ChargingStationManagementSystem,
            info,
            |s| s.sent_message,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use tokio::sync::mpsc;

    async fn capture_server() -> (String, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let app = Router::new()
            .route(
                "/hook",
                post(|State(tx): State<mpsc::UnboundedSender<Value>>, Json(body): Json<Value>| async move {
                    let _ = tx.send(body);
                }),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/hook"), rx)
    }

    fn subscription(url: &str) -> WebhookSubscription {
        WebhookSubscription {
            url: url.to_string(),
            tenant_id: None,
            station_id: Some("CS1".into()),
            on_connect: true,
            on_close: true,
            on_message: true,
            sent_message: false,
            message_filter: Some("Heartbeat".into()),
        }
    }

    #[tokio::test]
    async fn lifecycle_and_filtered_messages() {
        let (url, mut rx) = capture_server().await;
        let dispatcher =
            HttpWebhookDispatcher::new(vec![subscription(&url)], Duration::from_secs(2)).unwrap();
        let id = StationIdentifier::new(1, "CS1");

        dispatcher.register(&id).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()["event"], "connected");

        let now = Utc::now();
        // filtered out
        dispatcher
            .dispatch_message_received(&id, r#"[2,"1","MeterValues",{}]"#, now, OcppVersion::V16, None)
            .await
            .unwrap();
        // not subscribed to sent messages
        dispatcher
            .dispatch_message_sent(&id, r#"[2,"2","Heartbeat",{}]"#, now, OcppVersion::V16, None)
            .await
            .unwrap();
        dispatcher
            .dispatch_message_received(&id, r#"[2,"3","Heartbeat",{}]"#, now, OcppVersion::V16, None)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event["event"], "message");
        assert_eq!(event["stationId"], "CS1");
        assert_eq!(event["origin"], "ChargingStation");
        assert_eq!(event["message"], r#"[2,"3","Heartbeat",{}]"#);

        dispatcher.deregister(&id).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()["event"], "closed");
        assert!(!dispatcher.is_registered(&id));
    }

    #[tokio::test]
    async fn other_stations_are_ignored() {
        let dispatcher = HttpWebhookDispatcher::new(
            vec![subscription("http://127.0.0.1:1/unreachable")],
            Duration::from_millis(200),
        )
        .unwrap();
        let other = StationIdentifier::new(1, "CS2");
        dispatcher.register(&other).await.unwrap();
        assert!(!dispatcher.is_registered(&other));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let dispatcher = HttpWebhookDispatcher::new(
            vec![subscription("http://127.0.0.1:1/unreachable")],
            Duration::from_millis(200),
        )
        .unwrap();
        let id = StationIdentifier::new(1, "CS1");
        assert!(matches!(
            dispatcher.register(&id).await,
            Err(WebhookError::Delivery { .. })
        ));
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let mut sub = subscription("http://localhost/hook");
        sub.message_filter = Some("(".into());
        assert!(matches!(
            HttpWebhookDispatcher::new(vec![sub], Duration::from_secs(1)),
            Err(WebhookConfigError::Filter { .. })
        ));
    }
}
