//! OCPP WebSocket gateway
//!
//! Accepts station connections at `ws://<host>:<port>/{station_id}`. One
//! server runs per `[[websocket]]` config entry; each has its own tenant,
//! subprotocol and security profile.
//!
//! Connection lifecycle:
//! 1. authenticate the upgrade request (401 on failure)
//! 2. negotiate the configured subprotocol (400 when not offered)
//! 3. upgrade, store the connection record, register the session
//! 4. register with the router, only then start reading frames; each text
//!    frame is routed on its own task
//! 5. on close: unregister, drop the record, deregister from the router

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::auth::StationAuthenticator;
use super::keepalive::{load_record, store_record, Keepalive};
use super::negotiator::ProtocolNegotiator;
use super::session::{Outgoing, Session, SharedSessionRegistry, CLOSE_GOING_AWAY};
use crate::application::MessageRouter;
use crate::config::WebsocketServerConfig;
use crate::domain::ports::cache::namespace;
use crate::domain::ports::Cache;
use crate::domain::{ConnectionRecord, OcppVersion, StationIdentifier};
use crate::shared::ShutdownSignal;

/// Close code used when the router cannot take the station.
const CLOSE_INTERNAL: u16 = 1011;

#[derive(Clone)]
struct GatewayState {
    config: Arc<WebsocketServerConfig>,
    negotiator: Arc<ProtocolNegotiator>,
    router: Arc<MessageRouter>,
    sessions: SharedSessionRegistry,
    cache: Arc<dyn Cache>,
    authenticator: Arc<StationAuthenticator>,
    shutdown: ShutdownSignal,
}

pub struct OcppServer {
    state: GatewayState,
}

impl OcppServer {
    pub fn new(
        config: WebsocketServerConfig,
        router: Arc<MessageRouter>,
        sessions: SharedSessionRegistry,
        cache: Arc<dyn Cache>,
        authenticator: Arc<StationAuthenticator>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let negotiator = ProtocolNegotiator::single(config.protocol);
        Self {
            state: GatewayState {
                config: Arc::new(config),
                negotiator: Arc::new(negotiator),
                router,
                sessions,
                cache,
                authenticator,
                shutdown,
            },
        }
    }

    pub fn config(&self) -> &WebsocketServerConfig {
        &self.state.config
    }

    pub fn app(&self) -> Router {
        Router::new()
            .route("/{station_id}", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.state.config.address()).await
    }

    /// Serve until the shutdown signal fires.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let config = &self.state.config;
        info!(
            server_id = %config.id,
            address = %listener.local_addr()?,
            protocol = %config.protocol,
            security_profile = config.security_profile,
            tenant_id = config.tenant_id,
            "OCPP gateway listening"
        );
        let shutdown = self.state.shutdown.notified();
        axum::serve(
            listener,
            self.app()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(station_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    let identifier = StationIdentifier::new(state.config.tenant_id, station_id);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Err(e) = state
        .authenticator
        .authenticate(
            &identifier,
            state.config.security_profile,
            state.config.allow_unknown_stations,
            authorization,
        )
        .await
    {
        warn!(station_id = %identifier, remote = %addr, error = %e, "Upgrade rejected: authentication failed");
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"ocpp\"")],
        )
            .into_response();
    }

    let Some(protocol) = state.negotiator.negotiate_headers(&headers) else {
        warn!(
            station_id = %identifier,
            remote = %addr,
            supported = ?state.negotiator.supported_subprotocols(),
            "Upgrade rejected: subprotocol not offered"
        );
        return (StatusCode::BAD_REQUEST, "Unsupported OCPP subprotocol").into_response();
    };

    ws.protocols([protocol.subprotocol()])
        .on_upgrade(move |socket| handle_socket(socket, state, identifier, protocol, addr))
}

fn to_message(outgoing: Outgoing) -> (Message, bool) {
    match outgoing {
        Outgoing::Text(text) => (Message::Text(text.into()), false),
        Outgoing::Ping => (Message::Ping(Bytes::new()), false),
        Outgoing::Close { code, reason } => (
            Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
            true,
        ),
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    identifier: StationIdentifier,
    protocol: OcppVersion,
    addr: SocketAddr,
) {
    let connection_id = Uuid::new_v4().to_string();
    info!(station_id = %identifier, %connection_id, remote = %addr, %protocol, "Station connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    let record = ConnectionRecord {
        identifier: identifier.clone(),
        connection_id: connection_id.clone(),
        ip: addr.ip().to_string(),
        port: addr.port(),
        is_alive: true,
    };
    if let Err(e) = store_record(state.cache.as_ref(), &record).await {
        warn!(station_id = %identifier, error = %e, "Failed to store connection record");
    }
    state
        .sessions
        .register(&identifier, Session::new(&connection_id, protocol, tx.clone()));

    if let Err(e) = state.router.register_connection(&identifier, protocol).await {
        error!(station_id = %identifier, error = %e, "Routing registration failed, closing");
        let close = Message::Close(Some(CloseFrame {
            code: CLOSE_INTERNAL,
            reason: "Routing unavailable".into(),
        }));
        let _ = ws_sender.send(close).await;
        teardown(&state, &identifier, &connection_id).await;
        return;
    }

    let station = identifier.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            let (message, closing) = to_message(outgoing);
            if let Err(e) = ws_sender.send(message).await {
                debug!(station_id = %station, error = %e, "Socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let pong = match state.config.ping_interval {
        0 => None,
        secs => {
            let keepalive = Keepalive::new(
                state.cache.clone(),
                identifier.clone(),
                &connection_id,
                Duration::from_secs(secs),
            );
            let handle = keepalive.pong_handle();
            tokio::spawn(keepalive.run(tx.clone()));
            Some(handle)
        }
    };

    let shutdown = state.shutdown.notified();
    tokio::pin!(shutdown);
    let mut closing = false;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(station_id = %identifier, message = %text.as_str(), "<-");
                        // A Call waiting for the pending-call slot must not
                        // block the response that frees it.
                        let router = state.router.clone();
                        let station = identifier.clone();
                        let received_at = Utc::now();
                        tokio::spawn(async move {
                            router
                                .on_message(&station, text.as_str(), received_at, protocol)
                                .await;
                        });
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(pong) = &pong {
                            pong.on_pong().await;
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Binary(data))) => {
                        warn!(station_id = %identifier, bytes = data.len(), "Binary frame ignored");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(station_id = %identifier, ?frame, "Close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(station_id = %identifier, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut writer => break,
            _ = &mut shutdown, if !closing => {
                closing = true;
                let _ = tx.send(Outgoing::Close {
                    code: CLOSE_GOING_AWAY,
                    reason: "Server shutting down".into(),
                });
            }
        }
    }

    writer.abort();
    teardown(&state, &identifier, &connection_id).await;
    info!(station_id = %identifier, %connection_id, "Station disconnected");
}

/// Undo the connection's registrations. A socket replaced by a newer one
/// only drops its own session; routing state belongs to the replacement.
async fn teardown(state: &GatewayState, identifier: &StationIdentifier, connection_id: &str) {
    if !state.sessions.unregister(identifier, connection_id) {
        debug!(station_id = %identifier, %connection_id, "Connection was replaced, skipping deregistration");
        return;
    }

    match load_record(state.cache.as_ref(), identifier).await {
        Ok(Some(record)) if record.connection_id == connection_id => {
            if let Err(e) = state
                .cache
                .remove(&identifier.to_string(), namespace::CONNECTIONS)
                .await
            {
                warn!(station_id = %identifier, error = %e, "Failed to remove connection record");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(station_id = %identifier, error = %e, "Connection record unreadable"),
    }

    state.router.deregister_connection(identifier).await;
}
