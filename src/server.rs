//! Process assembly
//!
//! [`ServerHandle`] builds every component from an [`AppConfig`], owns their
//! lifecycle and tears them down in order on shutdown:
//! gateways stop accepting, sockets close and deregister, modules
//! unsubscribe, and the circuit breaker timers stop.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::{
    CircuitBreaker, MessageRouter, ModuleDispatcher, ProvisioningModule, RouterPorts,
};
use crate::config::AppConfig;
use crate::domain::ports::Cache;
use crate::domain::{BusError, OcppVersion, StationIdentifier};
use crate::infrastructure::bus::LocalMessageBus;
use crate::infrastructure::cache::MemoryCache;
use crate::infrastructure::http::{HttpCallbackNotifier, HttpWebhookDispatcher, WebhookConfigError};
use crate::infrastructure::repository::InMemoryStationRepository;
use crate::interfaces::ws::{OcppServer, SessionRegistry, SharedSessionRegistry, StationAuthenticator};
use crate::shared::{ShutdownCoordinator, ShutdownSignal};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("webhook configuration: {0}")]
    Webhooks(#[from] WebhookConfigError),

    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("message bus: {0}")]
    Bus(#[from] BusError),

    #[error("failed to bind gateway '{id}' on {address}: {source}")]
    Bind {
        id: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// A gateway endpoint that is accepting connections.
#[derive(Debug, Clone)]
pub struct GatewayInfo {
    pub id: String,
    pub address: SocketAddr,
    pub protocol: OcppVersion,
    pub tenant_id: i32,
}

pub struct ServerHandle {
    pub config: AppConfig,
    pub router: Arc<MessageRouter>,
    pub sessions: SharedSessionRegistry,
    pub cache: Arc<dyn Cache>,
    pub stations: Arc<InMemoryStationRepository>,
    pub bus: Arc<LocalMessageBus>,
    gateways: Vec<GatewayInfo>,
    gateway_tasks: Vec<JoinHandle<()>>,
    modules: Vec<Arc<ModuleDispatcher>>,
    breaker: Arc<CircuitBreaker>,
    shutdown: ShutdownCoordinator,
}

impl ServerHandle {
    pub async fn start(config: AppConfig) -> Result<Self, ServerError> {
        info!("Starting OCPP router...");

        if config.metrics.enabled {
            install_metrics_exporter(&config.metrics.listen)?;
        }

        let shutdown = ShutdownCoordinator::new(config.shutdown_timeout());

        // ── Ports ──────────────────────────────────────────────
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        let breaker = CircuitBreaker::new(config.circuit_breaker_config());
        let bus = LocalMessageBus::new(breaker.clone());
        breaker.start();

        let stations = Arc::new(InMemoryStationRepository::new());
        for seed in &config.stations {
            stations.seed_station(
                StationIdentifier::new(seed.tenant_id, &seed.station_id),
                seed.password_hash.clone(),
            );
        }
        info!(count = stations.station_count(), "Stations seeded");

        let webhooks = Arc::new(HttpWebhookDispatcher::new(
            config.webhooks.clone(),
            config.http_timeout(),
        )?);
        let callbacks = Arc::new(HttpCallbackNotifier::new(config.http_timeout())?);
        let sessions: SharedSessionRegistry = Arc::new(SessionRegistry::new());

        // ── Router ─────────────────────────────────────────────
        let router = MessageRouter::new(
            config.router_config(),
            RouterPorts {
                cache: cache.clone(),
                sender: bus.clone(),
                receiver: bus.clone(),
                webhooks,
                callbacks: callbacks.clone(),
                stations: stations.clone(),
                network: sessions.clone(),
            },
        );

        // ── Modules ────────────────────────────────────────────
        let provisioning = ModuleDispatcher::new(
            "provisioning",
            ProvisioningModule::new(config.router.heartbeat_interval).registry(),
            bus.clone(),
            cache.clone(),
            callbacks,
        );
        provisioning.subscribe(bus.as_ref()).await?;
        let modules = vec![provisioning];

        // ── Gateways ───────────────────────────────────────────
        let authenticator = Arc::new(StationAuthenticator::new(stations.clone(), stations.clone()));
        let mut gateways = Vec::with_capacity(config.websocket.len());
        let mut gateway_tasks = Vec::with_capacity(config.websocket.len());

        for ws in &config.websocket {
            let server = OcppServer::new(
                ws.clone(),
                router.clone(),
                sessions.clone(),
                cache.clone(),
                authenticator.clone(),
                shutdown.signal(),
            );
            let listener = server.bind().await.map_err(|source| ServerError::Bind {
                id: ws.id.clone(),
                address: ws.address(),
                source,
            })?;
            let address = listener.local_addr().map_err(|source| ServerError::Bind {
                id: ws.id.clone(),
                address: ws.address(),
                source,
            })?;
            gateways.push(GatewayInfo {
                id: ws.id.clone(),
                address,
                protocol: ws.protocol,
                tenant_id: ws.tenant_id,
            });

            let id = ws.id.clone();
            gateway_tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(listener).await {
                    error!(server_id = %id, error = %e, "Gateway stopped with error");
                }
            }));
        }

        info!(gateways = gateways.len(), "All gateways started");

        Ok(Self {
            config,
            router,
            sessions,
            cache,
            stations,
            bus,
            gateways,
            gateway_tasks,
            modules,
            breaker,
            shutdown,
        })
    }

    pub fn gateways(&self) -> &[GatewayInfo] {
        &self.gateways
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install SIGTERM / SIGINT listeners that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    pub fn is_running(&self) -> bool {
        self.gateway_tasks.iter().any(|t| !t.is_finished())
    }

    /// Wait for the shutdown signal, then stop everything. Returns `false`
    /// when cleanup exceeded `server.shutdown_timeout_secs`.
    pub async fn wait(self) -> bool {
        let Self {
            sessions,
            bus,
            gateway_tasks,
            modules,
            breaker,
            shutdown,
            ..
        } = self;

        let finished = shutdown
            .shutdown_with_cleanup(move || async move {
                for task in gateway_tasks {
                    if let Err(e) = task.await {
                        error!(error = %e, "Gateway task panicked");
                    }
                }

                // Socket tasks react to the same signal; wait for them to
                // deregister before the bus goes away.
                sessions.close_all("Server shutting down");
                while sessions.count() > 0 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }

                for module in &modules {
                    if let Err(e) = module.unsubscribe(bus.as_ref()).await {
                        warn!(module = %module.name(), error = %e, "Module unsubscribe failed");
                    }
                }
                breaker.shutdown();
            })
            .await;

        info!("OCPP router stopped");
        finished
    }

    pub async fn shutdown(self) -> bool {
        info!("Shutting down OCPP router...");
        self.trigger_shutdown();
        self.wait().await
    }
}

/// The global recorder can be installed once per process.
fn install_metrics_exporter(listen: &str) -> Result<(), ServerError> {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let address: SocketAddr = listen
        .parse()
        .map_err(|e| ServerError::Metrics(format!("invalid listen address '{listen}': {e}")))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    let _ = INSTALLED.set(());
    info!(%address, "Prometheus exporter listening");
    Ok(())
}

/// Call once at process startup, before [`ServerHandle::start`].
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebsocketServerConfig;

    fn config_on_ephemeral_ports() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.shutdown_timeout_secs = 5;
        config.websocket = vec![
            WebsocketServerConfig {
                id: "v16".into(),
                host: "127.0.0.1".into(),
                port: 0,
                protocol: OcppVersion::V16,
                ..Default::default()
            },
            WebsocketServerConfig {
                id: "v201".into(),
                host: "127.0.0.1".into(),
                port: 0,
                ..Default::default()
            },
        ];
        config
    }

    #[tokio::test]
    async fn starts_one_gateway_per_endpoint_and_stops() {
        let handle = ServerHandle::start(config_on_ephemeral_ports()).await.unwrap();
        assert_eq!(handle.gateways().len(), 2);
        assert_ne!(handle.gateways()[0].address.port(), 0);
        assert_eq!(handle.gateways()[1].protocol, OcppVersion::V201);
        assert_eq!(handle.bus.subscription_count(), 1);
        assert!(handle.is_running());

        assert!(handle.shutdown().await);
    }

    #[tokio::test]
    async fn stations_are_seeded() {
        let mut config = config_on_ephemeral_ports();
        config.stations = vec![crate::config::StationSeed {
            tenant_id: 2,
            station_id: "CS-9".into(),
            password_hash: None,
        }];
        let handle = ServerHandle::start(config).await.unwrap();
        assert_eq!(handle.stations.station_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn bad_metrics_address_fails_startup() {
        let mut config = config_on_ephemeral_ports();
        config.metrics.enabled = true;
        config.metrics.listen = "not an address".into();
        assert!(matches!(
            ServerHandle::start(config).await,
            Err(ServerError::Metrics(_))
        ));
    }
}
