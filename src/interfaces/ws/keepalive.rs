//! Server-initiated ping / pong
//!
//! Liveness lives in the connection record in the cache. Every interval the
//! keepalive flips `is_alive` to false and pings; a pong flips it back and
//! restarts the interval. Finding the record still not-alive at the next
//! tick means the peer is gone and the socket is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use super::session::{Outgoing, CLOSE_NO_PONG};
use crate::domain::ports::cache::namespace;
use crate::domain::ports::Cache;
use crate::domain::{CacheError, ConnectionRecord, StationIdentifier};

pub async fn load_record(
    cache: &dyn Cache,
    identifier: &StationIdentifier,
) -> Result<Option<ConnectionRecord>, CacheError> {
    match cache
        .get(&identifier.to_string(), namespace::CONNECTIONS)
        .await?
    {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn store_record(cache: &dyn Cache, record: &ConnectionRecord) -> Result<(), CacheError> {
    let raw = serde_json::to_string(record)?;
    cache
        .set(&record.identifier.to_string(), &raw, namespace::CONNECTIONS, None)
        .await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Tick {
    Ping,
    Dead,
    /// The record is gone or belongs to a newer socket.
    Stop,
}

pub struct Keepalive {
    cache: Arc<dyn Cache>,
    identifier: StationIdentifier,
    connection_id: String,
    interval: Duration,
    rearm: Arc<Notify>,
}

impl Keepalive {
    pub fn new(
        cache: Arc<dyn Cache>,
        identifier: StationIdentifier,
        connection_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            identifier,
            connection_id: connection_id.into(),
            interval,
            rearm: Arc::new(Notify::new()),
        }
    }

    /// Handle for the socket reader to report pongs.
    pub fn pong_handle(&self) -> PongHandle {
        PongHandle {
            cache: self.cache.clone(),
            identifier: self.identifier.clone(),
            connection_id: self.connection_id.clone(),
            rearm: self.rearm.clone(),
        }
    }

    /// Runs until the socket goes away or the peer stops answering.
    pub async fn run(self, outgoing: mpsc::UnboundedSender<Outgoing>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.rearm.notified() => continue,
                _ = outgoing.closed() => return,
            }

            match self.tick().await {
                Tick::Ping => {
                    if outgoing.send(Outgoing::Ping).is_err() {
                        return;
                    }
                }
                Tick::Dead => {
                    warn!(station_id = %self.identifier, "No pong received, closing connection");
                    let _ = outgoing.send(Outgoing::Close {
                        code: CLOSE_NO_PONG,
                        reason: "Ping timeout".into(),
                    });
                    return;
                }
                Tick::Stop => return,
            }
        }
    }

    async fn tick(&self) -> Tick {
        let mut record = match load_record(self.cache.as_ref(), &self.identifier).await {
            Ok(Some(record)) if record.connection_id == self.connection_id => record,
            Ok(_) => return Tick::Stop,
            Err(e) => {
                warn!(station_id = %self.identifier, error = %e, "Connection record unreadable, pinging anyway");
                return Tick::Ping;
            }
        };
        if !record.is_alive {
            return Tick::Dead;
        }
        record.is_alive = false;
        if let Err(e) = store_record(self.cache.as_ref(), &record).await {
            warn!(station_id = %self.identifier, error = %e, "Failed to persist liveness");
        }
        debug!(station_id = %self.identifier, "Ping");
        Tick::Ping
    }
}

#[derive(Clone)]
pub struct PongHandle {
    cache: Arc<dyn Cache>,
    identifier: StationIdentifier,
    connection_id: String,
    rearm: Arc<Notify>,
}

impl PongHandle {
    pub async fn on_pong(&self) {
        match load_record(self.cache.as_ref(), &self.identifier).await {
            Ok(Some(mut record)) if record.connection_id == self.connection_id => {
                record.is_alive = true;
                if let Err(e) = store_record(self.cache.as_ref(), &record).await {
                    warn!(station_id = %self.identifier, error = %e, "Failed to persist liveness");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(station_id = %self.identifier, error = %e, "Connection record unreadable"),
        }
        self.rearm.notify_one();
    }
}
