//! Message bus circuit breaker
//!
//! Tracks the health of the bus link, independently of any station socket.
//!
//! - **Closed**: healthy. A reconnect probe runs every `max_reconnect_delay`;
//!   a failed probe moves to Failing.
//! - **Failing**: an exponential backoff loop retries the link. The delay is
//!   `counter * base_delay`, the counter doubles after every failed attempt
//!   and the breaker force-closes once it exceeds `max_reconnect_delay`.
//! - **Open**: the link failed fatally. The probe keeps running and closes
//!   the circuit on the first success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const MAX_DELAY_REACHED: &str = "Max reconnect delay reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Failing,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Failing => "FAILING",
            Self::Open => "OPEN",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Failing => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReconnectError {
    /// Worth retrying with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying will not help; the circuit opens.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// The connection the breaker keeps alive.
#[async_trait]
pub trait Reconnect: Send + Sync {
    async fn reconnect(&self) -> Result<(), ReconnectError>;
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Backoff ceiling, in units of `base_delay`. Also the probe period.
    pub max_reconnect_delay: u64,
    pub base_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_reconnect_delay: 30,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// `base * units`, saturating instead of wrapping or panicking.
fn scaled_delay(base: Duration, units: u64) -> Duration {
    base.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
}

type StateListener = Box<dyn Fn(CircuitState, Option<&str>) + Send + Sync>;

struct Inner {
    state: CircuitState,
    failing_reconnect_delay: u64,
    backoff: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_timers(&mut self) {
        if let Some(handle) = self.backoff.take() {
            handle.abort();
        }
        if let Some(handle) = self.probe.take() {
            handle.abort();
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<StateListener>>,
    target: RwLock<Option<Weak<dyn Reconnect>>>,
    stopped: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failing_reconnect_delay: 1,
                backoff: None,
                probe: None,
            }),
            listeners: RwLock::new(Vec::new()),
            target: RwLock::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Set the connection to reconnect. Held weakly: the target usually owns
    /// the breaker.
    pub fn attach(&self, target: Weak<dyn Reconnect>) {
        *self.target.write() = Some(target);
    }

    /// Arm the probe for the initial Closed state.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.probe.is_none() && inner.state != CircuitState::Failing {
            inner.probe = Some(self.spawn_probe());
        }
        metrics::gauge!("ocpp_circuit_breaker_state").set(inner.state.gauge_value());
    }

    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(CircuitState, Option<&str>) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn failing_reconnect_delay(&self) -> u64 {
        self.inner.lock().failing_reconnect_delay
    }

    /// The link is up.
    pub fn trigger_success(self: &Arc<Self>) {
        self.transition(CircuitState::Closed, None);
    }

    /// The link dropped. Starts backing off unless already Failing or Open.
    pub fn trigger_failure(self: &Arc<Self>, reason: &str) {
        if self.state() == CircuitState::Closed {
            self.transition(CircuitState::Failing, Some(reason));
        }
    }

    pub fn open(self: &Arc<Self>, reason: &str) {
        self.transition(CircuitState::Open, Some(reason));
    }

    pub fn close(self: &Arc<Self>, reason: &str) {
        self.transition(CircuitState::Closed, Some(reason));
    }

    /// Cancel all timers. No transition arms new ones afterwards.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.inner.lock().cancel_timers();
    }

    fn transition(self: &Arc<Self>, next: CircuitState, reason: Option<&str>) {
        {
            let mut inner = self.inner.lock();
            if inner.state == next {
                return;
            }
            let previous = inner.state;
            inner.state = next;
            inner.cancel_timers();

            if !self.stopped.load(Ordering::SeqCst) {
                match next {
                    CircuitState::Closed | CircuitState::Open => {
                        inner.failing_reconnect_delay = 1;
                        inner.probe = Some(self.spawn_probe());
                    }
                    CircuitState::Failing => {
                        inner.backoff = Some(self.spawn_backoff());
                    }
                }
            }

            match next {
                CircuitState::Closed => {
                    info!(from = %previous, reason = reason.unwrap_or(""), "Circuit closed")
                }
                _ => warn!(from = %previous, to = %next, reason = reason.unwrap_or(""), "Circuit state changed"),
            }
            metrics::gauge!("ocpp_circuit_breaker_state").set(next.gauge_value());
        }

        for listener in self.listeners.read().iter() {
            listener(next, reason);
        }
    }

    fn reconnect_target(&self) -> Option<Arc<dyn Reconnect>> {
        self.target.read().as_ref().and_then(Weak::upgrade)
    }

    async fn attempt_reconnect(&self) -> Result<(), ReconnectError> {
        match self.reconnect_target() {
            Some(target) => target.reconnect().await,
            None => Err(ReconnectError::Transient("no reconnect target".into())),
        }
    }

    fn spawn_backoff(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let base = self.config.base_delay;
        let max = self.config.max_reconnect_delay;

        tokio::spawn(async move {
            loop {
                let Some(breaker) = weak.upgrade() else { return };
                let counter = breaker.failing_reconnect_delay();
                if counter > max {
                    breaker.close(MAX_DELAY_REACHED);
                    return;
                }
                drop(breaker);

                debug!(delay_units = counter, "Reconnect scheduled");
                tokio::time::sleep(scaled_delay(base, counter)).await;

                let Some(breaker) = weak.upgrade() else { return };
                match breaker.attempt_reconnect().await {
                    Ok(()) => {
                        breaker.trigger_success();
                        return;
                    }
                    Err(ReconnectError::Fatal(reason)) => {
                        breaker.open(&reason);
                        return;
                    }
                    Err(ReconnectError::Transient(reason)) => {
                        let mut inner = breaker.inner.lock();
                        if inner.state != CircuitState::Failing {
                            return;
                        }
                        inner.failing_reconnect_delay = counter.saturating_mul(2);
                        debug!(%reason, next = inner.failing_reconnect_delay, "Reconnect failed");
                    }
                }
            }
        })
    }

    fn spawn_probe(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = scaled_delay(self.config.base_delay, self.config.max_reconnect_delay.max(1));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(breaker) = weak.upgrade() else { return };
                if breaker.reconnect_target().is_none() {
                    continue;
                }
                let result = breaker.attempt_reconnect().await;
                match (breaker.state(), result) {
                    (CircuitState::Open, Ok(())) => {
                        breaker.trigger_success();
                        return;
                    }
                    (CircuitState::Closed, Err(e)) => {
                        breaker.trigger_failure(&e.to_string());
                        return;
                    }
                    _ => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyLink {
        attempts: AtomicU32,
        succeed_after: Option<u32>,
        fatal: bool,
    }

    impl FlakyLink {
        fn new(succeed_after: Option<u32>, fatal: bool) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicU32::new(0),
                succeed_after,
                fatal,
            })
        }
    }

    #[async_trait]
    impl Reconnect for FlakyLink {
        async fn reconnect(&self) -> Result<(), ReconnectError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fatal {
                return Err(ReconnectError::Fatal("refused".into()));
            }
            match self.succeed_after {
                Some(limit) if n >= limit => Ok(()),
                _ => Err(ReconnectError::Transient("down".into())),
            }
        }
    }

    fn breaker_for(link: &Arc<FlakyLink>, max: u64) -> Arc<CircuitBreaker> {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            max_reconnect_delay: max,
            base_delay: Duration::from_millis(1),
        });
        let target: Arc<dyn Reconnect> = link.clone();
        breaker.attach(Arc::downgrade(&target));
        breaker
    }

    fn record(breaker: &CircuitBreaker) -> Arc<Mutex<Vec<(CircuitState, Option<String>)>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        breaker.on_state_change(move |state, reason| {
            sink.lock().push((state, reason.map(str::to_string)));
        });
        events
    }

    async fn wait_for_state(breaker: &CircuitBreaker, state: CircuitState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while breaker.state() != state {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("state not reached");
    }

    #[tokio::test]
    async fn backoff_doubles_then_gives_up() {
        let link = FlakyLink::new(None, false);
        let breaker = breaker_for(&link, 8);
        let events = record(&breaker);
        let attempts_at_close = Arc::new(AtomicU32::new(0));
        {
            let link = link.clone();
            let snapshot = attempts_at_close.clone();
            breaker.on_state_change(move |state, _| {
                if state == CircuitState::Closed {
                    snapshot.store(link.attempts.load(Ordering::SeqCst), Ordering::SeqCst);
                }
            });
        }

        breaker.trigger_failure("link lost");
        assert_eq!(breaker.state(), CircuitState::Failing);
        wait_for_state(&breaker, CircuitState::Closed).await;

        // 1, 2, 4, 8 then 16 > 8
        assert_eq!(attempts_at_close.load(Ordering::SeqCst), 4);
        let events = events.lock();
        assert_eq!(events[0], (CircuitState::Failing, Some("link lost".into())));
        assert_eq!(
            events[1],
            (CircuitState::Closed, Some(MAX_DELAY_REACHED.to_string()))
        );
        breaker.shutdown();
    }

    #[tokio::test]
    async fn reconnect_success_closes() {
        let link = FlakyLink::new(Some(2), false);
        let breaker = breaker_for(&link, 30);
        let events = record(&breaker);

        breaker.trigger_failure("link lost");
        wait_for_state(&breaker, CircuitState::Closed).await;

        assert_eq!(link.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(events.lock().last(), Some(&(CircuitState::Closed, None)));
        breaker.shutdown();
    }

    #[tokio::test]
    async fn fatal_reconnect_opens() {
        let link = FlakyLink::new(None, true);
        let breaker = breaker_for(&link, 30);

        breaker.trigger_failure("link lost");
        wait_for_state(&breaker, CircuitState::Open).await;
        assert!(link.attempts.load(Ordering::SeqCst) >= 1);
        breaker.shutdown();
    }

    #[tokio::test]
    async fn repeated_transitions_notify_once() {
        let link = FlakyLink::new(None, false);
        let breaker = breaker_for(&link, 1000);
        let events = record(&breaker);

        breaker.open("manual");
        breaker.open("manual");
        breaker.trigger_failure("ignored while open");
        breaker.close("manual");
        breaker.close("manual");

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, CircuitState::Open);
        assert_eq!(events[1].0, CircuitState::Closed);
        breaker.shutdown();
    }

    #[tokio::test]
    async fn probe_failure_from_closed_starts_backoff() {
        let link = FlakyLink::new(None, false);
        let breaker = breaker_for(&link, 2);
        let events = record(&breaker);
        breaker.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while events.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(events.lock()[0].0, CircuitState::Failing);
        breaker.shutdown();
    }

    #[test]
    fn oversized_delay_saturates() {
        let second = Duration::from_secs(1);
        assert_eq!(scaled_delay(second, 30), Duration::from_secs(30));
        assert_eq!(
            scaled_delay(second, u64::from(u32::MAX) + 1),
            Duration::from_secs(u64::from(u32::MAX))
        );
        assert_eq!(scaled_delay(Duration::MAX, 2), Duration::MAX);
    }
}
