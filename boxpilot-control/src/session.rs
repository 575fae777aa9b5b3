//! Background telemetry subscriptions bound to one kernel lifetime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::client::ControlClient;
use crate::error::ControlError;
use crate::model::{LogEvent, LogLevel, MemorySample, TrafficSample};
use crate::stream::EventStream;

/// Per-stream buffer. Subscribers that fall further behind skip the oldest
/// events and see `RecvError::Lagged`.
pub const CHANNEL_CAPACITY: usize = 256;

const PUMP_ATTEMPTS: u32 = 5;
const PUMP_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// How long to wait for a freshly spawned kernel to answer `/version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(250),
        }
    }
}

impl Readiness {
    /// `true` once the control API answers; `false` after the last attempt.
    pub async fn wait(&self, client: &ControlClient) -> bool {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            match client.version().await {
                Ok(version) => {
                    debug!(%version, attempt, "kernel control API is ready");
                    return true;
                }
                Err(err) => debug!(attempt, error = %err, "kernel control API not ready"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Telemetry hub
// ---------------------------------------------------------------------------

/// Subscription point for one session's event streams.
///
/// Holds no senders, so every receiver observes `Closed` once the owning
/// [`Session`] is dropped.
#[derive(Clone)]
pub struct Telemetry {
    logs: Arc<broadcast::Receiver<LogEvent>>,
    memory: Arc<broadcast::Receiver<MemorySample>>,
    traffic: Arc<broadcast::Receiver<TrafficSample>>,
}

impl Telemetry {
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.logs.resubscribe()
    }

    pub fn subscribe_memory(&self) -> broadcast::Receiver<MemorySample> {
        self.memory.resubscribe()
    }

    pub fn subscribe_traffic(&self) -> broadcast::Receiver<TrafficSample> {
        self.traffic.resubscribe()
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Owns every task streaming from one kernel. Dropping it aborts them all.
pub struct Session {
    telemetry: Telemetry,
    bootstrap: JoinHandle<()>,
}

impl Session {
    /// Must be called from within a tokio runtime.
    pub fn open(client: ControlClient, readiness: Readiness, level: LogLevel) -> Self {
        let (logs_tx, logs_rx) = broadcast::channel(CHANNEL_CAPACITY);
        let (memory_tx, memory_rx) = broadcast::channel(CHANNEL_CAPACITY);
        let (traffic_tx, traffic_rx) = broadcast::channel(CHANNEL_CAPACITY);

        let bootstrap = tokio::spawn(async move {
            if !readiness.wait(&client).await {
                warn!(
                    addr = client.addr(),
                    attempts = readiness.attempts,
                    "kernel control API never became reachable; telemetry disabled"
                );
                return;
            }

            let mut pumps = JoinSet::new();
            let c = client.clone();
            pumps.spawn(pump("logs", logs_tx, move || {
                let c = c.clone();
                async move { c.logs(level).await }
            }));
            let c = client.clone();
            pumps.spawn(pump("memory", memory_tx, move || {
                let c = c.clone();
                async move { c.memory().await }
            }));
            let c = client;
            pumps.spawn(pump("traffic", traffic_tx, move || {
                let c = c.clone();
                async move { c.traffic().await }
            }));
            info!("telemetry streams attached");

            while let Some(joined) = pumps.join_next().await {
                if let Err(err) = joined {
                    if err.is_panic() {
                        warn!(error = %err, "telemetry pump panicked");
                    }
                }
            }
        });

        Self {
            telemetry: Telemetry {
                logs: Arc::new(logs_rx),
                memory: Arc::new(memory_rx),
                traffic: Arc::new(traffic_rx),
            },
            bootstrap,
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.clone()
    }

    /// `true` once readiness failed or every pump gave up.
    pub fn is_finished(&self) -> bool {
        self.bootstrap.is_finished()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.bootstrap.abort();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("finished", &self.bootstrap.is_finished())
            .finish_non_exhaustive()
    }
}

/// Forward one stream into its channel, reopening it after it drops.
/// Attempts reset whenever a connection delivered at least one event.
async fn pump<T, F, Fut>(name: &'static str, tx: broadcast::Sender<T>, mut open: F)
where
    T: DeserializeOwned + Clone + Send + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<EventStream<T>, ControlError>>,
{
    let mut failures = 0u32;
    loop {
        match open().await {
            Ok(mut stream) => {
                debug!(stream = name, "telemetry stream opened");
                let mut delivered = false;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            delivered = true;
                            // Err only means nobody is listening right now.
                            let _ = tx.send(event);
                        }
                        Err(err) => debug!(stream = name, error = %err, "telemetry event dropped"),
                    }
                }
                if delivered {
                    failures = 0;
                }
            }
            Err(err) => debug!(stream = name, error = %err, "telemetry stream failed to open"),
        }

        failures += 1;
        if failures >= PUMP_ATTEMPTS {
            warn!(stream = name, attempts = failures, "telemetry stream given up");
            return;
        }
        tokio::time::sleep(PUMP_BACKOFF).await;
    }
}
