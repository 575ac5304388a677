//! Write-behind logger for `job_events` rows.
//!
//! The worker loop emits far more events than the metadata store needs
//! to persist synchronously on the hot path (every chunk upload, every
//! cancellation check). `EventLogger` batches them through an mpsc
//! channel and flushes on a timer or when a batch fills up, the same
//! shape as the background persistence loop used elsewhere in this
//! workspace for high-frequency job updates.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::JobStore;

#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub job_id: String,
    pub event: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventLoggerConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for EventLoggerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_millis(500),
            channel_capacity: 10_000,
        }
    }
}

/// Handle for submitting events; cloneable and cheap, like the sender
/// side of the write-behind job-status channel this is modeled on.
#[derive(Clone)]
pub struct EventLogger {
    tx: mpsc::Sender<PendingEvent>,
    shutdown_tx: Arc<std::sync::Mutex<Option<oneshot::Sender<()>>>>,
}

impl EventLogger {
    pub fn spawn(store: Arc<dyn JobStore>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_config(store, EventLoggerConfig::default())
    }

    pub fn spawn_with_config(
        store: Arc<dyn JobStore>,
        config: EventLoggerConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_flush_loop(store, rx, shutdown_rx, config));

        (
            Self {
                tx,
                shutdown_tx: Arc::new(std::sync::Mutex::new(Some(shutdown_tx))),
            },
            handle,
        )
    }

    /// Fire-and-forget an event. Drops silently (with a warning) if the
    /// channel is full rather than ever blocking the worker's hot path.
    pub fn record(&self, job_id: impl Into<String>, event: impl Into<String>, detail: Option<String>) {
        let pending = PendingEvent {
            job_id: job_id.into(),
            event: event.into(),
            detail,
        };
        if let Err(e) = self.tx.try_send(pending) {
            warn!("event logger channel full, dropping event: {e}");
        }
    }

    /// Signal the background flush loop to flush its current batch and
    /// stop. No-op if already shut down or if another clone already
    /// requested shutdown.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

async fn run_flush_loop(
    store: Arc<dyn JobStore>,
    mut rx: mpsc::Receiver<PendingEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    config: EventLoggerConfig,
) {
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= config.batch_size {
                            flush(&store, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&store, &mut batch).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&store, &mut batch).await;
            }
            _ = &mut shutdown_rx => {
                flush(&store, &mut batch).await;
                return;
            }
        }
    }
}

async fn flush(store: &Arc<dyn JobStore>, batch: &mut Vec<PendingEvent>) {
    if batch.is_empty() {
        return;
    }
    let now = Utc::now();
    for event in batch.drain(..) {
        if let Err(e) = store.record_event(&event.job_id, &event.event, event.detail, now).await {
            error!("failed to persist job event: {e}");
        }
    }
}
