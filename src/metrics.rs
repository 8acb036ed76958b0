//! Metric reporter
//!
//! Success, failure, and provider-switch events are buffered and flushed
//! as a batch to the insights endpoint. Flushes are debounced: a quiet
//! period of the minimum debounce triggers one, and a busy stream is force
//! flushed once the maximum debounce has elapsed since the first buffered
//! event. A final flush runs on client shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bind::RegistryClient;
use crate::events::SdkEvent;

enum Message {
    Event(serde_json::Value),
    Flush(oneshot::Sender<()>),
}

/// Buffered, debounced uplink of SDK events.
pub struct MetricReporter {
    tx: mpsc::UnboundedSender<Message>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MetricReporter {
    /// Start the reporter's background task.
    pub fn start(
        registry: Arc<RegistryClient>,
        configuration_hash: String,
        debounce_min: Duration,
        debounce_max: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_reporter(
            rx,
            registry,
            configuration_hash,
            debounce_min,
            debounce_max,
        ));

        Arc::new(Self {
            tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Record one event for the next batch.
    pub fn observe(&self, event: &SdkEvent) {
        let _ = self.tx.send(Message::Event(render_event(event)));
    }

    /// Flush the buffer now and wait for the uplink attempt to finish.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flush and stop the background task.
    pub async fn shutdown(&self) {
        self.flush().await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Serialize one event into its uplink shape.
fn render_event(event: &SdkEvent) -> serde_json::Value {
    let occurred_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    match event {
        SdkEvent::Success {
            profile,
            usecase,
            provider,
        } => json!({
            "event_type": "PerformMetrics",
            "occurred_at": occurred_at,
            "data": {
                "profile": profile,
                "usecase": usecase,
                "provider": provider,
                "successful": true,
            }
        }),
        SdkEvent::Failure {
            profile,
            usecase,
            provider,
            kind,
        } => json!({
            "event_type": "PerformMetrics",
            "occurred_at": occurred_at,
            "data": {
                "profile": profile,
                "usecase": usecase,
                "provider": provider,
                "successful": false,
                "failure_kind": kind,
            }
        }),
        SdkEvent::ProviderSwitch {
            profile,
            usecase,
            from_provider,
            to_provider,
            reason,
        } => json!({
            "event_type": "ProviderChange",
            "occurred_at": occurred_at,
            "data": {
                "profile": profile,
                "usecase": usecase,
                "from_provider": from_provider,
                "to_provider": to_provider,
                "reason": reason,
            }
        }),
    }
}

/// When the buffer should flush: the earlier of `last event + min` and
/// `first buffered event + max`.
fn next_deadline(
    last_event: Instant,
    first_buffered: Instant,
    debounce_min: Duration,
    debounce_max: Duration,
) -> Instant {
    (last_event + debounce_min).min(first_buffered + debounce_max)
}

async fn run_reporter(
    mut rx: mpsc::UnboundedReceiver<Message>,
    registry: Arc<RegistryClient>,
    configuration_hash: String,
    debounce_min: Duration,
    debounce_max: Duration,
) {
    let mut buffer: Vec<serde_json::Value> = Vec::new();
    let mut first_buffered = Instant::now();
    let mut last_event = Instant::now();

    loop {
        let deadline = if buffer.is_empty() {
            None
        } else {
            Some(next_deadline(
                last_event,
                first_buffered,
                debounce_min,
                debounce_max,
            ))
        };

        tokio::select! {
            message = rx.recv() => match message {
                Some(Message::Event(event)) => {
                    let now = Instant::now();
                    if buffer.is_empty() {
                        first_buffered = now;
                    }
                    last_event = now;
                    buffer.push(event);
                }
                Some(Message::Flush(ack)) => {
                    flush_buffer(&registry, &configuration_hash, &mut buffer).await;
                    let _ = ack.send(());
                }
                None => {
                    flush_buffer(&registry, &configuration_hash, &mut buffer).await;
                    return;
                }
            },
            () = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                flush_buffer(&registry, &configuration_hash, &mut buffer).await;
            }
        }
    }
}

async fn flush_buffer(
    registry: &RegistryClient,
    configuration_hash: &str,
    buffer: &mut Vec<serde_json::Value>,
) {
    if buffer.is_empty() {
        return;
    }
    let events = std::mem::take(buffer);
    debug!(count = events.len(), "Flushing metric batch");

    let batch = json!({
        "configuration_hash": configuration_hash,
        "events": events,
    });
    if let Err(e) = registry.post_sdk_events(&batch).await {
        // Metric loss is never fatal to performs
        warn!(error = %e, "Metric uplink failed, dropping batch");
    }
}
