//! Live target telemetry fan-out
//!
//! Every subscriber gets its own bounded queue. Publishing serialises the
//! record once and `try_send`s it to each queue; a full queue drops the
//! message for that subscriber only, a closed queue unregisters it. The
//! cycle loop never waits on a subscriber.

use crate::domain::types::TelemetryRecord;
use crate::infra::metrics::Metrics;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<String>,
}

/// Receiving half handed to a subscriber session
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<String>,
}

/// Outcome of one publish across all subscribers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub sent: u64,
    pub dropped: u64,
}

pub struct TelemetryPublisher {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
    metrics: Arc<Metrics>,
}

impl TelemetryPublisher {
    pub fn new(buffer: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            metrics,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock();
        subscribers.push(Subscriber { id, tx });
        self.metrics.set_subscribers(subscribers.len() as u64);
        info!(subscriber = id, subscribers = subscribers.len(), "telemetry_subscriber_added");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        if subscribers.len() != before {
            self.metrics.set_subscribers(subscribers.len() as u64);
            info!(subscriber = id, subscribers = subscribers.len(), "telemetry_subscriber_removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Broadcast one record, best effort
    pub fn publish(&self, record: &TelemetryRecord) -> PublishStats {
        let payload = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "telemetry_serialize_failed");
                return PublishStats::default();
            }
        };

        let mut stats = PublishStats::default();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| match subscriber.tx.try_send(payload.clone()) {
            Ok(()) => {
                stats.sent += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                stats.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = subscriber.id, "telemetry_subscriber_gone");
                false
            }
        });
        self.metrics.set_subscribers(subscribers.len() as u64);
        drop(subscribers);

        self.metrics.record_telemetry(stats.sent, stats.dropped);
        stats
    }
}

/// Pump telemetry to one WebSocket client until it disconnects or shutdown.
/// Inbound frames other than Close are ignored.
pub async fn run_subscriber<S>(
    socket: WebSocketStream<S>,
    publisher: Arc<TelemetryPublisher>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Subscription { id, mut rx } = publisher.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else { break };
                if let Err(e) = sink.send(Message::text(text)).await {
                    debug!(subscriber = id, error = %e, "telemetry_send_failed");
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(subscriber = id, error = %e, "telemetry_receive_failed");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    publisher.unsubscribe(id);
}
