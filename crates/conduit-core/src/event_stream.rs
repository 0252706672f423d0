use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conduit_types::{Event, EventType};
use tokio::sync::broadcast;

/// Broadcast-backed transport for `Event`s (§4.8). Every published event carries a
/// per-run monotonic `seq`; subscribers that fall behind the ring buffer receive an
/// explicit `EventType::Dropped` marker instead of silently missing a range.
#[derive(Clone)]
pub struct EventStream {
    tx: broadcast::Sender<Event>,
    next_seq: Arc<AtomicU64>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, next_seq: Arc::new(AtomicU64::new(1)) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Assigns the next sequence number for `run_id` and publishes. Returns the
    /// sequence assigned, regardless of whether anyone was listening.
    pub fn publish(&self, run_id: &str, event_type: EventType, payload: serde_json::Value) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = Event::new(run_id, seq, event_type, payload);
        let _ = self.tx.send(event);
        seq
    }

    /// Drains `rx` into a `Vec`, converting a `Lagged` gap into one `Dropped` event
    /// instead of returning early, so a caller iterating the stream always sees a
    /// contiguous, self-describing sequence.
    pub async fn recv_with_gap_marker(rx: &mut broadcast::Receiver<Event>) -> Option<Event> {
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(Event::new(
                        "",
                        0,
                        EventType::Dropped,
                        serde_json::json!({ "skipped": skipped }),
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(2048)
    }
}
