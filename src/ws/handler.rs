use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::ws::{decode_event, ConnectionManager, ConnectionState, RoomEvent, RoomIntent};

pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// An inbound event stamped with its position in the channel.
///
/// `seq` is unique per delivery, so consumers of the latest-event slot can tell
/// a fresh `JoinOk` from one they already reacted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEvent {
    pub seq: u64,
    pub event: RoomEvent,
}

/// Encodes intents onto the channel and decodes what comes back.
pub struct RoomProtocolHandler {
    connection: Arc<ConnectionManager>,
    latest: watch::Sender<Option<DeliveredEvent>>,
    ordered: broadcast::Sender<DeliveredEvent>,
    next_seq: AtomicU64,
}

impl RoomProtocolHandler {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self::with_capacity(connection, DEFAULT_EVENT_BUFFER)
    }

    /// `capacity` bounds how far an ordered-stream subscriber may lag.
    pub fn with_capacity(connection: Arc<ConnectionManager>, capacity: usize) -> Self {
        let (latest, _) = watch::channel(None);
        let (ordered, _) = broadcast::channel(capacity.max(1));

        Self {
            connection,
            latest,
            ordered,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Send an intent. Returns false, after logging, when it could not be queued.
    pub fn send(&self, intent: &RoomIntent) -> bool {
        let text = match intent.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(msg_type = intent.msg_type(), error = %e, "Failed to encode intent");
                return false;
            }
        };

        match self.connection.send_text(text) {
            Ok(()) => {
                tracing::debug!(msg_type = intent.msg_type(), "Intent sent");
                true
            }
            Err(e) => {
                tracing::warn!(
                    msg_type = intent.msg_type(),
                    state = ?self.connection.state(),
                    error = %e,
                    "Dropping intent"
                );
                false
            }
        }
    }

    /// Transitions of the underlying channel.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Most recent inbound event. Later events overwrite earlier ones.
    pub fn latest(&self) -> Option<DeliveredEvent> {
        self.latest.borrow().clone()
    }

    pub fn subscribe_latest(&self) -> watch::Receiver<Option<DeliveredEvent>> {
        self.latest.subscribe()
    }

    /// Every decoded event in channel order, for consumers that cannot afford
    /// to skip any.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveredEvent> {
        self.ordered.subscribe()
    }

    /// Decode one raw frame and publish it. Undecodable frames are logged and
    /// dropped.
    pub fn handle_frame(&self, text: &str) -> Option<DeliveredEvent> {
        let event = match decode_event(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return None;
            }
        };

        let delivered = DeliveredEvent {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            event,
        };

        tracing::debug!(
            msg_type = delivered.event.msg_type(),
            seq = delivered.seq,
            "Received event"
        );

        self.latest.send_replace(Some(delivered.clone()));
        let _ = self.ordered.send(delivered.clone());

        Some(delivered)
    }

    /// Decode frames from the connection until it is dropped.
    pub fn spawn(self: &Arc<Self>, mut frames: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(text) = frames.recv().await {
                handler.handle_frame(&text);
            }
            tracing::debug!("Inbound frame stream ended");
        })
    }
}
