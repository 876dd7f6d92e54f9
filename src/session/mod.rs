pub mod orchestrator;

pub use orchestrator::{SessionEffect, SessionOrchestrator, SessionPhase};

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::models::Participant;
use crate::ws::{ConnectionState, RoomEvent, RoomProtocolHandler};

/// Wires a [`SessionOrchestrator`] to the protocol handler.
///
/// Intents the orchestrator emits are sent on the channel; every other effect
/// is forwarded to the UI receiver returned by [`Session::new`]. A `Create` or
/// `Join` that could not be sent is held and replayed once the channel opens,
/// and the room is joined again on every new socket.
pub struct Session {
    orchestrator: Mutex<SessionOrchestrator>,
    protocol: Arc<RoomProtocolHandler>,
    effects: mpsc::UnboundedSender<SessionEffect>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        protocol: Arc<RoomProtocolHandler>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEffect>) {
        let (effects, effects_rx) = mpsc::unbounded_channel();
        let session = Self {
            orchestrator: Mutex::new(SessionOrchestrator::new(user_id)),
            protocol,
            effects,
        };
        (session, effects_rx)
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase()
    }

    pub fn room_id(&self) -> Option<String> {
        self.lock().room_id().map(str::to_string)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.lock().roster().participants().to_vec()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error().map(str::to_string)
    }

    pub fn create_room(&self) {
        let effects = self.lock().create_room();
        self.apply(effects);
    }

    pub fn enter_room(&self, room_id: &str) {
        let effects = self.lock().enter_room(room_id);
        self.apply(effects);
    }

    pub fn verify_room(&self, room_id: &str) {
        let effects = self.lock().verify_room(room_id);
        self.apply(effects);
    }

    pub fn leave(&self) {
        self.lock().leave();
    }

    pub fn handle_event(&self, event: &RoomEvent) {
        let effects = self.lock().handle_event(event);
        self.apply(effects);
    }

    /// A connection transition as seen by the session. `previous` is the last
    /// state it observed.
    pub fn connection_changed(&self, previous: ConnectionState, current: ConnectionState) {
        match current {
            ConnectionState::Open => {
                // Open straight after Open: the socket was replaced in between
                if previous == ConnectionState::Open {
                    self.lock().channel_lost();
                }
                let effects = self.lock().channel_reopened();
                self.apply(effects);
            }
            ConnectionState::Connecting
            | ConnectionState::Reconnecting
            | ConnectionState::Closed => self.lock().channel_lost(),
            ConnectionState::Idle => {}
        }
    }

    /// Feed every inbound event, in order, and every connection transition to
    /// the orchestrator.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut events = self.protocol.subscribe();
        let mut states = self.protocol.subscribe_state();

        tokio::spawn(async move {
            // the channel may have opened before this task first ran
            let mut previous = ConnectionState::Idle;
            states.mark_changed();
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(delivered) => session.handle_event(&delivered.event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Session fell behind the event stream, resyncing");
                            let effects = session.lock().resync();
                            session.apply(effects);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *states.borrow_and_update();
                        session.connection_changed(previous, current);
                        previous = current;
                    }
                }
            }
            tracing::debug!("Session event stream ended");
        })
    }

    fn apply(&self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::Send(intent) => {
                    if !self.protocol.send(&intent) {
                        self.lock().send_failed(&intent);
                    }
                }
                other => {
                    if self.effects.send(other).is_err() {
                        tracing::debug!("No UI listening for session effects");
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionOrchestrator> {
        self.orchestrator.lock().unwrap_or_else(|e| e.into_inner())
    }
}
