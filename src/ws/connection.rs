use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Credential;
use crate::config::Config;
use crate::error::ChannelError;
use crate::ws::reconnect::{ConnectionState, ReconnectMachine, ReconnectPolicy, Step};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Floor for the ping period; `interval` cannot tick at zero.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Build `<base>?token=<credential>`.
pub fn channel_address(base: &str, credential: &Credential) -> Result<String, ChannelError> {
    if credential.is_empty() {
        return Err(ChannelError::MissingCredential);
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{}{}token={}",
        base,
        separator,
        urlencoding::encode(credential.as_str())
    ))
}

/// Address with the query string stripped, safe to log
fn redacted(address: &str) -> &str {
    address.split('?').next().unwrap_or("")
}

/// Handles of the currently running connection task
struct ActiveRun {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Owns the single duplex channel to the signaling service.
///
/// The background task is the only writer of the socket and of
/// [`ConnectionState`]; everybody else holds read-only receivers.
pub struct ConnectionManager {
    config: Arc<Config>,
    state: Arc<watch::Sender<ConnectionState>>,
    terminal: Arc<watch::Sender<Option<ChannelError>>>,
    disconnect: Arc<watch::Sender<Option<ChannelError>>>,
    frames: mpsc::UnboundedSender<String>,
    active: Mutex<Option<ActiveRun>>,
}

impl ConnectionManager {
    /// Returns the manager and the receiver of raw inbound text frames.
    pub fn new(config: Arc<Config>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (terminal_tx, _) = watch::channel(None);
        let (disconnect_tx, _) = watch::channel(None);

        let manager = Self {
            config,
            state: Arc::new(state_tx),
            terminal: Arc::new(terminal_tx),
            disconnect: Arc::new(disconnect_tx),
            frames: frames_tx,
            active: Mutex::new(None),
        };

        (manager, frames_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Terminal failure, set once the retry budget is spent.
    pub fn last_error(&self) -> Option<ChannelError> {
        self.terminal.borrow().clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<ChannelError>> {
        self.terminal.subscribe()
    }

    /// Why the most recent socket or connect attempt failed, retried or not.
    pub fn last_disconnect(&self) -> Option<ChannelError> {
        self.disconnect.borrow().clone()
    }

    /// Open the channel for `credential`. Replaces any running connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, credential: &Credential) -> Result<(), ChannelError> {
        let address = match channel_address(&self.config.ws_url, credential) {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!("No credential available, not connecting");
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let previous = self.lock_active().replace(ActiveRun {
            cancel: cancel.clone(),
            outbound: outbound_tx,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        self.terminal.send_replace(None);

        let run = ConnectionRun {
            address,
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            terminal: Arc::clone(&self.terminal),
            disconnect: Arc::clone(&self.disconnect),
            frames: self.frames.clone(),
            outbound: outbound_rx,
            cancel,
        };

        tokio::spawn(run.run());
        Ok(())
    }

    /// Reopen the channel with a fresh credential after the identity provider
    /// rotated it. The retry budget starts over.
    pub fn reconnect_with(&self, credential: &Credential) -> Result<(), ChannelError> {
        tracing::info!("Reconnecting with refreshed credential");
        self.connect(credential)
    }

    /// Close the channel and cancel any pending reconnect.
    pub fn close(&self) {
        if let Some(run) = self.lock_active().take() {
            run.cancel.cancel();
            tracing::info!("Signaling channel closed by client");
        }
        self.state.send_replace(ConnectionState::Closed);
    }

    /// Queue a raw text frame. Frames leave in the order they were queued.
    pub fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.state() != ConnectionState::Open {
            return Err(ChannelError::NotOpen);
        }
        let active = self.lock_active();
        let run = active.as_ref().ok_or(ChannelError::NotOpen)?;
        run.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| ChannelError::NotOpen)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(run) = self.lock_active().take() {
            run.cancel.cancel();
        }
    }
}

/// How a socket session ended
enum SocketEnd {
    Cancelled,
    ClosedByPeer,
    Abnormal(ChannelError),
}

/// One connect/reconnect loop for a fixed address
struct ConnectionRun {
    address: String,
    config: Arc<Config>,
    state: Arc<watch::Sender<ConnectionState>>,
    terminal: Arc<watch::Sender<Option<ChannelError>>>,
    disconnect: Arc<watch::Sender<Option<ChannelError>>>,
    frames: mpsc::UnboundedSender<String>,
    outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
}

impl ConnectionRun {
    async fn run(mut self) {
        let mut machine = ReconnectMachine::new(ReconnectPolicy::from(&*self.config));

        loop {
            self.publish(machine.start());
            let conn_id = Uuid::new_v4().to_string();

            tracing::info!(
                conn_id = %conn_id,
                url = %redacted(&self.address),
                attempt = machine.attempts(),
                "Connecting to signaling service"
            );

            let connect = tokio::time::timeout(
                self.config.connect_timeout,
                tokio_tungstenite::connect_async(self.address.as_str()),
            );

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                outcome = connect => outcome,
            };

            let failure = match outcome {
                Ok(Ok((socket, _response))) => {
                    // frames queued for a previous socket are not replayed
                    while self.outbound.try_recv().is_ok() {}

                    self.publish(machine.opened());
                    tracing::info!(conn_id = %conn_id, "Signaling channel open");

                    match self.drive(socket, &conn_id).await {
                        SocketEnd::Cancelled => return,
                        SocketEnd::ClosedByPeer => {
                            tracing::info!(conn_id = %conn_id, "Server closed the channel");
                            self.publish(machine.close());
                            return;
                        }
                        SocketEnd::Abnormal(e) => e,
                    }
                }
                Ok(Err(e)) => ChannelError::ConnectFailed(e.to_string()),
                Err(_elapsed) => ChannelError::ConnectFailed(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )),
            };

            if !self.cancel.is_cancelled() {
                self.disconnect.send_replace(Some(failure.clone()));
            }

            match machine.failed() {
                Step::RetryAfter(delay) => {
                    self.publish(machine.state());
                    tracing::warn!(
                        conn_id = %conn_id,
                        error = %failure,
                        attempt = machine.attempts(),
                        max_attempts = self.config.reconnect_attempts,
                        "Signaling channel lost, reconnecting in {:?}",
                        delay
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::GiveUp { attempts } => {
                    let terminal = ChannelError::RetryBudgetExhausted(attempts);
                    tracing::error!(
                        error = %failure,
                        attempts,
                        "Giving up on signaling channel"
                    );
                    self.publish(machine.state());
                    if !self.cancel.is_cancelled() {
                        self.terminal.send_replace(Some(terminal));
                    }
                    return;
                }
                Step::Ignore => return,
            }
        }
    }

    /// Pump one open socket until it ends.
    async fn drive(&mut self, socket: Socket, conn_id: &str) -> SocketEnd {
        let (mut sink, mut source) = socket.split();

        let heartbeat_timeout = self.config.heartbeat_timeout;
        let period = self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SocketEnd::Cancelled;
                }
                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        return SocketEnd::Abnormal(ChannelError::AbnormalClose(e.to_string()));
                    }
                }
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > heartbeat_timeout {
                        return SocketEnd::Abnormal(ChannelError::HeartbeatTimeout(heartbeat_timeout));
                    }
                    tracing::trace!(conn_id = %conn_id, "Heartbeat");
                    if let Err(e) = sink.send(Message::Ping(Vec::<u8>::new().into())).await {
                        return SocketEnd::Abnormal(ChannelError::AbnormalClose(e.to_string()));
                    }
                }
                incoming = source.next() => {
                    last_seen = Instant::now();
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = self.frames.send(text.as_str().to_owned());
                        }
                        Some(Ok(Message::Binary(data))) => {
                            tracing::warn!(conn_id = %conn_id, len = data.len(), "Dropping binary frame");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let normal = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                            if normal {
                                return SocketEnd::ClosedByPeer;
                            }
                            let reason = frame
                                .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                                .unwrap_or_else(|| "no close frame".to_string());
                            return SocketEnd::Abnormal(ChannelError::AbnormalClose(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return SocketEnd::Abnormal(ChannelError::AbnormalClose(e.to_string()));
                        }
                        None => {
                            return SocketEnd::Abnormal(ChannelError::AbnormalClose(
                                "stream ended".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Publish a transition unless the client already tore this run down.
    fn publish(&self, next: ConnectionState) {
        let cancel = &self.cancel;
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
