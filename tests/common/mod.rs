//! Local signaling peer for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};

use truegather_client::ws::{ConnectionState, RoomIntent};

pub const WAIT: Duration = Duration::from_secs(5);

type Responder = Arc<dyn Fn(&RoomIntent) -> Vec<String> + Send + Sync>;

/// What the test wants the peer to do to every connected client
#[derive(Debug, Clone)]
pub enum PeerCommand {
    Text(String),
    /// Clean close (1000)
    Close,
    /// Drop the socket without a close frame
    Drop,
}

#[derive(Clone)]
struct PeerState {
    inbound: mpsc::UnboundedSender<String>,
    tokens: mpsc::UnboundedSender<Option<String>>,
    connected: mpsc::UnboundedSender<()>,
    commands: broadcast::Sender<PeerCommand>,
    respond: Responder,
}

pub struct MockPeer {
    pub url: String,
    /// Every text frame a client sent, in arrival order
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// `token` query parameter of every upgrade request
    pub tokens: mpsc::UnboundedReceiver<Option<String>>,
    /// One tick per socket that is ready to receive commands
    pub connected: mpsc::UnboundedReceiver<()>,
    commands: broadcast::Sender<PeerCommand>,
}

impl MockPeer {
    /// Start a peer that answers each intent with the frames `respond` returns.
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&RoomIntent) -> Vec<String> + Send + Sync + 'static,
    {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (tokens_tx, tokens) = mpsc::unbounded_channel();
        let (connected_tx, connected) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(16);

        let state = PeerState {
            inbound: inbound_tx,
            tokens: tokens_tx,
            connected: connected_tx,
            commands: commands.clone(),
            respond: Arc::new(respond),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("ws://{addr}/ws"),
            inbound,
            tokens,
            connected,
            commands,
        }
    }

    pub fn command(&self, command: PeerCommand) {
        self.commands.send(command).unwrap();
    }

    pub fn push(&self, text: &str) {
        self.command(PeerCommand::Text(text.to_string()));
    }

    pub async fn next_inbound(&mut self) -> String {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("Timed out waiting for a client frame")
            .expect("Peer stopped")
    }

    pub async fn next_token(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.tokens.recv())
            .await
            .expect("Timed out waiting for an upgrade request")
            .expect("Peer stopped")
    }

    pub async fn wait_connected(&mut self) {
        tokio::time::timeout(WAIT, self.connected.recv())
            .await
            .expect("Timed out waiting for a socket")
            .expect("Peer stopped");
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<PeerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let _ = state.tokens.send(params.get("token").cloned());
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: PeerState) {
    let (mut sender, mut receiver) = socket.split();
    let mut commands = state.commands.subscribe();
    let _ = state.connected.send(());

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(PeerCommand::Text(text)) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(PeerCommand::Close) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "bye".into(),
                        })))
                        .await;
                    return;
                }
                Ok(PeerCommand::Drop) | Err(_) => return,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    let _ = state.inbound.send(text.clone());
                    if let Ok(intent) = serde_json::from_str::<RoomIntent>(&text) {
                        for reply in (state.respond)(&intent) {
                            if sender.send(Message::Text(reply.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// A listener that accepts TCP connections and drops them before the
/// WebSocket handshake. Returns the address and the number of accepts so far.
pub async fn refusing_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (format!("ws://{addr}/ws"), accepts)
}

/// A WebSocket server that completes the handshake and then never reads, so
/// pings go unanswered and nothing ever arrives. Returns the address and the
/// number of handshakes so far.
pub async fn silent_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handshakes = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&handshakes);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(socket) = tokio_tungstenite::accept_async(stream).await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        }
    });

    (format!("ws://{addr}/ws"), handshakes)
}

pub async fn wait_for_state(
    states: &mut watch::Receiver<ConnectionState>,
    wanted: ConnectionState,
) {
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {wanted:?}"))
        .expect("Connection manager dropped");
}
