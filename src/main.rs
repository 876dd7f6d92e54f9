use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use truegather_client::auth::{Credential, Identity};
use truegather_client::config::Config;
use truegather_client::error::AppError;
use truegather_client::media::VirtualMediaDevices;
use truegather_client::session::SessionEffect;
use truegather_client::state::AppState;
use truegather_client::ws::ConnectionState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting TrueGather client...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        reconnect_attempts = config.reconnect_attempts,
        registry_policy = ?config.registry_policy,
        "Configuration loaded"
    );

    let identity = load_identity()?;
    tracing::info!(
        user_id = %identity.user_id,
        expires = ?identity.credential_expiry,
        "Identity loaded"
    );

    let platform = Arc::new(VirtualMediaDevices::with_default_devices());
    let (state, mut effects) = AppState::start(config, identity, platform, None)?;

    // Room to join once the channel first opens; `None` creates a new one.
    let mut pending_room = Some(std::env::var("ROOM_ID").ok());

    let mut connection_state = state.connection.subscribe_state();
    // the channel may already be open
    connection_state.mark_changed();
    let mut errors = state.connection.subscribe_errors();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = connection_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *connection_state.borrow_and_update();
                tracing::debug!(state = ?current, "Connection state changed");
                if current == ConnectionState::Open {
                    match pending_room.take() {
                        Some(Some(room_id)) => state.enter_room(&room_id),
                        Some(None) => state.create_room(),
                        None => {}
                    }
                }
            }
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                let terminal = errors.borrow_and_update().clone();
                if let Some(e) = terminal {
                    tracing::error!(error = %e, "Signaling channel gave up");
                    eprintln!("{}", AppError::from(e).user_message());
                    break;
                }
            }
            effect = effects.recv() => match effect {
                Some(SessionEffect::Navigate { room_id }) => {
                    tracing::info!(room_id = %room_id, "Entering room");
                    state.enter_room(&room_id);
                }
                Some(SessionEffect::ShowError { reason }) => {
                    tracing::error!(reason = %reason, "Room request failed");
                    eprintln!("{}", AppError::Server(reason).user_message());
                }
                Some(SessionEffect::RosterUpdated(participants)) => {
                    tracing::info!(count = participants.len(), "Participants updated");
                }
                Some(other) => tracing::info!(effect = ?other, "Session effect"),
                None => break,
            },
        }
    }

    state.teardown();
    tracing::info!("Client shutdown complete");

    Ok(())
}

/// `ACCESS_TOKEN` is required; `USER_ID` overrides the token's subject.
fn load_identity() -> anyhow::Result<Identity> {
    let token = std::env::var("ACCESS_TOKEN").context("ACCESS_TOKEN is required")?;

    match std::env::var("USER_ID") {
        Ok(user_id) => Ok(Identity::new(user_id, Credential::new(token), None)),
        Err(_) => Ok(Identity::from_access_token(&token)?),
    }
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
