use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{Credential, Identity};
use crate::config::Config;
use crate::error::Result;
use crate::media::{
    CaptureSession, CaptureStatus, DeviceRegistry, DeviceSelector, MediaDevices, RenderTarget,
};
use crate::models::{DeviceKind, DeviceSets, SelectedDevices};
use crate::session::{Session, SessionEffect, SessionPhase};
use crate::ws::{ConnectionManager, ConnectionState, RoomProtocolHandler};

/// Shared application state, built once per signed-in session
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connection: Arc<ConnectionManager>,
    pub protocol: Arc<RoomProtocolHandler>,
    pub session: Arc<Session>,
    pub registry: Arc<DeviceRegistry>,
    pub selector: Arc<DeviceSelector>,
    pub capture: Arc<CaptureSession>,
    identity: Arc<Mutex<Identity>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AppState {
    /// Build every component, start the background tasks and open the channel.
    ///
    /// The receiver yields the session effects meant for the UI.
    pub fn start(
        config: Config,
        identity: Identity,
        platform: Arc<dyn MediaDevices>,
        render_target: Option<Arc<dyn RenderTarget>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEffect>)> {
        config.validate()?;
        let config = Arc::new(config);

        let (connection, frames) = ConnectionManager::new(Arc::clone(&config));
        let connection = Arc::new(connection);
        let protocol = Arc::new(RoomProtocolHandler::with_capacity(
            Arc::clone(&connection),
            config.event_buffer,
        ));
        let (session, effects) = Session::new(identity.user_id.clone(), Arc::clone(&protocol));
        let session = Arc::new(session);

        let registry = Arc::new(DeviceRegistry::new(
            Arc::clone(&platform),
            config.registry_policy,
        ));
        let selector = Arc::new(DeviceSelector::new());
        let capture = Arc::new(CaptureSession::new(platform, render_target));

        let tasks = vec![
            protocol.spawn(frames),
            session.spawn(),
            registry.watch_hotplug(),
            selector.follow(registry.subscribe()),
            capture.follow(selector.subscribe()),
        ];

        let state = Self {
            config,
            connection,
            protocol,
            session,
            registry,
            selector,
            capture,
            identity: Arc::new(Mutex::new(identity.clone())),
            tasks: Arc::new(Mutex::new(tasks)),
        };

        if let Err(e) = state.connection.connect(&identity.credential) {
            state.teardown();
            return Err(e.into());
        }

        tracing::info!(user_id = %identity.user_id, "Client state ready");
        Ok((state, effects))
    }

    pub fn user_id(&self) -> String {
        self.lock_identity().user_id.clone()
    }

    pub fn create_room(&self) {
        self.session.create_room();
    }

    pub fn enter_room(&self, room_id: &str) {
        self.session.enter_room(room_id);
    }

    pub fn verify_room(&self, room_id: &str) {
        self.session.verify_room(room_id);
    }

    /// The identity provider issued a new credential; reopen the channel with it.
    pub fn refresh_credential(&self, credential: Credential) -> Result<()> {
        self.lock_identity().credential = credential.clone();
        self.connection.reconnect_with(&credential)?;
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn devices(&self) -> Arc<DeviceSets> {
        self.registry.list()
    }

    pub fn selection(&self) -> SelectedDevices {
        self.selector.current()
    }

    pub fn select_device(&self, kind: DeviceKind, id: &str) -> Result<()> {
        self.selector.select(&self.registry.list(), kind, id)?;
        Ok(())
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.capture.status()
    }

    /// Release hardware, close the channel and stop background tasks.
    ///
    /// Capture is stopped synchronously before anything else. Safe to call
    /// more than once.
    pub fn teardown(&self) {
        self.capture.stop();
        self.connection.close();
        self.session.leave();

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for task in tasks {
            task.abort();
        }
        tracing::info!("Client state torn down");
    }

    fn lock_identity(&self) -> std::sync::MutexGuard<'_, Identity> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner())
    }
}
