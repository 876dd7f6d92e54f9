//! In-memory media platform.
//!
//! Backs the CLI when no real capture backend is wired in, and lets tests
//! plug/unplug hardware, deny permission or mark a device busy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DeviceError;
use crate::media::platform::{MediaConstraints, MediaDevices, MediaStream, MediaTrack};
use crate::models::{DeviceDescriptor, DeviceKind};

/// One `get_user_media` call as observed by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub constraints: MediaConstraints,
    /// Tracks still live when the call started.
    pub live_tracks_before: usize,
}

#[derive(Default)]
struct VirtualState {
    devices: Vec<DeviceDescriptor>,
    permission_denied: bool,
    enumeration_failure: Option<String>,
    busy: HashSet<String>,
    issued: Vec<Arc<VirtualTrack>>,
    acquisitions: Vec<Acquisition>,
}

pub struct VirtualMediaDevices {
    state: Mutex<VirtualState>,
    changes: broadcast::Sender<()>,
}

impl VirtualMediaDevices {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(VirtualState {
                devices,
                ..VirtualState::default()
            }),
            changes,
        }
    }

    /// One microphone and one camera.
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            DeviceDescriptor::audio("virtual-mic-0", "Virtual Microphone"),
            DeviceDescriptor::video("virtual-cam-0", "Virtual Camera"),
        ])
    }

    pub fn plug(&self, device: DeviceDescriptor) {
        tracing::debug!(device_id = %device.id, kind = ?device.kind, "Device plugged");
        self.lock().devices.push(device);
        self.notify();
    }

    pub fn unplug(&self, device_id: &str) {
        tracing::debug!(device_id = %device_id, "Device unplugged");
        self.lock().devices.retain(|d| d.id != device_id);
        self.notify();
    }

    /// Replace the whole device list in one hot-plug event.
    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.lock().devices = devices;
        self.notify();
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.lock().permission_denied = denied;
    }

    pub fn set_busy(&self, device_id: &str, busy: bool) {
        let mut state = self.lock();
        if busy {
            state.busy.insert(device_id.to_string());
        } else {
            state.busy.remove(device_id);
        }
    }

    pub fn fail_enumeration(&self, reason: Option<String>) {
        self.lock().enumeration_failure = reason;
    }

    /// Fire a device-change notification without touching the list.
    pub fn notify(&self) {
        let _ = self.changes.send(());
    }

    pub fn live_track_count(&self) -> usize {
        self.lock().issued.iter().filter(|t| t.is_live()).count()
    }

    pub fn acquisitions(&self) -> Vec<Acquisition> {
        self.lock().acquisitions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MediaDevices for VirtualMediaDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let state = self.lock();
        if let Some(reason) = &state.enumeration_failure {
            return Err(DeviceError::Enumeration(reason.clone()));
        }
        Ok(state.devices.clone())
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, DeviceError> {
        let mut state = self.lock();

        let live_tracks_before = state.issued.iter().filter(|t| t.is_live()).count();
        state.acquisitions.push(Acquisition {
            constraints: constraints.clone(),
            live_tracks_before,
        });

        if state.permission_denied {
            return Err(DeviceError::PermissionDenied(
                "capture permission denied".to_string(),
            ));
        }

        let requested = [
            (DeviceKind::Audio, constraints.audio_device_id.as_deref()),
            (DeviceKind::Video, constraints.video_device_id.as_deref()),
        ];

        let mut tracks = Vec::new();
        for (kind, device_id) in requested {
            let Some(device_id) = device_id else { continue };

            if !state
                .devices
                .iter()
                .any(|d| d.id == device_id && d.kind == kind)
            {
                return Err(DeviceError::NotFound(device_id.to_string()));
            }
            if state.busy.contains(device_id) {
                return Err(DeviceError::DeviceBusy(device_id.to_string()));
            }

            tracks.push(Arc::new(VirtualTrack {
                id: Uuid::new_v4().to_string(),
                kind,
                device_id: device_id.to_string(),
                live: AtomicBool::new(true),
            }));
        }

        if tracks.is_empty() {
            return Err(DeviceError::NotFound("no device requested".to_string()));
        }

        state.issued.retain(|t| t.is_live());
        state.issued.extend(tracks.iter().cloned());

        Ok(Box::new(VirtualStream {
            id: Uuid::new_v4().to_string(),
            tracks,
        }))
    }

    fn subscribe_device_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

pub struct VirtualTrack {
    id: String,
    kind: DeviceKind,
    device_id: String,
    live: AtomicBool,
}

impl MediaTrack for VirtualTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct VirtualStream {
    id: String,
    tracks: Vec<Arc<VirtualTrack>>,
}

impl MediaStream for VirtualStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn MediaTrack>)
            .collect()
    }
}
