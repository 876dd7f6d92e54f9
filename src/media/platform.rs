//! Seam to the platform's media API.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::DeviceError;
use crate::models::{DeviceDescriptor, DeviceKind, SelectedDevices};

/// Device ids a stream must be captured from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio_device_id: Option<String>,
    pub video_device_id: Option<String>,
}

impl From<&SelectedDevices> for MediaConstraints {
    fn from(selection: &SelectedDevices) -> Self {
        Self {
            audio_device_id: selection.audio.as_ref().map(|d| d.id.clone()),
            video_device_id: selection.video.as_ref().map(|d| d.id.clone()),
        }
    }
}

pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> DeviceKind;
    fn device_id(&self) -> &str;
    /// Release the underlying device. Idempotent.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }

    fn is_active(&self) -> bool {
        self.tracks().iter().any(|t| t.is_live())
    }
}

/// Where a live stream gets rendered (a preview surface in the UI)
pub trait RenderTarget: Send + Sync {
    fn attach(&self, stream: Arc<dyn MediaStream>);
    fn detach(&self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, DeviceError>;

    /// Fires whenever capture hardware is plugged or unplugged.
    fn subscribe_device_changes(&self) -> broadcast::Receiver<()>;
}
