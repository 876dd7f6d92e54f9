use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::error::{CaptureError, DeviceError};
use crate::media::platform::{MediaConstraints, MediaDevices, MediaStream, RenderTarget};
use crate::models::SelectedDevices;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureStatus {
    Idle,
    Live { stream_id: String },
    Failed { error: String },
}

impl From<&CaptureError> for CaptureStatus {
    fn from(err: &CaptureError) -> Self {
        CaptureStatus::Failed {
            error: err.to_string(),
        }
    }
}

/// The local stream bound to the current device selection.
///
/// At most one stream is held at a time. `start` releases the previous stream
/// before asking the platform for a new one, and `start` calls run one after
/// another.
pub struct CaptureSession {
    platform: Arc<dyn MediaDevices>,
    target: Option<Arc<dyn RenderTarget>>,
    serial: tokio::sync::Mutex<()>,
    current: Mutex<Option<Arc<dyn MediaStream>>>,
    /// Bumped by every start and stop; an acquisition that finishes under a
    /// newer generation is discarded.
    generation: AtomicU64,
    status: watch::Sender<CaptureStatus>,
}

impl CaptureSession {
    pub fn new(platform: Arc<dyn MediaDevices>, target: Option<Arc<dyn RenderTarget>>) -> Self {
        let (status, _) = watch::channel(CaptureStatus::Idle);
        Self {
            platform,
            target,
            serial: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            status,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.lock_current()
            .as_ref()
            .is_some_and(|stream| stream.is_active())
    }

    /// Acquire a stream for `selection` and bind it to the render target.
    /// Returns the new stream id.
    pub async fn start(&self, selection: &SelectedDevices) -> Result<String, CaptureError> {
        let _serial = self.serial.lock().await;

        let generation = {
            let mut current = self.lock_current();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.release(&mut current);
            generation
        };

        if selection.is_empty() {
            self.status.send_replace(CaptureStatus::Idle);
            return Err(DeviceError::NothingSelected);
        }

        let constraints = MediaConstraints::from(selection);
        tracing::debug!(
            audio = ?constraints.audio_device_id,
            video = ?constraints.video_device_id,
            "Requesting capture stream"
        );

        let acquired = self.platform.get_user_media(&constraints).await;
        let stream: Arc<dyn MediaStream> = match acquired {
            Ok(stream) => Arc::from(stream),
            Err(e) => {
                tracing::warn!(error = %e, "Capture acquisition failed");
                self.status.send_replace(CaptureStatus::from(&e));
                return Err(e);
            }
        };

        let mut current = self.lock_current();
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(
                stream_id = %stream.id(),
                "Capture stopped during acquisition, discarding stream"
            );
            stream.stop_all();
            return Err(DeviceError::Cancelled);
        }

        if let Some(target) = &self.target {
            target.attach(Arc::clone(&stream));
        }
        let stream_id = stream.id().to_string();
        *current = Some(stream);
        drop(current);

        tracing::info!(stream_id = %stream_id, "Capture started");
        self.status.send_replace(CaptureStatus::Live {
            stream_id: stream_id.clone(),
        });
        Ok(stream_id)
    }

    /// Stop every track and detach from the render target.
    ///
    /// Synchronous so teardown can release hardware without awaiting; an
    /// acquisition still in flight is discarded when it completes.
    pub fn stop(&self) {
        let mut current = self.lock_current();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.release(&mut current) {
            tracing::info!("Capture stopped");
        }
        drop(current);
        self.status.send_replace(CaptureStatus::Idle);
    }

    /// Restart capture whenever the selected device ids change.
    pub fn follow(self: &Arc<Self>, selection: watch::Receiver<SelectedDevices>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut selections = WatchStream::new(selection);
            let mut bound: Option<SelectedDevices> = None;

            while let Some(selection) = selections.next().await {
                if bound.as_ref().map(SelectedDevices::ids) == Some(selection.ids()) {
                    continue;
                }

                if selection.is_empty() {
                    session.stop();
                } else if let Err(e) = session.start(&selection).await {
                    tracing::warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "Could not capture selected devices"
                    );
                }
                bound = Some(selection);
            }
        })
    }

    fn release(&self, current: &mut Option<Arc<dyn MediaStream>>) -> bool {
        let Some(stream) = current.take() else {
            return false;
        };
        if let Some(target) = &self.target {
            target.detach();
        }
        stream.stop_all();
        true
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<dyn MediaStream>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let mut current = self.lock_current();
        self.release(&mut current);
    }
}
