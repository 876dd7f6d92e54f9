use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::DeviceError;
use crate::models::{DeviceDescriptor, DeviceKind, DeviceSets, SelectedDevices};

/// Keep `current` if it is still available, otherwise fall back to the first
/// device of its kind.
pub fn reconcile(
    current: Option<&DeviceDescriptor>,
    available: &[DeviceDescriptor],
) -> Option<DeviceDescriptor> {
    current
        .and_then(|selected| available.iter().find(|d| d.id == selected.id))
        .or_else(|| available.first())
        .cloned()
}

/// Holds the chosen audio and video device.
pub struct DeviceSelector {
    selection: watch::Sender<SelectedDevices>,
}

impl DeviceSelector {
    pub fn new() -> Self {
        let (selection, _) = watch::channel(SelectedDevices::default());
        Self { selection }
    }

    pub fn current(&self) -> SelectedDevices {
        self.selection.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectedDevices> {
        self.selection.subscribe()
    }

    /// Re-check the selection against a fresh registry snapshot.
    /// Returns whether the selection changed.
    pub fn revalidate(&self, sets: &DeviceSets) -> bool {
        self.selection.send_if_modified(|selection| {
            let mut changed = false;
            for kind in [DeviceKind::Audio, DeviceKind::Video] {
                let next = reconcile(selection.get(kind), sets.of_kind(kind));
                if next.as_ref() != selection.get(kind) {
                    tracing::info!(
                        kind = ?kind,
                        from = ?selection.get(kind).map(|d| &d.id),
                        to = ?next.as_ref().map(|d| &d.id),
                        "Device selection changed"
                    );
                    selection.set(kind, next);
                    changed = true;
                }
            }
            changed
        })
    }

    /// User choice. Sticks until the device disappears.
    pub fn select(&self, sets: &DeviceSets, kind: DeviceKind, id: &str) -> Result<(), DeviceError> {
        let device = sets
            .find(kind, id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;

        self.selection.send_if_modified(|selection| {
            if selection.get(kind) == Some(&device) {
                return false;
            }
            selection.set(kind, Some(device));
            true
        });
        Ok(())
    }

    /// Revalidate on every registry snapshot until the registry goes away.
    pub fn follow(self: &Arc<Self>, mut sets: watch::Receiver<Arc<DeviceSets>>) -> JoinHandle<()> {
        let selector = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let snapshot = sets.borrow_and_update().clone();
                selector.revalidate(&snapshot);
                if sets.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new()
    }
}
