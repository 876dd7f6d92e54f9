use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::DeviceError;
use crate::media::platform::MediaDevices;
use crate::models::{DeviceDescriptor, DeviceKind, DeviceSets};

/// What a refresh does with a kind that enumerated empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistryPolicy {
    /// Keep the previous list for that kind; transient empty reads are common
    /// while a device is being re-initialized.
    #[default]
    KeepLastKnown,
    ReplaceAlways,
}

impl FromStr for RegistryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_last_known" => Ok(RegistryPolicy::KeepLastKnown),
            "replace_always" => Ok(RegistryPolicy::ReplaceAlways),
            other => Err(other.to_string()),
        }
    }
}

/// Authoritative set of capture devices.
///
/// Each refresh swaps in a whole new snapshot, so readers never observe a
/// half-updated list.
pub struct DeviceRegistry {
    platform: Arc<dyn MediaDevices>,
    policy: RegistryPolicy,
    sets: watch::Sender<Arc<DeviceSets>>,
}

impl DeviceRegistry {
    pub fn new(platform: Arc<dyn MediaDevices>, policy: RegistryPolicy) -> Self {
        let (sets, _) = watch::channel(Arc::new(DeviceSets::default()));
        Self {
            platform,
            policy,
            sets,
        }
    }

    pub fn list(&self) -> Arc<DeviceSets> {
        self.sets.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DeviceSets>> {
        self.sets.subscribe()
    }

    /// Enumerate the platform and apply the result.
    pub async fn refresh(&self) -> Result<Arc<DeviceSets>, DeviceError> {
        let devices = self.platform.enumerate_devices().await?;
        Ok(self.apply(devices))
    }

    /// Partition an enumeration by kind and publish it under the configured policy.
    pub fn apply(&self, devices: Vec<DeviceDescriptor>) -> Arc<DeviceSets> {
        let fresh = DeviceSets::partition(devices);
        let policy = self.policy;

        self.sets.send_if_modified(|current| {
            let mut next = (**current).clone();
            for kind in [DeviceKind::Audio, DeviceKind::Video] {
                let incoming = fresh.of_kind(kind);
                if incoming.is_empty() && policy == RegistryPolicy::KeepLastKnown {
                    continue;
                }
                *next.of_kind_mut(kind) = incoming.to_vec();
            }

            if next == **current {
                return false;
            }
            *current = Arc::new(next);
            true
        });

        let sets = self.list();
        tracing::debug!(
            audio = sets.audio.len(),
            video = sets.video.len(),
            "Device registry refreshed"
        );
        sets
    }

    /// Enumerate now and again on every hot-plug notification.
    pub fn watch_hotplug(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut changes = self.platform.subscribe_device_changes();

        tokio::spawn(async move {
            registry.refresh_logged().await;

            loop {
                match changes.recv().await {
                    Ok(()) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Coalescing device change notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                registry.refresh_logged().await;
            }

            tracing::debug!("Device change notifications ended");
        })
    }

    async fn refresh_logged(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Device enumeration failed, keeping previous list");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VirtualMediaDevices;
    use pretty_assertions::assert_eq;

    fn registry(policy: RegistryPolicy) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(VirtualMediaDevices::new(Vec::new())), policy)
    }

    #[test]
    fn test_partitions_by_kind() {
        let registry = registry(RegistryPolicy::KeepLastKnown);
        let sets = registry.apply(vec![
            DeviceDescriptor::audio("mic-1", "Mic"),
            DeviceDescriptor::video("cam-1", "Cam"),
        ]);
        assert_eq!(sets.audio, vec![DeviceDescriptor::audio("mic-1", "Mic")]);
        assert_eq!(sets.video, vec![DeviceDescriptor::video("cam-1", "Cam")]);
    }

    #[test]
    fn test_empty_kind_keeps_last_known() {
        let registry = registry(RegistryPolicy::KeepLastKnown);
        registry.apply(vec![
            DeviceDescriptor::audio("mic-1", "Mic"),
            DeviceDescriptor::video("cam-1", "Cam"),
        ]);

        let sets = registry.apply(vec![DeviceDescriptor::audio("mic-2", "Headset")]);

        assert_eq!(sets.audio, vec![DeviceDescriptor::audio("mic-2", "Headset")]);
        assert_eq!(sets.video, vec![DeviceDescriptor::video("cam-1", "Cam")]);
    }

    #[test]
    fn test_replace_always_clears_empty_kind() {
        let registry = registry(RegistryPolicy::ReplaceAlways);
        registry.apply(vec![DeviceDescriptor::video("cam-1", "Cam")]);
        let sets = registry.apply(Vec::new());
        assert!(sets.video.is_empty());
    }

    #[test]
    fn test_unchanged_refresh_does_not_notify() {
        let registry = registry(RegistryPolicy::KeepLastKnown);
        let mut rx = registry.subscribe();

        registry.apply(vec![DeviceDescriptor::video("cam-1", "Cam")]);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        registry.apply(vec![DeviceDescriptor::video("cam-1", "Cam")]);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "replace_always".parse::<RegistryPolicy>(),
            Ok(RegistryPolicy::ReplaceAlways)
        );
        assert_eq!(
            "KEEP_LAST_KNOWN".parse::<RegistryPolicy>(),
            Ok(RegistryPolicy::KeepLastKnown)
        );
        assert!("sometimes".parse::<RegistryPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_enumeration_failure_keeps_list() {
        let platform = Arc::new(VirtualMediaDevices::new(vec![DeviceDescriptor::video(
            "cam-1", "Cam",
        )]));
        let registry = DeviceRegistry::new(platform.clone(), RegistryPolicy::KeepLastKnown);
        registry.refresh().await.unwrap();

        platform.fail_enumeration(Some("backend unavailable".to_string()));
        assert!(matches!(
            registry.refresh().await,
            Err(DeviceError::Enumeration(_))
        ));
        assert_eq!(registry.list().video.len(), 1);
    }
}
