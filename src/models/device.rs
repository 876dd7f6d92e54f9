use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Audio,
    Video,
}

/// One physical capture device as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, kind: DeviceKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }

    pub fn audio(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, DeviceKind::Audio, label)
    }

    pub fn video(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, DeviceKind::Video, label)
    }
}

/// Available devices partitioned by kind, in platform enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSets {
    pub audio: Vec<DeviceDescriptor>,
    pub video: Vec<DeviceDescriptor>,
}

impl DeviceSets {
    pub fn partition(devices: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        let mut sets = DeviceSets::default();
        for device in devices {
            match device.kind {
                DeviceKind::Audio => sets.audio.push(device),
                DeviceKind::Video => sets.video.push(device),
            }
        }
        sets
    }

    pub fn of_kind(&self, kind: DeviceKind) -> &[DeviceDescriptor] {
        match kind {
            DeviceKind::Audio => &self.audio,
            DeviceKind::Video => &self.video,
        }
    }

    pub(crate) fn of_kind_mut(&mut self, kind: DeviceKind) -> &mut Vec<DeviceDescriptor> {
        match kind {
            DeviceKind::Audio => &mut self.audio,
            DeviceKind::Video => &mut self.video,
        }
    }

    pub fn find(&self, kind: DeviceKind, id: &str) -> Option<&DeviceDescriptor> {
        self.of_kind(kind).iter().find(|d| d.id == id)
    }
}

/// At most one chosen device per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedDevices {
    pub audio: Option<DeviceDescriptor>,
    pub video: Option<DeviceDescriptor>,
}

impl SelectedDevices {
    pub fn get(&self, kind: DeviceKind) -> Option<&DeviceDescriptor> {
        match kind {
            DeviceKind::Audio => self.audio.as_ref(),
            DeviceKind::Video => self.video.as_ref(),
        }
    }

    pub fn set(&mut self, kind: DeviceKind, device: Option<DeviceDescriptor>) {
        match kind {
            DeviceKind::Audio => self.audio = device,
            DeviceKind::Video => self.video = device,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    /// `(audio id, video id)`; two selections with equal ids capture the same devices.
    pub fn ids(&self) -> (Option<&str>, Option<&str>) {
        (
            self.audio.as_ref().map(|d| d.id.as_str()),
            self.video.as_ref().map(|d| d.id.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_keeps_enumeration_order() {
        let sets = DeviceSets::partition(vec![
            DeviceDescriptor::video("cam-1", "Front"),
            DeviceDescriptor::audio("mic-1", "Built-in"),
            DeviceDescriptor::video("cam-2", "USB"),
        ]);

        let video_ids: Vec<&str> = sets.video.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(video_ids, vec!["cam-1", "cam-2"]);
        assert_eq!(sets.audio.len(), 1);
        assert!(sets.find(DeviceKind::Video, "cam-2").is_some());
        assert!(sets.find(DeviceKind::Audio, "cam-2").is_none());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DeviceKind::Video).unwrap(),
            "\"video\""
        );
    }
}
