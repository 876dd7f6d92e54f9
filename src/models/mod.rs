pub mod device;
pub mod room;

pub use device::{DeviceDescriptor, DeviceKind, DeviceSets, SelectedDevices};
pub use room::{Participant, Roster};
