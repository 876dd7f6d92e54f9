pub mod capture;
pub mod platform;
pub mod registry;
pub mod selector;
pub mod virtual_devices;

pub use capture::{CaptureSession, CaptureStatus};
pub use platform::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, RenderTarget};
pub use registry::{DeviceRegistry, RegistryPolicy};
pub use selector::DeviceSelector;
pub use virtual_devices::{Acquisition, VirtualMediaDevices};
