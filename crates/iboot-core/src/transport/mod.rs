//! USB backend layer.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::MockBackend;
pub use nusb::NusbBackend;
pub use traits::{
    ControlSetup, DeviceDescriptor, DeviceId, TransportError, UsbBackend, UsbEvent,
};
