//! iBoot-Core: client engine for Apple recovery-class USB devices.
//!
//! This crate drives devices that enumerate in iBoot Recovery, DFU or
//! WTF mode: it admits and finalizes a device session, parses the
//! identity encoded in the serial string, uploads firmware buffers
//! with the mode-specific framing, and speaks the Recovery console
//! command protocol.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, device modes, upload CRC
//! - **Transport**: USB backend abstraction (nusb, mock)
//! - **Devinfo**: Serial-string identity parser and nonce extraction
//! - **Catalog**: Static model table (chip/board id to product name)
//! - **Events**: Observer pattern for UI decoupling
//! - **Client**: High-level orchestrator (admission, finalization,
//!   upload, console commands)
//!
//! # Example
//!
//! ```no_run
//! use iboot_core::{Client, ClientConfig, NusbBackend};
//!
//! let mut client = Client::new(NusbBackend::new(), ClientConfig::default());
//! while client.poll().is_err() {
//!     std::thread::sleep(std::time::Duration::from_millis(250));
//! }
//! if let Some(info) = client.device_info() {
//!     println!("Captured CPID:{:04x} ECID:{:016X}", info.cpid, info.ecid);
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod devinfo;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use catalog::DeviceEntry;
pub use client::{Client, ClientConfig, ConnectionPolicy, SendOptions};
pub use devinfo::DeviceInfo;
pub use error::{Error, Result};
pub use events::{ClientEvent, ClientObserver, NullObserver, TracingObserver};
pub use protocol::{Crc32, Mode};
pub use transport::{
    DeviceDescriptor, DeviceId, MockBackend, NusbBackend, TransportError, UsbBackend, UsbEvent,
};
