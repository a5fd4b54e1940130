//! USB backend abstraction.
//!
//! Defines the `UsbBackend` trait over a host stack, allowing a real
//! nusb implementation and a scripted mock for unit testing.

use thiserror::Error;

/// Opaque handle to a device owned by the backend.
pub type DeviceId = u64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Descriptor request failed: {0}")]
    DescriptorFailed(String),

    #[error("Control transfer failed: {0}")]
    ControlFailed(String),

    #[error("Bulk transfer failed: {0}")]
    BulkFailed(String),

    #[error("Failed to apply configuration: {0}")]
    ConfigurationFailed(String),

    #[error("Device reset failed: {0}")]
    ResetFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The device descriptor fields the client cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    /// Index of the serial number string descriptor.
    pub i_serial_number: u8,
}

/// Setup packet for a control transfer; wLength is implied by the
/// caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
}

/// Host-stack notifications, drained in arrival order by `pump_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbEvent {
    /// The controller's role changed; `host` is false when the host
    /// role was lost.
    RoleChanged { host: bool },
    /// A device attached but is not yet addressable.
    Connected(DeviceId),
    /// A device finished enumeration and can be talked to.
    Enabled(DeviceId),
    Disabled(DeviceId),
    Disconnected(DeviceId),
}

/// Abstract USB host backend.
///
/// This trait enables:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait UsbBackend: Send + Sync {
    /// Drain pending host-stack events, in arrival order.
    fn pump_events(&self) -> Vec<UsbEvent>;

    /// Whether the controller currently holds the USB host role.
    fn is_host(&self) -> bool;

    fn device_descriptor(&self, dev: DeviceId) -> Result<DeviceDescriptor, TransportError>;

    /// UTF-16 code units of a string descriptor, without the
    /// length/type header.
    fn string_descriptor(
        &self,
        dev: DeviceId,
        index: u8,
        langid: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Blocking control transfer, host to device.
    fn control_out(
        &self,
        dev: DeviceId,
        setup: ControlSetup,
        data: &[u8],
    ) -> Result<usize, TransportError>;

    /// Blocking control transfer, device to host.
    fn control_in(
        &self,
        dev: DeviceId,
        setup: ControlSetup,
        buf: &mut [u8],
    ) -> Result<usize, TransportError>;

    /// Blocking bulk write to the given OUT endpoint.
    fn bulk_out(&self, dev: DeviceId, endpoint: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// wTotalLength of the configuration descriptor for `config`
    /// (1-based configuration value).
    fn configuration_descriptor_total_length(
        &self,
        dev: DeviceId,
        config: u8,
    ) -> Result<usize, TransportError>;

    /// Fetch the full configuration descriptor into `buf`.
    fn configuration_descriptor(
        &self,
        dev: DeviceId,
        config: u8,
        buf: &mut [u8],
    ) -> Result<usize, TransportError>;

    fn set_configuration(&self, dev: DeviceId, value: u8) -> Result<(), TransportError>;

    /// Port-level reset, forcing the device to renegotiate.
    fn reset_device(&self, dev: DeviceId) -> Result<(), TransportError>;
}
