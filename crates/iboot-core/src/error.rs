//! Library error taxonomy.

use thiserror::Error;

use crate::protocol::Mode;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No captured device, or the host role was lost.
    #[error("No device")]
    NoDevice,

    #[error("Failed to fetch a descriptor from the device")]
    DescriptorFetchFailed,

    #[error("Failed to apply a configuration to the device")]
    DescriptorSetFailed,

    #[error("Device ECID {actual:016X} does not match the restriction {expected:016X}")]
    EcidMismatch { expected: u64, actual: u64 },

    /// A failed finalization attempt latched; the session must be
    /// cleared by a disconnect before another device can finalize.
    #[error("Finalization is blocked for this session")]
    FinalizationBlocked,

    #[error("USB upload failed")]
    UploadFailed,

    #[error("Device reported an invalid DFU status")]
    InvalidStatus,

    #[error("Command exceeds 255 bytes")]
    CommandTooLong,

    #[error("Empty command")]
    NoCommand,

    #[error("Operation not available in {0} mode")]
    ServiceNotAvailable(Mode),

    #[error("Failed to reset the USB device")]
    ResetFailed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
