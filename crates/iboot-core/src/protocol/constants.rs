//! Wire-level constants for Apple recovery-class USB devices.

use std::time::Duration;

/// Apple Inc. USB vendor id.
pub const APPLE_VENDOR_ID: u16 = 0x05AC;

// Product ids reported by the bootloader personalities.
pub const PID_RECOVERY_MODE_1: u16 = 0x1280;
pub const PID_RECOVERY_MODE_2: u16 = 0x1281;
pub const PID_RECOVERY_MODE_3: u16 = 0x1282;
pub const PID_RECOVERY_MODE_4: u16 = 0x1283;
pub const PID_WTF_MODE: u16 = 0x1222;
pub const PID_DFU_MODE: u16 = 0x1227;

/// All product ids a session may be captured with.
pub const SUPPORTED_PIDS: &[u16] = &[
    PID_RECOVERY_MODE_1,
    PID_RECOVERY_MODE_2,
    PID_RECOVERY_MODE_3,
    PID_RECOVERY_MODE_4,
    PID_WTF_MODE,
    PID_DFU_MODE,
];

/// Bulk OUT endpoint used for Recovery-mode uploads.
pub const RECOVERY_UPLOAD_ENDPOINT: u8 = 0x04;

/// Recovery-mode uploads go out in 0x8000-byte bulk chunks.
pub const RECOVERY_CHUNK_SIZE: usize = 0x8000;

/// DFU/WTF uploads go out in 0x800-byte control chunks.
pub const DFU_CHUNK_SIZE: usize = 0x800;

/// Bulk packet size on the Recovery upload endpoint; an upload whose
/// total length is an exact multiple needs a trailing zero-length packet.
pub const RECOVERY_PACKET_SIZE: usize = 512;

// bmRequestType values used by the protocol.
pub const REQ_DFU_OUT: u8 = 0x21;
pub const REQ_DFU_IN: u8 = 0xA1;
pub const REQ_VENDOR_OUT: u8 = 0x40;
pub const REQ_VENDOR_IN: u8 = 0xC0;
pub const REQ_RECOVERY_INITIATE: u8 = 0x41;

// DFU class bRequest codes.
pub const DFU_DNLOAD: u8 = 1;
pub const DFU_GETSTATUS: u8 = 3;
pub const DFU_CLRSTATUS: u8 = 4;
pub const DFU_GETSTATE: u8 = 5;
pub const DFU_ABORT: u8 = 6;

// DFU states observed via GETSTATE / GETSTATUS byte 4.
pub const DFU_STATE_IDLE: u8 = 2;
pub const DFU_STATE_DNLOAD_IDLE: u8 = 5;
pub const DFU_STATE_ERROR: u8 = 10;

/// GETSTATUS responses are six bytes; the state lives in byte 4.
pub const DFU_STATUS_LEN: usize = 6;

/// How many times to re-poll GETSTATUS after a chunk before giving up.
pub const DFU_STATUS_POLL_RETRIES: u32 = 20;
pub const DFU_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed footer mixed into the upload CRC ahead of the checksum itself.
pub const DFU_TRAILER_FOOTER: [u8; 12] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xAC, 0x05, 0x00, 0x01, 0x55, 0x46, 0x44, 0x10,
];

/// Footer plus the 4-byte little-endian CRC.
pub const DFU_TRAILER_SIZE: usize = 16;

/// Console commands must fit in 255 bytes (plus the NUL terminator).
pub const MAX_COMMAND_LEN: usize = 255;

/// Console responses and serial strings are read into 255-byte buffers.
pub const ENV_RESPONSE_SIZE: usize = 255;
pub const SERIAL_STRING_SIZE: usize = 255;
