//! Protocol-level definitions: constants, device modes, upload CRC.

pub mod constants;
pub mod crc;
pub mod mode;

pub use crc::Crc32;
pub use mode::Mode;
