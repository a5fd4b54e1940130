//! Bootloader personalities, keyed by the reported USB product id.

use std::fmt;

use super::constants::*;

/// Mode a captured device is running in.
///
/// The four Recovery ids share one behavior; the distinction only
/// matters for display. `PwnedDfu` is never reported on the wire: it is
/// inferred client-side from a non-empty PWND marker in the serial
/// string of a device enumerating as DFU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Recovery1,
    Recovery2,
    Recovery3,
    Recovery4,
    Wtf,
    Dfu,
    PwnedDfu,
}

impl Mode {
    pub fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            PID_RECOVERY_MODE_1 => Some(Mode::Recovery1),
            PID_RECOVERY_MODE_2 => Some(Mode::Recovery2),
            PID_RECOVERY_MODE_3 => Some(Mode::Recovery3),
            PID_RECOVERY_MODE_4 => Some(Mode::Recovery4),
            PID_WTF_MODE => Some(Mode::Wtf),
            PID_DFU_MODE => Some(Mode::Dfu),
            _ => None,
        }
    }

    pub fn pid(&self) -> Option<u16> {
        match self {
            Mode::Recovery1 => Some(PID_RECOVERY_MODE_1),
            Mode::Recovery2 => Some(PID_RECOVERY_MODE_2),
            Mode::Recovery3 => Some(PID_RECOVERY_MODE_3),
            Mode::Recovery4 => Some(PID_RECOVERY_MODE_4),
            Mode::Wtf => Some(PID_WTF_MODE),
            Mode::Dfu => Some(PID_DFU_MODE),
            Mode::PwnedDfu => None,
        }
    }

    /// Console commands and bulk uploads are only available here.
    pub fn is_recovery(&self) -> bool {
        matches!(
            self,
            Mode::Recovery1 | Mode::Recovery2 | Mode::Recovery3 | Mode::Recovery4
        )
    }

    /// Modes that use the DFU control-transfer upload framing.
    pub fn is_dfu(&self) -> bool {
        matches!(self, Mode::Wtf | Mode::Dfu | Mode::PwnedDfu)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Recovery1 | Mode::Recovery2 | Mode::Recovery3 | Mode::Recovery4 => {
                write!(f, "Recovery")
            }
            Mode::Wtf => write!(f, "WTF"),
            Mode::Dfu => write!(f, "DFU"),
            Mode::PwnedDfu => write!(f, "PWNDFU"),
        }
    }
}
