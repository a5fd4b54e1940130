//! Device identity parsed from the iBoot serial string.
//!
//! Recovery-class devices encode their identity in the USB serial
//! number descriptor as a flat tag sequence, e.g.:
//!
//! `CPID:8010 CPRV:11 CPFM:03 SCEP:01 BDID:08 ECID:001A2B3C4D5E6F70 IBFL:3C SRTG:[iBoot-2696.0.0.1.33]`
//!
//! Tags are located by substring search, so field order never matters.
//! An absent tag leaves its field at zero (or unset for strings); there
//! is no "missing" sentinel for the numeric fields.

use tracing::warn;

/// Identity of a captured device, valid once the session is finalized.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Chip id (e.g. 0x8010).
    pub cpid: u32,
    /// Chip revision.
    pub cprv: u32,
    /// Chip fuse mode.
    pub cpfm: u32,
    /// Security epoch.
    pub scep: u32,
    /// Board id.
    pub bdid: u32,
    /// Unique chip id.
    pub ecid: u64,
    /// iBoot flags.
    pub ibfl: u32,
    /// USB product id the device enumerated with.
    pub pid: u16,
    /// The raw serial string the rest was parsed from.
    pub serial: Option<String>,
    pub srnm: Option<String>,
    pub imei: Option<String>,
    pub srtg: Option<String>,
    /// Exploit marker; non-empty means a pwned DFU.
    pub pwnd: Option<String>,
    pub ap_nonce: Option<Vec<u8>>,
    pub sep_nonce: Option<Vec<u8>>,
}

impl DeviceInfo {
    /// Parse the tagged fields out of an iBoot serial string. Nonces and
    /// the product id are filled in separately by the session.
    pub fn from_iboot_string(serial: &str) -> Self {
        Self {
            cpid: hex_field(serial, "CPID:") as u32,
            cprv: hex_field(serial, "CPRV:") as u32,
            cpfm: hex_field(serial, "CPFM:") as u32,
            scep: hex_field(serial, "SCEP:") as u32,
            bdid: hex_field(serial, "BDID:") as u32,
            ecid: hex_field(serial, "ECID:"),
            ibfl: hex_field(serial, "IBFL:") as u32,
            srnm: bracket_field(serial, "SRNM:["),
            imei: bracket_field(serial, "IMEI:["),
            srtg: bracket_field(serial, "SRTG:["),
            pwnd: bracket_field(serial, "PWND:["),
            serial: Some(serial.to_string()),
            ..Default::default()
        }
    }
}

/// Hex value following `tag`, or 0 when the tag is absent.
fn hex_field(s: &str, tag: &str) -> u64 {
    let Some(pos) = s.find(tag) else { return 0 };
    let rest = &s[pos + tag.len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(rest.len());
    let digits = &rest[..end.min(16)];
    u64::from_str_radix(digits, 16).unwrap_or(0)
}

/// Bracketed value following `tag` (which includes the opening `[`).
/// Runs to the closing bracket; when the token ends without one, the
/// whole whitespace-delimited token is taken.
fn bracket_field(s: &str, tag: &str) -> Option<String> {
    let pos = s.find(tag)?;
    let rest = &s[pos + tag.len()..];
    let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let token = &rest[..token_end];
    let end = token.rfind(']').unwrap_or(token.len());
    Some(token[..end].to_string())
}

/// Extract a hex nonce tagged `TAG:` from a space-separated descriptor
/// string (e.g. `NONC:a1b2… SNON:00ff…`). Failure is soft: a missing
/// tag or malformed hex logs a warning and yields `None`.
pub fn nonce_with_tag(buf: &str, tag: &str) -> Option<Vec<u8>> {
    let mut start = 0usize;
    let hex = loop {
        let Some(rel) = buf[start..].find(':') else {
            break None;
        };
        let colon = start + rel;
        if colon < start + tag.len() {
            break None;
        }
        let next_space = buf[colon..].find(' ').map(|i| colon + i);
        if &buf[colon - tag.len()..colon] == tag {
            break Some(&buf[colon + 1..next_space.unwrap_or(buf.len())]);
        }
        match next_space {
            Some(space) => start = space + 1,
            None => break None,
        }
    };

    let Some(hex) = hex else {
        warn!(tag, "nonce tag not found in descriptor string");
        return None;
    };
    let len = hex.len() / 2;
    if len == 0 {
        warn!(tag, "nonce tag not found in descriptor string");
        return None;
    }

    let mut nonce = Vec::with_capacity(len);
    for i in 0..len {
        match u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16) {
            Ok(byte) => nonce.push(byte),
            Err(_) => {
                warn!(tag, "unexpected data in nonce value");
                return None;
            }
        }
    }
    Some(nonce)
}
