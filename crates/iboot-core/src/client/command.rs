//! iBoot console commands over vendor control transfers.
//!
//! Only Recovery-mode devices run the console; DFU/WTF devices reject
//! everything here with `ServiceNotAvailable`. Commands go out as a
//! NUL-terminated string on a vendor OUT request; responses come back
//! on a vendor IN request.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::ClientObserver;
use crate::protocol::constants::*;
use crate::transport::UsbBackend;

use super::Client;

/// Commands that make the device leave the console immediately; they
/// are sent with bRequest 1 so the stack does not wait for a reply.
fn is_breq_command(command: &str) -> bool {
    matches!(command, "go" | "bootx" | "reboot" | "memboot")
}

impl<B: UsbBackend, O: ClientObserver> Client<B, O> {
    /// Send a console command; bRequest is derived from the verb.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        self.send_command_breq(command, u8::from(is_breq_command(command)))
    }

    /// Send a console command with an explicit bRequest.
    pub fn send_command_breq(&mut self, command: &str, b_request: u8) -> Result<()> {
        let result = self.send_command_raw(command, b_request);
        if let Err(e) = &result {
            warn!(command, error = %e, "Failed to send command");
        }
        result
    }

    /// Read an environment variable from the console.
    pub fn getenv(&mut self, variable: &str) -> Result<String> {
        self.send_command_raw(&format!("getenv {variable}"), 0)?;
        let mut buf = [0u8; ENV_RESPONSE_SIZE];
        let n = self.usb_control_in(REQ_VENDOR_IN, 0, 0, 0, &mut buf)?;
        let end = buf[..n].iter().position(|&b| b == 0).unwrap_or(n);
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    pub fn setenv(&mut self, variable: &str, value: &str) -> Result<()> {
        self.send_command_raw(&format!("setenv {variable} {value}"), 0)
    }

    /// `setenv` variant that bypasses the console's permission checks.
    pub fn setenv_np(&mut self, variable: &str, value: &str) -> Result<()> {
        self.send_command_raw(&format!("setenvnp {variable} {value}"), 0)
    }

    /// Persist the console environment to NVRAM.
    pub fn saveenv(&mut self) -> Result<()> {
        self.send_command_raw("saveenv", 0)
    }

    /// Ask the console to reboot the device.
    pub fn reboot(&mut self) -> Result<()> {
        self.send_command_raw("reboot", 0)
    }

    /// Return code of the last console command.
    pub fn getret(&mut self) -> Result<u32> {
        if !self.is_usable() {
            return Err(Error::NoDevice);
        }
        let mut buf = [0u8; ENV_RESPONSE_SIZE];
        let n = self.usb_control_in(REQ_VENDOR_IN, 0, 0, 0, &mut buf)?;
        if n == 0 {
            return Ok(0);
        }
        Ok(u32::from(buf[0]))
    }

    fn send_command_raw(&mut self, command: &str, b_request: u8) -> Result<()> {
        if !self.is_usable() {
            return Err(Error::NoDevice);
        }
        let Some(mode) = self.raw_mode() else {
            return Err(Error::NoDevice);
        };
        if !mode.is_recovery() {
            return Err(Error::ServiceNotAvailable(mode));
        }
        if command.is_empty() {
            return Err(Error::NoCommand);
        }
        if command.len() > MAX_COMMAND_LEN {
            return Err(Error::CommandTooLong);
        }
        debug!(command, b_request, "Sending command");
        let mut data = Vec::with_capacity(command.len() + 1);
        data.extend_from_slice(command.as_bytes());
        data.push(0);
        self.usb_control_out(REQ_VENDOR_OUT, b_request, 0, 0, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ConnectionPolicy};
    use crate::transport::{DeviceDescriptor, MockBackend};

    fn ready_client(pid: u16) -> Client<MockBackend> {
        let mut client = Client::new(
            MockBackend::new(),
            ClientConfig {
                policy: ConnectionPolicy::AcceptAll,
                ecid_restriction: 0,
            },
        );
        let dev = client.backend().add_device(
            DeviceDescriptor {
                id_vendor: 0x05AC,
                id_product: pid,
                bcd_device: 0,
                i_serial_number: 3,
            },
            "CPID:8010 ECID:1234",
        );
        client.backend().attach(dev);
        client.poll().unwrap();
        client.backend().clear_logs();
        client
    }

    #[test]
    fn test_command_is_nul_terminated_vendor_request() {
        let mut client = ready_client(0x1281);
        client.send_command("printenv").unwrap();

        let controls = client.backend().control_out_log();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].setup.bm_request_type, REQ_VENDOR_OUT);
        assert_eq!(controls[0].setup.b_request, 0);
        assert_eq!(controls[0].data, b"printenv\0");
    }

    #[test]
    fn test_transition_commands_use_breq_one() {
        let mut client = ready_client(0x1281);
        for command in ["go", "bootx", "reboot", "memboot"] {
            client.send_command(command).unwrap();
        }
        client.send_command("ticket").unwrap();

        let requests: Vec<u8> = client
            .backend()
            .control_out_log()
            .iter()
            .map(|c| c.setup.b_request)
            .collect();
        assert_eq!(requests, vec![1, 1, 1, 1, 0]);
    }

    #[test]
    fn test_explicit_breq_override() {
        let mut client = ready_client(0x1281);
        client.send_command_breq("go", 0).unwrap();
        assert_eq!(client.backend().control_out_log()[0].setup.b_request, 0);
    }

    #[test]
    fn test_commands_rejected_outside_recovery() {
        let mut client = ready_client(0x1227);
        assert!(matches!(
            client.send_command("go"),
            Err(Error::ServiceNotAvailable(_))
        ));
        assert!(matches!(
            client.getenv("build-version"),
            Err(Error::ServiceNotAvailable(_))
        ));
        assert!(client.backend().control_out_log().is_empty());
    }

    #[test]
    fn test_command_length_limits() {
        let mut client = ready_client(0x1281);
        assert!(matches!(client.send_command(""), Err(Error::NoCommand)));

        let long = "x".repeat(256);
        assert!(matches!(
            client.send_command(&long),
            Err(Error::CommandTooLong)
        ));

        let exact = "x".repeat(255);
        client.send_command(&exact).unwrap();
        assert_eq!(client.backend().control_out_log().len(), 1);
    }

    #[test]
    fn test_getenv_reads_nul_terminated_reply() {
        let mut client = ready_client(0x1281);
        client.backend().queue_control_in(b"production\0junk");

        let value = client.getenv("build-style").unwrap();
        assert_eq!(value, "production");

        let controls = client.backend().control_out_log();
        assert_eq!(controls[0].data, b"getenv build-style\0");
        let reads = client.backend().control_in_log();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].setup.bm_request_type, REQ_VENDOR_IN);
    }

    #[test]
    fn test_setenv_variants_format_commands() {
        let mut client = ready_client(0x1281);
        client.setenv("auto-boot", "true").unwrap();
        client.setenv_np("boot-args", "-v").unwrap();
        client.saveenv().unwrap();

        let commands: Vec<Vec<u8>> = client
            .backend()
            .control_out_log()
            .iter()
            .map(|c| c.data.clone())
            .collect();
        assert_eq!(commands[0], b"setenv auto-boot true\0");
        assert_eq!(commands[1], b"setenvnp boot-args -v\0");
        assert_eq!(commands[2], b"saveenv\0");
    }

    #[test]
    fn test_getret_reads_first_byte() {
        let mut client = ready_client(0x1281);
        client.backend().queue_control_in(&[0x05, 0x00, 0x00, 0x00]);
        assert_eq!(client.getret().unwrap(), 5);
    }
}
