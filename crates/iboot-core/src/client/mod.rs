//! Recovery client - high-level orchestrator for a captured device.
//!
//! A `Client` owns a USB backend, drains its event queue, admits at
//! most one device at a time according to the configured policy, and
//! finalizes the winner (serial parse, ECID check, configuration,
//! nonces) before exposing the protocol operations in the `upload` and
//! `command` submodules.

mod command;
mod upload;

pub use upload::SendOptions;

use std::sync::Arc;

use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{self, DeviceEntry};
use crate::devinfo::{self, DeviceInfo};
use crate::error::{Error, Result};
use crate::events::{ClientObserver, TracingObserver};
use crate::protocol::Mode;
use crate::protocol::constants::*;
use crate::transport::{ControlSetup, DeviceDescriptor, DeviceId, UsbBackend, UsbEvent};

/// Admission policy for newly enabled devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPolicy {
    /// A new device always wins; any current session is discarded first.
    #[default]
    AcceptAll,
    /// New devices are ignored while a session is usable.
    AcceptWhenIdle,
    /// Only the first admitted device over the client's lifetime.
    OneConnectionLimit,
}

/// Immutable client configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub policy: ConnectionPolicy,
    /// Allow-list: when nonzero, only the device with this ECID may
    /// finalize.
    pub ecid_restriction: u64,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> AnyResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FinalizeState {
    #[default]
    Pending,
    Finalized,
    /// A failed attempt latched; only clearing the session recovers.
    Blocked,
}

/// Everything tied to the captured device. Dropped as one unit.
#[derive(Debug)]
struct Session {
    handle: DeviceId,
    descriptor: DeviceDescriptor,
    info: DeviceInfo,
    /// Wire-reported mode; PwnedDfu is derived on demand, never stored.
    mode: Mode,
    finalize: FinalizeState,
}

/// Recovery client - orchestrates device admission and the protocol.
pub struct Client<B: UsbBackend, O: ClientObserver = TracingObserver> {
    config: ClientConfig,
    backend: B,
    observer: Arc<O>,
    num_connections: u32,
    session: Option<Session>,
}

impl<B: UsbBackend> Client<B, TracingObserver> {
    /// Create a client with the default tracing observer.
    pub fn new(backend: B, config: ClientConfig) -> Self {
        Self::with_observer(backend, config, Arc::new(TracingObserver))
    }
}

impl<B: UsbBackend, O: ClientObserver> Client<B, O> {
    /// Create a client with a custom observer.
    pub fn with_observer(backend: B, config: ClientConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            backend,
            observer,
            num_connections: 0,
            session: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Devices admitted so far, counting the current one.
    pub fn num_connections(&self) -> u32 {
        self.num_connections
    }

    /// Drain host-stack events and run one finalization attempt.
    ///
    /// Returns `Err(NoDevice)` while nothing usable is captured, so
    /// callers can poll in a sleep loop until a device shows up.
    pub fn poll(&mut self) -> Result<()> {
        self.pump();
        self.finalize()
    }

    /// Whether a captured device is attached and the host role is
    /// still ours. Pumps pending events first so a disconnect that
    /// already happened is observed.
    pub fn is_usable(&mut self) -> bool {
        self.pump();
        self.session_usable()
    }

    /// Parsed identity of the captured device, available once
    /// finalization succeeded.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.session
            .as_ref()
            .filter(|s| s.finalize == FinalizeState::Finalized)
            .map(|s| &s.info)
    }

    /// Catalog entry matching the finalized device's chip/board ids.
    pub fn device_entry(&self) -> Option<&'static DeviceEntry> {
        let info = self.device_info()?;
        catalog::by_chip_board(info.cpid, info.bdid)
    }

    /// Current mode, with PwnedDfu overriding DFU when the serial
    /// string carried a non-empty PWND marker.
    pub fn mode(&mut self) -> Result<Mode> {
        self.pump();
        let Some(session) = self.session.as_ref() else {
            return Err(Error::NoDevice);
        };
        if !self.backend.is_host() {
            return Err(Error::NoDevice);
        }
        if session.info.pwnd.as_deref().is_some_and(|p| !p.is_empty()) {
            Ok(Mode::PwnedDfu)
        } else {
            Ok(session.mode)
        }
    }

    /// Port-level reset of the captured device.
    pub fn reset(&mut self) -> Result<()> {
        self.pump();
        let Some(handle) = self.session_handle() else {
            return Err(Error::NoDevice);
        };
        if !self.backend.is_host() {
            return Err(Error::NoDevice);
        }
        self.backend.reset_device(handle).map_err(|e| {
            warn!(error = %e, "Device reset failed");
            Error::ResetFailed
        })
    }

    // ---- event handling ------------------------------------------------

    fn pump(&mut self) {
        for event in self.backend.pump_events() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: UsbEvent) {
        match event {
            UsbEvent::RoleChanged { host } => {
                if !host {
                    info!("Lost the USB host role");
                    self.clear_session();
                }
            }
            UsbEvent::Connected(dev) => {
                if !self.backend.is_host() {
                    return;
                }
                // Force renegotiation so the device enumerates cleanly.
                debug!(dev, "Device connected, resetting");
                if let Err(e) = self.backend.reset_device(dev) {
                    warn!(dev, error = %e, "Reset on connect failed");
                }
            }
            UsbEvent::Enabled(dev) => self.handle_enabled(dev),
            UsbEvent::Disabled(dev) => {
                debug!(dev, "Device disabled");
            }
            UsbEvent::Disconnected(dev) => {
                debug!(dev, "Device disconnected");
                // A second disconnect for the same device is a no-op.
                if self.session.as_ref().is_some_and(|s| s.handle == dev) {
                    self.clear_session();
                }
            }
        }
    }

    fn handle_enabled(&mut self, dev: DeviceId) {
        if !self.backend.is_host() {
            return;
        }
        if self.session.as_ref().is_some_and(|s| s.handle == dev) {
            debug!(dev, "Captured device re-enabled");
            return;
        }
        match self.config.policy {
            ConnectionPolicy::AcceptAll => self.clear_session(),
            ConnectionPolicy::AcceptWhenIdle => {
                if self.session_usable() {
                    debug!(dev, "Session busy, ignoring new device");
                    return;
                }
            }
            ConnectionPolicy::OneConnectionLimit => {
                if self.num_connections >= 1 {
                    debug!(dev, "Connection limit reached, ignoring new device");
                    return;
                }
            }
        }
        match self.qualify(dev) {
            Some((descriptor, mode)) => {
                info!(
                    dev,
                    pid = %format!("{:04X}", descriptor.id_product),
                    mode = %mode,
                    "Device captured"
                );
                self.session = Some(Session {
                    handle: dev,
                    descriptor,
                    info: DeviceInfo::default(),
                    mode,
                    finalize: FinalizeState::Pending,
                });
                self.num_connections += 1;
            }
            None => {
                debug!(dev, "Device not supported");
                self.clear_session();
            }
        }
    }

    /// Accept only Apple devices with a recovery-class product id.
    fn qualify(&mut self, dev: DeviceId) -> Option<(DeviceDescriptor, Mode)> {
        let descriptor = match self.backend.device_descriptor(dev) {
            Ok(d) => d,
            Err(e) => {
                warn!(dev, error = %e, "Descriptor fetch failed");
                return None;
            }
        };
        if descriptor.id_vendor != APPLE_VENDOR_ID {
            return None;
        }
        Mode::from_pid(descriptor.id_product).map(|mode| (descriptor, mode))
    }

    fn clear_session(&mut self) {
        if self.session.take().is_some() {
            info!("Session cleared");
        }
    }

    fn session_usable(&self) -> bool {
        self.session.is_some() && self.backend.is_host()
    }

    fn session_handle(&self) -> Option<DeviceId> {
        self.session.as_ref().map(|s| s.handle)
    }

    fn raw_mode(&self) -> Option<Mode> {
        self.session.as_ref().map(|s| s.mode)
    }

    // ---- finalization --------------------------------------------------

    /// Complete the capture: read and parse the serial string, enforce
    /// the ECID restriction, apply configuration 1 and pick up the
    /// boot nonces. Aborts on the first failure without committing
    /// anything; a descriptor/ECID failure latches the session so
    /// later attempts fail fast.
    fn finalize(&mut self) -> Result<()> {
        if !self.session_usable() {
            return Err(Error::NoDevice);
        }
        match self.session.as_ref().map(|s| s.finalize) {
            Some(FinalizeState::Finalized) => return Ok(()),
            Some(FinalizeState::Blocked) => return Err(Error::FinalizationBlocked),
            _ => {}
        }
        let Some((handle, descriptor)) = self.session.as_ref().map(|s| (s.handle, s.descriptor))
        else {
            return Err(Error::NoDevice);
        };

        let serial = self.string_descriptor_ascii(handle, descriptor.i_serial_number)?;
        debug!(serial = %serial, "Serial string fetched");
        let mut info = DeviceInfo::from_iboot_string(&serial);
        info.pid = descriptor.id_product;

        let restriction = self.config.ecid_restriction;
        if restriction != 0 && restriction != info.ecid {
            warn!(
                expected = %format!("{restriction:016X}"),
                actual = %format!("{:016X}", info.ecid),
                "ECID mismatch, finalization blocked"
            );
            self.block_finalize();
            return Err(Error::EcidMismatch {
                expected: restriction,
                actual: info.ecid,
            });
        }

        if let Err(e) = self.apply_configuration(handle, 1) {
            self.block_finalize();
            return Err(e);
        }

        // Best effort; devices without nonce tags simply leave them unset.
        info.ap_nonce = self.copy_nonce(handle, "NONC");
        info.sep_nonce = self.copy_nonce(handle, "SNON");

        if let Some(session) = self.session.as_mut() {
            session.info = info;
            session.finalize = FinalizeState::Finalized;
        }
        info!("Session finalized");
        Ok(())
    }

    fn block_finalize(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.finalize = FinalizeState::Blocked;
        }
    }

    /// Read a string descriptor into a bounded ASCII buffer; code
    /// units outside ASCII degrade to '?'.
    fn string_descriptor_ascii(&mut self, dev: DeviceId, index: u8) -> Result<String> {
        self.pump();
        if !self.session_usable() {
            return Err(Error::NoDevice);
        }
        let units = self.backend.string_descriptor(dev, index, 0).map_err(|e| {
            warn!(index, error = %e, "String descriptor fetch failed");
            Error::DescriptorFetchFailed
        })?;
        let mut out = String::with_capacity(units.len());
        for unit in units.into_iter().take(SERIAL_STRING_SIZE - 1) {
            out.push(if unit <= 0x7F { unit as u8 as char } else { '?' });
        }
        Ok(out)
    }

    /// Validate that the configuration descriptor is fetchable, then
    /// apply the configuration value.
    fn apply_configuration(&mut self, dev: DeviceId, value: u8) -> Result<()> {
        self.pump();
        if !self.session_usable() {
            return Err(Error::NoDevice);
        }
        let total = self
            .backend
            .configuration_descriptor_total_length(dev, value)
            .map_err(|_| Error::DescriptorFetchFailed)?;
        if total == 0 {
            return Err(Error::DescriptorFetchFailed);
        }
        let mut raw = vec![0u8; total];
        let n = self
            .backend
            .configuration_descriptor(dev, value, &mut raw)
            .map_err(|_| Error::DescriptorFetchFailed)?;
        if n == 0 {
            return Err(Error::DescriptorFetchFailed);
        }
        debug!(value, total, "Applying configuration");
        self.backend
            .set_configuration(dev, value)
            .map_err(|_| Error::DescriptorSetFailed)
    }

    /// Fetch string descriptor 1 and extract the tagged nonce.
    fn copy_nonce(&mut self, dev: DeviceId, tag: &str) -> Option<Vec<u8>> {
        match self.string_descriptor_ascii(dev, 1) {
            Ok(buf) => devinfo::nonce_with_tag(&buf, tag),
            Err(e) => {
                debug!(tag, error = %e, "Nonce string fetch failed");
                None
            }
        }
    }

    // ---- transfer primitives -------------------------------------------

    /// Blocking control-out against the captured device.
    pub fn usb_control_out(
        &mut self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        data: &[u8],
    ) -> Result<usize> {
        self.pump();
        let Some(handle) = self.session_handle() else {
            return Err(Error::NoDevice);
        };
        if !self.backend.is_host() {
            return Err(Error::NoDevice);
        }
        let setup = ControlSetup {
            bm_request_type,
            b_request,
            w_value,
            w_index,
        };
        self.backend.control_out(handle, setup, data).map_err(|e| {
            warn!(error = %e, "Control transfer failed");
            Error::UploadFailed
        })
    }

    /// Blocking control-in against the captured device.
    pub fn usb_control_in(
        &mut self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.pump();
        let Some(handle) = self.session_handle() else {
            return Err(Error::NoDevice);
        };
        if !self.backend.is_host() {
            return Err(Error::NoDevice);
        }
        let setup = ControlSetup {
            bm_request_type,
            b_request,
            w_value,
            w_index,
        };
        self.backend.control_in(handle, setup, buf).map_err(|e| {
            warn!(error = %e, "Control transfer failed");
            Error::UploadFailed
        })
    }

    /// Blocking bulk write against the captured device.
    pub fn usb_bulk_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        self.pump();
        let Some(handle) = self.session_handle() else {
            return Err(Error::NoDevice);
        };
        if !self.backend.is_host() {
            return Err(Error::NoDevice);
        }
        self.backend.bulk_out(handle, endpoint, data).map_err(|e| {
            warn!(error = %e, "Bulk transfer failed");
            Error::UploadFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBackend;

    const SERIAL: &str = "CPID:8010 CPRV:11 CPFM:03 SCEP:01 BDID:08 \
                          ECID:000012345678ABCD IBFL:3C SRTG:[iBoot-2696.0.0.1.33]";

    fn descriptor(vid: u16, pid: u16) -> DeviceDescriptor {
        DeviceDescriptor {
            id_vendor: vid,
            id_product: pid,
            bcd_device: 0,
            i_serial_number: 3,
        }
    }

    fn client(policy: ConnectionPolicy) -> Client<MockBackend> {
        Client::new(
            MockBackend::new(),
            ClientConfig {
                policy,
                ecid_restriction: 0,
            },
        )
    }

    #[test]
    fn test_qualifier_accepts_recovery_class_pids() {
        for pid in [0x1280, 0x1281, 0x1282, 0x1283, 0x1222, 0x1227] {
            let mut client = client(ConnectionPolicy::AcceptAll);
            let dev = client.backend().add_device(descriptor(APPLE_VENDOR_ID, pid), SERIAL);
            client.backend().attach(dev);
            assert!(client.is_usable(), "pid {pid:04X} should be captured");
        }
    }

    #[test]
    fn test_qualifier_rejects_unknown_devices() {
        // Wrong product id, then wrong vendor.
        for (vid, pid) in [(APPLE_VENDOR_ID, 0x1284), (0x8086, 0x1281)] {
            let mut client = client(ConnectionPolicy::AcceptAll);
            let dev = client.backend().add_device(descriptor(vid, pid), SERIAL);
            client.backend().attach(dev);
            assert!(!client.is_usable(), "{vid:04X}:{pid:04X} should be ignored");
        }
    }

    #[test]
    fn test_poll_finalizes_and_exposes_info() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        client.backend().attach(dev);

        assert!(client.device_info().is_none());
        client.poll().unwrap();

        let info = client.device_info().unwrap();
        assert_eq!(info.cpid, 0x8010);
        assert_eq!(info.ecid, 0x0000_1234_5678_ABCD);
        assert_eq!(info.pid, 0x1281);
        assert_eq!(client.backend().set_configuration_log(), vec![(dev, 1)]);

        // Finalization is idempotent: no second configuration pass.
        client.poll().unwrap();
        assert_eq!(client.backend().set_configuration_log().len(), 1);
    }

    #[test]
    fn test_poll_without_device_reports_no_device() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        assert!(matches!(client.poll(), Err(Error::NoDevice)));
    }

    #[test]
    fn test_finalize_extracts_nonces() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1227), SERIAL);
        client
            .backend()
            .set_string(dev, 1, "NONC:a1b2c3d4 SNON:00ff10");
        client.backend().attach(dev);

        client.poll().unwrap();
        let info = client.device_info().unwrap();
        assert_eq!(info.ap_nonce.as_deref(), Some(&[0xA1, 0xB2, 0xC3, 0xD4][..]));
        assert_eq!(info.sep_nonce.as_deref(), Some(&[0x00, 0xFF, 0x10][..]));
    }

    #[test]
    fn test_ecid_mismatch_latches_blocked() {
        let mut client = Client::new(
            MockBackend::new(),
            ClientConfig {
                policy: ConnectionPolicy::AcceptAll,
                ecid_restriction: 0xDEAD_BEEF,
            },
        );
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        client.backend().attach(dev);

        assert!(matches!(client.poll(), Err(Error::EcidMismatch { .. })));
        // The session stays captured but can never finalize.
        assert!(client.is_usable());
        assert!(matches!(client.poll(), Err(Error::FinalizationBlocked)));
        assert!(client.device_info().is_none());
        assert!(client.backend().set_configuration_log().is_empty());
    }

    #[test]
    fn test_matching_ecid_restriction_finalizes() {
        let mut client = Client::new(
            MockBackend::new(),
            ClientConfig {
                policy: ConnectionPolicy::AcceptAll,
                ecid_restriction: 0x0000_1234_5678_ABCD,
            },
        );
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        client.backend().attach(dev);
        client.poll().unwrap();
        assert!(client.device_info().is_some());
    }

    #[test]
    fn test_set_configuration_failure_latches_blocked() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        client.backend().fail_set_configuration();
        client.backend().attach(dev);

        assert!(matches!(client.poll(), Err(Error::DescriptorSetFailed)));
        assert!(matches!(client.poll(), Err(Error::FinalizationBlocked)));
    }

    #[test]
    fn test_accept_all_replaces_session() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let first = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        let second = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1227), "ECID:1111 CPID:8015");
        client.backend().attach(first);
        client.poll().unwrap();
        assert_eq!(client.device_info().unwrap().cpid, 0x8010);

        client.backend().attach(second);
        client.poll().unwrap();
        let info = client.device_info().unwrap();
        assert_eq!(info.cpid, 0x8015);
        assert_eq!(info.pid, 0x1227);
        assert_eq!(client.num_connections(), 2);
    }

    #[test]
    fn test_accept_when_idle_keeps_current_session() {
        let mut client = client(ConnectionPolicy::AcceptWhenIdle);
        let first = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        let second = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1227), "ECID:1111 CPID:8015");
        client.backend().attach(first);
        client.poll().unwrap();

        client.backend().attach(second);
        client.poll().unwrap();
        // Still the first device.
        assert_eq!(client.device_info().unwrap().cpid, 0x8010);
        assert_eq!(client.num_connections(), 1);

        // Once the first device goes away the next one is admitted.
        client.backend().detach(first);
        client.backend().attach(second);
        client.poll().unwrap();
        assert_eq!(client.device_info().unwrap().cpid, 0x8015);
    }

    #[test]
    fn test_one_connection_limit_ignores_second_device() {
        let mut client = client(ConnectionPolicy::OneConnectionLimit);
        let first = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        let second = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1227), SERIAL);
        client.backend().attach(first);
        client.poll().unwrap();
        assert_eq!(client.num_connections(), 1);

        client.backend().detach(first);
        client.backend().attach(second);
        assert!(!client.is_usable());
        assert!(matches!(client.poll(), Err(Error::NoDevice)));
        assert_eq!(client.num_connections(), 1);
    }

    #[test]
    fn test_double_disconnect_is_noop() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        client.backend().attach(dev);
        client.poll().unwrap();

        client.backend().detach(dev);
        client.backend().push_event(UsbEvent::Disconnected(dev));
        assert!(!client.is_usable());
        assert!(matches!(client.poll(), Err(Error::NoDevice)));
    }

    #[test]
    fn test_role_loss_clears_session() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), SERIAL);
        client.backend().attach(dev);
        client.poll().unwrap();

        client.backend().set_host(false);
        assert!(!client.is_usable());
        assert!(client.session.is_none());
    }

    #[test]
    fn test_mode_reports_pwned_dfu() {
        let serial = "CPID:8015 ECID:22 PWND:[checkm8]";
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1227), serial);
        client.backend().attach(dev);

        client.poll().unwrap();
        assert_eq!(client.mode().unwrap(), Mode::PwnedDfu);
    }

    #[test]
    fn test_mode_reports_wire_personality() {
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1222), SERIAL);
        client.backend().attach(dev);
        client.poll().unwrap();
        assert_eq!(client.mode().unwrap(), Mode::Wtf);
    }

    #[test]
    fn test_device_entry_lookup() {
        let serial = "CPID:8960 BDID:00 ECID:1234";
        let mut client = client(ConnectionPolicy::AcceptAll);
        let dev = client
            .backend()
            .add_device(descriptor(APPLE_VENDOR_ID, 0x1281), serial);
        client.backend().attach(dev);
        client.poll().unwrap();
        assert_eq!(client.device_entry().unwrap().product_type, "iPhone6,1");
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = ClientConfig {
            policy: ConnectionPolicy::OneConnectionLimit,
            ecid_restriction: 0xABCD,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.policy, ConnectionPolicy::OneConnectionLimit);
        assert_eq!(parsed.ecid_restriction, 0xABCD);
    }
}
