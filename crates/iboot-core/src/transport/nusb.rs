//! nusb-based USB backend.
//!
//! Hotplug is derived by diffing enumeration snapshots on every event
//! pump. The OS has already enumerated and configured anything that
//! shows up there, so arrivals surface as `Enabled` directly; a PC
//! host controller also never loses the host role.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Timeout applied to control transfers on the default pipe.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, Out, Recipient};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, warn};

use super::traits::{
    ControlSetup, DeviceDescriptor, DeviceId, TransportError, UsbBackend, UsbEvent,
};

// Standard descriptor types (wValue high byte of GET_DESCRIPTOR).
const DESC_DEVICE: u8 = 0x01;
const DESC_CONFIGURATION: u8 = 0x02;
const DESC_STRING: u8 = 0x03;

struct Attached {
    info: nusb::DeviceInfo,
    device: Option<nusb::Device>,
    /// Claimed lazily; only bulk uploads need it.
    interface: Option<Interface>,
}

#[derive(Default)]
struct Inner {
    next_id: DeviceId,
    devices: HashMap<DeviceId, Attached>,
    by_bus: HashMap<nusb::DeviceId, DeviceId>,
}

/// Production backend over nusb.
pub struct NusbBackend {
    inner: Mutex<Inner>,
}

impl NusbBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn with_device<T>(
        &self,
        dev: DeviceId,
        f: impl FnOnce(&nusb::Device) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        f(inner.device(dev)?)
    }
}

impl Default for NusbBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn device(&mut self, dev: DeviceId) -> Result<&nusb::Device, TransportError> {
        let attached = self
            .devices
            .get_mut(&dev)
            .ok_or(TransportError::Disconnected)?;
        if attached.device.is_none() {
            let device = attached
                .info
                .open()
                .wait()
                .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
            attached.device = Some(device);
        }
        attached.device.as_ref().ok_or(TransportError::Disconnected)
    }

    fn interface(&mut self, dev: DeviceId) -> Result<&Interface, TransportError> {
        self.device(dev)?;
        let attached = self
            .devices
            .get_mut(&dev)
            .ok_or(TransportError::Disconnected)?;
        if attached.interface.is_none() {
            let device = attached
                .device
                .as_ref()
                .ok_or(TransportError::Disconnected)?;
            let interface = device.claim_interface(0).wait().map_err(|e| {
                TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                }
            })?;
            attached.interface = Some(interface);
        }
        attached
            .interface
            .as_ref()
            .ok_or(TransportError::Disconnected)
    }
}

fn split_request_type(bm_request_type: u8) -> (ControlType, Recipient) {
    let control_type = match (bm_request_type >> 5) & 0x03 {
        0 => ControlType::Standard,
        1 => ControlType::Class,
        _ => ControlType::Vendor,
    };
    let recipient = match bm_request_type & 0x1F {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        _ => Recipient::Other,
    };
    (control_type, recipient)
}

impl NusbBackend {
    /// Raw GET_DESCRIPTOR on the default control pipe.
    fn get_descriptor(
        &self,
        dev: DeviceId,
        desc_type: u8,
        index: u8,
        langid: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        let setup = ControlSetup {
            bm_request_type: 0x80,
            b_request: 0x06,
            w_value: u16::from(desc_type) << 8 | u16::from(index),
            w_index: langid,
        };
        let mut buf = vec![0u8; length as usize];
        let n = self.control_in(dev, setup, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

impl UsbBackend for NusbBackend {
    fn pump_events(&self) -> Vec<UsbEvent> {
        let mut inner = self.inner.lock().unwrap();
        let mut events = Vec::new();

        let snapshot = match list_devices().wait() {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Device enumeration failed");
                return events;
            }
        };
        let current: HashMap<nusb::DeviceId, nusb::DeviceInfo> =
            snapshot.map(|info| (info.id(), info)).collect();

        let gone: Vec<nusb::DeviceId> = inner
            .by_bus
            .keys()
            .filter(|bus_id| !current.contains_key(bus_id))
            .copied()
            .collect();
        for bus_id in gone {
            if let Some(id) = inner.by_bus.remove(&bus_id) {
                inner.devices.remove(&id);
                debug!(id, "Device detached");
                events.push(UsbEvent::Disconnected(id));
            }
        }

        for (bus_id, info) in current {
            if inner.by_bus.contains_key(&bus_id) {
                continue;
            }
            inner.next_id += 1;
            let id = inner.next_id;
            debug!(
                id,
                vid = %format!("{:04X}", info.vendor_id()),
                pid = %format!("{:04X}", info.product_id()),
                "Device attached"
            );
            inner.by_bus.insert(bus_id, id);
            inner.devices.insert(
                id,
                Attached {
                    info,
                    device: None,
                    interface: None,
                },
            );
            events.push(UsbEvent::Enabled(id));
        }

        events
    }

    fn is_host(&self) -> bool {
        true
    }

    fn device_descriptor(&self, dev: DeviceId) -> Result<DeviceDescriptor, TransportError> {
        let raw = self.get_descriptor(dev, DESC_DEVICE, 0, 0, 18)?;
        if raw.len() < 18 {
            return Err(TransportError::DescriptorFailed(
                "short device descriptor".into(),
            ));
        }
        Ok(DeviceDescriptor {
            id_vendor: u16::from_le_bytes([raw[8], raw[9]]),
            id_product: u16::from_le_bytes([raw[10], raw[11]]),
            bcd_device: u16::from_le_bytes([raw[12], raw[13]]),
            i_serial_number: raw[16],
        })
    }

    fn string_descriptor(
        &self,
        dev: DeviceId,
        index: u8,
        langid: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let raw = self.get_descriptor(dev, DESC_STRING, index, langid, 255)?;
        if raw.len() < 2 {
            return Err(TransportError::DescriptorFailed(
                "short string descriptor".into(),
            ));
        }
        let len = usize::from(raw[0]).min(raw.len());
        Ok(raw[2..len]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn control_out(
        &self,
        dev: DeviceId,
        setup: ControlSetup,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let (control_type, recipient) = split_request_type(setup.bm_request_type);
        self.with_device(dev, |device| {
            device
                .control_out(ControlOut {
                    control_type,
                    recipient,
                    request: setup.b_request,
                    value: setup.w_value,
                    index: setup.w_index,
                    data,
                }, CONTROL_TIMEOUT)
                .wait()
                .map_err(|e| TransportError::ControlFailed(e.to_string()))?;
            Ok(data.len())
        })
    }

    fn control_in(
        &self,
        dev: DeviceId,
        setup: ControlSetup,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        let (control_type, recipient) = split_request_type(setup.bm_request_type);
        let length = buf.len() as u16;
        self.with_device(dev, |device| {
            let data = device
                .control_in(ControlIn {
                    control_type,
                    recipient,
                    request: setup.b_request,
                    value: setup.w_value,
                    index: setup.w_index,
                    length,
                }, CONTROL_TIMEOUT)
                .wait()
                .map_err(|e| TransportError::ControlFailed(e.to_string()))?;
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Ok(n)
        })
    }

    fn bulk_out(&self, dev: DeviceId, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let interface = inner.interface(dev)?;
        let ep = interface
            .endpoint::<Bulk, Out>(endpoint)
            .map_err(|e| TransportError::BulkFailed(e.to_string()))?;

        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .map_err(|e| TransportError::BulkFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::BulkFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Bulk write complete");
        Ok(data.len())
    }

    fn configuration_descriptor_total_length(
        &self,
        dev: DeviceId,
        config: u8,
    ) -> Result<usize, TransportError> {
        // Configuration values are 1-based, descriptor indices 0-based.
        let index = config.saturating_sub(1);
        let raw = self.get_descriptor(dev, DESC_CONFIGURATION, index, 0, 9)?;
        if raw.len() < 4 {
            return Err(TransportError::DescriptorFailed(
                "short configuration descriptor".into(),
            ));
        }
        Ok(usize::from(u16::from_le_bytes([raw[2], raw[3]])))
    }

    fn configuration_descriptor(
        &self,
        dev: DeviceId,
        config: u8,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        let index = config.saturating_sub(1);
        let raw = self.get_descriptor(dev, DESC_CONFIGURATION, index, 0, buf.len() as u16)?;
        let n = raw.len().min(buf.len());
        buf[..n].copy_from_slice(&raw[..n]);
        Ok(n)
    }

    fn set_configuration(&self, dev: DeviceId, value: u8) -> Result<(), TransportError> {
        self.with_device(dev, |device| {
            device
                .set_configuration(value)
                .wait()
                .map_err(|e| TransportError::ConfigurationFailed(e.to_string()))
        })
    }

    fn reset_device(&self, dev: DeviceId) -> Result<(), TransportError> {
        self.with_device(dev, |device| {
            device
                .reset()
                .wait()
                .map_err(|e| TransportError::ResetFailed(e.to_string()))
        })
    }
}
