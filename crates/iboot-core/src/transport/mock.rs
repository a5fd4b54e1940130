//! Mock USB backend for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::traits::{
    ControlSetup, DeviceDescriptor, DeviceId, TransportError, UsbBackend, UsbEvent,
};
use crate::protocol::constants::DFU_STATUS_LEN;

/// A captured control-out transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutRecord {
    pub dev: DeviceId,
    pub setup: ControlSetup,
    pub data: Vec<u8>,
}

/// A captured control-in request (setup plus requested length).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInRecord {
    pub dev: DeviceId,
    pub setup: ControlSetup,
    pub len: usize,
}

/// A captured bulk-out transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutRecord {
    pub dev: DeviceId,
    pub endpoint: u8,
    pub data: Vec<u8>,
}

struct MockDevice {
    descriptor: DeviceDescriptor,
    strings: HashMap<u8, String>,
    configuration: Vec<u8>,
    connected: bool,
}

#[derive(Default)]
struct Inner {
    host: bool,
    next_id: DeviceId,
    devices: HashMap<DeviceId, MockDevice>,
    events: VecDeque<UsbEvent>,
    control_out_log: Vec<ControlOutRecord>,
    control_in_log: Vec<ControlInRecord>,
    bulk_log: Vec<BulkOutRecord>,
    reset_log: Vec<DeviceId>,
    set_configuration_log: Vec<(DeviceId, u8)>,
    control_in_replies: VecDeque<Vec<u8>>,
    bulk_results: VecDeque<usize>,
    fail_set_configuration: bool,
}

/// Mock backend for unit testing session and upload logic.
///
/// Devices are scripted up front, host-stack events are queued by the
/// test, and every transfer the client issues is captured for
/// inspection. Control-in replies come from a FIFO queue.
pub struct MockBackend {
    inner: Mutex<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                host: true,
                ..Default::default()
            }),
        }
    }

    /// Script a device. Its serial string is stored both at the
    /// descriptor's serial index and at index 1, where nonces live.
    pub fn add_device(&self, descriptor: DeviceDescriptor, serial: &str) -> DeviceId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        let mut strings = HashMap::new();
        strings.insert(descriptor.i_serial_number, serial.to_string());
        strings.entry(1).or_insert_with(|| serial.to_string());
        inner.devices.insert(
            id,
            MockDevice {
                descriptor,
                strings,
                // Header-sized stand-in; only wTotalLength matters.
                configuration: vec![0u8; 25],
                connected: true,
            },
        );
        id
    }

    /// Override a string descriptor on a scripted device.
    pub fn set_string(&self, dev: DeviceId, index: u8, value: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(device) = inner.devices.get_mut(&dev) {
            device.strings.insert(index, value.to_string());
        }
    }

    /// Replace the raw configuration descriptor (empty simulates a
    /// fetch failure).
    pub fn set_configuration_descriptor(&self, dev: DeviceId, raw: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(device) = inner.devices.get_mut(&dev) {
            device.configuration = raw;
        }
    }

    pub fn push_event(&self, event: UsbEvent) {
        self.inner.lock().unwrap().events.push_back(event);
    }

    /// Queue Connected + Enabled for a scripted device.
    pub fn attach(&self, dev: DeviceId) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push_back(UsbEvent::Connected(dev));
        inner.events.push_back(UsbEvent::Enabled(dev));
    }

    /// Queue a Disconnected event and cut the device off.
    pub fn detach(&self, dev: DeviceId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(device) = inner.devices.get_mut(&dev) {
            device.connected = false;
        }
        inner.events.push_back(UsbEvent::Disconnected(dev));
    }

    /// Flip the host role and queue the matching event.
    pub fn set_host(&self, host: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.host = host;
        inner.events.push_back(UsbEvent::RoleChanged { host });
    }

    /// Queue a raw control-in reply.
    pub fn queue_control_in(&self, reply: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .control_in_replies
            .push_back(reply.to_vec());
    }

    /// Queue a one-byte DFU GETSTATE reply.
    pub fn queue_dfu_state(&self, state: u8) {
        self.queue_control_in(&[state]);
    }

    /// Queue a six-byte DFU GETSTATUS reply with the given state byte.
    pub fn queue_dfu_status(&self, state: u8) {
        let mut reply = [0u8; DFU_STATUS_LEN];
        reply[4] = state;
        self.queue_control_in(&reply);
    }

    /// Override the transferred-length result of upcoming bulk writes.
    pub fn queue_bulk_result(&self, transferred: usize) {
        self.inner.lock().unwrap().bulk_results.push_back(transferred);
    }

    /// Make set_configuration fail from now on.
    pub fn fail_set_configuration(&self) {
        self.inner.lock().unwrap().fail_set_configuration = true;
    }

    pub fn control_out_log(&self) -> Vec<ControlOutRecord> {
        self.inner.lock().unwrap().control_out_log.clone()
    }

    pub fn control_in_log(&self) -> Vec<ControlInRecord> {
        self.inner.lock().unwrap().control_in_log.clone()
    }

    pub fn bulk_log(&self) -> Vec<BulkOutRecord> {
        self.inner.lock().unwrap().bulk_log.clone()
    }

    pub fn reset_log(&self) -> Vec<DeviceId> {
        self.inner.lock().unwrap().reset_log.clone()
    }

    pub fn set_configuration_log(&self) -> Vec<(DeviceId, u8)> {
        self.inner.lock().unwrap().set_configuration_log.clone()
    }

    pub fn clear_logs(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.control_out_log.clear();
        inner.control_in_log.clear();
        inner.bulk_log.clear();
        inner.reset_log.clear();
        inner.set_configuration_log.clear();
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn device(&self, dev: DeviceId) -> Result<&MockDevice, TransportError> {
        match self.devices.get(&dev) {
            Some(device) if device.connected => Ok(device),
            Some(_) | None => Err(TransportError::Disconnected),
        }
    }
}

impl UsbBackend for MockBackend {
    fn pump_events(&self) -> Vec<UsbEvent> {
        self.inner.lock().unwrap().events.drain(..).collect()
    }

    fn is_host(&self) -> bool {
        self.inner.lock().unwrap().host
    }

    fn device_descriptor(&self, dev: DeviceId) -> Result<DeviceDescriptor, TransportError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.device(dev)?.descriptor)
    }

    fn string_descriptor(
        &self,
        dev: DeviceId,
        index: u8,
        _langid: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let inner = self.inner.lock().unwrap();
        let device = inner.device(dev)?;
        let value = device
            .strings
            .get(&index)
            .ok_or_else(|| TransportError::DescriptorFailed(format!("no string {index}")))?;
        Ok(value.encode_utf16().collect())
    }

    fn control_out(
        &self,
        dev: DeviceId,
        setup: ControlSetup,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.device(dev)?;
        inner.control_out_log.push(ControlOutRecord {
            dev,
            setup,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn control_in(
        &self,
        dev: DeviceId,
        setup: ControlSetup,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.device(dev)?;
        inner.control_in_log.push(ControlInRecord {
            dev,
            setup,
            len: buf.len(),
        });
        let reply = inner
            .control_in_replies
            .pop_front()
            .ok_or_else(|| TransportError::ControlFailed("no scripted reply".into()))?;
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn bulk_out(&self, dev: DeviceId, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.device(dev)?;
        inner.bulk_log.push(BulkOutRecord {
            dev,
            endpoint,
            data: data.to_vec(),
        });
        Ok(inner.bulk_results.pop_front().unwrap_or(data.len()))
    }

    fn configuration_descriptor_total_length(
        &self,
        dev: DeviceId,
        _config: u8,
    ) -> Result<usize, TransportError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.device(dev)?.configuration.len())
    }

    fn configuration_descriptor(
        &self,
        dev: DeviceId,
        _config: u8,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        let inner = self.inner.lock().unwrap();
        let raw = &inner.device(dev)?.configuration;
        let n = raw.len().min(buf.len());
        buf[..n].copy_from_slice(&raw[..n]);
        Ok(n)
    }

    fn set_configuration(&self, dev: DeviceId, value: u8) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.device(dev)?;
        if inner.fail_set_configuration {
            return Err(TransportError::ConfigurationFailed("scripted failure".into()));
        }
        inner.set_configuration_log.push((dev, value));
        Ok(())
    }

    fn reset_device(&self, dev: DeviceId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.device(dev)?;
        inner.reset_log.push(dev);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            id_vendor: 0x05AC,
            id_product: 0x1281,
            bcd_device: 0,
            i_serial_number: 3,
        }
    }

    #[test]
    fn test_event_queue_drains_in_order() {
        let mock = MockBackend::new();
        let dev = mock.add_device(descriptor(), "CPID:8010");
        mock.attach(dev);
        mock.detach(dev);

        let events = mock.pump_events();
        assert_eq!(
            events,
            vec![
                UsbEvent::Connected(dev),
                UsbEvent::Enabled(dev),
                UsbEvent::Disconnected(dev),
            ]
        );
        assert!(mock.pump_events().is_empty());
    }

    #[test]
    fn test_control_in_replies_are_fifo() {
        let mock = MockBackend::new();
        let dev = mock.add_device(descriptor(), "CPID:8010");
        mock.queue_dfu_state(2);
        mock.queue_dfu_status(5);

        let setup = ControlSetup {
            bm_request_type: 0xA1,
            b_request: 5,
            w_value: 0,
            w_index: 0,
        };
        let mut buf = [0u8; 6];
        assert_eq!(mock.control_in(dev, setup, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 2);
        assert_eq!(mock.control_in(dev, setup, &mut buf).unwrap(), 6);
        assert_eq!(buf[4], 5);
        assert!(mock.control_in(dev, setup, &mut buf).is_err());
    }

    #[test]
    fn test_detached_device_refuses_transfers() {
        let mock = MockBackend::new();
        let dev = mock.add_device(descriptor(), "CPID:8010");
        mock.detach(dev);
        assert!(mock.bulk_out(dev, 0x04, b"data").is_err());
        assert!(mock.device_descriptor(dev).is_err());
    }
}
