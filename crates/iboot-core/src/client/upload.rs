//! Buffer upload over the mode-specific framing.
//!
//! Recovery mode streams 0x8000-byte bulk chunks after a zero-length
//! initiate request. DFU/WTF mode sends 0x800-byte DNLOAD control
//! transfers, polls GETSTATUS between chunks, and seals the stream
//! with a 16-byte trailer: a fixed 12-byte footer plus the CRC32 of
//! everything sent so far including that footer.

use std::thread;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::{ClientEvent, ClientObserver};
use crate::protocol::Crc32;
use crate::protocol::constants::*;
use crate::transport::UsbBackend;

use super::Client;

/// Options for `send_buffer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// After the data, notify the device that the transfer is done and
    /// reset it (DFU/WTF framing only).
    pub notify_finish: bool,
    /// Pair the finish notification with an extra zero-length request.
    pub force_zlp: bool,
}

/// Wire chunk sizes for a `len`-byte upload. Empty for an empty buffer.
pub(crate) fn chunk_sizes(len: usize, chunk: usize) -> Vec<usize> {
    let mut packets = len / chunk;
    let mut last = len % chunk;
    if last != 0 {
        packets += 1;
    } else {
        last = chunk;
    }
    (0..packets)
        .map(|i| if i + 1 < packets { chunk } else { last })
        .collect()
}

/// Terminal DFU payload: remaining bytes, footer, little-endian CRC.
pub(crate) fn dfu_tail(payload: &[u8], crc: &mut Crc32) -> Vec<u8> {
    crc.update(&DFU_TRAILER_FOOTER);
    let mut tail = Vec::with_capacity(payload.len() + DFU_TRAILER_SIZE);
    tail.extend_from_slice(payload);
    tail.extend_from_slice(&DFU_TRAILER_FOOTER);
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, crc.value());
    tail.extend_from_slice(&word);
    tail
}

impl<B: UsbBackend, O: ClientObserver> Client<B, O> {
    /// Upload a buffer to the captured device. The session must have
    /// finalized first.
    pub fn send_buffer(&mut self, buffer: &[u8], options: SendOptions) -> Result<()> {
        if !self.is_usable() || self.device_info().is_none() {
            return Err(Error::NoDevice);
        }
        let Some(mode) = self.raw_mode() else {
            return Err(Error::NoDevice);
        };
        let recovery = !mode.is_dfu();
        let chunk_size = if recovery {
            RECOVERY_CHUNK_SIZE
        } else {
            DFU_CHUNK_SIZE
        };
        let chunks = chunk_sizes(buffer.len(), chunk_size);
        debug!(
            len = buffer.len(),
            chunks = chunks.len(),
            mode = %mode,
            "Starting upload"
        );

        if recovery {
            // Initiate the bulk upload.
            self.usb_control_out(REQ_RECOVERY_INITIATE, 0, 0, 0, &[])?;
        } else {
            self.check_dfu_state()?;
        }

        let total = buffer.len();
        let mut crc = Crc32::new();
        let mut sent = 0usize;

        for (i, &size) in chunks.iter().enumerate() {
            let offset = i * chunk_size;
            let payload = &buffer[offset..offset + size];
            let last = i + 1 == chunks.len();

            if recovery {
                let n = self.usb_bulk_out(RECOVERY_UPLOAD_ENDPOINT, payload)?;
                if n != size {
                    return Err(Error::UploadFailed);
                }
                sent += size;
            } else {
                crc.update(payload);
                let block = i as u16;
                if last {
                    let mut remaining = payload;
                    // When the trailer will not fit in this chunk,
                    // flush the payload alone first.
                    if size + DFU_TRAILER_SIZE > DFU_CHUNK_SIZE {
                        let n = self.usb_control_out(REQ_DFU_OUT, DFU_DNLOAD, block, 0, remaining)?;
                        if n != size {
                            return Err(Error::UploadFailed);
                        }
                        sent += size;
                        remaining = &[];
                    }
                    let tail = dfu_tail(remaining, &mut crc);
                    let n = self.usb_control_out(REQ_DFU_OUT, DFU_DNLOAD, block, 0, &tail)?;
                    if n != tail.len() {
                        return Err(Error::UploadFailed);
                    }
                    sent += remaining.len() + DFU_TRAILER_SIZE;
                } else {
                    let n = self.usb_control_out(REQ_DFU_OUT, DFU_DNLOAD, block, 0, payload)?;
                    if n != size {
                        return Err(Error::UploadFailed);
                    }
                    sent += size;
                }
                self.wait_for_idle()?;
            }

            self.observer.on_event(&ClientEvent::Progress {
                label: "Uploading",
                sent: sent as u64,
                total: total as u64,
                percent: if total > 0 {
                    sent as f64 * 100.0 / total as f64
                } else {
                    100.0
                },
            });
        }

        if recovery && total % RECOVERY_PACKET_SIZE == 0 {
            debug!("Sending zero-length packet");
            let _ = self.usb_bulk_out(RECOVERY_UPLOAD_ENDPOINT, &[]);
        }

        if options.notify_finish && !recovery {
            self.notify_finish(chunks.len() as u16, options.force_zlp)?;
        }

        debug!(sent, "Upload complete");
        Ok(())
    }

    /// Tell the device the transfer is complete, then reset it.
    pub fn finish_transfer(&mut self) -> Result<()> {
        if !self.is_usable() {
            return Err(Error::NoDevice);
        }
        let _ = self.usb_control_out(REQ_DFU_OUT, DFU_DNLOAD, 0, 0, &[]);
        for _ in 0..3 {
            let _ = self.dfu_status();
        }
        self.reset()
    }

    /// Clear the device-side transfer state (DFU/WTF framing only; a
    /// Recovery-mode device has nothing to clear).
    pub fn reset_counters(&mut self) -> Result<()> {
        if !self.is_usable() {
            return Err(Error::NoDevice);
        }
        if self.raw_mode().is_some_and(|m| m.is_dfu()) {
            self.usb_control_out(REQ_DFU_OUT, DFU_CLRSTATUS, 0, 0, &[])?;
        }
        Ok(())
    }

    /// The device must be idle before a DFU download starts; an error
    /// state gets a CLRSTATUS, anything else unexpected an ABORT.
    fn check_dfu_state(&mut self) -> Result<()> {
        let mut state = [0u8; 1];
        if self.usb_control_in(REQ_DFU_IN, DFU_GETSTATE, 0, 0, &mut state)? != 1 {
            return Err(Error::UploadFailed);
        }
        match state[0] {
            DFU_STATE_IDLE => Ok(()),
            DFU_STATE_ERROR => {
                warn!("Device in DFU error state, clearing status");
                let _ = self.usb_control_out(REQ_DFU_OUT, DFU_CLRSTATUS, 0, 0, &[]);
                Err(Error::UploadFailed)
            }
            other => {
                warn!(state = other, "Unexpected DFU state, aborting");
                let _ = self.usb_control_out(REQ_DFU_OUT, DFU_ABORT, 0, 0, &[]);
                Err(Error::UploadFailed)
            }
        }
    }

    /// One GETSTATUS poll; the state byte lives at offset 4.
    fn dfu_status(&mut self) -> Result<u8> {
        let mut buf = [0u8; DFU_STATUS_LEN];
        match self.usb_control_in(REQ_DFU_IN, DFU_GETSTATUS, 0, 0, &mut buf) {
            Ok(n) if n == DFU_STATUS_LEN => Ok(buf[4]),
            Ok(_) => Err(Error::InvalidStatus),
            Err(Error::NoDevice) => Err(Error::NoDevice),
            Err(_) => Err(Error::InvalidStatus),
        }
    }

    /// Poll GETSTATUS until the device is ready for the next chunk.
    /// The first poll's error is fatal; retries tolerate transient
    /// failures until the budget runs out.
    fn wait_for_idle(&mut self) -> Result<()> {
        if self.dfu_status()? == DFU_STATE_DNLOAD_IDLE {
            return Ok(());
        }
        for _ in 0..DFU_STATUS_POLL_RETRIES {
            if let Ok(DFU_STATE_DNLOAD_IDLE) = self.dfu_status() {
                return Ok(());
            }
            thread::sleep(DFU_STATUS_POLL_INTERVAL);
        }
        Err(Error::UploadFailed)
    }

    fn notify_finish(&mut self, packets: u16, force_zlp: bool) -> Result<()> {
        let _ = self.usb_control_out(REQ_DFU_OUT, DFU_DNLOAD, packets, 0, &[]);
        for _ in 0..2 {
            self.dfu_status()?;
        }
        if force_zlp {
            let _ = self.usb_control_out(REQ_DFU_OUT, 0, 0, 0, &[]);
        }
        let _ = self.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ConnectionPolicy};
    use crate::transport::{DeviceDescriptor, MockBackend};

    const SERIAL: &str = "CPID:8010 BDID:08 ECID:000012345678ABCD";

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
            SERIAL,
        );
        client.backend().attach(dev);
        client.poll().unwrap();
        client.backend().clear_logs();
        client
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_sizes(70000, 0x8000), vec![32768, 32768, 4464]);
        assert_eq!(chunk_sizes(0x8000, 0x8000), vec![0x8000]);
        assert_eq!(chunk_sizes(1, 0x800), vec![1]);
        assert_eq!(chunk_sizes(0x1000, 0x800), vec![0x800, 0x800]);
        assert_eq!(chunk_sizes(0, 0x800), Vec::<usize>::new());
    }

    #[test]
    fn test_dfu_tail_framing() {
        let payload = [0xAAu8; 32];
        let mut crc = Crc32::new();
        crc.update(&payload);
        let tail = dfu_tail(&payload, &mut crc);

        assert_eq!(tail.len(), 32 + DFU_TRAILER_SIZE);
        assert_eq!(&tail[..32], &payload);
        assert_eq!(&tail[32..44], &DFU_TRAILER_FOOTER);

        let mut expected = Crc32::new();
        expected.update(&payload);
        expected.update(&DFU_TRAILER_FOOTER);
        assert_eq!(
            LittleEndian::read_u32(&tail[44..]),
            expected.value()
        );
    }

    #[test]
    fn test_recovery_upload_chunks_and_initiate() {
        let mut client = ready_client(0x1281);
        let buffer = vec![0x5Au8; 70000];
        client.send_buffer(&buffer, SendOptions::default()).unwrap();

        let controls = client.backend().control_out_log();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].setup.bm_request_type, REQ_RECOVERY_INITIATE);
        assert_eq!(controls[0].setup.b_request, 0);
        assert!(controls[0].data.is_empty());

        let bulks = client.backend().bulk_log();
        let sizes: Vec<usize> = bulks.iter().map(|b| b.data.len()).collect();
        // 70000 is not a multiple of 512, so no trailing ZLP.
        assert_eq!(sizes, vec![32768, 32768, 4464]);
        assert!(bulks.iter().all(|b| b.endpoint == RECOVERY_UPLOAD_ENDPOINT));
    }

    #[test]
    fn test_recovery_upload_appends_zlp_on_packet_multiple() {
        let mut client = ready_client(0x1283);
        let buffer = vec![0u8; 1024];
        client.send_buffer(&buffer, SendOptions::default()).unwrap();

        let sizes: Vec<usize> = client
            .backend()
            .bulk_log()
            .iter()
            .map(|b| b.data.len())
            .collect();
        assert_eq!(sizes, vec![1024, 0]);
    }

    #[test]
    fn test_recovery_short_bulk_write_fails() {
        let mut client = ready_client(0x1281);
        client.backend().queue_bulk_result(100);
        let buffer = vec![0u8; 1000];
        assert!(matches!(
            client.send_buffer(&buffer, SendOptions::default()),
            Err(Error::UploadFailed)
        ));
    }

    #[test]
    fn test_dfu_upload_single_chunk_with_trailer() {
        let mut client = ready_client(0x1227);
        client.backend().queue_dfu_state(DFU_STATE_IDLE);
        client.backend().queue_dfu_status(DFU_STATE_DNLOAD_IDLE);

        let buffer = vec![0x11u8; 1000];
        client.send_buffer(&buffer, SendOptions::default()).unwrap();

        let controls = client.backend().control_out_log();
        assert_eq!(controls.len(), 1);
        let chunk = &controls[0];
        assert_eq!(chunk.setup.bm_request_type, REQ_DFU_OUT);
        assert_eq!(chunk.setup.b_request, DFU_DNLOAD);
        assert_eq!(chunk.setup.w_value, 0);
        assert_eq!(chunk.setup.w_index, 0);
        assert_eq!(chunk.data.len(), 1000 + DFU_TRAILER_SIZE);
        assert_eq!(&chunk.data[..1000], &buffer[..]);
        assert_eq!(&chunk.data[1000..1012], &DFU_TRAILER_FOOTER);

        let mut crc = Crc32::new();
        crc.update(&buffer);
        crc.update(&DFU_TRAILER_FOOTER);
        assert_eq!(LittleEndian::read_u32(&chunk.data[1012..]), crc.value());
    }

    #[test]
    fn test_dfu_upload_flushes_full_chunk_before_trailer() {
        let mut client = ready_client(0x1227);
        client.backend().queue_dfu_state(DFU_STATE_IDLE);
        client.backend().queue_dfu_status(DFU_STATE_DNLOAD_IDLE);
        client.backend().queue_dfu_status(DFU_STATE_DNLOAD_IDLE);

        // Two full chunks: the trailer does not fit in the second, so
        // it goes out on its own.
        let buffer = vec![0x22u8; 2 * DFU_CHUNK_SIZE];
        client.send_buffer(&buffer, SendOptions::default()).unwrap();

        let controls = client.backend().control_out_log();
        assert_eq!(controls.len(), 3);
        assert_eq!(controls[0].setup.w_value, 0);
        assert_eq!(controls[0].data.len(), DFU_CHUNK_SIZE);
        assert_eq!(controls[1].setup.w_value, 1);
        assert_eq!(controls[1].data.len(), DFU_CHUNK_SIZE);
        assert_eq!(controls[2].setup.w_value, 1);
        assert_eq!(controls[2].data.len(), DFU_TRAILER_SIZE);

        let mut crc = Crc32::new();
        crc.update(&buffer);
        crc.update(&DFU_TRAILER_FOOTER);
        assert_eq!(&controls[2].data[..12], &DFU_TRAILER_FOOTER);
        assert_eq!(LittleEndian::read_u32(&controls[2].data[12..]), crc.value());
    }

    #[test]
    fn test_dfu_error_state_clears_and_fails() {
        let mut client = ready_client(0x1227);
        client.backend().queue_dfu_state(DFU_STATE_ERROR);

        let result = client.send_buffer(&[0u8; 16], SendOptions::default());
        assert!(matches!(result, Err(Error::UploadFailed)));

        let controls = client.backend().control_out_log();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].setup.b_request, DFU_CLRSTATUS);
    }

    #[test]
    fn test_dfu_unexpected_state_aborts() {
        let mut client = ready_client(0x1222);
        client.backend().queue_dfu_state(7);

        let result = client.send_buffer(&[0u8; 16], SendOptions::default());
        assert!(matches!(result, Err(Error::UploadFailed)));
        assert_eq!(
            client.backend().control_out_log()[0].setup.b_request,
            DFU_ABORT
        );
    }

    #[test]
    fn test_notify_finish_sequence() {
        let mut client = ready_client(0x1227);
        client.backend().queue_dfu_state(DFU_STATE_IDLE);
        // One per chunk, then two for the finish notification.
        for _ in 0..3 {
            client.backend().queue_dfu_status(DFU_STATE_DNLOAD_IDLE);
        }

        let options = SendOptions {
            notify_finish: true,
            force_zlp: true,
        };
        client.send_buffer(&[0x33u8; 64], options).unwrap();

        let controls = client.backend().control_out_log();
        // chunk 0, finish notification, forced ZLP.
        assert_eq!(controls.len(), 3);
        assert_eq!(controls[1].setup.b_request, DFU_DNLOAD);
        assert_eq!(controls[1].setup.w_value, 1);
        assert!(controls[1].data.is_empty());
        assert_eq!(controls[2].setup.b_request, 0);
        assert!(controls[2].data.is_empty());
        assert_eq!(client.backend().reset_log().len(), 1);
    }

    #[test]
    fn test_finish_transfer_polls_and_resets() {
        let mut client = ready_client(0x1227);
        for _ in 0..3 {
            client.backend().queue_dfu_status(DFU_STATE_DNLOAD_IDLE);
        }
        client.finish_transfer().unwrap();

        let controls = client.backend().control_out_log();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].setup.b_request, DFU_DNLOAD);
        assert!(controls[0].data.is_empty());
        assert_eq!(client.backend().control_in_log().len(), 3);
        assert_eq!(client.backend().reset_log().len(), 1);
    }

    #[test]
    fn test_reset_counters_only_touches_dfu_wire() {
        let mut dfu = ready_client(0x1227);
        dfu.reset_counters().unwrap();
        assert_eq!(dfu.backend().control_out_log()[0].setup.b_request, DFU_CLRSTATUS);

        let mut recovery = ready_client(0x1281);
        recovery.reset_counters().unwrap();
        assert!(recovery.backend().control_out_log().is_empty());
    }

    #[test]
    fn test_progress_events_accumulate() {
        use crate::events::{ClientEvent, ClientObserver};
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        struct Recorder(Mutex<Vec<(u64, u64)>>);

        impl ClientObserver for Recorder {
            fn on_event(&self, event: &ClientEvent) {
                let ClientEvent::Progress { sent, total, .. } = event;
                self.0.lock().unwrap().push((*sent, *total));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let mut client = Client::with_observer(
            MockBackend::new(),
            ClientConfig::default(),
            recorder.clone(),
        );
        let dev = client.backend().add_device(
            DeviceDescriptor {
                id_vendor: 0x05AC,
                id_product: 0x1281,
                bcd_device: 0,
                i_serial_number: 3,
            },
            SERIAL,
        );
        client.backend().attach(dev);
        client.poll().unwrap();

        let buffer = vec![0u8; 70000];
        client.send_buffer(&buffer, SendOptions::default()).unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(32768, 70000), (65536, 70000), (70000, 70000)]
        );
    }

    #[test]
    fn test_send_buffer_without_device() {
        let mut client = Client::new(MockBackend::new(), ClientConfig::default());
        assert!(matches!(
            client.send_buffer(&[0u8; 4], SendOptions::default()),
            Err(Error::NoDevice)
        ));
    }
}
