//! SCSI command round trips over USB Bulk-Only Transport.
//!
//! One command is a CBW write on the OUT endpoint, an optional data phase,
//! then a 13-byte CSW read on the IN endpoint. The CSW must echo the CBW
//! tag. Commands on one handle must never interleave: the transport is
//! single-producer and callers serialize access.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::protocol::{
    decode_sense, CommandBlockWrapper, CommandStatusWrapper, CBW_FLAGS_DATA_IN,
    CBW_FLAGS_DATA_OUT, CBW_LEN, CSW_LEN, REQUEST_SENSE, REQUEST_SENSE_LEN,
    STATUS_CHECK_CONDITION, STATUS_GOOD, STATUS_PHASE_ERROR, TEST_UNIT_READY,
};

/// Bulk-IN endpoint of the panel.
pub const EP_IN: u8 = 0x81;
/// Bulk-OUT endpoint of the panel.
pub const EP_OUT: u8 = 0x02;

/// Timeout for CBW and CSW transfers.
const WRAPPER_TIMEOUT: Duration = Duration::from_secs(1);
/// Timeout for data phases.
const DATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one SCSI round trip.
#[derive(Debug, Clone, Default)]
pub struct ScsiResult {
    /// True when the CSW reported status 0.
    pub ok: bool,
    /// CSW status byte: 0 passed, 1 check condition, 2 phase error.
    pub status: u8,
    /// Data-in phase payload, empty otherwise.
    pub data: Vec<u8>,
}

impl ScsiResult {
    fn phase_error() -> Self {
        Self {
            ok: false,
            status: STATUS_PHASE_ERROR,
            data: Vec::new(),
        }
    }
}

/// Low-level USB operations the SCSI layer needs.
///
/// `rusb` provides the production implementation; tests stub the endpoints.
pub trait UsbBackend: Send {
    /// Writes to a bulk OUT endpoint, returning the byte count moved.
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Reads from a bulk IN endpoint, returning the byte count moved.
    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Issues a no-data control request.
    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        timeout: Duration,
    ) -> Result<()>;

    /// Clears a halted endpoint.
    fn clear_halt(&self, endpoint: u8) -> Result<()>;
}

/// Production backend over a claimed `rusb` device handle.
pub struct RusbBackend {
    handle: rusb::DeviceHandle<rusb::Context>,
    interface: u8,
}

impl RusbBackend {
    pub fn new(handle: rusb::DeviceHandle<rusb::Context>, interface: u8) -> Self {
        Self { handle, interface }
    }
}

impl Drop for RusbBackend {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

impl UsbBackend for RusbBackend {
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(Error::from)
    }

    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(Error::from)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        timeout: Duration,
    ) -> Result<()> {
        self.handle
            .write_control(request_type, request, value, index, &[], timeout)
            .map(|_| ())
            .map_err(Error::from)
    }

    fn clear_halt(&self, endpoint: u8) -> Result<()> {
        self.handle.clear_halt(endpoint).map_err(Error::from)
    }
}

/// SCSI transport over a USB backend.
pub struct ScsiTransport<B: UsbBackend> {
    pub(crate) backend: B,
    interface: u8,
    next_tag: u32,
}

impl<B: UsbBackend> ScsiTransport<B> {
    pub fn new(backend: B, interface: u8) -> Self {
        Self {
            backend,
            interface,
            next_tag: 1,
        }
    }

    fn alloc_tag(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    /// Runs one SCSI command: CBW, optional data phase, CSW.
    ///
    /// `tag` 0 allocates the next tag from the counter; a non-zero tag is
    /// sent as given. A non-zero `data_in_len` takes precedence over
    /// `data_out`. Transfer failures and malformed or mismatched CSWs all
    /// surface as `{ok: false, status: 2}`.
    pub fn send_scsi(
        &mut self,
        cdb: &[u8],
        data_out: &[u8],
        data_in_len: usize,
        tag: u32,
    ) -> ScsiResult {
        debug_assert!((6..=16).contains(&cdb.len()));
        let tag = if tag == 0 { self.alloc_tag() } else { tag };
        let (transfer_len, flags) = if data_in_len > 0 {
            (data_in_len as u32, CBW_FLAGS_DATA_IN)
        } else {
            (data_out.len() as u32, CBW_FLAGS_DATA_OUT)
        };
        let cbw = CommandBlockWrapper {
            tag,
            transfer_len,
            flags,
            cdb: cdb.to_vec(),
        }
        .to_bytes();

        trace!(tag, opcode = cdb[0], "CBW");
        match self.backend.bulk_out(EP_OUT, &cbw, WRAPPER_TIMEOUT) {
            Ok(n) if n == CBW_LEN => {}
            _ => return ScsiResult::phase_error(),
        }

        let mut data_in = Vec::new();
        if data_in_len > 0 {
            data_in.resize(data_in_len, 0);
            match self.backend.bulk_in(EP_IN, &mut data_in, DATA_TIMEOUT) {
                Ok(n) => data_in.truncate(n),
                Err(_) => return ScsiResult::phase_error(),
            }
        } else if !data_out.is_empty()
            && self.backend.bulk_out(EP_OUT, data_out, DATA_TIMEOUT).is_err()
        {
            return ScsiResult::phase_error();
        }

        let mut raw = [0u8; CSW_LEN];
        let n = match self.backend.bulk_in(EP_IN, &mut raw, WRAPPER_TIMEOUT) {
            Ok(n) => n,
            Err(_) => return ScsiResult::phase_error(),
        };
        let csw = match CommandStatusWrapper::parse(&raw[..n]) {
            Some(csw) => csw,
            None => {
                debug!(bytes = n, "invalid CSW");
                return ScsiResult::phase_error();
            }
        };
        if csw.tag != tag {
            debug!(expected = tag, got = csw.tag, "CSW tag mismatch");
            return ScsiResult::phase_error();
        }

        trace!(status = csw.status, data_in = data_in.len(), "CSW");
        ScsiResult {
            ok: csw.status == STATUS_GOOD,
            status: csw.status,
            data: data_in,
        }
    }

    /// Issues a Mass Storage Reset and clears both endpoint halts.
    pub fn reset_transport(&mut self) {
        if let Err(e) = self
            .backend
            .control_out(0x21, 0xFF, 0, self.interface as u16, WRAPPER_TIMEOUT)
        {
            warn!("mass storage reset failed: {e}");
        }
        let _ = self.backend.clear_halt(EP_IN);
        let _ = self.backend.clear_halt(EP_OUT);
    }

    /// TEST UNIT READY, recovering the transport when the device objects.
    ///
    /// CHECK CONDITION drains the sense data before the reset so the device
    /// does not keep reporting the same condition.
    pub fn device_ready(&mut self) -> bool {
        let res = self.send_scsi(&TEST_UNIT_READY, &[], 0, 0);
        if res.ok {
            return true;
        }

        if res.status == STATUS_CHECK_CONDITION {
            let sense = self.send_scsi(&REQUEST_SENSE, &[], REQUEST_SENSE_LEN, 0);
            if let Some((key, asc, ascq)) = decode_sense(&sense.data) {
                debug!(key, asc, ascq, "unit not ready");
            }
            self.reset_transport();
            return false;
        }
        if res.status == STATUS_PHASE_ERROR {
            self.reset_transport();
        }
        false
    }
}
