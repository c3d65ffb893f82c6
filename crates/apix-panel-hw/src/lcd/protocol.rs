//! Bulk-Only Transport framing and the panel's SCSI command set.
//!
//! Wire structures:
//! - CBW: 31 bytes -- "USBC" signature, little-endian tag, little-endian
//!   expected transfer length, flags byte (0x80 device-to-host, 0x00
//!   host-to-device), LUN, CDB length, CDB zero-padded to 16 bytes.
//! - CSW: 13 bytes -- "USBS" signature, tag echo, residue, status byte.

/// CBW signature bytes.
pub const CBW_SIGNATURE: [u8; 4] = *b"USBC";
/// CSW signature bytes.
pub const CSW_SIGNATURE: [u8; 4] = *b"USBS";

/// CBW wire size.
pub const CBW_LEN: usize = 31;
/// CSW wire size.
pub const CSW_LEN: usize = 13;

/// Flags byte: data phase runs device-to-host.
pub const CBW_FLAGS_DATA_IN: u8 = 0x80;
/// Flags byte: data phase runs host-to-device.
pub const CBW_FLAGS_DATA_OUT: u8 = 0x00;

/// CSW status: command passed.
pub const STATUS_GOOD: u8 = 0;
/// CSW status: command failed, sense data pending.
pub const STATUS_CHECK_CONDITION: u8 = 1;
/// CSW status: transport out of sync, reset required.
pub const STATUS_PHASE_ERROR: u8 = 2;

/// TEST UNIT READY (6).
pub const TEST_UNIT_READY: [u8; 6] = [0x00; 6];
/// REQUEST SENSE (6), 18-byte allocation.
pub const REQUEST_SENSE: [u8; 6] = [0x03, 0x00, 0x00, 0x00, 18, 0x00];
/// MODE SENSE(6), 192-byte allocation.
pub const MODE_SENSE_6: [u8; 6] = [0x1A, 0x00, 0x00, 0x00, 0xC0, 0x00];
/// INQUIRY, 36-byte allocation.
pub const INQUIRY: [u8; 6] = [0x12, 0x00, 0x00, 0x00, 36, 0x00];

/// Expected data-in lengths for the fixed CDBs above.
pub const REQUEST_SENSE_LEN: usize = 18;
pub const MODE_SENSE_LEN: usize = 192;
pub const INQUIRY_LEN: usize = 36;

/// Vendor probe carrying the "APIX" magic, byte-for-byte as captured from
/// the vendor software.
pub const APIX_PROBE: [u8; 16] = [
    0xF5, 0x41, 0x50, 0x49, 0x58, 0xB3, 0x0C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
/// Data-in length of the APIX probe response.
pub const APIX_PROBE_LEN: usize = 12;

/// Bare vendor 0xF5 CDB used to read and echo the splash payload.
pub const VENDOR_PAYLOAD: [u8; 16] = [
    0xF5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
/// Size of the splash payload read back and echoed during the handshake.
pub const SPLASH_SIZE: usize = 57_627;

/// Fixed tag replayed from the vendor software's capture during the
/// handshake. The device does not interpret tags, but the capture is
/// reproduced exactly.
pub const HANDSHAKE_TAG: u32 = 0x628B_F560;

/// Builds the vendor CDB that announces one frame chunk.
///
/// The chunk payload follows as the data-out phase.
pub fn frame_chunk_cdb(index: u8, len: u32) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = 0xF5;
    cdb[1] = 0x01;
    cdb[2] = 0x01;
    cdb[3] = index;
    cdb[12..16].copy_from_slice(&len.to_le_bytes());
    cdb
}

/// Command Block Wrapper, the 31-byte header preceding every command.
#[derive(Debug, Clone)]
pub struct CommandBlockWrapper {
    pub tag: u32,
    pub transfer_len: u32,
    pub flags: u8,
    pub cdb: Vec<u8>,
}

impl CommandBlockWrapper {
    /// Serializes to the 31-byte wire form. The CDB must be 6-16 bytes.
    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        debug_assert!((6..=16).contains(&self.cdb.len()));
        let mut raw = [0u8; CBW_LEN];
        raw[0..4].copy_from_slice(&CBW_SIGNATURE);
        raw[4..8].copy_from_slice(&self.tag.to_le_bytes());
        raw[8..12].copy_from_slice(&self.transfer_len.to_le_bytes());
        raw[12] = self.flags;
        raw[13] = 0x00; // LUN
        raw[14] = self.cdb.len() as u8;
        raw[15..15 + self.cdb.len()].copy_from_slice(&self.cdb);
        raw
    }
}

/// Command Status Wrapper, the 13-byte reply closing every command.
#[derive(Debug, Clone, Copy)]
pub struct CommandStatusWrapper {
    pub tag: u32,
    pub residue: u32,
    pub status: u8,
}

impl CommandStatusWrapper {
    /// Parses a CSW; None on short reads or a bad signature.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() != CSW_LEN || raw[0..4] != CSW_SIGNATURE {
            return None;
        }
        Some(Self {
            tag: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            residue: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            status: raw[12],
        })
    }
}

/// Decodes (key, ASC, ASCQ) from a REQUEST SENSE response, if well-formed.
pub fn decode_sense(data: &[u8]) -> Option<(u8, u8, u8)> {
    if data.len() < 14 {
        return None;
    }
    Some((data[2] & 0x0F, data[12], data[13]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbw_layout() {
        let cbw = CommandBlockWrapper {
            tag: 0x11223344,
            transfer_len: 36,
            flags: CBW_FLAGS_DATA_IN,
            cdb: INQUIRY.to_vec(),
        };
        let raw = cbw.to_bytes();
        assert_eq!(&raw[0..4], b"USBC");
        assert_eq!(raw[4..8], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(raw[8..12], [36, 0, 0, 0]);
        assert_eq!(raw[12], 0x80);
        assert_eq!(raw[13], 0x00);
        assert_eq!(raw[14], 6);
        assert_eq!(&raw[15..21], &INQUIRY);
        assert!(raw[21..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_csw_parse() {
        let mut raw = [0u8; CSW_LEN];
        raw[0..4].copy_from_slice(b"USBS");
        raw[4..8].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        raw[12] = STATUS_CHECK_CONDITION;
        let csw = CommandStatusWrapper::parse(&raw).unwrap();
        assert_eq!(csw.tag, 0xDEADBEEF);
        assert_eq!(csw.residue, 0);
        assert_eq!(csw.status, 1);
    }

    #[test]
    fn test_csw_rejects_bad_signature() {
        let mut raw = [0u8; CSW_LEN];
        raw[0..4].copy_from_slice(b"USBX");
        assert!(CommandStatusWrapper::parse(&raw).is_none());
    }

    #[test]
    fn test_csw_rejects_short_read() {
        assert!(CommandStatusWrapper::parse(b"USBS").is_none());
    }

    #[test]
    fn test_frame_chunk_cdb() {
        let cdb = frame_chunk_cdb(2, 38_400);
        assert_eq!(cdb[0], 0xF5);
        assert_eq!(cdb[1], 0x01);
        assert_eq!(cdb[2], 0x01);
        assert_eq!(cdb[3], 2);
        assert!(cdb[4..12].iter().all(|&b| b == 0));
        assert_eq!(cdb[12..16], 38_400u32.to_le_bytes());
    }

    #[test]
    fn test_apix_probe_magic() {
        assert_eq!(&APIX_PROBE[1..5], b"APIX");
    }

    #[test]
    fn test_decode_sense() {
        let mut data = vec![0u8; 18];
        data[2] = 0xF6; // key in the low nibble
        data[12] = 0x3A;
        data[13] = 0x01;
        assert_eq!(decode_sense(&data), Some((6, 0x3A, 0x01)));
        assert_eq!(decode_sense(&data[..13]), None);
    }
}
