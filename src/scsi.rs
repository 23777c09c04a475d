//! SCSI transparent command set
//!
//! Command block decoding, sense bookkeeping and the fixed response images
//! for the commands a removable direct-access device is expected to answer.
//! Dispatch and data-phase streaming live in [bulk_only].
//!
//! All multi-byte CDB fields and response integers are big-endian on the
//! wire; conversions are explicit.
//!
//! [bulk_only]: crate::bulk_only

use crate::block::BlockDeviceInfo;

/* SPC */
pub(crate) const TEST_UNIT_READY: u8 = 0x00;
pub(crate) const REQUEST_SENSE: u8 = 0x03;
pub(crate) const INQUIRY: u8 = 0x12;
pub(crate) const MODE_SENSE_6: u8 = 0x1A;
pub(crate) const START_STOP_UNIT: u8 = 0x1B;
pub(crate) const SEND_DIAGNOSTIC: u8 = 0x1D;
pub(crate) const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;

/* SBC */
pub(crate) const READ_CAPACITY_10: u8 = 0x25;
pub(crate) const READ_10: u8 = 0x28;
pub(crate) const WRITE_10: u8 = 0x2A;
pub(crate) const VERIFY_10: u8 = 0x2F;

/* MMC */
pub(crate) const READ_FORMAT_CAPACITIES: u8 = 0x23;

/* Sense keys */
pub(crate) const SENSE_KEY_GOOD: u8 = 0x00;
pub(crate) const SENSE_KEY_MEDIUM_ERROR: u8 = 0x03;
pub(crate) const SENSE_KEY_ILLEGAL_REQUEST: u8 = 0x05;
pub(crate) const SENSE_KEY_DATA_PROTECT: u8 = 0x07;

/* Additional sense codes */
pub(crate) const ASC_NO_ADDITIONAL_INFORMATION: u8 = 0x00;
pub(crate) const ASC_WRITE_ERROR: u8 = 0x0C;
pub(crate) const ASC_UNRECOVERED_READ_ERROR: u8 = 0x11;
pub(crate) const ASC_INVALID_COMMAND: u8 = 0x20;
pub(crate) const ASC_INVALID_FIELD_IN_CDB: u8 = 0x24;
pub(crate) const ASC_WRITE_PROTECTED: u8 = 0x27;

/* Additional sense code qualifiers */
pub(crate) const ASCQ_NO_QUALIFIER: u8 = 0x00;

/// Unit serial number VPD page code.
pub(crate) const VPD_PAGE_UNIT_SERIAL: u8 = 0x80;

/// LoEj=1, Start=0 in the START STOP UNIT power condition field.
pub(crate) const START_STOP_LOEJ: u8 = 0x02;

/// A decoded Command Descriptor Block.
///
/// Fields the interpreter does not act on are not carried.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ScsiCommand {
    Unknown,

    /* SPC */
    TestUnitReady,
    RequestSense,
    Inquiry { evpd: bool, page_code: u8 },
    ModeSense6,
    StartStopUnit { load_eject_start: u8 },
    SendDiagnostic { self_test: bool },
    PreventAllowMediumRemoval,

    /* SBC */
    ReadCapacity10,
    Read10 { lba: u32, len: u16 },
    Write10 { lba: u32, len: u16 },
    Verify10,

    /* MMC */
    ReadFormatCapacities,
}

pub(crate) fn parse_cdb(cdb: &[u8; 16]) -> ScsiCommand {
    match cdb[0] {
        TEST_UNIT_READY => ScsiCommand::TestUnitReady,
        REQUEST_SENSE => ScsiCommand::RequestSense,
        INQUIRY => ScsiCommand::Inquiry {
            evpd: (cdb[1] & 0b0000_0001) != 0,
            page_code: cdb[2],
        },
        MODE_SENSE_6 => ScsiCommand::ModeSense6,
        START_STOP_UNIT => ScsiCommand::StartStopUnit {
            load_eject_start: cdb[4] & 0b0000_0011,
        },
        SEND_DIAGNOSTIC => ScsiCommand::SendDiagnostic {
            self_test: (cdb[1] & 0b0000_0100) != 0,
        },
        PREVENT_ALLOW_MEDIUM_REMOVAL => ScsiCommand::PreventAllowMediumRemoval,
        READ_CAPACITY_10 => ScsiCommand::ReadCapacity10,
        READ_10 => ScsiCommand::Read10 {
            lba: u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]),
            len: u16::from_be_bytes([cdb[7], cdb[8]]),
        },
        WRITE_10 => ScsiCommand::Write10 {
            lba: u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]),
            len: u16::from_be_bytes([cdb[7], cdb[8]]),
        },
        VERIFY_10 => ScsiCommand::Verify10,
        READ_FORMAT_CAPACITIES => ScsiCommand::ReadFormatCapacities,
        _ => ScsiCommand::Unknown,
    }
}

pub(crate) const SENSE_LEN: usize = 18;

/// Fixed-format sense data, latched across commands for REQUEST SENSE.
#[derive(Debug, Copy, Clone)]
pub(crate) struct SenseData {
    bytes: [u8; SENSE_LEN],
}

impl SenseData {
    pub(crate) const fn new() -> Self {
        let mut bytes = [0u8; SENSE_LEN];
        bytes[0] = 0x70; // response code: current errors, fixed format
        bytes[7] = 0x0A; // additional sense length
        SenseData { bytes }
    }

    pub(crate) fn set(&mut self, key: u8, asc: u8, ascq: u8) {
        self.bytes[2] = key;
        self.bytes[12] = asc;
        self.bytes[13] = ascq;
    }

    pub(crate) fn bytes(&self) -> [u8; SENSE_LEN] {
        self.bytes
    }
}

pub(crate) const INQUIRY_LEN: usize = 36;

const INQUIRY_VENDOR: &[u8; 8] = b"USB MSD ";
const INQUIRY_PRODUCT: &[u8; 16] = b"Mass Storage    ";
const INQUIRY_REVISION: &[u8; 4] = b"1.00";

/// Standard INQUIRY response: removable direct-access device, SPC-2.
pub(crate) fn inquiry_response() -> [u8; INQUIRY_LEN] {
    let mut response = [0u8; INQUIRY_LEN];
    response[0] = 0x00; // direct-access block device
    response[1] = 0x80; // removable
    response[2] = 0x04; // SPC-2
    response[3] = 0x02; // response data format
    response[4] = (INQUIRY_LEN - 4) as u8; // additional length
    response[8..16].copy_from_slice(INQUIRY_VENDOR);
    response[16..32].copy_from_slice(INQUIRY_PRODUCT);
    response[32..36].copy_from_slice(INQUIRY_REVISION);
    response
}

const UNIT_SERIAL_HEADER_LEN: usize = 4;
const UNIT_SERIAL_MAX_LEN: usize = 31;

/// Unit serial number VPD page (page `0x80`).
#[derive(Debug, Copy, Clone)]
pub(crate) struct UnitSerialPage {
    bytes: [u8; UNIT_SERIAL_HEADER_LEN + UNIT_SERIAL_MAX_LEN],
    len: usize,
}

impl UnitSerialPage {
    pub(crate) fn new(serial: &str) -> Self {
        let mut bytes = [0u8; UNIT_SERIAL_HEADER_LEN + UNIT_SERIAL_MAX_LEN];
        let mut len = UNIT_SERIAL_HEADER_LEN;
        for byte in serial.bytes().take(UNIT_SERIAL_MAX_LEN) {
            bytes[len] = if byte.is_ascii_graphic() { byte } else { b' ' };
            len += 1;
        }
        bytes[1] = VPD_PAGE_UNIT_SERIAL;
        bytes[3] = (len - UNIT_SERIAL_HEADER_LEN) as u8; // page length
        UnitSerialPage { bytes, len }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

pub(crate) const READ_CAPACITY_LEN: usize = 8;

/// READ CAPACITY (10): address of the last block and the block size.
pub(crate) fn read_capacity_response(info: &BlockDeviceInfo) -> [u8; READ_CAPACITY_LEN] {
    let last_lba = u32::try_from(info.block_count.saturating_sub(1)).unwrap_or(u32::MAX);
    let mut response = [0u8; READ_CAPACITY_LEN];
    response[..4].copy_from_slice(&last_lba.to_be_bytes());
    response[4..].copy_from_slice(&info.block_size.to_be_bytes());
    response
}

pub(crate) const FORMAT_CAPACITIES_LEN: usize = 12;

/// READ FORMAT CAPACITIES: a single formatted-media capacity descriptor.
pub(crate) fn format_capacities_response(info: &BlockDeviceInfo) -> [u8; FORMAT_CAPACITIES_LEN] {
    let block_count = u32::try_from(info.block_count).unwrap_or(u32::MAX);
    let mut response = [0u8; FORMAT_CAPACITIES_LEN];
    response[3] = 1; // capacity list length
    response[4..8].copy_from_slice(&block_count.to_be_bytes());
    response[8] = 0x02; // descriptor type: formatted media
    response[9] = (info.block_size >> 16) as u8;
    response[10] = (info.block_size >> 8) as u8;
    response[11] = info.block_size as u8;
    response
}

pub(crate) const MODE_SENSE_LEN: usize = 4;

/// MODE SENSE (6) header with the WP flag in byte 3; no pages follow.
pub(crate) fn mode_sense_response(write_protected: bool) -> [u8; MODE_SENSE_LEN] {
    let mut response = [0u8; MODE_SENSE_LEN];
    if write_protected {
        response[3] = 0x80;
    }
    response
}

const _: () = assert!(SENSE_LEN == 18);
const _: () = assert!(INQUIRY_LEN == 36);
