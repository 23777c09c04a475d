//! USB descriptor assembly
//!
//! Builds the device, configuration and string descriptors from a runtime
//! [Config] and answers GET_DESCRIPTOR lookups. Descriptors are materialized
//! once at construction; nothing is rebuilt at runtime.
//!
//! [Config]: crate::Config

use crate::{Config, CLASS_MASS_STORAGE, PROTOCOL_BULK_ONLY, SUBCLASS_SCSI};

pub(crate) const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub(crate) const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub(crate) const DESCRIPTOR_TYPE_STRING: u8 = 0x03;
const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

const ENDPOINT_TYPE_BULK: u8 = 0x02;
const ENDPOINT_DIRECTION_IN: u8 = 0x80;

/// Default vendor ID (ST).
pub const DEFAULT_VENDOR_ID: u16 = 0x0483;
/// Default product ID.
pub const DEFAULT_PRODUCT_ID: u16 = 0x5742;
/// Default bulk endpoint index.
pub const DEFAULT_DATA_ENDPOINT: u8 = 0x01;

pub(crate) const DEFAULT_MANUFACTURER: &str = "Generic";
pub(crate) const DEFAULT_PRODUCT: &str = "Mass Storage Device";
pub(crate) const DEFAULT_SERIAL_NUMBER: &str = "000000000001";

/// Control endpoint and bulk endpoint max packet size.
const PACKET_SIZE: u8 = 64;
/// Bulk endpoint polling interval in milliseconds.
const ENDPOINT_INTERVAL_MS: u8 = 5;
/// bMaxPower unit is 2 mA.
const MAX_POWER_100MA: u8 = 50;
/// bmAttributes: self powered.
const ATTRIBUTES_SELF_POWERED: u8 = 0xC0;

/// U.S. English.
const LANGID_EN_US: u16 = 0x0409;

const DEVICE_DESC_LEN: usize = 18;
const CONFIGURATION_HEADER_LEN: usize = 9;
const INTERFACE_DESC_LEN: usize = 9;
const ENDPOINT_DESC_LEN: usize = 7;
const CONFIGURATION_DESC_LEN: usize =
    CONFIGURATION_HEADER_LEN + INTERFACE_DESC_LEN + 2 * ENDPOINT_DESC_LEN;

const _: () = assert!(CONFIGURATION_DESC_LEN == 32);

/// Longest supported identity string, in UTF-16 code units.
pub const MAX_STRING_LEN: usize = 31;
/// Shortest accepted serial number, in UTF-16 code units.
pub const MIN_SERIAL_LEN: usize = 12;

const STRING_DESC_CAPACITY: usize = 2 + 2 * MAX_STRING_LEN;

/// Identity rejected at construction time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// An identity string does not fit its descriptor slot.
    StringTooLong,
    /// The serial number is shorter than [MIN_SERIAL_LEN] code units.
    SerialTooShort,
    /// The bulk endpoint index is not in `1..=15`.
    InvalidDataEndpoint,
}

struct StringDescriptor {
    bytes: [u8; STRING_DESC_CAPACITY],
    len: usize,
}

impl StringDescriptor {
    fn encode(s: &str) -> Result<Self, ConfigError> {
        let mut bytes = [0u8; STRING_DESC_CAPACITY];
        let mut len = 2;
        for unit in s.encode_utf16() {
            if len + 2 > STRING_DESC_CAPACITY {
                return Err(ConfigError::StringTooLong);
            }
            bytes[len..len + 2].copy_from_slice(&unit.to_le_bytes());
            len += 2;
        }
        bytes[0] = len as u8;
        bytes[1] = DESCRIPTOR_TYPE_STRING;
        Ok(StringDescriptor { bytes, len })
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// The four descriptors of the device, assembled from a [Config].
pub(crate) struct DescriptorSet {
    device: [u8; DEVICE_DESC_LEN],
    configuration: [u8; CONFIGURATION_DESC_LEN],
    language: [u8; 4],
    strings: [StringDescriptor; 3],
}

impl DescriptorSet {
    pub(crate) fn new(config: &Config<'_>) -> Result<Self, ConfigError> {
        if config.data_ep == 0 || config.data_ep > 0x0F {
            return Err(ConfigError::InvalidDataEndpoint);
        }

        let serial = config.serial_number.unwrap_or(DEFAULT_SERIAL_NUMBER);
        if serial.encode_utf16().count() < MIN_SERIAL_LEN {
            return Err(ConfigError::SerialTooShort);
        }

        Ok(DescriptorSet {
            device: device_descriptor(config.vendor_id, config.product_id),
            configuration: configuration_descriptor(config.data_ep),
            language: [
                4,
                DESCRIPTOR_TYPE_STRING,
                LANGID_EN_US.to_le_bytes()[0],
                LANGID_EN_US.to_le_bytes()[1],
            ],
            strings: [
                StringDescriptor::encode(config.manufacturer.unwrap_or(DEFAULT_MANUFACTURER))?,
                StringDescriptor::encode(config.product.unwrap_or(DEFAULT_PRODUCT))?,
                StringDescriptor::encode(serial)?,
            ],
        })
    }

    /// Answers a GET_DESCRIPTOR request; `None` for unknown pairs.
    pub(crate) fn get(&self, dtype: u8, index: u8, _langid: u16) -> Option<&[u8]> {
        match dtype {
            DESCRIPTOR_TYPE_DEVICE => Some(&self.device),
            DESCRIPTOR_TYPE_CONFIGURATION => Some(&self.configuration),
            DESCRIPTOR_TYPE_STRING => match index {
                0 => Some(&self.language),
                1..=3 => Some(self.strings[usize::from(index) - 1].as_bytes()),
                _ => None,
            },
            _ => None,
        }
    }
}

fn device_descriptor(vendor_id: u16, product_id: u16) -> [u8; DEVICE_DESC_LEN] {
    let vid = vendor_id.to_le_bytes();
    let pid = product_id.to_le_bytes();
    [
        DEVICE_DESC_LEN as u8,  // bLength
        DESCRIPTOR_TYPE_DEVICE, // bDescriptorType
        0x00,
        0x02, // bcdUSB (2.0)
        0x00, // bDeviceClass (per interface)
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        PACKET_SIZE,
        vid[0],
        vid[1],
        pid[0],
        pid[1],
        0x00,
        0x01, // bcdDevice
        1,    // iManufacturer
        2,    // iProduct
        3,    // iSerialNumber
        1,    // bNumConfigurations
    ]
}

fn configuration_descriptor(data_ep: u8) -> [u8; CONFIGURATION_DESC_LEN] {
    [
        // configuration
        CONFIGURATION_HEADER_LEN as u8,
        DESCRIPTOR_TYPE_CONFIGURATION,
        CONFIGURATION_DESC_LEN as u8,
        0x00, // wTotalLength
        0x01, // bNumInterfaces
        0x01, // bConfigurationValue
        0x00, // iConfiguration
        ATTRIBUTES_SELF_POWERED,
        MAX_POWER_100MA,
        // interface
        INTERFACE_DESC_LEN as u8,
        DESCRIPTOR_TYPE_INTERFACE,
        0x00, // bInterfaceNumber
        0x00, // bAlternateSetting
        0x02, // bNumEndpoints
        CLASS_MASS_STORAGE,
        SUBCLASS_SCSI,
        PROTOCOL_BULK_ONLY,
        0x00, // iInterface
        // bulk IN endpoint
        ENDPOINT_DESC_LEN as u8,
        DESCRIPTOR_TYPE_ENDPOINT,
        data_ep | ENDPOINT_DIRECTION_IN,
        ENDPOINT_TYPE_BULK,
        PACKET_SIZE,
        0x00, // wMaxPacketSize
        ENDPOINT_INTERVAL_MS,
        // bulk OUT endpoint
        ENDPOINT_DESC_LEN as u8,
        DESCRIPTOR_TYPE_ENDPOINT,
        data_ep,
        ENDPOINT_TYPE_BULK,
        PACKET_SIZE,
        0x00, // wMaxPacketSize
        ENDPOINT_INTERVAL_MS,
    ]
}
