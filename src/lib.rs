//! USB Mass Storage device driver
//!
//! Presents a block device to a USB host as a removable disk, speaking the
//! Bulk-Only Transport with the SCSI transparent command set. The host owns
//! the filesystem; the device moves raw logical blocks.
//!
//! The driver splits in two halves sharing one [MsdShared]:
//! * [MassStorage] — the worker half. One cooperative task polls
//!   [MassStorage::run], which services one command at a time and only
//!   suspends while a transfer is in flight.
//! * [ControlHandler] — the interrupt half. The integration glue feeds it
//!   descriptor lookups, class-specific setup packets and bus events.
//!
//! The USB controller and the storage medium plug in through the
//! [UsbDriver] and [BlockDevice] traits.
//!
//! ```ignore
//! static SHARED: MsdShared = MsdShared::new();
//!
//! let (mut msd, control) = MassStorage::new(usb, sdcard, Config::default(), &SHARED)?;
//! // wire `control` and `SHARED.transfer_complete` into the USB interrupt
//! // handler, then run the worker:
//! msd.run().await?;
//! ```
//!
//! # Features
//! | Feature | Description                           |
//! | ------- |---------------------------------------|
//! | `defmt` | Logging via [defmt](https://crates.io/crates/defmt) |
//! | `log`   | Logging via [log](https://crates.io/crates/log)     |

#![no_std]

pub(crate) mod fmt;

pub mod block;
pub mod bulk_only;
pub mod control;
pub mod descriptor;
mod pipeline;
pub(crate) mod scsi;
pub mod shared;
pub mod usb;

pub use block::{BlockDevice, BlockDeviceInfo, BlockDeviceState};
pub use bulk_only::{CommandStatus, Error, MassStorage};
pub use control::{ControlHandler, ControlReply, SetupPacket};
pub use descriptor::{ConfigError, DEFAULT_DATA_ENDPOINT, DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
pub use shared::{MsdEvent, MsdEventSubscriber, MsdShared};
pub use usb::{UsbDriver, UsbEvent};

/// USB Mass Storage class code
pub const CLASS_MASS_STORAGE: u8 = 0x08;
/// SCSI transparent command set subclass code
pub const SUBCLASS_SCSI: u8 = 0x06;
/// Bulk-Only Transport interface protocol
pub const PROTOCOL_BULK_ONLY: u8 = 0x50;

/// Host-visible identity and integration hooks, fixed at construction.
#[derive(Copy, Clone)]
pub struct Config<'a> {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Manufacturer string; a built-in default when `None`.
    pub manufacturer: Option<&'a str>,
    /// Product string; a built-in default when `None`.
    pub product: Option<&'a str>,
    /// Serial number, at least 12 code units; a built-in default when `None`.
    pub serial_number: Option<&'a str>,
    /// Bulk endpoint index, `1..=15`.
    pub data_ep: u8,
    /// Called with `true` when a READ/WRITE command starts and `false` when
    /// it finishes. Drives an activity LED on most boards.
    pub activity: Option<fn(bool)>,
}

impl Default for Config<'_> {
    fn default() -> Self {
        Config {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            manufacturer: None,
            product: None,
            serial_number: None,
            data_ep: DEFAULT_DATA_ENDPOINT,
            activity: None,
        }
    }
}
