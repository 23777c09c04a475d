//! Control endpoint handling
//!
//! [ControlHandler] is the interrupt-context half of the driver. The
//! integration glue forwards GET_DESCRIPTOR lookups, class-specific setup
//! packets and bus events to it; data replies are handed back for the
//! caller's USB stack to place in the setup transfer.

use crate::descriptor::DescriptorSet;
use crate::fmt::{debug, info};
use crate::shared::{MsdEvent, MsdShared};
use crate::usb::UsbEvent;

const REQUEST_TYPE_DIRECTION_IN: u8 = 0x80;
const REQUEST_TYPE_TYPE_MASK: u8 = 0x60;
const REQUEST_TYPE_TYPE_CLASS: u8 = 0x20;
const REQUEST_TYPE_RECIPIENT_MASK: u8 = 0x1F;
const REQUEST_TYPE_RECIPIENT_INTERFACE: u8 = 0x01;

/// Bulk-Only Mass Storage Reset
const REQUEST_BULK_ONLY_RESET: u8 = 0xFF;
/// Get Max LUN
const REQUEST_GET_MAX_LUN: u8 = 0xFE;

/// Single logical unit, index 0.
const MAX_LUN_RESPONSE: &[u8] = &[0x00];

/// A parsed 8-byte SETUP packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn from_le_bytes(raw: &[u8; 8]) -> Self {
        SetupPacket {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    fn is_class_interface(&self) -> bool {
        self.request_type & REQUEST_TYPE_TYPE_MASK == REQUEST_TYPE_TYPE_CLASS
            && self.request_type & REQUEST_TYPE_RECIPIENT_MASK == REQUEST_TYPE_RECIPIENT_INTERFACE
    }

    fn is_device_to_host(&self) -> bool {
        self.request_type & REQUEST_TYPE_DIRECTION_IN != 0
    }
}

/// Outcome of a class request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlReply<'a> {
    /// Not a request of this class; apply the stack's default processing.
    NotHandled,
    /// Request carried out; complete the status stage.
    Accepted,
    /// Request carried out; transmit these bytes in the data stage, then
    /// complete the status stage.
    Data(&'a [u8]),
}

/// Interrupt-context half of the driver: descriptors, class requests and bus
/// events.
pub struct ControlHandler<'d> {
    descriptors: DescriptorSet,
    shared: &'d MsdShared,
}

impl<'d> ControlHandler<'d> {
    pub(crate) fn new(descriptors: DescriptorSet, shared: &'d MsdShared) -> Self {
        ControlHandler {
            descriptors,
            shared,
        }
    }

    /// Answers a GET_DESCRIPTOR request; `None` for unknown pairs.
    pub fn get_descriptor(&self, dtype: u8, index: u8, langid: u16) -> Option<&[u8]> {
        self.descriptors.get(dtype, index, langid)
    }

    /// Handles a class-specific setup packet.
    ///
    /// Only Class/Interface requests addressed to interface 0 are considered;
    /// anything else, including requests with invalid fields, yields
    /// [ControlReply::NotHandled].
    pub fn class_request(&mut self, setup: &SetupPacket) -> ControlReply<'_> {
        if !setup.is_class_interface() || setup.index != 0 {
            return ControlReply::NotHandled;
        }

        debug!("msd: class request {}", setup.request);

        match setup.request {
            REQUEST_BULK_ONLY_RESET => {
                if setup.is_device_to_host() || setup.value != 0 || setup.length != 0 {
                    return ControlReply::NotHandled;
                }
                info!("msd: bulk-only reset");
                self.shared.signal_reset();
                ControlReply::Accepted
            }
            REQUEST_GET_MAX_LUN => {
                if !setup.is_device_to_host() || setup.value != 0 || setup.length != 1 {
                    return ControlReply::NotHandled;
                }
                ControlReply::Data(MAX_LUN_RESPONSE)
            }
            _ => ControlReply::NotHandled,
        }
    }

    /// Handles a bus-level event.
    ///
    /// Configured starts the worker and broadcasts
    /// [Connected](MsdEvent::Connected); Reset and Suspend make the worker
    /// tear down any transfer in flight and return to idle.
    pub fn usb_event(&mut self, event: UsbEvent) {
        match event {
            UsbEvent::Configured => {
                info!("msd: bus configured");
                self.shared.signal_configured();
                self.shared.publish(MsdEvent::Connected);
            }
            UsbEvent::Reset | UsbEvent::Suspend => {
                self.shared.signal_reset();
            }
            UsbEvent::Address | UsbEvent::Wakeup | UsbEvent::Stalled => {}
        }
    }
}
