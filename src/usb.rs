//! USB device controller interface
//!
//! The driver talks to the USB peripheral through [UsbDriver], an abstraction
//! of a single bulk IN/OUT endpoint pair plus bus lifecycle control. The
//! control endpoint is not part of this trait: descriptor lookups and class
//! requests are answered by [ControlHandler] and carried out by the caller's
//! USB stack.
//!
//! [ControlHandler]: crate::control::ControlHandler

use core::fmt::Debug;

/// Bus-level event reported by the controller driver.
///
/// The integration glue forwards these to
/// [ControlHandler::usb_event](crate::control::ControlHandler::usb_event),
/// usually straight from the USB interrupt handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbEvent {
    Reset,
    Address,
    Configured,
    Suspend,
    Wakeup,
    Stalled,
}

/// Bulk endpoint pair of a USB device controller.
///
/// Transfer contracts:
/// * `start_receive` and `start_transmit` are non-blocking. They arm the
///   hardware and return; the transfer completes asynchronously and the
///   controller's completion interrupt must call
///   [MsdShared::transfer_complete].
/// * At most one transfer per direction is in flight at any time. The driver
///   awaits every completion before arming the next transfer.
/// * Splitting a transfer into bus packets (e.g. 512 bytes over 64-byte
///   packets) is the implementation's job. One `start_*` call corresponds to
///   one completion signal, covering the whole transfer.
///
/// [MsdShared::transfer_complete]: crate::shared::MsdShared::transfer_complete
pub trait UsbDriver {
    type Error: Debug;

    /// Arms a bulk OUT reception of up to `len` bytes.
    fn start_receive(&mut self, len: usize) -> Result<(), Self::Error>;

    /// Copies the payload of the last completed reception into `dst` and
    /// returns the number of bytes copied.
    ///
    /// Called exactly once per completed reception.
    fn take_received(&mut self, dst: &mut [u8]) -> usize;

    /// Arms a bulk IN transmission of `data`.
    ///
    /// The bytes are captured before this returns; the caller is free to
    /// reuse the slice immediately.
    fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Halts the bulk IN endpoint.
    fn stall_in(&mut self);

    /// Halts the bulk OUT endpoint.
    fn stall_out(&mut self);

    /// Aborts any in-flight bulk transfer and clears both endpoint halts.
    ///
    /// No completion is signaled for an aborted transfer.
    fn reset_endpoints(&mut self);

    /// Attaches the device to the bus (D+ pull-up on).
    fn connect(&mut self);

    /// Detaches the device from the bus and stops the controller.
    fn disconnect(&mut self);
}
