//! Block device interface

use core::fmt::Debug;

/// State of the backing medium.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockDeviceState {
    Uninit,
    Ready,
    Reading,
    Writing,
    Error,
}

/// Geometry of the backing medium, queried once after it reports
/// [Ready](BlockDeviceState::Ready) and treated as immutable afterwards.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockDeviceInfo {
    /// Size of a single logical block in bytes.
    pub block_size: u32,
    /// Total number of addressable blocks.
    pub block_count: u64,
}

/// Fixed-block-size random-access medium (SD card, flash translation
/// layer, RAM disk).
///
/// `read` and `write` block the calling task until the medium has finished.
/// They are only ever invoked from the worker task, never from interrupt
/// context.
pub trait BlockDevice {
    type Error: Debug;

    fn state(&self) -> BlockDeviceState;

    fn info(&self) -> BlockDeviceInfo;

    /// Reads `blocks` consecutive blocks starting at `lba` into `buf`.
    fn read(&mut self, lba: u64, buf: &mut [u8], blocks: usize) -> Result<(), Self::Error>;

    /// Writes `blocks` consecutive blocks starting at `lba` from `buf`.
    fn write(&mut self, lba: u64, buf: &[u8], blocks: usize) -> Result<(), Self::Error>;

    fn is_write_protected(&self) -> bool;
}
