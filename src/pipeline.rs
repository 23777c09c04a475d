//! Double-buffered block streaming
//!
//! Both streams alternate between two block-sized buffers so the medium and
//! the bus stay busy at the same time: while one buffer travels over USB,
//! the other is being filled from (or drained to) the block device. Buffer
//! ownership strictly alternates with the `i & 1` index.

use embassy_futures::select::{select, Either};

use crate::block::BlockDevice;
use crate::bulk_only::Error;
use crate::fmt::{trace, warn};
use crate::shared::MsdShared;
use crate::usb::UsbDriver;

/// Size of one stream buffer; the largest supported block size.
pub(crate) const BLOCK_BUF_LEN: usize = 512;

/// How a stream finished.
pub(crate) enum StreamEnd {
    /// All requested blocks moved.
    Done { transferred: u32 },
    /// The block device failed mid-stream. `transferred` still accounts for
    /// every byte that crossed the bus; nothing is left in flight.
    DeviceError { transferred: u32 },
    /// A reset won the rendezvous race; the command is abandoned.
    Reset,
}

/// Streams `count` blocks from the medium to the host.
pub(crate) async fn read_stream<U: UsbDriver, B: BlockDevice>(
    usb: &mut U,
    block: &mut B,
    shared: &MsdShared,
    buf: &mut [[u8; BLOCK_BUF_LEN]; 2],
    block_size: usize,
    lba: u64,
    count: usize,
) -> Result<StreamEnd, Error<U::Error>> {
    let mut transferred = 0u32;
    if count == 0 {
        return Ok(StreamEnd::Done { transferred });
    }

    if block.read(lba, &mut buf[0][..block_size], 1).is_err() {
        warn!("msd: block read failed at lba {}", lba);
        return Ok(StreamEnd::DeviceError { transferred });
    }

    for i in 0..count {
        usb.start_transmit(&buf[i & 1][..block_size])
            .map_err(Error::Usb)?;

        let mut failed = false;
        if i + 1 < count {
            // fetch the next block while the transfer is in flight
            let next = lba + i as u64 + 1;
            failed = block
                .read(next, &mut buf[(i + 1) & 1][..block_size], 1)
                .is_err();
            if failed {
                warn!("msd: block read failed at lba {}", next);
            }
        }

        match select(shared.wait_transfer(), shared.wait_reset()).await {
            Either::First(()) => transferred += block_size as u32,
            Either::Second(()) => return Ok(StreamEnd::Reset),
        }
        if failed {
            return Ok(StreamEnd::DeviceError { transferred });
        }
        trace!("msd: read {}/{} blocks", i + 1, count);
    }

    Ok(StreamEnd::Done { transferred })
}

/// Streams `count` blocks from the host to the medium.
pub(crate) async fn write_stream<U: UsbDriver, B: BlockDevice>(
    usb: &mut U,
    block: &mut B,
    shared: &MsdShared,
    buf: &mut [[u8; BLOCK_BUF_LEN]; 2],
    block_size: usize,
    lba: u64,
    count: usize,
) -> Result<StreamEnd, Error<U::Error>> {
    let mut transferred = 0u32;
    if count == 0 {
        return Ok(StreamEnd::Done { transferred });
    }

    usb.start_receive(block_size).map_err(Error::Usb)?;
    match select(shared.wait_transfer(), shared.wait_reset()).await {
        Either::First(()) => {}
        Either::Second(()) => return Ok(StreamEnd::Reset),
    }

    for i in 0..count {
        transferred += usb.take_received(&mut buf[i & 1][..block_size]) as u32;

        if i + 1 < count {
            // receive the next block while the medium is busy
            usb.start_receive(block_size).map_err(Error::Usb)?;
        }

        if block
            .write(lba + i as u64, &buf[i & 1][..block_size], 1)
            .is_err()
        {
            warn!("msd: block write failed at lba {}", lba + i as u64);
            if i + 1 < count {
                // drain the reception already in flight so the next command
                // starts with clean endpoints
                match select(shared.wait_transfer(), shared.wait_reset()).await {
                    Either::First(()) => {
                        transferred +=
                            usb.take_received(&mut buf[(i + 1) & 1][..block_size]) as u32;
                    }
                    Either::Second(()) => return Ok(StreamEnd::Reset),
                }
            }
            return Ok(StreamEnd::DeviceError { transferred });
        }

        if i + 1 < count {
            match select(shared.wait_transfer(), shared.wait_reset()).await {
                Either::First(()) => {}
                Either::Second(()) => return Ok(StreamEnd::Reset),
            }
        }
        trace!("msd: wrote {}/{} blocks", i + 1, count);
    }

    Ok(StreamEnd::Done { transferred })
}
