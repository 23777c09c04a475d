//! Bulk-Only Transport state machine and worker task
//!
//! [MassStorage] owns the command loop: receive a Command Block Wrapper,
//! execute the SCSI command it carries, stream the data phase and answer
//! with a Command Status Wrapper. Everything runs on one cooperative task;
//! the only suspension points are the rendezvous awaits after arming a
//! transfer.

use core::cmp::min;

use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::block::{BlockDevice, BlockDeviceInfo, BlockDeviceState};
use crate::control::ControlHandler;
use crate::descriptor::{DescriptorSet, DEFAULT_SERIAL_NUMBER};
use crate::fmt::{debug, info, trace};
use crate::pipeline::{self, StreamEnd, BLOCK_BUF_LEN};
use crate::scsi::{self, ScsiCommand, SenseData, UnitSerialPage};
use crate::shared::{MsdEvent, MsdShared};
use crate::usb::UsbDriver;
use crate::{Config, ConfigError};

pub(crate) const CBW_LEN: usize = 31;
pub(crate) const CSW_LEN: usize = 13;

const CBW_SIGNATURE: u32 = 0x4342_5355;
const CSW_SIGNATURE: u32 = 0x5342_5355;

/// Direction bit of the CBW flags byte; set for device-to-host.
const CBW_FLAGS_DIRECTION_IN: u8 = 0x80;
/// Flag bits that must be clear whenever a data phase is expected.
const CBW_FLAGS_RESERVED: u8 = 0x1F;

const MIN_CDB_LEN: u8 = 1;
const MAX_CDB_LEN: u8 = 16;

const _: () = assert!(CBW_LEN == 4 + 4 + 4 + 1 + 1 + 1 + 16);
const _: () = assert!(CSW_LEN == 4 + 4 + 4 + 1);

/// Status byte of a Command Status Wrapper.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandStatus {
    Passed = 0x00,
    Failed = 0x01,
    PhaseError = 0x02,
}

/// Fatal worker error; the command loop does not survive these.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The USB controller refused to arm a transfer.
    Usb(E),
    /// The medium's block size exceeds the stream buffers.
    UnsupportedBlockSize,
}

struct InvalidCbwError;

#[derive(Debug, Default, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct CommandBlockWrapper {
    tag: u32,
    data_len: u32,
    flags: u8,
    lun: u8,
    cdb_len: u8,
    cdb: [u8; MAX_CDB_LEN as usize],
}

impl CommandBlockWrapper {
    /// Parses and validates a received CBW image.
    fn from_le_bytes(raw: &[u8; CBW_LEN]) -> Result<Self, InvalidCbwError> {
        if u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) != CBW_SIGNATURE {
            return Err(InvalidCbwError);
        }

        let cbw = CommandBlockWrapper {
            tag: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            data_len: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            flags: raw[12],
            lun: raw[13],
            cdb_len: raw[14],
            cdb: raw[15..].try_into().unwrap_or_default(),
        };

        if cbw.lun != 0 {
            return Err(InvalidCbwError);
        }
        if !(MIN_CDB_LEN..=MAX_CDB_LEN).contains(&cbw.cdb_len) {
            return Err(InvalidCbwError);
        }
        if cbw.data_len > 0 && cbw.flags & CBW_FLAGS_RESERVED != 0 {
            return Err(InvalidCbwError);
        }

        Ok(cbw)
    }

    fn data_in(&self) -> bool {
        self.flags & CBW_FLAGS_DIRECTION_IN != 0
    }
}

fn build_csw(tag: u32, residue: u32, status: CommandStatus) -> [u8; CSW_LEN] {
    let mut csw = [0u8; CSW_LEN];
    csw[..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
    csw[4..8].copy_from_slice(&tag.to_le_bytes());
    csw[8..12].copy_from_slice(&residue.to_le_bytes());
    csw[12] = status.into();
    csw
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    /// Waiting to arm a CBW reception.
    Idle,
    /// CBW reception armed or fulfilled; parsing and execution pending.
    ReadCommandBlock,
    /// Terminal; the host ejected the medium.
    Ejected,
}

/// Outcome of a single executed command.
enum Exec {
    Pass { transferred: u32 },
    Fail { transferred: u32 },
    /// Failed with a data phase the host still expects; no CSW is sent and
    /// the host must perform Reset Recovery.
    FailNoCsw,
    /// A reset pre-empted the command.
    Reset,
}

/// The worker half of the driver.
///
/// Construct with [MassStorage::new], hand the returned [ControlHandler] to
/// the USB interrupt glue, then have a cooperative task poll [run].
/// Exactly one task drives a given instance.
///
/// [run]: MassStorage::run
pub struct MassStorage<'d, U: UsbDriver, B: BlockDevice> {
    usb: U,
    block: B,
    shared: &'d MsdShared,
    state: State,
    sense: SenseData,
    info: BlockDeviceInfo,
    cbw: CommandBlockWrapper,
    rw_buf: [[u8; BLOCK_BUF_LEN]; 2],
    vpd_serial: UnitSerialPage,
    activity: Option<fn(bool)>,
}

impl<'d, U: UsbDriver, B: BlockDevice> MassStorage<'d, U, B> {
    /// Builds the worker half and the interrupt half of the driver.
    ///
    /// # Errors
    /// Fails when `config` carries an identity the descriptors cannot
    /// encode; see [ConfigError].
    pub fn new(
        usb: U,
        block: B,
        config: Config<'_>,
        shared: &'d MsdShared,
    ) -> Result<(Self, ControlHandler<'d>), ConfigError> {
        let descriptors = DescriptorSet::new(&config)?;
        let serial = config.serial_number.unwrap_or(DEFAULT_SERIAL_NUMBER);

        let msd = MassStorage {
            usb,
            block,
            shared,
            state: State::Idle,
            sense: SenseData::new(),
            info: BlockDeviceInfo {
                block_size: 0,
                block_count: 0,
            },
            cbw: Default::default(),
            rw_buf: [[0u8; BLOCK_BUF_LEN]; 2],
            vpd_serial: UnitSerialPage::new(serial),
            activity: config.activity,
        };

        Ok((msd, ControlHandler::new(descriptors, shared)))
    }

    /// Runs the driver until the host ejects the medium.
    ///
    /// Waits for the medium, attaches to the bus, waits for the host to
    /// configure the device and then services one command at a time. Returns
    /// `Ok(())` after an eject, once the device has detached from the bus.
    pub async fn run(&mut self) -> Result<(), Error<U::Error>> {
        while self.block.state() != BlockDeviceState::Ready {
            yield_now().await;
        }
        self.info = self.block.info();
        if self.info.block_size as usize > BLOCK_BUF_LEN {
            return Err(Error::UnsupportedBlockSize);
        }
        info!(
            "msd: medium ready: {} blocks of {} bytes",
            self.info.block_count, self.info.block_size
        );

        self.usb.connect();
        self.shared.wait_configured().await;
        // resets seen during enumeration are not recovery requests
        self.shared.clear_reset();
        info!("msd: configured");

        loop {
            match self.state {
                State::Idle => self.wait_for_command_block().await?,
                State::ReadCommandBlock => self.read_command_block().await?,
                State::Ejected => {
                    info!("msd: detaching");
                    self.usb.disconnect();
                    return Ok(());
                }
            }
        }
    }

    /// Arms the reception of the next CBW and waits for it.
    async fn wait_for_command_block(&mut self) -> Result<(), Error<U::Error>> {
        self.usb.start_receive(CBW_LEN).map_err(Error::Usb)?;
        self.state = State::ReadCommandBlock;
        match select(self.shared.wait_transfer(), self.shared.wait_reset()).await {
            Either::First(()) => Ok(()),
            Either::Second(()) => {
                self.recover();
                Ok(())
            }
        }
    }

    /// Validates and executes a received CBW, then reports status.
    async fn read_command_block(&mut self) -> Result<(), Error<U::Error>> {
        // default transition; eject overrides it
        self.state = State::Idle;

        let mut raw = [0u8; CBW_LEN];
        let received = self.usb.take_received(&mut raw);
        if received != CBW_LEN {
            info!("msd: runt CBW of {} bytes", received);
            return self.reject_command_block();
        }
        self.cbw = match CommandBlockWrapper::from_le_bytes(&raw) {
            Ok(cbw) => cbw,
            Err(InvalidCbwError) => {
                info!("msd: invalid CBW");
                return self.reject_command_block();
            }
        };
        trace!(
            "msd: CBW tag {} data_len {} opcode {}",
            self.cbw.tag,
            self.cbw.data_len,
            self.cbw.cdb[0]
        );

        let opcode = self.cbw.cdb[0];
        let is_rw = matches!(opcode, scsi::READ_10 | scsi::WRITE_10);
        if is_rw {
            if let Some(activity) = self.activity {
                activity(true);
            }
        }
        let exec = self.execute(scsi::parse_cdb(&self.cbw.cdb)).await?;
        if is_rw {
            if let Some(activity) = self.activity {
                activity(false);
            }
        }

        match exec {
            Exec::Pass { transferred } => {
                if opcode != scsi::REQUEST_SENSE {
                    self.sense.set(
                        scsi::SENSE_KEY_GOOD,
                        scsi::ASC_NO_ADDITIONAL_INFORMATION,
                        scsi::ASCQ_NO_QUALIFIER,
                    );
                }
                self.send_csw(CommandStatus::Passed, transferred).await
            }
            Exec::Fail { transferred } => {
                if self.cbw.data_len > 0 {
                    if self.cbw.data_in() {
                        self.usb.stall_in();
                    } else {
                        self.usb.stall_out();
                    }
                }
                self.send_csw(CommandStatus::Failed, transferred).await
            }
            Exec::FailNoCsw => Ok(()),
            Exec::Reset => {
                self.recover();
                Ok(())
            }
        }
    }

    /// Rejects a malformed CBW: both endpoints stall and no CSW is sent.
    fn reject_command_block(&mut self) -> Result<(), Error<U::Error>> {
        self.usb.stall_in();
        self.usb.stall_out();
        Ok(())
    }

    async fn execute(&mut self, command: ScsiCommand) -> Result<Exec, Error<U::Error>> {
        debug!("msd: execute opcode {}", self.cbw.cdb[0]);
        match command {
            ScsiCommand::TestUnitReady
            | ScsiCommand::PreventAllowMediumRemoval
            | ScsiCommand::Verify10 => Ok(Exec::Pass { transferred: 0 }),

            ScsiCommand::Inquiry { evpd, page_code } => {
                if !evpd {
                    let response = scsi::inquiry_response();
                    self.send_response(&response).await
                } else if page_code == scsi::VPD_PAGE_UNIT_SERIAL {
                    let page = self.vpd_serial;
                    self.send_response(page.as_bytes()).await
                } else {
                    self.sense.set(
                        scsi::SENSE_KEY_ILLEGAL_REQUEST,
                        scsi::ASC_INVALID_FIELD_IN_CDB,
                        scsi::ASCQ_NO_QUALIFIER,
                    );
                    Ok(Exec::Fail { transferred: 0 })
                }
            }

            // the sense buffer is sent in full and left untouched
            ScsiCommand::RequestSense => {
                let sense = self.sense.bytes();
                self.send_response(&sense).await
            }

            ScsiCommand::ModeSense6 => {
                let response = scsi::mode_sense_response(self.block.is_write_protected());
                self.send_response(&response).await
            }

            ScsiCommand::ReadCapacity10 => {
                let response = scsi::read_capacity_response(&self.info);
                self.send_response(&response).await
            }

            ScsiCommand::ReadFormatCapacities => {
                let response = scsi::format_capacities_response(&self.info);
                self.send_response(&response).await
            }

            ScsiCommand::SendDiagnostic { self_test } => {
                if self_test {
                    Ok(Exec::Pass { transferred: 0 })
                } else {
                    self.sense.set(
                        scsi::SENSE_KEY_ILLEGAL_REQUEST,
                        scsi::ASC_INVALID_FIELD_IN_CDB,
                        scsi::ASCQ_NO_QUALIFIER,
                    );
                    Ok(Exec::Fail { transferred: 0 })
                }
            }

            ScsiCommand::StartStopUnit { load_eject_start } => {
                if load_eject_start == scsi::START_STOP_LOEJ {
                    info!("msd: ejected by host");
                    self.shared.publish(MsdEvent::Ejected);
                    self.state = State::Ejected;
                }
                Ok(Exec::Pass { transferred: 0 })
            }

            ScsiCommand::Read10 { lba, len } => self.read_blocks(lba, len).await,
            ScsiCommand::Write10 { lba, len } => self.write_blocks(lba, len).await,

            ScsiCommand::Unknown => {
                info!("msd: unsupported opcode {}", self.cbw.cdb[0]);
                self.sense.set(
                    scsi::SENSE_KEY_ILLEGAL_REQUEST,
                    scsi::ASC_INVALID_COMMAND,
                    scsi::ASCQ_NO_QUALIFIER,
                );
                self.usb.stall_in();
                if self.cbw.data_len > 0 {
                    Ok(Exec::FailNoCsw)
                } else {
                    Ok(Exec::Fail { transferred: 0 })
                }
            }
        }
    }

    async fn read_blocks(&mut self, lba: u32, len: u16) -> Result<Exec, Error<U::Error>> {
        if u64::from(lba) >= self.info.block_count {
            // out-of-range access reports DATA PROTECT, not the SPC
            // LBA OUT OF RANGE pair
            self.sense.set(
                scsi::SENSE_KEY_DATA_PROTECT,
                scsi::ASC_WRITE_PROTECTED,
                scsi::ASCQ_NO_QUALIFIER,
            );
            return Ok(Exec::Fail { transferred: 0 });
        }

        let end = pipeline::read_stream(
            &mut self.usb,
            &mut self.block,
            self.shared,
            &mut self.rw_buf,
            self.info.block_size as usize,
            u64::from(lba),
            usize::from(len),
        )
        .await?;

        Ok(match end {
            StreamEnd::Done { transferred } => Exec::Pass { transferred },
            StreamEnd::DeviceError { transferred } => {
                self.sense.set(
                    scsi::SENSE_KEY_MEDIUM_ERROR,
                    scsi::ASC_UNRECOVERED_READ_ERROR,
                    scsi::ASCQ_NO_QUALIFIER,
                );
                Exec::Fail { transferred }
            }
            StreamEnd::Reset => Exec::Reset,
        })
    }

    async fn write_blocks(&mut self, lba: u32, len: u16) -> Result<Exec, Error<U::Error>> {
        if self.block.is_write_protected() {
            self.sense.set(
                scsi::SENSE_KEY_DATA_PROTECT,
                scsi::ASC_WRITE_PROTECTED,
                scsi::ASCQ_NO_QUALIFIER,
            );
            return Ok(Exec::Fail { transferred: 0 });
        }
        if u64::from(lba) >= self.info.block_count {
            // out-of-range access reports DATA PROTECT, not the SPC
            // LBA OUT OF RANGE pair
            self.sense.set(
                scsi::SENSE_KEY_DATA_PROTECT,
                scsi::ASC_WRITE_PROTECTED,
                scsi::ASCQ_NO_QUALIFIER,
            );
            return Ok(Exec::Fail { transferred: 0 });
        }

        let end = pipeline::write_stream(
            &mut self.usb,
            &mut self.block,
            self.shared,
            &mut self.rw_buf,
            self.info.block_size as usize,
            u64::from(lba),
            usize::from(len),
        )
        .await?;

        Ok(match end {
            StreamEnd::Done { transferred } => Exec::Pass { transferred },
            StreamEnd::DeviceError { transferred } => {
                self.sense.set(
                    scsi::SENSE_KEY_MEDIUM_ERROR,
                    scsi::ASC_WRITE_ERROR,
                    scsi::ASCQ_NO_QUALIFIER,
                );
                Exec::Fail { transferred }
            }
            StreamEnd::Reset => Exec::Reset,
        })
    }

    /// Transmits a response image, truncated to what the host asked for.
    async fn send_response(&mut self, data: &[u8]) -> Result<Exec, Error<U::Error>> {
        let len = min(data.len(), self.cbw.data_len as usize);
        if len == 0 {
            return Ok(Exec::Pass { transferred: 0 });
        }
        self.usb.start_transmit(&data[..len]).map_err(Error::Usb)?;
        match select(self.shared.wait_transfer(), self.shared.wait_reset()).await {
            Either::First(()) => Ok(Exec::Pass {
                transferred: len as u32,
            }),
            Either::Second(()) => Ok(Exec::Reset),
        }
    }

    async fn send_csw(
        &mut self,
        status: CommandStatus,
        transferred: u32,
    ) -> Result<(), Error<U::Error>> {
        let residue = self.cbw.data_len.saturating_sub(transferred);
        trace!("msd: CSW tag {} residue {}", self.cbw.tag, residue);
        let csw = build_csw(self.cbw.tag, residue, status);
        self.usb.start_transmit(&csw).map_err(Error::Usb)?;
        match select(self.shared.wait_transfer(), self.shared.wait_reset()).await {
            Either::First(()) => Ok(()),
            Either::Second(()) => {
                self.recover();
                Ok(())
            }
        }
    }

    /// Reset recovery: abort whatever is in flight and start over in idle.
    fn recover(&mut self) {
        info!("msd: reset recovery");
        self.usb.reset_endpoints();
        self.shared.clear_transfer();
        self.state = State::Idle;
    }
}
