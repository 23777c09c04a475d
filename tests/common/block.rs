//! RAM-backed block device

use std::sync::{Arc, Mutex};

use usb_msd::{BlockDevice, BlockDeviceInfo, BlockDeviceState};

#[derive(Debug)]
pub struct BlockIoError;

struct RamInner {
    data: Vec<u8>,
    block_size: u32,
    write_protected: bool,
    fail_read_at: Option<u64>,
    fail_write_at: Option<u64>,
}

/// In-memory medium. Clones share the same storage, so a test can keep a
/// handle for assertions after moving the device into the driver.
#[derive(Clone)]
pub struct RamBlockDevice {
    inner: Arc<Mutex<RamInner>>,
}

impl RamBlockDevice {
    pub fn new(block_size: u32, block_count: u64) -> Self {
        RamBlockDevice {
            inner: Arc::new(Mutex::new(RamInner {
                data: vec![0u8; (block_size as u64 * block_count) as usize],
                block_size,
                write_protected: false,
                fail_read_at: None,
                fail_write_at: None,
            })),
        }
    }

    pub fn set_write_protected(&self, write_protected: bool) {
        self.inner.lock().unwrap().write_protected = write_protected;
    }

    /// Makes every read touching `lba` fail.
    pub fn fail_read_at(&self, lba: u64) {
        self.inner.lock().unwrap().fail_read_at = Some(lba);
    }

    /// Makes every write touching `lba` fail.
    pub fn fail_write_at(&self, lba: u64) {
        self.inner.lock().unwrap().fail_write_at = Some(lba);
    }

    /// Copy of one block, for assertions.
    pub fn block(&self, lba: u64) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let start = (lba * inner.block_size as u64) as usize;
        inner.data[start..start + inner.block_size as usize].to_vec()
    }

    pub fn fill_block(&self, lba: u64, byte: u8) {
        let mut inner = self.inner.lock().unwrap();
        let block_size = inner.block_size as usize;
        let start = lba as usize * block_size;
        inner.data[start..start + block_size].fill(byte);
    }
}

impl BlockDevice for RamBlockDevice {
    type Error = BlockIoError;

    fn state(&self) -> BlockDeviceState {
        BlockDeviceState::Ready
    }

    fn info(&self) -> BlockDeviceInfo {
        let inner = self.inner.lock().unwrap();
        BlockDeviceInfo {
            block_size: inner.block_size,
            block_count: inner.data.len() as u64 / inner.block_size as u64,
        }
    }

    fn read(&mut self, lba: u64, buf: &mut [u8], blocks: usize) -> Result<(), Self::Error> {
        let inner = self.inner.lock().unwrap();
        let block_size = inner.block_size as usize;
        for i in 0..blocks as u64 {
            if inner.fail_read_at == Some(lba + i) {
                return Err(BlockIoError);
            }
        }
        let start = lba as usize * block_size;
        let end = start + blocks * block_size;
        if end > inner.data.len() {
            return Err(BlockIoError);
        }
        buf[..blocks * block_size].copy_from_slice(&inner.data[start..end]);
        Ok(())
    }

    fn write(&mut self, lba: u64, buf: &[u8], blocks: usize) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().unwrap();
        let block_size = inner.block_size as usize;
        for i in 0..blocks as u64 {
            if inner.fail_write_at == Some(lba + i) {
                return Err(BlockIoError);
            }
        }
        let start = lba as usize * block_size;
        let end = start + blocks * block_size;
        if end > inner.data.len() {
            return Err(BlockIoError);
        }
        inner.data[start..end].copy_from_slice(&buf[..blocks * block_size]);
        Ok(())
    }

    fn is_write_protected(&self) -> bool {
        self.inner.lock().unwrap().write_protected
    }
}
