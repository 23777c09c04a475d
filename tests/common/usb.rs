//! Scripted in-memory USB controller

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use embassy_futures::yield_now;
use usb_msd::{MsdShared, UsbDriver};

use crate::common::bot::Csw;

#[derive(Default)]
struct Inner {
    /// Host-to-device transfers waiting for the device to arm a reception.
    out_transfers: VecDeque<Vec<u8>>,
    armed_receive: Option<usize>,
    completed: Option<Vec<u8>>,
    /// Device-to-host transfers, one entry per `start_transmit`.
    in_transfers: VecDeque<Vec<u8>>,
    stalled_in: bool,
    stalled_out: bool,
    stall_in_events: usize,
    stall_out_events: usize,
    connected: bool,
    endpoint_resets: usize,
}

impl Inner {
    /// Fulfills an armed reception from the host queue.
    fn complete_if_armed(&mut self, shared: &MsdShared) {
        if self.completed.is_none() && self.armed_receive.is_some() {
            if let Some(mut transfer) = self.out_transfers.pop_front() {
                let len = self.armed_receive.take().unwrap();
                transfer.truncate(len);
                self.completed = Some(transfer);
                shared.transfer_complete();
            }
        }
    }
}

/// Device-side half; implements [UsbDriver] over in-memory queues.
///
/// Transmissions complete as soon as they are armed; receptions complete
/// once the host has provided a transfer.
pub struct DummyUsbDriver {
    inner: Arc<Mutex<Inner>>,
    shared: &'static MsdShared,
}

impl DummyUsbDriver {
    pub fn new(shared: &'static MsdShared) -> (Self, Host) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            DummyUsbDriver {
                inner: inner.clone(),
                shared,
            },
            Host { inner, shared },
        )
    }
}

impl UsbDriver for DummyUsbDriver {
    type Error = Infallible;

    fn start_receive(&mut self, len: usize) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.armed_receive.is_none(), "receive already armed");
        inner.armed_receive = Some(len);
        inner.complete_if_armed(self.shared);
        Ok(())
    }

    fn take_received(&mut self, dst: &mut [u8]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let transfer = inner.completed.take().unwrap_or_default();
        let len = transfer.len().min(dst.len());
        dst[..len].copy_from_slice(&transfer[..len]);
        len
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.in_transfers.push_back(data.to_vec());
        self.shared.transfer_complete();
        Ok(())
    }

    fn stall_in(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stalled_in = true;
        inner.stall_in_events += 1;
    }

    fn stall_out(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stalled_out = true;
        inner.stall_out_events += 1;
    }

    fn reset_endpoints(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stalled_in = false;
        inner.stalled_out = false;
        inner.armed_receive = None;
        inner.completed = None;
        inner.endpoint_resets += 1;
    }

    fn connect(&mut self) {
        self.inner.lock().unwrap().connected = true;
    }

    fn disconnect(&mut self) {
        self.inner.lock().unwrap().connected = false;
    }
}

/// Host-side handle for test scripts.
#[derive(Clone)]
pub struct Host {
    inner: Arc<Mutex<Inner>>,
    shared: &'static MsdShared,
}

impl Host {
    /// Queues one host-to-device transfer.
    pub fn send(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.out_transfers.push_back(data.to_vec());
        inner.complete_if_armed(self.shared);
    }

    pub fn send_cbw(&self, cbw: &crate::common::bot::Cbw) {
        self.send(&cbw.to_le_bytes());
    }

    /// Waits for the next device-to-host transfer.
    pub async fn recv(&self) -> Vec<u8> {
        loop {
            if let Some(transfer) = self.inner.lock().unwrap().in_transfers.pop_front() {
                return transfer;
            }
            yield_now().await;
        }
    }

    pub async fn recv_csw(&self) -> Csw {
        Csw::from_le_bytes(&self.recv().await)
    }

    /// Device-to-host transfers not yet read by the script.
    pub fn pending_in(&self) -> usize {
        self.inner.lock().unwrap().in_transfers.len()
    }

    pub fn is_stalled_in(&self) -> bool {
        self.inner.lock().unwrap().stalled_in
    }

    pub fn is_stalled_out(&self) -> bool {
        self.inner.lock().unwrap().stalled_out
    }

    pub fn stall_in_events(&self) -> usize {
        self.inner.lock().unwrap().stall_in_events
    }

    /// Clear Feature(ENDPOINT_HALT) on both endpoints.
    pub fn clear_stalls(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stalled_in = false;
        inner.stalled_out = false;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    pub fn endpoint_resets(&self) -> usize {
        self.inner.lock().unwrap().endpoint_resets
    }

    pub async fn wait_stalled_in(&self) {
        while !self.is_stalled_in() {
            yield_now().await;
        }
    }

    pub async fn wait_stalled_both(&self) {
        while !(self.is_stalled_in() && self.is_stalled_out()) {
            yield_now().await;
        }
    }

    pub async fn wait_connected(&self) {
        while !self.is_connected() {
            yield_now().await;
        }
    }

    pub async fn wait_disconnected(&self) {
        while self.is_connected() {
            yield_now().await;
        }
    }

    pub async fn wait_endpoint_resets(&self, at_least: usize) {
        while self.endpoint_resets() < at_least {
            yield_now().await;
        }
    }
}
