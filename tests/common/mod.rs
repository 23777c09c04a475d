#![allow(dead_code)]

use std::future::Future;
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Duration;

use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use usb_msd::{Config, ControlHandler, MassStorage, MsdShared};

use crate::common::block::RamBlockDevice;
use crate::common::usb::{DummyUsbDriver, Host};

pub mod block;
pub mod usb;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the worker against a scripted host.
///
/// The worker is dropped once the script returns; use
/// [run_driver_test_until_detach] for scenarios that end the worker itself.
pub fn run_driver_test<S, Fut>(disk: RamBlockDevice, config: Config<'static>, script: S)
where
    S: FnOnce(Host, ControlHandler<'static>, &'static MsdShared) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    timeout(TEST_TIMEOUT, move || {
        let shared: &'static MsdShared = Box::leak(Box::new(MsdShared::new()));
        let (usb, host) = DummyUsbDriver::new(shared);
        let (mut msd, control) = MassStorage::new(usb, disk, config, shared).unwrap();
        block_on(async move {
            match select(msd.run(), script(host, control, shared)).await {
                Either::First(result) => result.unwrap(),
                Either::Second(()) => {}
            }
        });
    });
}

/// Runs the worker to completion alongside the script; the worker must
/// terminate cleanly (host eject).
pub fn run_driver_test_until_detach<S, Fut>(disk: RamBlockDevice, config: Config<'static>, script: S)
where
    S: FnOnce(Host, ControlHandler<'static>, &'static MsdShared) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    timeout(TEST_TIMEOUT, move || {
        let shared: &'static MsdShared = Box::leak(Box::new(MsdShared::new()));
        let (usb, host) = DummyUsbDriver::new(shared);
        let (mut msd, control) = MassStorage::new(usb, disk, config, shared).unwrap();
        block_on(async move {
            let (result, ()) = join(msd.run(), script(host, control, shared)).await;
            result.unwrap();
        });
    });
}

pub fn timeout<F, T>(timeout: Duration, f: F)
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = sync_channel(0);
    thread::spawn(move || {
        f();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(timeout).expect("timeout");
}
