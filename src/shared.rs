//! ISR ↔ worker rendezvous and event broadcast
//!
//! A single [MsdShared] instance (typically a `static`) is shared between the
//! worker half ([MassStorage]) and the interrupt half ([ControlHandler] plus
//! the endpoint-completion hook). It carries three binary semaphores and the
//! broadcast channel for [MsdEvent]s.
//!
//! [MassStorage]: crate::bulk_only::MassStorage
//! [ControlHandler]: crate::control::ControlHandler

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::{DynSubscriber, Error as PubSubError, PubSubChannel};
use embassy_sync::signal::Signal;

const EVENT_QUEUE_DEPTH: usize = 2;
const EVENT_SUBSCRIBERS: usize = 4;

/// Event broadcast to all subscribers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MsdEvent {
    /// The host has configured the device.
    Connected,
    /// The host has ejected the medium; the worker is about to detach.
    Ejected,
}

/// Subscription handle for [MsdEvent]s.
pub type MsdEventSubscriber<'a> = DynSubscriber<'a, MsdEvent>;

/// Rendezvous state shared between the worker task and interrupt context.
///
/// The transfer signal is a single-slot binary semaphore: multiple signals
/// coalesce into one. The worker therefore waits on it only directly after
/// arming exactly one transfer.
pub struct MsdShared {
    transfer: Signal<CriticalSectionRawMutex, ()>,
    reset: Signal<CriticalSectionRawMutex, ()>,
    configured: Signal<CriticalSectionRawMutex, ()>,
    events: PubSubChannel<CriticalSectionRawMutex, MsdEvent, EVENT_QUEUE_DEPTH, EVENT_SUBSCRIBERS, 1>,
}

impl MsdShared {
    pub const fn new() -> Self {
        MsdShared {
            transfer: Signal::new(),
            reset: Signal::new(),
            configured: Signal::new(),
            events: PubSubChannel::new(),
        }
    }

    /// Bulk endpoint completion hook.
    ///
    /// Call this from the controller's endpoint interrupt handler whenever a
    /// transfer armed through [UsbDriver](crate::usb::UsbDriver) completes,
    /// in either direction.
    pub fn transfer_complete(&self) {
        self.transfer.signal(());
    }

    /// Subscribes to [MsdEvent] broadcasts.
    ///
    /// Fails once all subscriber slots are taken.
    pub fn subscribe(&self) -> Result<MsdEventSubscriber<'_>, PubSubError> {
        self.events.dyn_subscriber()
    }

    pub(crate) async fn wait_transfer(&self) {
        self.transfer.wait().await
    }

    pub(crate) fn clear_transfer(&self) {
        self.transfer.reset();
    }

    pub(crate) fn signal_reset(&self) {
        self.reset.signal(());
    }

    pub(crate) async fn wait_reset(&self) {
        self.reset.wait().await
    }

    pub(crate) fn clear_reset(&self) {
        self.reset.reset();
    }

    pub(crate) fn signal_configured(&self) {
        self.configured.signal(());
    }

    pub(crate) async fn wait_configured(&self) {
        self.configured.wait().await
    }

    pub(crate) fn publish(&self, event: MsdEvent) {
        self.events.immediate_publisher().publish_immediate(event);
    }
}

impl Default for MsdShared {
    fn default() -> Self {
        Self::new()
    }
}
