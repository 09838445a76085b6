//! A scripted transport for unit tests
//!
//! [`Bus`] queues every submitted transfer, and the test decides when, and
//! how, each one completes.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    config::Config,
    descriptor::{EndpointDescriptor, InterfaceDescriptor},
    driver::{Driver, Interface, NodeClass},
    error::{Error, Result},
    transfer::{Rejected, Transfer, TransferId, TransferStatus},
    transport::{SideChannel, Transport},
};

/// How long a test waits for the engine before giving up
const PATIENCE: Duration = Duration::from_secs(5);

pub const BULK_IN: u8 = 0x81;
pub const BULK_OUT: u8 = 0x02;
pub const DIAG_IN: u8 = 0x83;
pub const DIAG_OUT: u8 = 0x04;

#[derive(Default)]
pub struct Bus {
    pending: Mutex<VecDeque<Transfer>>,
    submitted: Condvar,
    reject_next: Mutex<Option<Error>>,
    submits: AtomicUsize,
    cancels: AtomicUsize,
    power_gets: AtomicUsize,
    power_puts: AtomicUsize,
    fail_power: Mutex<bool>,
    diag: Option<Loopback>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Bus::default())
    }

    pub fn with_diag() -> Arc<Self> {
        Arc::new(Bus {
            diag: Some(Loopback::default()),
            ..Bus::default()
        })
    }

    /// Refuse the next submission with `error`
    pub fn reject_next(&self, error: Error) {
        *self.reject_next.lock() = Some(error);
    }

    pub fn fail_power(&self) {
        *self.fail_power.lock() = true;
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn power_gets(&self) -> usize {
        self.power_gets.load(Ordering::SeqCst)
    }

    pub fn power_puts(&self) -> usize {
        self.power_puts.load(Ordering::SeqCst)
    }

    /// Queued transfers moving in `direction`
    pub fn pending(&self, direction: UsbDirection) -> usize {
        self.pending
            .lock()
            .iter()
            .filter(|transfer| transfer.direction() == direction)
            .count()
    }

    /// Wait until a transfer moving in `direction` is queued
    ///
    /// Panics if none shows up.
    pub fn wait_pending(&self, direction: UsbDirection) {
        let deadline = Instant::now() + PATIENCE;
        let mut pending = self.pending.lock();
        while !pending.iter().any(|t| t.direction() == direction) {
            if self.submitted.wait_until(&mut pending, deadline).timed_out() {
                panic!("no {direction:?} transfer was submitted");
            }
        }
    }

    /// Dequeue the oldest transfer moving in `direction`, waiting for it if
    /// necessary
    ///
    /// Panics if none shows up.
    pub fn take(&self, direction: UsbDirection) -> Transfer {
        let deadline = Instant::now() + PATIENCE;
        let mut pending = self.pending.lock();
        loop {
            if let Some(idx) = pending.iter().position(|t| t.direction() == direction) {
                if let Some(transfer) = pending.remove(idx) {
                    return transfer;
                }
            }
            if self.submitted.wait_until(&mut pending, deadline).timed_out() {
                panic!("no {direction:?} transfer was submitted");
            }
        }
    }

    /// Complete the next receive with `data`
    pub fn complete_in(&self, data: &[u8]) {
        let mut transfer = self.take(UsbDirection::In);
        let len = data.len().min(transfer.len());
        transfer.data_mut()[..len].copy_from_slice(&data[..len]);
        transfer.complete(TransferStatus::Completed, len);
    }

    /// Complete the next send, returning its payload
    pub fn complete_out(&self) -> Vec<u8> {
        let transfer = self.take(UsbDirection::Out);
        let payload = transfer.data().to_vec();
        transfer.complete(TransferStatus::Completed, payload.len());
        payload
    }

    /// Fail the next transfer moving in `direction`
    pub fn fail(&self, direction: UsbDirection, status: TransferStatus) {
        self.take(direction).complete(status, 0);
    }
}

impl Transport for Bus {
    fn submit(&self, transfer: Transfer) -> core::result::Result<(), Rejected> {
        if let Some(error) = self.reject_next.lock().take() {
            return Err(Rejected { error, transfer });
        }
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push_back(transfer);
        self.submitted.notify_all();
        Ok(())
    }

    fn cancel(&self, id: TransferId) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let transfer = {
            let mut pending = self.pending.lock();
            pending
                .iter()
                .position(|transfer| transfer.id() == id)
                .and_then(|idx| pending.remove(idx))
        };
        // Completes on the cancelling thread, like a real host controller can.
        if let Some(transfer) = transfer {
            transfer.complete(TransferStatus::Unlinked, 0);
        }
    }

    fn power_get(&self) -> Result<()> {
        if *self.fail_power.lock() {
            return Err(Error::Io);
        }
        self.power_gets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_put(&self) {
        self.power_puts.fetch_add(1, Ordering::SeqCst);
    }

    fn side_channel(&self) -> Option<&dyn SideChannel> {
        self.diag.as_ref().map(|diag| diag as &dyn SideChannel)
    }
}

/// A diagnostic channel that echoes whatever it's sent
#[derive(Default)]
pub struct Loopback {
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl SideChannel for Loopback {
    fn send(&self, endpoint: EndpointAddress, data: &[u8], _: Duration) -> Result<usize> {
        assert_eq!(u8::from(endpoint), DIAG_OUT);
        self.queue.lock().push_back(data.to_vec());
        Ok(data.len())
    }

    fn recv(&self, endpoint: EndpointAddress, buffer: &mut [u8], _: Duration) -> Result<usize> {
        assert_eq!(u8::from(endpoint), DIAG_IN);
        let data = self.queue.lock().pop_front().ok_or(Error::TimedOut)?;
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}

/// A bulk pair, with `max_packet_size` bytes on bulk IN
pub fn interface(max_packet_size: u16) -> InterfaceDescriptor {
    InterfaceDescriptor {
        number: 0,
        endpoints: vec![
            EndpointDescriptor::bulk(EndpointAddress::from(BULK_IN), max_packet_size),
            EndpointDescriptor::bulk(EndpointAddress::from(BULK_OUT), 64),
        ],
    }
}

/// A bulk pair plus the diagnostic pair
pub fn interface_with_diag(max_packet_size: u16) -> InterfaceDescriptor {
    let mut interface = interface(max_packet_size);
    interface.endpoints.extend([
        EndpointDescriptor::bulk(EndpointAddress::from(DIAG_IN), 64),
        EndpointDescriptor::bulk(EndpointAddress::from(DIAG_OUT), 64),
    ]);
    interface
}

/// A driver with one attached device
pub struct Fixture {
    pub driver: Driver,
    pub interface: Interface,
    pub bus: Arc<Bus>,
}

impl Fixture {
    pub fn new(config: Config) -> Self {
        Fixture::with_bus(config, Bus::new(), &interface(64))
    }

    pub fn with_bus(config: Config, bus: Arc<Bus>, descriptor: &InterfaceDescriptor) -> Self {
        let driver = Driver::new(config);
        let interface = driver
            .attach(Arc::clone(&bus), descriptor, NodeClass::Generic)
            .unwrap();
        Fixture {
            driver,
            interface,
            bus,
        }
    }

    pub fn open(&self) -> crate::handle::Handle {
        self.driver.open(self.interface.minor()).unwrap()
    }
}
