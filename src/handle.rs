//! Caller handles
//!
//! A [`Handle`] is one caller's connection to an attached device, as
//! returned by [`Driver::open()`](crate::Driver::open). It reads and writes
//! byte streams, with the caveats of the underlying transport:
//!
//! - a read returns bytes from at most one bus transfer, and may be short;
//! - a write sends at most [`Config::max_transfer()`](crate::Config::max_transfer)
//!   bytes, and returns how many it took.
//!
//! `&Handle` implements [`std::io::Read`] and [`std::io::Write`], so the
//! usual `read_exact()` and `write_all()` loops apply.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use usb_device::endpoint::EndpointAddress;

use crate::{
    error::Result,
    session::Session,
    sync::Signal,
    transport::SideChannel,
};

bitflags::bitflags! {
    /// What a caller could do without blocking
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: u8 {
        /// Unread bytes are waiting.
        const READABLE = 1 << 0;
        /// A write may be attempted.
        const WRITABLE = 1 << 1;
        /// A transfer failed; the next read or write reports it.
        const ERROR = 1 << 2;
    }
}

/// An open device
pub struct Handle {
    session: Arc<Session>,
    signal: Arc<Signal>,
    nonblocking: AtomicBool,
}

impl Handle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Handle {
            session,
            signal: Arc::default(),
            nonblocking: AtomicBool::new(false),
        }
    }

    /// Read bytes from the device
    ///
    /// Returns the bytes from the last bus transfer that no one has read
    /// yet, up to `buffer.len()`. If there aren't any, this starts a
    /// transfer and waits for it, unless the handle is non-blocking.
    ///
    /// `Ok(0)` means end of file: `buffer` is empty, or the device can't
    /// send anything.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        self.session
            .read(buffer, &self.signal, self.is_nonblocking())
    }

    /// Write bytes to the device
    ///
    /// Sends at most [`Config::max_transfer()`](crate::Config::max_transfer)
    /// bytes of `data` in one transfer, and returns how many. The transfer
    /// continues in the background; its error, if any, is reported by a
    /// later call.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.session
            .write(data, &self.signal, self.is_nonblocking())
    }

    /// Check readiness without blocking
    ///
    /// When there's nothing to read, and no receive is running, this
    /// starts one so that a later poll may find data.
    pub fn poll(&self) -> Readiness {
        self.session.poll()
    }

    /// Wait for all I/O to stop, then report and clear the last error
    pub fn flush(&self) -> Result<()> {
        self.session.flush()
    }

    /// Close the handle
    ///
    /// Same as dropping it.
    pub fn close(self) {}

    /// Choose whether waits fail with [`Error::WouldBlock`](crate::Error::WouldBlock)
    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::Relaxed);
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    /// Name of the device node
    pub fn node_name(&self) -> &str {
        self.session.name()
    }

    /// Returns an [`Interrupter`] for this handle's waits
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            signal: Arc::clone(&self.signal),
            session: Arc::downgrade(&self.session),
        }
    }

    /// Access the diagnostic side-channel
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) if the device
    /// has no diagnostic endpoints, or the transport doesn't offer the
    /// channel.
    pub fn diag(&self) -> Result<Diag<'_>> {
        let (channel, ep_in, ep_out) = self.session.side_channel()?;
        Ok(Diag {
            channel,
            ep_in,
            ep_out,
        })
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // Allow the device to suspend again.
        self.session.power_put();
    }
}

impl io::Read for &Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Handle::read(*self, buf).map_err(io::Error::from)
    }
}

impl io::Write for &Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Handle::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Handle::flush(*self).map_err(io::Error::from)
    }
}

impl io::Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}

/// Interrupts the waits of one [`Handle`]
///
/// A wait that observes the interruption fails with
/// [`Error::Interrupted`](crate::Error::Interrupted), and consumes it. If
/// nothing is waiting, the next interruptible wait fails instead.
#[derive(Clone)]
pub struct Interrupter {
    signal: Arc<Signal>,
    session: Weak<Session>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.signal.raise();
        if let Some(session) = self.session.upgrade() {
            session.wake();
        }
    }
}

/// The blocking diagnostic channel of a device
pub struct Diag<'a> {
    channel: &'a dyn SideChannel,
    ep_in: EndpointAddress,
    ep_out: EndpointAddress,
}

impl Diag<'_> {
    /// Send `data`, returning the bytes sent
    pub fn send(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.channel.send(self.ep_out, data, timeout)
    }

    /// Receive into `buffer`, returning the bytes received
    pub fn recv(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        self.channel.recv(self.ep_in, buffer, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::Readiness;
    use crate::{
        config::Config,
        error::Error,
        harness::{self, Bus, Fixture},
    };
    use std::{
        io::{self, Read, Write},
        thread,
        time::Duration,
    };
    use usb_device::UsbDirection;

    #[test]
    fn loopback() {
        let fixture = Fixture::new(Config::new().with_max_transfer(64));
        let handle = fixture.open();
        let message: Vec<u8> = (0..100).collect();

        thread::scope(|s| {
            // Echo everything the handle sends.
            s.spawn(|| {
                for _ in 0..2 {
                    let payload = fixture.bus.complete_out();
                    fixture.bus.complete_in(&payload);
                }
            });
            (&handle).write_all(&message).unwrap();

            let mut echo = vec![0; message.len()];
            (&handle).read_exact(&mut echo).unwrap();
            assert_eq!(echo, message);
        });
        assert_eq!(handle.flush(), Ok(()));
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let fixture = Fixture::new(Config::new());
        let mut handle = fixture.open();
        handle.set_nonblocking(true);
        assert!(handle.is_nonblocking());

        let err = io::Read::read(&mut handle, &mut [0; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        fixture.bus.fail(UsbDirection::In, crate::TransferStatus::Stall);
        let err = io::Read::read(&mut handle, &mut [0; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(
            err.into_inner().unwrap().downcast::<Error>().map(|err| *err).ok(),
            Some(Error::Stall)
        );
    }

    #[test]
    fn interrupter_stops_a_blocked_read() {
        let fixture = Fixture::new(Config::new());
        let handle = fixture.open();
        let interrupter = handle.interrupter();
        thread::scope(|s| {
            let reader = s.spawn(|| handle.read(&mut [0; 8]));
            fixture.bus.wait_pending(UsbDirection::In);
            interrupter.interrupt();
            assert_eq!(reader.join().unwrap(), Err(Error::Interrupted));
        });

        // The receive is still there for the next read.
        fixture.bus.complete_in(&[5]);
        assert_eq!(handle.read(&mut [0; 8]), Ok(1));
    }

    #[test]
    fn interrupter_stops_a_blocked_write() {
        let fixture = Fixture::new(Config::new().with_writes_in_flight(1));
        let handle = fixture.open();
        assert_eq!(handle.write(&[1]), Ok(1));
        let interrupter = handle.interrupter();
        thread::scope(|s| {
            let writer = s.spawn(|| handle.write(&[2]));
            thread::sleep(Duration::from_millis(20));
            interrupter.interrupt();
            assert_eq!(writer.join().unwrap(), Err(Error::Interrupted));
        });
        assert_eq!(fixture.bus.complete_out(), [1]);
        assert_eq!(fixture.interface.free_write_slots(), 1);
    }

    #[test]
    fn interrupter_outlives_the_device() {
        let fixture = Fixture::new(Config::new());
        let handle = fixture.open();
        let interrupter = handle.interrupter();
        drop(handle);
        drop(fixture);
        interrupter.interrupt();
    }

    #[test]
    fn poll_starts_a_receive() {
        let fixture = Fixture::new(Config::new());
        let handle = fixture.open();
        assert_eq!(handle.poll(), Readiness::WRITABLE);
        fixture.bus.complete_in(&[1, 2]);
        assert_eq!(handle.poll(), Readiness::READABLE | Readiness::WRITABLE);
    }

    #[test]
    fn power_reference_follows_the_handle() {
        let fixture = Fixture::new(Config::new());
        let handle = fixture.open();
        let other = fixture.open();
        assert_eq!(fixture.bus.power_gets(), 2);
        handle.close();
        drop(other);
        assert_eq!(fixture.bus.power_puts(), 2);
    }

    #[test]
    fn handle_outlives_disconnect() {
        let Fixture {
            driver,
            interface,
            bus,
        } = Fixture::new(Config::new());
        let handle = driver.open(interface.minor()).unwrap();
        assert_eq!(handle.node_name(), "usbrt0");
        interface.disconnect();

        assert_eq!(handle.read(&mut [0; 8]), Err(Error::NotConnected));
        assert_eq!(handle.write(&[1]), Err(Error::NotConnected));
        assert_eq!(handle.flush(), Ok(()));
        assert!(matches!(handle.diag(), Err(Error::NotConnected)));
        drop(handle);
        // Closing after teardown leaves the device alone.
        assert_eq!(bus.power_puts(), 0);
    }

    #[test]
    fn diagnostic_channel() {
        let fixture = Fixture::with_bus(
            Config::new(),
            Bus::with_diag(),
            &harness::interface_with_diag(64),
        );
        let handle = fixture.open();
        let diag = handle.diag().unwrap();
        let timeout = Duration::from_millis(100);
        assert_eq!(diag.send(b"ping", timeout), Ok(4));

        let mut buf = [0; 16];
        assert_eq!(diag.recv(&mut buf, timeout), Ok(4));
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(diag.recv(&mut buf, timeout), Err(Error::TimedOut));

        // Independent of the bulk pair.
        assert_eq!(fixture.bus.submits(), 0);
    }

    #[test]
    fn no_diagnostic_channel() {
        // Endpoints, but no channel.
        let fixture = Fixture::with_bus(
            Config::new(),
            Bus::new(),
            &harness::interface_with_diag(64),
        );
        assert!(matches!(fixture.open().diag(), Err(Error::NotFound)));

        // Channel, but no endpoints.
        let fixture = Fixture::with_bus(Config::new(), Bus::with_diag(), &harness::interface(64));
        assert!(matches!(fixture.open().diag(), Err(Error::NotFound)));
    }
}
