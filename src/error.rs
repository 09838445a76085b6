//! Engine errors, and the shared last-error slot

use std::io;

use crate::transfer::TransferStatus;

/// Errors returned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No device is attached for the requested node.
    #[error("no such device")]
    NotFound,
    /// The device was disconnected.
    #[error("device disconnected")]
    NotConnected,
    /// The operation would block, and the handle is non-blocking.
    #[error("operation would block")]
    WouldBlock,
    /// A wait was interrupted through the handle's [`Interrupter`](crate::Interrupter).
    #[error("interrupted")]
    Interrupted,
    /// A bounded wait expired.
    #[error("timed out")]
    TimedOut,
    /// The peer halted an endpoint.
    ///
    /// Reported once. The endpoint needs an external clear, or a
    /// reset, before transfers succeed again.
    #[error("endpoint stalled")]
    Stall,
    /// A transfer, or a transfer submission, failed.
    #[error("I/O error")]
    Io,
    /// A transfer buffer couldn't be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// A payload couldn't be copied between the caller and a transfer buffer.
    #[error("bad transfer buffer")]
    IoFault,
    /// The interface doesn't expose a bulk IN / bulk OUT pair on interface 0.
    #[error("could not find both bulk-in and bulk-out endpoints")]
    InvalidInterface,
    /// Every node minor is already taken.
    #[error("no free minor")]
    MinorsExhausted,
}

impl Error {
    /// Returns `true` if the caller may simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Interrupted | Error::TimedOut)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::NotFound => io::ErrorKind::NotFound,
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::WouldBlock => io::ErrorKind::WouldBlock,
            Error::Interrupted => io::ErrorKind::Interrupted,
            Error::TimedOut => io::ErrorKind::TimedOut,
            Error::Stall => io::ErrorKind::BrokenPipe,
            Error::OutOfMemory => io::ErrorKind::OutOfMemory,
            Error::IoFault | Error::InvalidInterface => io::ErrorKind::InvalidInput,
            Error::Io | Error::MinorsExhausted => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failure captured from a transfer completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Stall,
    Io,
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Stall => Error::Stall,
            Fault::Io => Error::Io,
        }
    }
}

/// The last transfer error, shared by the receive and send paths
///
/// Holds at most one fault. A newer fault replaces an older one that
/// nobody observed. Lives behind the session's completion lock.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot(Option<Fault>);

impl ErrorSlot {
    /// Record the outcome of a completed transfer
    ///
    /// Successful and intentionally cancelled transfers leave the slot
    /// untouched. Returns `true` if a fault was recorded.
    pub fn record(&mut self, status: TransferStatus) -> bool {
        let fault = match status {
            TransferStatus::Completed => return false,
            status if status.is_unlink() => return false,
            TransferStatus::Stall => Fault::Stall,
            _ => Fault::Io,
        };
        self.0 = Some(fault);
        true
    }

    /// Mark the endpoint halted, as after a bus reset
    pub fn set_stall(&mut self) {
        self.0 = Some(Fault::Stall);
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }

    /// Read and clear the slot
    pub fn take(&mut self) -> Option<Error> {
        self.0.take().map(Error::from)
    }
}
