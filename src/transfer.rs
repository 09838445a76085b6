//! Transfers submitted to a [`Transport`](crate::Transport)
//!
//! A [`Transfer`] owns its buffer from submission until completion. The
//! transport finishes it with [`Transfer::complete`], typically from its
//! own completion context. That call hands the buffer and status back to
//! the session that submitted it, which releases whatever the transfer
//! held (the receive buffer, or an admission slot).
//!
//! A transfer that is dropped before completion completes itself with
//! [`TransferStatus::Shutdown`], so nothing it holds can leak.

use std::{fmt, sync::Arc};

use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::error::Error;

/// Identifies a submitted transfer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TransferId(pub(crate) u64);

/// Final status of a transfer, as reported by the transport
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransferStatus {
    /// The transfer completed.
    Completed,
    /// The transfer was cancelled before it completed.
    Unlinked,
    /// The transfer was cancelled while the bus was working on it.
    Reset,
    /// The device or the host controller went away.
    Shutdown,
    /// The peer halted the endpoint.
    Stall,
    /// The peer sent more data than requested.
    Overflow,
    /// A bus protocol error, like a CRC or bit-stuffing failure.
    Protocol,
    /// The peer didn't respond.
    Timeout,
    /// Any other failure.
    Failed,
}

impl TransferStatus {
    /// Indicates if this status comes from cancelling the transfer
    ///
    /// These are never reported to callers.
    pub fn is_unlink(self) -> bool {
        matches!(
            self,
            TransferStatus::Unlinked | TransferStatus::Reset | TransferStatus::Shutdown
        )
    }
}

/// What a completed transfer hands back to its submitter
pub(crate) struct Completed {
    pub id: TransferId,
    pub direction: UsbDirection,
    pub status: TransferStatus,
    pub buffer: Vec<u8>,
    /// Bytes requested at submission
    pub length: usize,
    pub actual_length: usize,
}

/// Receives transfer completions
///
/// Implementations run in the completion context, so they must never
/// block beyond short, non-suspending locks.
pub(crate) trait Completion: Send + Sync {
    fn complete(&self, done: Completed);
}

/// One asynchronous bulk transfer
pub struct Transfer {
    id: TransferId,
    endpoint: EndpointAddress,
    buffer: Vec<u8>,
    length: usize,
    completion: Option<Arc<dyn Completion>>,
}

impl Transfer {
    /// An IN transfer receiving at most `length` bytes into `buffer`
    pub(crate) fn receive(
        id: TransferId,
        endpoint: EndpointAddress,
        buffer: Vec<u8>,
        length: usize,
        completion: Arc<dyn Completion>,
    ) -> Self {
        debug_assert!(length <= buffer.len());
        Transfer {
            id,
            endpoint,
            length: length.min(buffer.len()),
            buffer,
            completion: Some(completion),
        }
    }

    /// An OUT transfer sending all of `payload`
    pub(crate) fn send(
        id: TransferId,
        endpoint: EndpointAddress,
        payload: Vec<u8>,
        completion: Arc<dyn Completion>,
    ) -> Self {
        Transfer {
            id,
            endpoint,
            length: payload.len(),
            buffer: payload,
            completion: Some(completion),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    /// The endpoint this transfer moves data on
    pub fn endpoint(&self) -> EndpointAddress {
        self.endpoint
    }

    pub fn direction(&self) -> UsbDirection {
        self.endpoint.direction()
    }

    /// Number of bytes to send, or the most bytes to receive
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The bytes to send (OUT), or the receive area (IN)
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    /// The receive area that an IN transfer fills
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.length]
    }

    /// Finish the transfer
    ///
    /// `actual_length` is the number of bytes received in [`data_mut()`](Transfer::data_mut)
    /// for an IN transfer. It's ignored for OUT transfers.
    pub fn complete(mut self, status: TransferStatus, actual_length: usize) {
        self.finish(status, actual_length);
    }

    /// Disarm a transfer that the transport refused, and take back its buffer
    pub(crate) fn into_buffer(mut self) -> Vec<u8> {
        self.completion = None;
        core::mem::take(&mut self.buffer)
    }

    fn finish(&mut self, status: TransferStatus, actual_length: usize) {
        if let Some(completion) = self.completion.take() {
            completion.complete(Completed {
                id: self.id,
                direction: self.endpoint.direction(),
                status,
                buffer: core::mem::take(&mut self.buffer),
                length: self.length,
                actual_length,
            });
        }
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        self.finish(TransferStatus::Shutdown, 0);
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("endpoint", &u8::from(self.endpoint))
            .field("length", &self.length)
            .finish()
    }
}

/// A transfer that the transport wouldn't accept
///
/// The transport gives the transfer back, so that the engine can reclaim
/// its buffer and report `error` to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub error: Error,
    pub transfer: Transfer,
}
