//! The receive buffer state machine
//!
//! ```text
//! EMPTY --lend()--> SUBMITTED --restore()--> FILLED --copy_to()--> PARTIAL --copy_to()--> EMPTY
//! ```
//!
//! While a receive is outstanding, its transfer owns the storage. The
//! completion hands it back with the number of bytes received.

use crate::error::{Error, Result};

#[derive(Debug)]
pub(crate) struct ReceiveBuffer {
    storage: Option<Vec<u8>>,
    /// Bytes the last transfer was allowed to deliver
    limit: usize,
    /// Bytes delivered by the last completed transfer
    filled: usize,
    /// Bytes already handed to callers
    copied: usize,
}

impl ReceiveBuffer {
    /// Allocate a receive buffer of `size` bytes
    pub fn new(size: usize) -> Result<Self> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory)?;
        storage.resize(size, 0);
        Ok(ReceiveBuffer {
            storage: Some(storage),
            limit: 0,
            filled: 0,
            copied: 0,
        })
    }

    /// Number of received bytes that no caller has read
    pub fn available(&self) -> usize {
        self.filled - self.copied
    }

    /// Take the storage for a new receive transfer
    ///
    /// Forgets any unread bytes. Returns `None` if a transfer already
    /// has the storage.
    pub fn lend(&mut self) -> Option<Vec<u8>> {
        let storage = self.storage.take()?;
        self.limit = 0;
        self.filled = 0;
        self.copied = 0;
        Some(storage)
    }

    /// Take back the storage from a finished transfer
    ///
    /// `requested` is the transfer's length, and `filled` the bytes it
    /// reported. `filled` is zero for a failed transfer.
    pub fn restore(&mut self, storage: Vec<u8>, requested: usize, filled: usize) {
        debug_assert!(self.storage.is_none(), "receive buffer restored twice");
        self.limit = requested.min(storage.len());
        self.storage = Some(storage);
        self.filled = filled;
        self.copied = 0;
    }

    /// Copy unread bytes into `dst`
    ///
    /// Returns the bytes copied, which is bounded by both the unread bytes
    /// and `dst`. Fails if the last transfer claimed more bytes than it
    /// was allowed to receive; the whole transfer is dropped.
    pub fn copy_to(&mut self, dst: &mut [u8]) -> Result<usize> {
        let chunk = self.available().min(dst.len());
        let start = self.copied;
        let src = self
            .storage
            .as_deref()
            .filter(|_| self.filled <= self.limit)
            .and_then(|storage| storage.get(start..start + chunk));
        let Some(src) = src else {
            self.copied = self.filled;
            return Err(Error::IoFault);
        };
        dst[..chunk].copy_from_slice(src);
        self.copied += chunk;
        Ok(chunk)
    }
}
