//! The bus seam
//!
//! A [`Transport`] is the host controller side of one attached device.
//! The engine submits [`Transfer`]s, and the transport completes them
//! later. The engine never assumes which thread completes a transfer. It
//! may even be the thread that calls [`submit()`](Transport::submit) or
//! [`cancel()`](Transport::cancel).

use std::{sync::Arc, time::Duration};

use usb_device::endpoint::EndpointAddress;

use crate::{
    error::Result,
    transfer::{Rejected, Transfer, TransferId},
};

/// Asynchronous bulk transport for one device
pub trait Transport: Send + Sync {
    /// Queue a transfer
    ///
    /// On success, the transport owns the transfer and must eventually
    /// [`complete()`](Transfer::complete) it (or drop it). On failure, it
    /// returns the transfer, which is never completed.
    fn submit(&self, transfer: Transfer) -> core::result::Result<(), Rejected>;

    /// Cancel a queued transfer
    ///
    /// The transport completes a cancelled transfer with
    /// [`TransferStatus::Unlinked`](crate::TransferStatus::Unlinked), unless it
    /// already completed. Cancelling an unknown or finished transfer does
    /// nothing.
    fn cancel(&self, id: TransferId);

    /// Take a power reference on the device, waking it if it's suspended
    fn power_get(&self) -> Result<()> {
        Ok(())
    }

    /// Release a power reference taken by [`power_get()`](Transport::power_get)
    fn power_put(&self) {}

    /// The synchronous diagnostic channel, if the transport offers one
    fn side_channel(&self) -> Option<&dyn SideChannel> {
        None
    }
}

/// Blocking transfers on the diagnostic endpoint pair
///
/// These share nothing with the engine's buffering or admission control.
pub trait SideChannel: Send + Sync {
    /// Send `data` on `endpoint`, returning the bytes sent
    fn send(&self, endpoint: EndpointAddress, data: &[u8], timeout: Duration) -> Result<usize>;
    /// Receive into `buffer` from `endpoint`, returning the bytes received
    fn recv(&self, endpoint: EndpointAddress, buffer: &mut [u8], timeout: Duration)
        -> Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn submit(&self, transfer: Transfer) -> core::result::Result<(), Rejected> {
        (**self).submit(transfer)
    }
    fn cancel(&self, id: TransferId) {
        (**self).cancel(id)
    }
    fn power_get(&self) -> Result<()> {
        (**self).power_get()
    }
    fn power_put(&self) {
        (**self).power_put()
    }
    fn side_channel(&self) -> Option<&dyn SideChannel> {
        (**self).side_channel()
    }
}
