//! The transfer engine behind one attached device
//!
//! A [`Session`] is shared by the attach-time [`Interface`](crate::Interface),
//! by every open [`Handle`](crate::Handle), and by every transfer in flight.
//! It's freed when the last of them lets go. Three contexts touch it:
//!
//! - callers, serialized by the [`IoLock`], which they may hold while they
//!   sleep;
//! - transfer completions, which only take the short `state` lock, and
//!   never sleep;
//! - lifecycle events (disconnect, suspend, reset), which serialize with
//!   callers through the same `IoLock`.
//!
//! The admission semaphore sits outside of both locks. Writers take a slot
//! before the `IoLock`, and completions return it.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    anchor::Anchor,
    config::Config,
    descriptor::Endpoints,
    error::{Error, ErrorSlot, Result},
    handle::Readiness,
    receive::ReceiveBuffer,
    sync::{IoLock, Semaphore, Signal},
    transfer::{Completed, Completion, Rejected, Transfer, TransferId, TransferStatus},
    transport::{SideChannel, Transport},
};

/// Fields shared with the completion context
#[derive(Debug)]
struct State {
    rx: ReceiveBuffer,
    /// The one receive transfer in flight
    ongoing: Option<TransferId>,
    error: ErrorSlot,
    /// No receive starts while set
    suspended: bool,
}

pub(crate) struct Session {
    transport: Box<dyn Transport>,
    endpoints: Endpoints,
    config: Config,
    name: String,
    io: IoLock,
    state: Mutex<State>,
    /// Signaled when the receive completes, or on teardown
    rx_done: Condvar,
    slots: Semaphore,
    anchor: Anchor,
    torn_down: AtomicBool,
    /// Set while a reset holds the `IoLock` between pre- and post-reset
    reset_held: AtomicBool,
    next_id: AtomicU64,
}

impl Session {
    pub fn new(
        transport: Box<dyn Transport>,
        endpoints: Endpoints,
        config: Config,
        name: String,
    ) -> Result<Arc<Self>> {
        let rx = ReceiveBuffer::new(endpoints.bulk_in_size)?;
        Ok(Arc::new(Session {
            transport,
            endpoints,
            config,
            name,
            io: IoLock::default(),
            state: Mutex::new(State {
                rx,
                ongoing: None,
                error: ErrorSlot::default(),
                suspended: false,
            }),
            rx_done: Condvar::new(),
            slots: Semaphore::new(config.writes_in_flight()),
            anchor: Anchor::default(),
            torn_down: AtomicBool::new(false),
            reset_held: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// A zero-sized bulk IN endpoint can't receive anything
    fn has_receive(&self) -> bool {
        self.endpoints.bulk_in_size != 0
    }

    fn next_id(&self) -> TransferId {
        TransferId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Read and clear the last transfer error
    pub fn take_error(&self) -> Option<Error> {
        self.state.lock().error.take()
    }

    /// Admission slots that are free right now
    pub fn free_slots(&self) -> usize {
        self.slots.available()
    }

    /// Wake every caller that's sleeping, so it re-checks its signal
    pub fn wake(&self) {
        self.io.wake();
        self.slots.wake();
        let _state = self.state.lock();
        self.rx_done.notify_all();
    }

    /// Take a power reference for a new handle
    ///
    /// Fails with [`Error::NotFound`] if the device went away meanwhile;
    /// the reference is given back, since no handle would release it.
    pub fn power_get(&self) -> Result<()> {
        self.transport.power_get().map_err(|err| {
            warn!("{} - can't resume device: {}", self.name, err);
            Error::Io
        })?;
        if self.is_torn_down() {
            self.transport.power_put();
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Release the power reference of a closing handle
    pub fn power_put(&self) {
        let _io = self.io.lock();
        if !self.is_torn_down() {
            self.transport.power_put();
        }
    }

    /// The diagnostic channel, with its `(in, out)` endpoints
    pub fn side_channel(&self) -> Result<(&dyn SideChannel, EndpointAddress, EndpointAddress)> {
        if self.is_torn_down() {
            return Err(Error::NotConnected);
        }
        match (self.transport.side_channel(), self.endpoints.diag) {
            (Some(channel), Some((ep_in, ep_out))) => Ok((channel, ep_in, ep_out)),
            _ => Err(Error::NotFound),
        }
    }

    //
    // Receive path
    //

    pub fn read(
        self: &Arc<Self>,
        buffer: &mut [u8],
        signal: &Signal,
        nonblocking: bool,
    ) -> Result<usize> {
        // If we cannot read at all, it's EOF.
        if buffer.is_empty() || !self.has_receive() {
            return Ok(0);
        }

        let _io = self.io.lock_interruptible(signal)?;
        if self.is_torn_down() {
            return Err(Error::NotConnected);
        }

        loop {
            let mut state = self.state.lock();
            if state.ongoing.is_some() {
                if nonblocking {
                    return Err(Error::WouldBlock);
                }
                self.wait_while(&mut state, signal, |state| state.ongoing.is_some())?;
            }

            if let Some(err) = state.error.take() {
                return Err(err);
            }

            // Never start a new transfer while bytes remain; a short read
            // is fine.
            if state.rx.available() > 0 {
                return state.rx.copy_to(buffer);
            }

            if state.suspended {
                if nonblocking {
                    return Err(Error::WouldBlock);
                }
                self.wait_while(&mut state, signal, |state| state.suspended)?;
                continue;
            }

            drop(state);
            self.submit_receive(buffer.len())?;
        }
    }

    /// Sleep on `rx_done` while `busy` holds
    ///
    /// Teardown, the signal, and the read timeout end the wait early.
    fn wait_while(
        &self,
        state: &mut MutexGuard<'_, State>,
        signal: &Signal,
        busy: impl Fn(&State) -> bool,
    ) -> Result<()> {
        let deadline = self
            .config
            .read_timeout()
            .map(|timeout| Instant::now() + timeout);
        while busy(&**state) {
            if self.is_torn_down() {
                return Err(Error::NotConnected);
            }
            signal.check()?;
            match deadline {
                Some(deadline) => {
                    if self.rx_done.wait_until(state, deadline).timed_out() && busy(&**state) {
                        return Err(Error::TimedOut);
                    }
                }
                None => self.rx_done.wait(state),
            }
        }
        Ok(())
    }

    /// Start the receive transfer
    ///
    /// Caller holds the `IoLock`, and made sure that no receive is in flight.
    /// Does nothing while suspended.
    fn submit_receive(self: &Arc<Self>, count: usize) -> Result<()> {
        let length = self.endpoints.bulk_in_size.min(count);
        let id = self.next_id();
        let storage = {
            let mut state = self.state.lock();
            if state.suspended {
                return Ok(());
            }
            let storage = state.rx.lend().ok_or(Error::Io)?;
            state.ongoing = Some(id);
            storage
        };

        let transfer = Transfer::receive(id, self.endpoints.bulk_in, storage, length, self.clone());
        match self.transport.submit(transfer) {
            Ok(()) => {
                debug!("{} - receive {:?} submitted, {} bytes", self.name, id, length);
                Ok(())
            }
            Err(Rejected { error, transfer }) => {
                error!(
                    "{} - failed submitting read transfer, error {}",
                    self.name, error
                );
                let storage = transfer.into_buffer();
                let mut state = self.state.lock();
                state.rx.restore(storage, 0, 0);
                state.ongoing = None;
                Err(match error {
                    Error::OutOfMemory => Error::OutOfMemory,
                    _ => Error::Io,
                })
            }
        }
    }

    fn receive_complete(&self, done: Completed) {
        let mut state = self.state.lock();
        let filled = if done.status == TransferStatus::Completed {
            done.actual_length
        } else {
            if !done.status.is_unlink() {
                error!(
                    "{} - nonzero read bulk status received: {:?}",
                    self.name, done.status
                );
            }
            state.error.record(done.status);
            0
        };
        state.rx.restore(done.buffer, done.length, filled);
        if state.ongoing == Some(done.id) {
            state.ongoing = None;
        }
        drop(state);
        self.rx_done.notify_all();
    }

    /// Report what a caller could do without blocking
    ///
    /// If there's nothing to read, and nothing in flight, this starts a
    /// receive of one packet. It never waits for the `IoLock`; if another
    /// caller holds it, that caller is already doing I/O.
    pub fn poll(self: &Arc<Self>) -> Readiness {
        let mut ready = Readiness::WRITABLE;
        {
            let state = self.state.lock();
            if state.error.is_pending() {
                ready |= Readiness::ERROR;
            }
            if state.ongoing.is_some() {
                return ready;
            }
            if state.rx.available() > 0 {
                return ready | Readiness::READABLE;
            }
        }
        if ready.contains(Readiness::ERROR) || !self.has_receive() || self.is_torn_down() {
            return ready;
        }

        if let Some(_io) = self.io.try_lock() {
            let idle = {
                let state = self.state.lock();
                state.ongoing.is_none()
                    && state.rx.available() == 0
                    && !state.error.is_pending()
                    && !state.suspended
            };
            if idle && !self.is_torn_down() {
                if let Err(err) = self.submit_receive(self.endpoints.bulk_in_size) {
                    warn!("{} - poll couldn't start a receive: {}", self.name, err);
                }
            }
        }
        ready
    }

    //
    // Send path
    //

    pub fn write(self: &Arc<Self>, data: &[u8], signal: &Signal, nonblocking: bool) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        // Limit the transfers in flight, so one caller can't use up all memory.
        let permit = if nonblocking {
            self.slots.try_acquire().ok_or(Error::WouldBlock)?
        } else {
            self.slots.acquire(signal)?
        };

        if let Some(err) = self.take_error() {
            return Err(err);
        }

        let size = data.len().min(self.config.max_transfer());
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory)?;
        payload.extend_from_slice(&data[..size]);

        // Don't submit to a device that's gone.
        let io = self.io.lock();
        if self.is_torn_down() {
            return Err(Error::NotConnected);
        }

        let id = self.next_id();
        self.anchor.anchor(id);
        let transfer = Transfer::send(id, self.endpoints.bulk_out, payload, self.clone());
        let submitted = self.transport.submit(transfer);
        drop(io);

        match submitted {
            Ok(()) => {
                // The completion returns the slot.
                permit.forget();
                Ok(size)
            }
            Err(Rejected { error, transfer }) => {
                error!(
                    "{} - failed submitting write transfer, error {}",
                    self.name, error
                );
                self.anchor.unanchor(id);
                drop(transfer.into_buffer());
                Err(error)
            }
        }
    }

    fn send_complete(&self, done: Completed) {
        if done.status != TransferStatus::Completed {
            if !done.status.is_unlink() {
                error!(
                    "{} - nonzero write bulk status received: {:?}",
                    self.name, done.status
                );
            }
            self.state.lock().error.record(done.status);
        }
        drop(done.buffer);
        // Whatever happened, the slot goes back. Otherwise, writers starve.
        self.slots.release();
        self.anchor.unanchor(done.id);
    }

    //
    // Draw-down and lifecycle
    //

    /// Cancel and await every transfer in flight
    ///
    /// Send transfers get the configured timeout to finish on their own.
    /// Once this returns, no completion fires for a transfer submitted
    /// before the call.
    pub fn draw_down(&self) {
        if !self.anchor.wait_empty_timeout(self.config.drawdown_timeout()) {
            let ids = self.anchor.ids();
            warn!(
                "{} - {} writes still in flight, cancelling",
                self.name,
                ids.len()
            );
            for id in ids {
                self.transport.cancel(id);
            }
            self.anchor.wait_empty();
        }
        self.kill_receive();
    }

    fn kill_receive(&self) {
        let ongoing = self.state.lock().ongoing;
        if let Some(id) = ongoing {
            // The transport may complete right here, so don't hold the state lock.
            self.transport.cancel(id);
            let mut state = self.state.lock();
            while state.ongoing == Some(id) {
                self.rx_done.wait(&mut state);
            }
        }
    }

    /// Wait for I/O to stop, then report (and clear) the last error
    pub fn flush(&self) -> Result<()> {
        let _io = self.io.lock();
        self.draw_down();
        self.take_error().map_or(Ok(()), Err)
    }

    /// Stop all transfers until [`resume()`](Session::resume)
    ///
    /// Blocked readers stay blocked, without starting a new receive.
    pub fn suspend(&self) {
        self.state.lock().suspended = true;
        self.draw_down();
        debug!("{} - suspended", self.name);
    }

    pub fn resume(&self) {
        {
            let mut state = self.state.lock();
            state.suspended = false;
            self.rx_done.notify_all();
        }
        debug!("{} - resumed", self.name);
    }

    pub fn pre_reset(&self) {
        self.io.lock().leak();
        self.reset_held.store(true, Ordering::SeqCst);
        self.draw_down();
        debug!("{} - pre-reset", self.name);
    }

    pub fn post_reset(&self) {
        // Everyone blocked across the reset sees an error.
        self.state.lock().error.set_stall();
        if self.reset_held.swap(false, Ordering::SeqCst) {
            self.io.unlock_leaked();
            debug!("{} - post-reset", self.name);
        } else {
            warn!("{} - post-reset without pre-reset", self.name);
        }
    }

    /// Stop all I/O for good
    pub fn disconnect(&self) {
        {
            let _state = self.state.lock();
            self.torn_down.store(true, Ordering::SeqCst);
            self.rx_done.notify_all();
        }
        // Once we've held the lock, no caller can still be submitting.
        drop(self.io.lock());
        self.draw_down();
    }
}

impl Completion for Session {
    fn complete(&self, done: Completed) {
        match done.direction {
            UsbDirection::In => self.receive_complete(done),
            UsbDirection::Out => self.send_complete(done),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("{} - session released", self.name);
    }
}
