//! Blocking primitives for the caller context
//!
//! Every wait here may be interrupted by a [`Signal`]. Whoever raises a
//! signal must then [`wake()`](IoLock::wake) the primitives, so that a
//! sleeping waiter re-checks it.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// A pending interruption for one handle
#[derive(Debug, Default)]
pub(crate) struct Signal {
    pending: AtomicBool,
}

impl Signal {
    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consume the pending interruption
    ///
    /// Returns `true` if one was pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Consume the interruption, turning it into an error
    pub fn check(&self) -> Result<()> {
        if self.take() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// The serializing lock
///
/// Unlike a `Mutex`, it guards no data, and it may be held across a
/// sleep, or across the two halves of a bus reset.
#[derive(Debug, Default)]
pub(crate) struct IoLock {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl IoLock {
    /// Acquire the lock, ignoring interruptions
    pub fn lock(&self) -> IoGuard<'_> {
        let mut locked = self.locked.lock();
        while *locked {
            self.cond.wait(&mut locked);
        }
        *locked = true;
        IoGuard { lock: self }
    }

    /// Acquire the lock, unless `signal` interrupts the wait
    pub fn lock_interruptible(&self, signal: &Signal) -> Result<IoGuard<'_>> {
        let mut locked = self.locked.lock();
        while *locked {
            signal.check()?;
            self.cond.wait(&mut locked);
        }
        *locked = true;
        Ok(IoGuard { lock: self })
    }

    pub fn try_lock(&self) -> Option<IoGuard<'_>> {
        let mut locked = self.locked.lock();
        if *locked {
            None
        } else {
            *locked = true;
            Some(IoGuard { lock: self })
        }
    }

    /// Release a lock whose guard was [leaked](IoGuard::leak)
    ///
    /// Only call this to balance an earlier `leak()`.
    pub fn unlock_leaked(&self) {
        self.unlock();
    }

    /// Wake all waiters so they re-check their signals
    pub fn wake(&self) {
        let _locked = self.locked.lock();
        self.cond.notify_all();
    }

    fn unlock(&self) {
        let mut locked = self.locked.lock();
        debug_assert!(*locked, "unlocking an unlocked IoLock");
        *locked = false;
        // Some waiters may leave because of a signal; wake everyone, so the
        // release can't be lost on one of them.
        self.cond.notify_all();
    }
}

/// Holds the [`IoLock`], releasing it on drop
#[must_use]
pub(crate) struct IoGuard<'a> {
    lock: &'a IoLock,
}

impl IoGuard<'_> {
    /// Keep the lock held after the guard goes away
    ///
    /// Balance with [`IoLock::unlock_leaked`].
    pub fn leak(self) {
        core::mem::forget(self);
    }
}

impl Drop for IoGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Counting semaphore for admission slots
#[derive(Debug)]
pub(crate) struct Semaphore {
    available: Mutex<usize>,
    capacity: usize,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Semaphore {
            available: Mutex::new(capacity),
            capacity,
            cond: Condvar::new(),
        }
    }

    /// Take a slot, sleeping until one is free or `signal` interrupts
    pub fn acquire(&self, signal: &Signal) -> Result<Permit<'_>> {
        let mut available = self.available.lock();
        while *available == 0 {
            signal.check()?;
            self.cond.wait(&mut available);
        }
        *available -= 1;
        Ok(Permit { semaphore: self })
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut available = self.available.lock();
        if *available == 0 {
            None
        } else {
            *available -= 1;
            Some(Permit { semaphore: self })
        }
    }

    /// Return a slot taken by a [forgotten](Permit::forget) permit
    ///
    /// Never blocks beyond the short internal lock; safe for the
    /// completion context.
    pub fn release(&self) {
        let mut available = self.available.lock();
        let over = *available >= self.capacity;
        if over {
            error!("admission slot released twice");
        }
        debug_assert!(!over, "admission slot released twice");
        *available += 1;
        self.cond.notify_all();
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Wake all waiters so they re-check their signals
    pub fn wake(&self) {
        let _available = self.available.lock();
        self.cond.notify_all();
    }
}

/// One admission slot, returned on drop
#[must_use]
pub(crate) struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Permit<'_> {
    /// Hand the slot to someone who will [`release()`](Semaphore::release) it later
    pub fn forget(self) {
        core::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
