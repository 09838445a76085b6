//! A byte-stream engine for bulk USB peripherals
//!
//! `usbrt` turns a device's bulk IN / bulk OUT endpoint pair into a file-like
//! byte stream. It provides
//!
//! - a receive path that keeps at most one transfer outstanding, and hands
//!   its bytes to callers across as many short reads as they like;
//! - a send path that queues up to [`Config::writes_in_flight()`] transfers
//!   without waiting for them to finish;
//! - coordination of disconnect, suspend, and bus reset with the I/O that's
//!   in flight;
//! - a last-error slot, so that a transfer failure is reported to exactly
//!   one later caller.
//!
//! The engine doesn't talk to a host controller. Bring a [`Transport`] that
//! submits and cancels bulk transfers, and hand it to [`Driver::attach()`].
//! See each module for usage and examples.
//!
//! # Features
//!
//! `log` (on by default) emits diagnostics through the [`log`] facade.
//!
//! [`log`]: https://crates.io/crates/log

#[macro_use]
mod log;

mod anchor;
mod config;
mod descriptor;
mod error;
mod receive;
mod session;
mod sync;

pub mod driver;
pub mod handle;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod harness;

pub use config::Config;
pub use descriptor::{EndpointDescriptor, InterfaceDescriptor};
pub use driver::{Driver, Interface, NodeClass, MINOR_BASE, MINOR_COUNT};
pub use error::{Error, Result};
pub use handle::{Diag, Handle, Interrupter, Readiness};
pub use transfer::{Rejected, Transfer, TransferId, TransferStatus};
pub use transport::{SideChannel, Transport};
