//! Device attach, node registry, and lifecycle events
//!
//! The [`Driver`] keeps one node per attached device, numbered by a minor
//! from a fixed range. Enumeration code calls [`Driver::attach()`] for a
//! matching interface, and keeps the returned [`Interface`] until the
//! device goes away. Callers find the device again with
//! [`Driver::open()`].
//!
//! ```
//! # use usbrt::{Transport, Transfer, TransferId, Rejected};
//! # struct Bus;
//! # impl Transport for Bus {
//! #     fn submit(&self, transfer: Transfer) -> Result<(), Rejected> { Ok(()) }
//! #     fn cancel(&self, _: TransferId) {}
//! # }
//! use usb_device::endpoint::EndpointAddress;
//! use usbrt::{Config, Driver, EndpointDescriptor, InterfaceDescriptor, NodeClass};
//!
//! let driver = Driver::new(Config::default());
//! let descriptor = InterfaceDescriptor {
//!     number: 0,
//!     endpoints: vec![
//!         EndpointDescriptor::bulk(EndpointAddress::from(0x81), 64),
//!         EndpointDescriptor::bulk(EndpointAddress::from(0x01), 64),
//!     ],
//! };
//! let interface = driver.attach(Bus, &descriptor, NodeClass::Generic).unwrap();
//! assert_eq!(interface.node_name(), "usbrt0");
//!
//! let handle = driver.open(interface.minor()).unwrap();
//! # drop(handle);
//! interface.disconnect();
//! ```

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    config::Config,
    descriptor::{Endpoints, InterfaceDescriptor},
    error::{Error, Result},
    handle::Handle,
    session::Session,
    transport::Transport,
};

/// First minor number handed to a node.
pub const MINOR_BASE: u32 = 192;
/// Number of minors this driver owns.
pub const MINOR_COUNT: u32 = 16;

/// Naming scheme of a device node
///
/// Both classes run the same engine, and share one minor range.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum NodeClass {
    /// `usbrt0`, `usbrt1`, ...
    #[default]
    Generic,
    /// `mtr0`, `mtr1`, ... for motor controllers
    Motor,
}

impl NodeClass {
    fn prefix(self) -> &'static str {
        match self {
            NodeClass::Generic => "usbrt",
            NodeClass::Motor => "mtr",
        }
    }

    /// The node name for `minor`
    pub fn node_name(self, minor: u32) -> String {
        format!("{}{}", self.prefix(), minor.saturating_sub(MINOR_BASE))
    }
}

#[derive(Debug)]
struct Registry {
    config: Config,
    nodes: Mutex<BTreeMap<u32, Weak<Session>>>,
}

/// The device registry
///
/// Cheap to clone; clones share the same nodes.
#[derive(Clone, Debug)]
pub struct Driver {
    registry: Arc<Registry>,
}

impl Driver {
    pub fn new(config: Config) -> Self {
        Driver {
            registry: Arc::new(Registry {
                config,
                nodes: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.registry.config
    }

    /// Attach a device
    ///
    /// `interface` describes the active setting of interface 0. The device
    /// needs a bulk IN endpoint, followed by a bulk OUT endpoint. Returns the
    /// attach-time reference; drop it (or [`disconnect()`](Interface::disconnect)
    /// it) when the device goes away.
    pub fn attach<T>(
        &self,
        transport: T,
        interface: &InterfaceDescriptor,
        class: NodeClass,
    ) -> Result<Interface>
    where
        T: Transport + 'static,
    {
        let endpoints = Endpoints::discover(interface).map_err(|err| {
            error!("Could not find both bulk-in and bulk-out endpoints");
            err
        })?;

        let mut nodes = self.registry.nodes.lock();
        let minor = (MINOR_BASE..MINOR_BASE + MINOR_COUNT)
            .find(|minor| !nodes.contains_key(minor))
            .ok_or_else(|| {
                error!("Not able to get a minor for this device");
                Error::MinorsExhausted
            })?;

        let session = Session::new(
            Box::new(transport),
            endpoints,
            self.registry.config,
            class.node_name(minor),
        )?;
        nodes.insert(minor, Arc::downgrade(&session));
        info!("device now attached to {} (minor {})", session.name(), minor);

        Ok(Interface {
            session,
            minor,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Open the device with the node `minor`
    pub fn open(&self, minor: u32) -> Result<Handle> {
        let session = self
            .registry
            .nodes
            .lock()
            .get(&minor)
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                error!("can't find device for minor {}", minor);
                Error::NotFound
            })?;
        session.power_get()?;
        Ok(Handle::new(session))
    }

    /// Minors of all attached devices, in ascending order
    pub fn minors(&self) -> Vec<u32> {
        self.registry.nodes.lock().keys().copied().collect()
    }
}

/// The attach-time reference to a device
///
/// Lifecycle events for the device go through here. Dropping it is the
/// same as [`disconnect()`](Interface::disconnect).
pub struct Interface {
    session: Arc<Session>,
    minor: u32,
    registry: Arc<Registry>,
}

impl Interface {
    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn node_name(&self) -> &str {
        self.session.name()
    }

    /// Admission slots that are free right now
    pub fn free_write_slots(&self) -> usize {
        self.session.free_slots()
    }

    /// The device is suspending; stop all transfers
    ///
    /// Transfers may start again after [`resume()`](Interface::resume).
    pub fn suspend(&self) {
        self.session.suspend();
    }

    /// The device resumed; transfers may start again
    pub fn resume(&self) {
        self.session.resume();
    }

    /// The bus is about to reset the device
    ///
    /// Stops all transfers, and blocks all callers until
    /// [`post_reset()`](Interface::post_reset).
    pub fn pre_reset(&self) {
        self.session.pre_reset();
    }

    /// The bus finished resetting the device
    ///
    /// Callers that waited across the reset see [`Error::Stall`].
    pub fn post_reset(&self) {
        self.session.post_reset();
    }

    /// The device is gone
    ///
    /// New opens fail, and open handles fail with
    /// [`Error::NotConnected`]. Returns once no transfer is in flight.
    pub fn disconnect(self) {}
}

impl Drop for Interface {
    fn drop(&mut self) {
        // Give back our minor; no one can open us after this.
        self.registry.nodes.lock().remove(&self.minor);
        self.session.disconnect();
        info!("{} now disconnected", self.session.name());
    }
}
