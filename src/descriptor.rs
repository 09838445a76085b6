//! Interface descriptors, and the endpoints discovered at attach

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use crate::error::{Error, Result};

/// An endpoint, as the device describes it
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub kind: EndpointType,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn bulk(address: EndpointAddress, max_packet_size: u16) -> Self {
        EndpointDescriptor {
            address,
            kind: EndpointType::Bulk,
            max_packet_size,
        }
    }

    fn is_bulk(&self, direction: UsbDirection) -> bool {
        self.kind == EndpointType::Bulk && self.address.direction() == direction
    }
}

/// The active alternate setting of an interface
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// The endpoints that the engine uses
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Endpoints {
    pub bulk_in: EndpointAddress,
    /// Receive buffer size
    pub bulk_in_size: usize,
    pub bulk_out: EndpointAddress,
    /// The diagnostic pair, `(in, out)`
    pub diag: Option<(EndpointAddress, EndpointAddress)>,
}

impl Endpoints {
    /// Find the bulk pair on interface 0
    ///
    /// Endpoint 0 must be bulk IN, and endpoint 1 must be bulk OUT. If
    /// endpoints 2 and 3 are another bulk IN / OUT pair, they're the
    /// diagnostic endpoints.
    pub fn discover(interface: &InterfaceDescriptor) -> Result<Self> {
        if interface.number != 0 {
            return Err(Error::InvalidInterface);
        }
        let (bulk_in, bulk_out) = match interface.endpoints.as_slice() {
            [bulk_in, bulk_out, ..]
                if bulk_in.is_bulk(UsbDirection::In) && bulk_out.is_bulk(UsbDirection::Out) =>
            {
                (bulk_in, bulk_out)
            }
            _ => return Err(Error::InvalidInterface),
        };
        let diag = match interface.endpoints.get(2..4) {
            Some([diag_in, diag_out])
                if diag_in.is_bulk(UsbDirection::In) && diag_out.is_bulk(UsbDirection::Out) =>
            {
                Some((diag_in.address, diag_out.address))
            }
            _ => None,
        };
        Ok(Endpoints {
            bulk_in: bulk_in.address,
            bulk_in_size: bulk_in.max_packet_size as usize,
            bulk_out: bulk_out.address,
            diag,
        })
    }
}
