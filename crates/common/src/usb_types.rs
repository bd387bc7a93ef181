//! USB value types shared between the acquisition core and transport backends

use bytes::Bytes;
use std::fmt;

/// Vendor/product identifier pair used to pick a device off the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Where a discovered device sits on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub identity: DeviceIdentity,
    pub bus_number: u8,
    pub device_address: u8,
}

/// Endpoint data direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint descriptor summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_kind: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn is_in(&self) -> bool {
        self.direction == Direction::In
    }
}

/// Interface descriptor summary, endpoints kept in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// One successfully read sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// 1-based position among successful reads
    pub sequence: u32,
    pub data: Bytes,
}

/// Render bytes the way they appear in the acquisition log: `<Buffer 0a ff ...>`
pub fn format_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 + 9);
    out.push_str("<Buffer");
    for byte in data {
        out.push_str(&format!(" {:02x}", byte));
    }
    out.push('>');
    out
}
