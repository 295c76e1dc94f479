//! USB device descriptors
//!
//! Immutable snapshots produced by one enumeration. Devices are matched by
//! their [`DeviceId`] (vendor/product pair), never by `raw_identity`, which
//! is only meaningful to the host backend and may change between enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor/product identity used for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceId {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// A USB device as seen by one enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Display name (product string, or a VID:PID fallback)
    pub name: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// Backend handle (e.g. "bus:address"); not stable across enumerations
    pub raw_identity: String,
}

impl DeviceDescriptor {
    pub fn id(&self) -> DeviceId {
        DeviceId::new(self.vendor_id, self.product_id)
    }

    /// Whether this descriptor refers to the given vendor/product pair
    pub fn matches(&self, id: DeviceId) -> bool {
        self.id() == id
    }

    /// Serialize for the host bridge
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "device_name": self.name,
            "vendor_id": self.vendor_id,
            "product_id": self.product_id,
            "manufacturer_name": self.manufacturer,
            "product_name": self.product,
            "device_id": self.raw_identity,
        })
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id())
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub transfer_type: TransferType,
    pub direction: Direction,
}

impl EndpointDescriptor {
    pub fn is_bulk_out(&self) -> bool {
        self.transfer_type == TransferType::Bulk && self.direction == Direction::Out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// First (interface, bulk OUT endpoint) pair in descriptor order
pub fn find_bulk_out(interfaces: &[InterfaceDescriptor]) -> Option<(u8, u8)> {
    interfaces.iter().find_map(|iface| {
        iface
            .endpoints
            .iter()
            .find(|ep| ep.is_bulk_out())
            .map(|ep| (iface.number, ep.address))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(address: u8, transfer_type: TransferType, direction: Direction) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            transfer_type,
            direction,
        }
    }

    #[test]
    fn test_matches_ignores_raw_identity() {
        let a = DeviceDescriptor {
            vendor_id: 0x04b8,
            product_id: 0x0202,
            name: "TM-T20".into(),
            manufacturer: None,
            product: None,
            raw_identity: "001:004".into(),
        };
        let b = DeviceDescriptor {
            raw_identity: "001:009".into(),
            ..a.clone()
        };
        assert!(a.matches(b.id()));
        assert_eq!(a.id().to_string(), "04b8:0202");
    }

    #[test]
    fn test_find_bulk_out_skips_in_and_interrupt() {
        let interfaces = vec![
            InterfaceDescriptor {
                number: 0,
                endpoints: vec![
                    ep(0x81, TransferType::Bulk, Direction::In),
                    ep(0x02, TransferType::Interrupt, Direction::Out),
                ],
            },
            InterfaceDescriptor {
                number: 1,
                endpoints: vec![
                    ep(0x83, TransferType::Bulk, Direction::In),
                    ep(0x03, TransferType::Bulk, Direction::Out),
                    ep(0x04, TransferType::Bulk, Direction::Out),
                ],
            },
        ];
        assert_eq!(find_bulk_out(&interfaces), Some((1, 0x03)));
    }

    #[test]
    fn test_find_bulk_out_none() {
        let interfaces = vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![ep(0x81, TransferType::Bulk, Direction::In)],
        }];
        assert_eq!(find_bulk_out(&interfaces), None);
        assert_eq!(find_bulk_out(&[]), None);
    }

    #[test]
    fn test_to_json_fields() {
        let d = DeviceDescriptor {
            vendor_id: 0x04b8,
            product_id: 0x0202,
            name: "TM-T20".into(),
            manufacturer: Some("EPSON".into()),
            product: Some("TM-T20".into()),
            raw_identity: "001:004".into(),
        };
        let v = d.to_json();
        assert_eq!(v["vendor_id"], 0x04b8);
        assert_eq!(v["product_id"], 0x0202);
        assert_eq!(v["device_name"], "TM-T20");
    }
}
