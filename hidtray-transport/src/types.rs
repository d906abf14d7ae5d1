//! Common types for the HID access layer

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by every HID interface of one physical unit
///
/// Assigned per physical device, not per interface. Rendered as a
/// lowercase hyphenated UUID so consumers never see the native form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(Uuid);

impl ContainerId {
    /// Wrap an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build from a raw 128-bit value
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Derive a stable identifier from a name that is unique per unit
    /// (a sysfs path, a serial number, ...)
    pub fn derive(name: &[u8]) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Stable string key used in published events
    pub fn key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Descriptor of one exposed HID interface (one top-level collection)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceInfo {
    /// Interface path, unique per interface instance on the bus
    pub path: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// HID usage of the top-level collection
    pub usage: u16,
    /// HID usage page of the top-level collection
    pub usage_page: u16,
    /// Manufacturer string (may be empty)
    pub manufacturer: String,
    /// Product string (may be empty)
    pub product: String,
    /// Serial number if available
    pub serial: Option<String>,
    /// USB interface number (-1 when unknown)
    pub interface_number: i32,
}

impl From<&hidapi::DeviceInfo> for InterfaceInfo {
    fn from(info: &hidapi::DeviceInfo) -> Self {
        Self {
            path: info.path().to_string_lossy().to_string(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            usage: info.usage(),
            usage_page: info.usage_page(),
            manufacturer: info.manufacturer_string().unwrap_or_default().to_string(),
            product: info.product_string().unwrap_or_default().to_string(),
            serial: info
                .serial_number()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            interface_number: info.interface_number(),
        }
    }
}

/// Kind of hotplug notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotplugKind {
    /// A matching interface appeared
    Arrived,
    /// A matching interface disappeared
    Left,
}

/// Hotplug notification delivered to a registered callback
///
/// For [`HotplugKind::Left`] only `path`, `vendor_id` and `product_id`
/// are meaningful; the interface no longer exists to be queried.
#[derive(Debug, Clone)]
pub struct HotplugEvent {
    pub kind: HotplugKind,
    pub interface: InterfaceInfo,
}

/// Vendor/product filter for hotplug registration (0 matches any)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HotplugFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl HotplugFilter {
    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: 0,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        (self.vendor_id == 0 || self.vendor_id == vendor_id)
            && (self.product_id == 0 || self.product_id == product_id)
    }
}
