//! Device identity resolution
//!
//! Classifies an arriving interface by vendor and usage, then opens it to
//! learn which physical unit (container) it belongs to.

use hidtray_transport::vendors::{is_hidpp_long, is_hidpp_short, is_hyperx_vendor, is_logitech};
use hidtray_transport::{BoxedBackend, ContainerId, InterfaceInfo, SharedHandle, TransportError};
use tracing::debug;

/// Wire protocol spoken by an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    /// HID++ over the 7-byte short report collection
    ShortReport,
    /// HID++ over the 20-byte long report collection
    LongReport,
    /// HyperX headset fixed write/read reports
    VendorBinary,
    /// Anything else; ignored
    Unclassified,
}

impl ProtocolFamily {
    /// Classify by vendor first, then by usage for Logitech interfaces
    pub fn classify(info: &InterfaceInfo) -> Self {
        if is_logitech(info.vendor_id) {
            if is_hidpp_short(info.usage_page, info.usage) {
                Self::ShortReport
            } else if is_hidpp_long(info.usage_page, info.usage) {
                Self::LongReport
            } else {
                Self::Unclassified
            }
        } else if is_hyperx_vendor(info.vendor_id) {
            Self::VendorBinary
        } else {
            Self::Unclassified
        }
    }

    pub fn is_hidpp(&self) -> bool {
        matches!(self, Self::ShortReport | Self::LongReport)
    }
}

/// An interface that was classified and opened
pub struct Resolved {
    pub container_id: ContainerId,
    pub family: ProtocolFamily,
    /// Interface actually opened (a sibling of the arrival for headsets)
    pub interface: InterfaceInfo,
    pub handle: SharedHandle,
}

pub struct IdentityResolver {
    backend: BoxedBackend,
}

impl IdentityResolver {
    pub fn new(backend: BoxedBackend) -> Self {
        Self { backend }
    }

    /// Resolve an arrival to its container and an open handle
    ///
    /// `Ok(None)` means the interface is not interesting. Open failures
    /// are returned as errors; nothing is kept open in that case.
    pub fn resolve(&self, arrival: &InterfaceInfo) -> Result<Option<Resolved>, TransportError> {
        let family = ProtocolFamily::classify(arrival);
        if family == ProtocolFamily::Unclassified {
            debug!(path = %arrival.path, "Ignoring unclassified interface");
            return Ok(None);
        }

        let interface = match family {
            ProtocolFamily::VendorBinary => self.best_sibling(arrival),
            _ => arrival.clone(),
        };

        let handle = self.backend.open_path(&interface.path)?;
        let container_id = match handle.container_id() {
            Ok(id) => id,
            Err(e) => {
                handle.close();
                return Err(e);
            }
        };
        debug!(
            path = %interface.path,
            container = %container_id,
            ?family,
            "Resolved interface"
        );

        Ok(Some(Resolved {
            container_id,
            family,
            interface,
            handle,
        }))
    }

    /// Among interfaces sharing the arrival's vendor/product ID, pick the
    /// one with the highest (usage, usage page); later entries win ties
    fn best_sibling(&self, arrival: &InterfaceInfo) -> InterfaceInfo {
        let siblings = match self.backend.enumerate(arrival.vendor_id, arrival.product_id) {
            Ok(list) => list,
            Err(e) => {
                debug!(path = %arrival.path, "Sibling enumeration failed: {}", e);
                Vec::new()
            }
        };
        siblings
            .into_iter()
            .max_by_key(|i| (i.usage, i.usage_page))
            .unwrap_or_else(|| arrival.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{interface, MockBackend, MockHandle};
    use hidtray_transport::vendors::{HP_VENDOR_ID, KINGSTON_VENDOR_ID, LOGITECH_VENDOR_ID};
    use std::sync::Arc;

    #[test]
    fn test_classify() {
        let short = interface("a", LOGITECH_VENDOR_ID, 0xC52B, 0xFF00, 0x0001);
        let long = interface("b", LOGITECH_VENDOR_ID, 0xC52B, 0xFF00, 0x0002);
        let mouse = interface("c", LOGITECH_VENDOR_ID, 0xC52B, 0x0001, 0x0002);
        let kingston = interface("d", KINGSTON_VENDOR_ID, 0x16C4, 0x000C, 0x0001);
        let hp = interface("e", HP_VENDOR_ID, 0x0696, 0xFF90, 0x0303);
        let other = interface("f", 0x1234, 0x0001, 0xFF00, 0x0001);

        assert_eq!(ProtocolFamily::classify(&short), ProtocolFamily::ShortReport);
        assert_eq!(ProtocolFamily::classify(&long), ProtocolFamily::LongReport);
        assert_eq!(ProtocolFamily::classify(&mouse), ProtocolFamily::Unclassified);
        assert_eq!(ProtocolFamily::classify(&kingston), ProtocolFamily::VendorBinary);
        assert_eq!(ProtocolFamily::classify(&hp), ProtocolFamily::VendorBinary);
        assert_eq!(ProtocolFamily::classify(&other), ProtocolFamily::Unclassified);
    }

    #[test]
    fn test_unclassified_is_not_opened() {
        let backend = MockBackend::new();
        let resolver = IdentityResolver::new(backend.clone());
        let other = interface("x", 0x1234, 0x0001, 0xFF00, 0x0001);
        assert!(resolver.resolve(&other).unwrap().is_none());
        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_hidpp_opens_arrival_path() {
        let backend = MockBackend::new();
        let container = ContainerId::from_u128(7);
        let info = interface("/dev/hidraw1", LOGITECH_VENDOR_ID, 0xC52B, 0xFF00, 0x0002);
        backend.add(info.clone(), Arc::new(MockHandle::new(&info.path, container)));

        let resolver = IdentityResolver::new(backend.clone());
        let resolved = resolver.resolve(&info).unwrap().unwrap();
        assert_eq!(resolved.container_id, container);
        assert_eq!(resolved.family, ProtocolFamily::LongReport);
        assert_eq!(backend.opened(), vec!["/dev/hidraw1".to_string()]);
    }

    #[test]
    fn test_vendor_binary_opens_richest_sibling() {
        let backend = MockBackend::new();
        let container = ContainerId::from_u128(9);
        let low = interface("hp-0", HP_VENDOR_ID, 0x0696, 0x000C, 0x0001);
        let high = interface("hp-1", HP_VENDOR_ID, 0x0696, 0xFF90, 0x0303);
        let same_usage = interface("hp-2", HP_VENDOR_ID, 0x0696, 0xFF00, 0x0303);
        for info in [&low, &high, &same_usage] {
            backend.add(info.clone(), Arc::new(MockHandle::new(&info.path, container)));
        }

        let resolver = IdentityResolver::new(backend.clone());
        let resolved = resolver.resolve(&low).unwrap().unwrap();
        assert_eq!(resolved.interface.path, "hp-1");
        assert_eq!(resolved.family, ProtocolFamily::VendorBinary);
        assert_eq!(backend.opened(), vec!["hp-1".to_string()]);
    }

    #[test]
    fn test_vendor_binary_ties_pick_later_entry() {
        let backend = MockBackend::new();
        let container = ContainerId::from_u128(10);
        let first = interface("k-0", KINGSTON_VENDOR_ID, 0x16C4, 0xFF00, 0x0001);
        let second = interface("k-1", KINGSTON_VENDOR_ID, 0x16C4, 0xFF00, 0x0001);
        for info in [&first, &second] {
            backend.add(info.clone(), Arc::new(MockHandle::new(&info.path, container)));
        }

        let resolver = IdentityResolver::new(backend);
        let resolved = resolver.resolve(&first).unwrap().unwrap();
        assert_eq!(resolved.interface.path, "k-1");
    }

    #[test]
    fn test_open_failure_is_an_error() {
        let backend = MockBackend::new();
        let info = interface("gone", LOGITECH_VENDOR_ID, 0xC52B, 0xFF00, 0x0001);
        backend.add_unopenable(info.clone());
        let resolver = IdentityResolver::new(backend);
        assert!(matches!(
            resolver.resolve(&info),
            Err(TransportError::DeviceNotFound(_))
        ));
    }
}
