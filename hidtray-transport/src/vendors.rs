//! Vendor IDs and HID usages that identify interesting interfaces
//!
//! Only enough to decide which protocol family an interface speaks;
//! device identity comes from the container grouping, not from PIDs.

/// Logitech vendor ID (HID++ devices and receivers)
pub const LOGITECH_VENDOR_ID: u16 = 0x046D;

/// Kingston vendor ID (original HyperX headsets)
pub const KINGSTON_VENDOR_ID: u16 = 0x0951;

/// HP vendor ID (HyperX headsets after the HP acquisition)
pub const HP_VENDOR_ID: u16 = 0x03F0;

/// Vendor IDs of HyperX-branded headsets
pub const HYPERX_VENDOR_IDS: &[u16] = &[KINGSTON_VENDOR_ID, HP_VENDOR_ID];

/// Every vendor the hotplug notifier is registered for
pub const WATCHED_VENDOR_IDS: &[u16] = &[LOGITECH_VENDOR_ID, KINGSTON_VENDOR_ID, HP_VENDOR_ID];

/// HID++ vendor collection usages
pub mod hidpp_usage {
    /// Vendor usage page carrying HID++ over USB receivers and wired devices
    pub const USAGE_PAGE: u16 = 0xFF00;
    /// Short (7-byte) report collection
    pub const USAGE_SHORT: u16 = 0x0001;
    /// Long (20-byte) report collection
    pub const USAGE_LONG: u16 = 0x0002;
    /// Vendor usage page used by HID++ over Bluetooth LE
    pub const BLE_USAGE_PAGE: u16 = 0xFF43;
    /// Long report collection on the BLE usage page
    pub const BLE_USAGE_LONG: u16 = 0x0202;
}

#[inline]
pub fn is_logitech(vendor_id: u16) -> bool {
    vendor_id == LOGITECH_VENDOR_ID
}

/// Check if the vendor ID belongs to a HyperX headset OEM
#[inline]
pub fn is_hyperx_vendor(vendor_id: u16) -> bool {
    HYPERX_VENDOR_IDS.contains(&vendor_id)
}

/// Check if a (usage page, usage) pair is the HID++ short report collection
#[inline]
pub fn is_hidpp_short(usage_page: u16, usage: u16) -> bool {
    usage_page == hidpp_usage::USAGE_PAGE && usage == hidpp_usage::USAGE_SHORT
}

/// Check if a (usage page, usage) pair is a HID++ long report collection
#[inline]
pub fn is_hidpp_long(usage_page: u16, usage: u16) -> bool {
    (usage_page == hidpp_usage::USAGE_PAGE && usage == hidpp_usage::USAGE_LONG)
        || (usage_page == hidpp_usage::BLE_USAGE_PAGE && usage == hidpp_usage::BLE_USAGE_LONG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyperx_vendors() {
        assert!(is_hyperx_vendor(0x0951));
        assert!(is_hyperx_vendor(0x03F0));
        assert!(!is_hyperx_vendor(0x046D));
    }

    #[test]
    fn test_hidpp_usages() {
        assert!(is_hidpp_short(0xFF00, 0x0001));
        assert!(is_hidpp_long(0xFF00, 0x0002));
        assert!(is_hidpp_long(0xFF43, 0x0202));
        assert!(!is_hidpp_short(0xFF00, 0x0002));
        assert!(!is_hidpp_long(0x0001, 0x0002)); // generic desktop mouse
    }

    #[test]
    fn test_watched_vendors_cover_all_families() {
        assert!(WATCHED_VENDOR_IDS.contains(&LOGITECH_VENDOR_ID));
        for vid in HYPERX_VENDOR_IDS {
            assert!(WATCHED_VENDOR_IDS.contains(vid));
        }
    }
}
