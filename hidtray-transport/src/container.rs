//! Container identity: which interfaces belong to one physical unit

use tracing::debug;

use crate::types::ContainerId;

/// Resolve the container of an interface from the device tree
///
/// On Linux the hidraw node is walked up to its USB device (or to the HID
/// parent for Bluetooth devices, which have no USB ancestor); every
/// interface of one unit shares that ancestor's sysfs path.
#[cfg(all(target_os = "linux", feature = "hotplug"))]
pub(crate) fn container_for_path(path: &str) -> Option<ContainerId> {
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use tokio_udev::Device;

    let sysname = Path::new(path).file_name()?.to_str()?;
    let device = Device::from_subsystem_sysname("hidraw".to_string(), sysname.to_string()).ok()?;

    let anchor = device
        .parent_with_subsystem_devtype("usb", "usb_device")
        .ok()
        .flatten()
        .or_else(|| device.parent_with_subsystem("hid").ok().flatten())?;

    debug!(
        path,
        anchor = %anchor.syspath().display(),
        "Resolved container anchor"
    );
    Some(ContainerId::derive(anchor.syspath().as_os_str().as_bytes()))
}

#[cfg(not(all(target_os = "linux", feature = "hotplug")))]
pub(crate) fn container_for_path(path: &str) -> Option<ContainerId> {
    debug!(path, "No device tree available, using descriptor identity");
    None
}

/// Fallback identity from the USB descriptor
///
/// Units with a serial number group correctly; without one, each
/// interface path becomes its own container.
pub(crate) fn container_from_descriptor(
    vendor_id: u16,
    product_id: u16,
    serial: Option<&str>,
    path: &str,
) -> ContainerId {
    match serial.filter(|s| !s.is_empty()) {
        Some(serial) => {
            ContainerId::derive(format!("{vendor_id:04x}:{product_id:04x}:{serial}").as_bytes())
        }
        None => ContainerId::derive(path.as_bytes()),
    }
}
