//! HID access layer for hidtray
//!
//! This crate is the boundary to the operating system's HID stack:
//!
//! - [`HidBackend`] / [`HidHandle`]: enumerate interfaces, open them by
//!   path, exchange reports, resolve the physical-unit container, and
//!   subscribe to hotplug notifications
//! - [`HidApiBackend`]: the production backend over `hidapi`, with a udev
//!   hotplug monitor on Linux and enumeration polling elsewhere
//! - [`protocol`]: HID++ short/long framing and the HyperX vendor commands

pub mod error;
pub mod protocol;
pub mod types;
pub mod vendors;

mod container;
mod hid_native;
mod hotplug;

pub use error::TransportError;
pub use hid_native::{HidApiBackend, NativeHandle};
pub use hotplug::HotplugRegistration;
pub use types::{ContainerId, HotplugEvent, HotplugFilter, HotplugKind, InterfaceInfo};

use std::sync::Arc;

/// One open HID interface
///
/// Handles are shared between the registry that owns them and the poll
/// loops that borrow them. After [`HidHandle::close`] every I/O call
/// fails with [`TransportError::Disconnected`] instead of touching the
/// released native handle.
pub trait HidHandle: Send + Sync {
    /// Interface path this handle was opened from
    fn path(&self) -> &str;

    /// Write an output report (first byte is the report ID)
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read an input report, waiting at most `timeout_ms`
    ///
    /// Returns `Ok(0)` on timeout.
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError>;

    /// Fetch an input report by ID (`buf[0]` holds the report ID)
    fn get_input_report(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Container grouping all interfaces of the same physical unit
    fn container_id(&self) -> Result<ContainerId, TransportError>;

    /// Release the native handle; idempotent
    fn close(&self);

    /// Whether [`HidHandle::close`] has been called
    fn is_closed(&self) -> bool;
}

/// Shared handle type
pub type SharedHandle = Arc<dyn HidHandle>;

/// Hotplug callback, invoked on a notifier thread this crate owns
pub type HotplugCallback = Arc<dyn Fn(HotplugEvent) + Send + Sync>;

/// The native HID layer contract
pub trait HidBackend: Send + Sync {
    /// List interfaces matching a vendor/product ID (0 matches any)
    fn enumerate(&self, vendor_id: u16, product_id: u16)
        -> Result<Vec<InterfaceInfo>, TransportError>;

    /// Open an interface by path
    fn open_path(&self, path: &str) -> Result<SharedHandle, TransportError>;

    /// Register a hotplug callback for one event kind
    ///
    /// With `enumerate_existing`, an [`HotplugKind::Arrived`] registration
    /// first reports every matching interface already present. The
    /// registration stays active until the returned guard is dropped.
    fn register_hotplug(
        &self,
        filter: HotplugFilter,
        kind: HotplugKind,
        enumerate_existing: bool,
        callback: HotplugCallback,
    ) -> Result<HotplugRegistration, TransportError>;
}

/// Type alias for a shared backend
pub type BoxedBackend = Arc<dyn HidBackend>;
