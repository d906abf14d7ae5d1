//! Native backend over hidapi

use std::ffi::CString;
use std::sync::Arc;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::container;
use crate::error::TransportError;
use crate::hotplug::{self, HotplugRegistration};
use crate::types::{ContainerId, HotplugFilter, HotplugKind, InterfaceInfo};
use crate::{HidBackend, HidHandle, HotplugCallback, SharedHandle};

/// hidapi context shared by the backend and its hotplug watchers
pub(crate) type SharedApi = Arc<Mutex<HidApi>>;

/// Refresh the device list and return interfaces matching `filter`
pub(crate) fn enumerate_matching(
    api: &SharedApi,
    filter: HotplugFilter,
) -> Result<Vec<InterfaceInfo>, TransportError> {
    let mut api = api.lock();
    api.refresh_devices()?;
    Ok(api
        .device_list()
        .filter(|d| filter.matches(d.vendor_id(), d.product_id()))
        .map(InterfaceInfo::from)
        .collect())
}

/// Production [`HidBackend`] built on hidapi
pub struct HidApiBackend {
    api: SharedApi,
}

impl HidApiBackend {
    /// Initialize hidapi
    pub fn new() -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
        })
    }
}

impl HidBackend for HidApiBackend {
    fn enumerate(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Vec<InterfaceInfo>, TransportError> {
        let devices = enumerate_matching(
            &self.api,
            HotplugFilter {
                vendor_id,
                product_id,
            },
        )?;
        debug!(
            "Enumerated {} interfaces for {:04X}:{:04X}",
            devices.len(),
            vendor_id,
            product_id
        );
        Ok(devices)
    }

    fn open_path(&self, path: &str) -> Result<SharedHandle, TransportError> {
        let c_path =
            CString::new(path).map_err(|_| TransportError::DeviceNotFound(path.to_string()))?;
        let device = self.api.lock().open_path(&c_path)?;
        info!(path, "Opened HID interface");
        Ok(Arc::new(NativeHandle::new(path.to_string(), device)))
    }

    fn register_hotplug(
        &self,
        filter: HotplugFilter,
        kind: HotplugKind,
        enumerate_existing: bool,
        callback: HotplugCallback,
    ) -> Result<HotplugRegistration, TransportError> {
        hotplug::spawn_watcher(
            Arc::clone(&self.api),
            filter,
            kind,
            enumerate_existing,
            callback,
        )
    }
}

/// Open hidapi device; released exactly once by [`HidHandle::close`]
pub struct NativeHandle {
    path: String,
    device: Mutex<Option<HidDevice>>,
}

impl NativeHandle {
    fn new(path: String, device: HidDevice) -> Self {
        Self {
            path,
            device: Mutex::new(Some(device)),
        }
    }

    fn with_device<T>(
        &self,
        f: impl FnOnce(&HidDevice) -> hidapi::HidResult<T>,
    ) -> Result<T, TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or(TransportError::Disconnected)?;
        Ok(f(device)?)
    }
}

impl HidHandle for NativeHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.with_device(|d| d.write(data))
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        self.with_device(|d| d.read_timeout(buf, timeout_ms))
    }

    fn get_input_report(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.with_device(|d| d.get_input_report(buf))
    }

    fn container_id(&self) -> Result<ContainerId, TransportError> {
        if let Some(id) = container::container_for_path(&self.path) {
            return Ok(id);
        }
        let info = self.with_device(|d| d.get_device_info())?;
        Ok(container::container_from_descriptor(
            info.vendor_id(),
            info.product_id(),
            info.serial_number(),
            &self.path,
        ))
    }

    fn close(&self) {
        if self.device.lock().take().is_some() {
            debug!(path = %self.path, "Closed HID interface");
        }
    }

    fn is_closed(&self) -> bool {
        self.device.lock().is_none()
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        debug!(path = %self.path, "NativeHandle dropped");
    }
}
