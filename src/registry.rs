//! Device registry
//!
//! The only mutable state shared between hotplug threads, the arrival
//! consumer and the poll loops. Every mutation goes through one lock.
//! Records leave the map before anything closes their handles, and the
//! caller does the closing after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::future::join;
use hidtray_transport::{ContainerId, InterfaceInfo, SharedHandle};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::PublishGate;
use crate::hidpp::HidppSession;
use crate::hyperx::VendorBinaryDevice;
use crate::identity::ProtocolFamily;
use crate::manager::PollContext;

/// Handle slot of a logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Short,
    Long,
    Vendor,
}

impl Slot {
    fn for_family(family: ProtocolFamily) -> Option<Self> {
        match family {
            ProtocolFamily::ShortReport => Some(Self::Short),
            ProtocolFamily::LongReport => Some(Self::Long),
            ProtocolFamily::VendorBinary => Some(Self::Vendor),
            ProtocolFamily::Unclassified => None,
        }
    }
}

/// One physical peripheral, however many interfaces it exposes
#[derive(Clone)]
pub struct LogicalDevice {
    pub container_id: ContainerId,
    /// Family of the interface that created the record
    pub family: ProtocolFamily,
    /// Attached interface paths and the slots they filled
    pub interfaces: BTreeMap<String, Vec<Slot>>,
    pub short_handle: Option<SharedHandle>,
    pub long_handle: Option<SharedHandle>,
    pub vendor: Option<Arc<VendorBinaryDevice>>,
    pub hidpp: Option<Arc<HidppSession>>,
    pub gate: Arc<PublishGate>,
    pub disposed: bool,
}

impl fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("container_id", &self.container_id)
            .field("family", &self.family)
            .field("interfaces", &self.interfaces)
            .field("short", &self.short_handle.is_some())
            .field("long", &self.long_handle.is_some())
            .field("vendor", &self.vendor.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl LogicalDevice {
    fn new(container_id: ContainerId, family: ProtocolFamily, gate: Arc<PublishGate>) -> Self {
        let hidpp = family
            .is_hidpp()
            .then(|| Arc::new(HidppSession::new(container_id, Arc::clone(&gate))));
        Self {
            container_id,
            family,
            interfaces: BTreeMap::new(),
            short_handle: None,
            long_handle: None,
            vendor: None,
            hidpp,
            gate,
            disposed: false,
        }
    }

    /// Stable key of the physical unit
    pub fn key(&self) -> String {
        self.container_id.key()
    }

    fn slot_filled(&self, slot: Slot) -> bool {
        match slot {
            Slot::Short => self.short_handle.is_some(),
            Slot::Long => self.long_handle.is_some(),
            Slot::Vendor => self.vendor.is_some(),
        }
    }

    fn take_slot(&mut self, slot: Slot) -> Option<SharedHandle> {
        match slot {
            Slot::Short => self.short_handle.take(),
            Slot::Long => self.long_handle.take(),
            Slot::Vendor => self.vendor.take().map(|v| v.handle()),
        }
    }

    /// Every open handle held by the record
    pub fn handles(&self) -> Vec<SharedHandle> {
        self.short_handle
            .iter()
            .chain(self.long_handle.iter())
            .cloned()
            .chain(self.vendor.iter().map(|v| v.handle()))
            .collect()
    }

    pub fn close_handles(&self) {
        for handle in self.handles() {
            handle.close();
        }
    }

    /// Out-of-cycle battery read of every sub-device
    pub async fn refresh(&self, ctx: &PollContext) {
        let hidpp = async {
            if let Some(session) = &self.hidpp {
                session.refresh(ctx).await;
            }
        };
        let vendor = async {
            if let Some(vendor) = &self.vendor {
                vendor.refresh(ctx).await;
            }
        };
        join(hidpp, vendor).await;
    }
}

/// Result of attaching an interface
pub struct Upsert {
    /// Record after the attach
    pub device: LogicalDevice,
    /// The record did not exist before
    pub created: bool,
    /// The handle went into an empty slot
    pub attached: bool,
    /// Handle refused because its slot was already filled; close it
    pub rejected: Option<SharedHandle>,
}

/// Result of detaching an interface path
pub enum Removed {
    /// Path was never registered (or already removed)
    Unknown,
    /// Other interfaces remain; these handles belonged to the path
    Detached(Vec<SharedHandle>),
    /// Last interface gone; the record left the registry
    Last(LogicalDevice),
}

/// Result of completing a reserved arrival
pub enum Arrival {
    Registered(Upsert),
    /// The path left while it was being opened; close the handle
    Departed(SharedHandle),
}

impl Removed {
    pub fn into_device(self) -> Option<LogicalDevice> {
        match self {
            Self::Last(device) => Some(device),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Inner {
    devices: HashMap<ContainerId, LogicalDevice>,
    paths: HashMap<String, ContainerId>,
    /// Arrivals being opened; `true` once their path has left
    reserved: HashMap<String, bool>,
}

/// Container → logical device map plus path → container reverse map
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
    master: CancellationToken,
}

impl DeviceRegistry {
    /// Device tokens are children of `master`
    pub fn new(master: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            master,
        }
    }

    /// Find or create the record for `container_id` and attach a handle
    pub fn upsert(
        &self,
        container_id: ContainerId,
        family: ProtocolFamily,
        interface: &InterfaceInfo,
        handle: SharedHandle,
    ) -> Upsert {
        let mut inner = self.inner.lock();
        self.attach(&mut inner, container_id, family, None, interface, handle)
    }

    /// Reserve an arrival path before its interface is opened
    ///
    /// A removal of the path before [`Self::complete_arrival`] marks the
    /// reservation departed instead of being lost.
    pub fn begin_arrival(&self, path: &str) {
        self.inner.lock().reserved.insert(path.to_string(), false);
    }

    /// Drop a reservation whose arrival produced no handle
    pub fn abandon_arrival(&self, path: &str) {
        self.inner.lock().reserved.remove(path);
    }

    /// Attach the handle opened for a reserved arrival
    ///
    /// `interface` is the one actually opened, which for vendor devices
    /// may be a sibling of `arrival_path`. Both paths map to the record.
    pub fn complete_arrival(
        &self,
        arrival_path: &str,
        container_id: ContainerId,
        family: ProtocolFamily,
        interface: &InterfaceInfo,
        handle: SharedHandle,
    ) -> Arrival {
        let mut inner = self.inner.lock();
        if inner.reserved.remove(arrival_path) == Some(true) {
            debug!(path = arrival_path, "Interface left while opening");
            return Arrival::Departed(handle);
        }
        Arrival::Registered(self.attach(
            &mut inner,
            container_id,
            family,
            Some(arrival_path),
            interface,
            handle,
        ))
    }

    fn attach(
        &self,
        inner: &mut Inner,
        container_id: ContainerId,
        family: ProtocolFamily,
        arrival_path: Option<&str>,
        interface: &InterfaceInfo,
        handle: SharedHandle,
    ) -> Upsert {
        let Inner { devices, paths, .. } = inner;

        let mut created = false;
        let device = devices.entry(container_id).or_insert_with(|| {
            created = true;
            let gate = Arc::new(PublishGate::new(self.master.child_token()));
            LogicalDevice::new(container_id, family, gate)
        });
        if let Some(arrival) = arrival_path.filter(|p| *p != interface.path) {
            paths.insert(arrival.to_string(), container_id);
            device.interfaces.entry(arrival.to_string()).or_default();
        }
        paths.insert(interface.path.clone(), container_id);

        let free = Slot::for_family(family).filter(|s| !device.slot_filled(*s));
        let slots = device.interfaces.entry(interface.path.clone()).or_default();
        let Some(slot) = free else {
            debug!(path = %interface.path, container = %container_id, "Slot already filled");
            return Upsert {
                device: device.clone(),
                created,
                attached: false,
                rejected: Some(handle),
            };
        };

        slots.push(slot);
        match slot {
            Slot::Short => device.short_handle = Some(handle),
            Slot::Long => device.long_handle = Some(handle),
            Slot::Vendor => {
                device.vendor = Some(Arc::new(VendorBinaryDevice::new(
                    container_id,
                    handle,
                    interface,
                    Arc::clone(&device.gate),
                )));
            }
        }
        if family.is_hidpp() && device.hidpp.is_none() {
            device.hidpp = Some(Arc::new(HidppSession::new(
                container_id,
                Arc::clone(&device.gate),
            )));
        }

        Upsert {
            device: device.clone(),
            created,
            attached: true,
            rejected: None,
        }
    }

    /// Detach an interface path
    pub fn remove(&self, path: &str) -> Removed {
        let mut inner = self.inner.lock();
        let Inner {
            devices,
            paths,
            reserved,
        } = &mut *inner;

        if let Some(departed) = reserved.get_mut(path) {
            *departed = true;
        }
        let Some(container_id) = paths.remove(path) else {
            return Removed::Unknown;
        };
        let Some(device) = devices.get_mut(&container_id) else {
            return Removed::Unknown;
        };

        let slots = device.interfaces.remove(path).unwrap_or_default();
        if !device.interfaces.is_empty() {
            let handles = slots
                .into_iter()
                .filter_map(|slot| device.take_slot(slot))
                .collect();
            return Removed::Detached(handles);
        }

        match devices.remove(&container_id) {
            Some(mut device) => {
                device.disposed = true;
                Removed::Last(device)
            }
            None => Removed::Unknown,
        }
    }

    /// Point-in-time copy of all live records
    pub fn snapshot(&self) -> Vec<LogicalDevice> {
        self.inner
            .lock()
            .devices
            .values()
            .filter(|d| !d.disposed)
            .cloned()
            .collect()
    }

    /// Remove every record, for shutdown
    pub fn drain(&self) -> Vec<LogicalDevice> {
        let mut inner = self.inner.lock();
        inner.paths.clear();
        inner.reserved.clear();
        inner
            .devices
            .drain()
            .map(|(_, mut device)| {
                device.disposed = true;
                device
            })
            .collect()
    }

    pub fn get(&self, container_id: &ContainerId) -> Option<LogicalDevice> {
        self.inner.lock().devices.get(container_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
