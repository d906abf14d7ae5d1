//! Device manager
//!
//! One explicitly constructed context per process run. Hotplug callbacks
//! hold a weak reference to it, so they become no-ops once it is gone.
//!
//! - Arrivals are queued and handled in order on a dedicated thread
//! - Removals are handled synchronously on the notifier thread
//! - Poll loops run on the tokio runtime the manager was given

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use futures::future::join_all;
use hidtray_transport::vendors::WATCHED_VENDOR_IDS;
use hidtray_transport::{
    BoxedBackend, HotplugCallback, HotplugEvent, HotplugFilter, HotplugKind,
    HotplugRegistration, InterfaceInfo, TransportError,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SharedSettings;
use crate::events::{BatteryReading, DeviceEvent, EventPublisher};
use crate::hidpp::HidppTiming;
use crate::identity::{IdentityResolver, ProtocolFamily};
use crate::queue::HotplugQueue;
use crate::registry::{Arrival, DeviceRegistry, LogicalDevice, Removed};

/// Everything a poll loop needs besides its device
pub struct PollContext {
    pub publisher: Arc<EventPublisher>,
    pub settings: SharedSettings,
    pub hidpp_timing: HidppTiming,
}

impl PollContext {
    pub fn new(publisher: Arc<EventPublisher>, settings: SharedSettings) -> Self {
        Self {
            publisher,
            settings,
            hidpp_timing: HidppTiming::default(),
        }
    }

    pub fn with_hidpp_timing(mut self, timing: HidppTiming) -> Self {
        self.hidpp_timing = timing;
        self
    }
}

pub struct DeviceManager {
    backend: BoxedBackend,
    resolver: IdentityResolver,
    registry: DeviceRegistry,
    queue: Arc<HotplugQueue<InterfaceInfo>>,
    ctx: Arc<PollContext>,
    runtime: Handle,
    shutdown: CancellationToken,
    registrations: Mutex<Vec<HotplugRegistration>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceManager {
    /// Build the manager; nothing is watched until [`Self::start`]
    ///
    /// Cancelling `shutdown` stops the arrival consumer and every poll loop.
    pub fn new(
        backend: BoxedBackend,
        ctx: PollContext,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver: IdentityResolver::new(Arc::clone(&backend)),
            backend,
            registry: DeviceRegistry::new(shutdown.clone()),
            queue: Arc::new(HotplugQueue::new()),
            ctx: Arc::new(ctx),
            runtime,
            shutdown,
            registrations: Mutex::new(Vec::new()),
            consumer: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &Arc<PollContext> {
        &self.ctx
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.ctx.publisher
    }

    /// Live logical devices
    pub fn devices(&self) -> Vec<LogicalDevice> {
        self.registry.snapshot()
    }

    /// Start the arrival consumer and register for hotplug events
    ///
    /// Interfaces already attached are reported as arrivals.
    pub fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        if !self.ctx.settings.read().native.enabled {
            info!("Native HID discovery disabled");
            return Ok(());
        }
        if self.consumer.lock().is_some() {
            return Ok(());
        }
        self.spawn_consumer()?;

        let mut registrations = Vec::new();
        for &vendor_id in WATCHED_VENDOR_IDS {
            // Removals first so nothing that arrives can leave unseen
            for kind in [HotplugKind::Left, HotplugKind::Arrived] {
                let registration = self.backend.register_hotplug(
                    HotplugFilter::vendor(vendor_id),
                    kind,
                    kind == HotplugKind::Arrived,
                    self.hotplug_callback(),
                )?;
                registrations.push(registration);
            }
        }
        self.registrations.lock().extend(registrations);
        info!("Watching {} vendors for HID devices", WATCHED_VENDOR_IDS.len());
        Ok(())
    }

    fn hotplug_callback(self: &Arc<Self>) -> HotplugCallback {
        let manager: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event: HotplugEvent| {
            if let Some(manager) = manager.upgrade() {
                manager.on_hotplug(event);
            }
        })
    }

    fn spawn_consumer(self: &Arc<Self>) -> Result<(), TransportError> {
        let queue = Arc::clone(&self.queue);
        let manager = Arc::downgrade(self);
        let thread = std::thread::Builder::new()
            .name("hid-arrivals".into())
            .spawn(move || {
                while let Some(arrival) = queue.pop() {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    manager.init_device(&arrival);
                }
                debug!("Arrival consumer stopped");
            })
            .map_err(|e| TransportError::Internal(format!("spawn arrival consumer: {e}")))?;
        *self.consumer.lock() = Some(thread);

        let queue = Arc::clone(&self.queue);
        let token = self.shutdown.clone();
        self.runtime.spawn(async move {
            token.cancelled().await;
            queue.cancel();
        });
        Ok(())
    }

    fn on_hotplug(&self, event: HotplugEvent) {
        match event.kind {
            HotplugKind::Arrived => {
                if !self.queue.push(event.interface) {
                    debug!("Arrival after shutdown dropped");
                }
            }
            HotplugKind::Left => self.on_interface_left(&event.interface.path),
        }
    }

    /// Resolve an arrival, register it and start its handler
    pub fn init_device(&self, arrival: &InterfaceInfo) {
        self.registry.begin_arrival(&arrival.path);
        let resolved = match self.resolver.resolve(arrival) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                self.registry.abandon_arrival(&arrival.path);
                return;
            }
            Err(e) => {
                self.registry.abandon_arrival(&arrival.path);
                warn!(path = %arrival.path, "Cannot open device: {}", e);
                return;
            }
        };

        let family = resolved.family;
        let handle = Arc::clone(&resolved.handle);
        let outcome = match self.registry.complete_arrival(
            &arrival.path,
            resolved.container_id,
            family,
            &resolved.interface,
            resolved.handle,
        ) {
            Arrival::Registered(outcome) => outcome,
            Arrival::Departed(handle) => {
                debug!(path = %arrival.path, "Arrival withdrawn");
                handle.close();
                return;
            }
        };
        if let Some(rejected) = outcome.rejected {
            rejected.close();
        }
        if outcome.created {
            info!(
                path = %arrival.path,
                container = %resolved.container_id,
                "New {:?} device",
                family
            );
        }
        if !outcome.attached {
            return;
        }

        let device = outcome.device;
        match family {
            ProtocolFamily::ShortReport | ProtocolFamily::LongReport => {
                if let Some(session) = device.hidpp {
                    session.attach(family, handle);
                    if session.begin() {
                        self.runtime.spawn(session.run(Arc::clone(&self.ctx)));
                    }
                }
            }
            ProtocolFamily::VendorBinary => {
                if let Some(vendor) = device.vendor {
                    self.runtime.spawn(vendor.run(Arc::clone(&self.ctx)));
                }
            }
            ProtocolFamily::Unclassified => {}
        }
    }

    /// Detach an interface; disposes the device when it was the last one
    pub fn on_interface_left(&self, path: &str) {
        match self.registry.remove(path) {
            Removed::Unknown => debug!(path, "Removal of unknown interface ignored"),
            Removed::Detached(handles) => {
                debug!(path, "Interface detached");
                for handle in handles {
                    handle.close();
                }
            }
            Removed::Last(device) => {
                info!(path, container = %device.container_id, "Device removed");
                self.dispose(device);
            }
        }
    }

    /// Runs with the registry lock released
    fn dispose(&self, device: LogicalDevice) {
        for key in device.gate.close() {
            self.ctx
                .publisher
                .publish(DeviceEvent::update(key, BatteryReading::unknown()));
        }
        device.close_handles();
    }

    /// Read every device's battery now, returning once all reads finish
    pub async fn force_battery_updates(&self) {
        let devices = self.registry.snapshot();
        if devices.is_empty() {
            debug!("No devices to refresh");
            return;
        }
        info!("Refreshing {} devices", devices.len());
        join_all(devices.iter().map(|d| d.refresh(&self.ctx))).await;
    }

    /// Stop watching, stop every poll loop and close every handle
    ///
    /// Blocks while notifier threads exit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.queue.cancel();

        let registrations = std::mem::take(&mut *self.registrations.lock());
        for registration in registrations {
            registration.shutdown();
        }
        if let Some(consumer) = self.consumer.lock().take() {
            if consumer.join().is_err() {
                warn!("Arrival consumer panicked");
            }
        }
        for device in self.registry.drain() {
            device.gate.close();
            device.close_handles();
        }
        debug!("Device manager stopped");
    }
}
