//! HyperX headset battery polling
//!
//! Headsets answer a fixed 52-byte command with a 20-byte report that
//! carries the battery percentage at a product-specific offset. The
//! command is picked once from the manufacturer/product strings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hidtray_transport::protocol::hyperx::{
    battery_from_response, select_command, VendorCommand, PRIME_LEN, PRIME_REPORT_ID, READ_LEN,
    READ_TIMEOUT_MS,
};
use hidtray_transport::{ContainerId, InterfaceInfo, SharedHandle, TransportError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::events::{BatteryReading, DeviceEvent, DeviceType, PowerSupplyStatus, PublishGate};
use crate::manager::PollContext;

/// Delay after the first reading, before switching to the poll period
pub const FIRST_POLL_DELAY: Duration = Duration::from_secs(2);

const FALLBACK_NAME: &str = "HyperX Wireless";

/// A polled headset
pub struct VendorBinaryDevice {
    container_id: ContainerId,
    handle: SharedHandle,
    manufacturer: String,
    product: String,
    command: VendorCommand,
    io: Mutex<()>,
    gate: Arc<PublishGate>,
    announced: AtomicBool,
}

impl VendorBinaryDevice {
    pub fn new(
        container_id: ContainerId,
        handle: SharedHandle,
        interface: &InterfaceInfo,
        gate: Arc<PublishGate>,
    ) -> Self {
        let command = select_command(&interface.manufacturer, &interface.product);
        Self {
            container_id,
            handle,
            manufacturer: interface.manufacturer.clone(),
            product: interface.product.clone(),
            command,
            io: Mutex::new(()),
            gate,
            announced: AtomicBool::new(false),
        }
    }

    pub fn device_id(&self) -> String {
        self.container_id.key()
    }

    pub fn display_name(&self) -> String {
        let product = self.product.trim();
        if product.is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            product.to_string()
        }
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn command(&self) -> &VendorCommand {
        &self.command
    }

    pub fn handle(&self) -> SharedHandle {
        Arc::clone(&self.handle)
    }

    /// Whether the Init event went out
    pub fn is_announced(&self) -> bool {
        self.announced.load(Ordering::SeqCst)
    }

    /// One blocking query: optional priming read, write, read
    ///
    /// `Ok(None)` means the device answered without a usable value.
    pub fn query_battery(&self) -> Result<Option<u8>, TransportError> {
        let _io = self.io.lock();

        if self.command.needs_priming {
            let mut prime = [0u8; PRIME_LEN];
            prime[0] = PRIME_REPORT_ID;
            if let Err(e) = self.handle.get_input_report(&mut prime) {
                debug!(path = self.handle.path(), "Priming read failed: {}", e);
            }
        }

        self.handle.write(&self.command.write)?;
        let mut response = [0u8; READ_LEN];
        let read = self.handle.read_timeout(&mut response, READ_TIMEOUT_MS)?;
        Ok(battery_from_response(
            &response,
            read,
            self.command.battery_offset,
        ))
    }

    /// Query off the async runtime; every failure degrades to unknown
    pub async fn read_battery(self: &Arc<Self>) -> BatteryReading {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.query_battery()).await {
            Ok(Ok(Some(level))) => BatteryReading::percent(level, PowerSupplyStatus::Unknown),
            Ok(Ok(None)) => {
                debug!(device = %self.container_id, "No battery value in response");
                BatteryReading::unknown()
            }
            Ok(Err(e)) => {
                debug!(device = %self.container_id, "Battery query failed: {}", e);
                BatteryReading::unknown()
            }
            Err(e) => {
                warn!(device = %self.container_id, "Battery query task failed: {}", e);
                BatteryReading::unknown()
            }
        }
    }

    /// Read and publish once, outside the regular schedule
    pub async fn refresh(self: &Arc<Self>, ctx: &PollContext) -> bool {
        if !self.is_announced() || self.gate.is_closed() {
            return false;
        }
        let reading = self.read_battery().await;
        self.gate
            .publish(&ctx.publisher, DeviceEvent::update(self.device_id(), reading))
    }

    /// Poll loop: Init, then a reading every cycle until cancelled
    pub async fn run(self: Arc<Self>, ctx: Arc<PollContext>) {
        let device_id = self.device_id();
        let name = self.display_name();
        if ctx.settings.read().native.is_disabled(&device_id, &name) {
            info!(device = %device_id, "{} is disabled, not polling", name);
            return;
        }

        info!(
            device = %device_id,
            variant = self.command.variant,
            "Polling {}",
            name
        );
        let init = DeviceEvent::init(&device_id, &name, true, DeviceType::Headset);
        if !self.gate.publish(&ctx.publisher, init) {
            return;
        }
        self.announced.store(true, Ordering::SeqCst);

        let token = self.gate.token().clone();
        let mut first = true;
        loop {
            let reading = tokio::select! {
                _ = token.cancelled() => break,
                reading = self.read_battery() => reading,
            };
            if !self
                .gate
                .publish(&ctx.publisher, DeviceEvent::update(&device_id, reading))
            {
                break;
            }

            let delay = if first {
                FIRST_POLL_DELAY
            } else {
                ctx.settings.read().native.poll_interval()
            };
            first = false;
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(device = %device_id, "Headset poll loop stopped");
    }
}
