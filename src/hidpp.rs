//! HID++ session for one Logitech receiver or direct device
//!
//! Only what battery reporting needs: ping each device index, resolve
//! the name and battery features through IRoot, then poll the battery.
//! Requests go out on the long collection when one is attached; replies
//! are accepted from either collection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hidtray_transport::protocol::hidpp::{
    self, feature, function, match_reply, parse_battery_status, parse_unified_battery, Reply,
    DEVICE_INDEX_DIRECT, LONG_LEN, PING_DATA, RECEIVER_SLOTS,
};
use hidtray_transport::{ContainerId, SharedHandle, TransportError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::events::{BatteryReading, DeviceEvent, DeviceType, PublishGate};
use crate::identity::ProtocolFamily;
use crate::manager::PollContext;

const FALLBACK_NAME: &str = "Logitech Device";

/// Per-read wait while alternating between two collections
const READ_SLICE: Duration = Duration::from_millis(20);

/// Upper bound on stale reports discarded before a request
const MAX_DRAIN: usize = 32;

/// Session timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidppTiming {
    /// Wait for sibling collections to attach before the first probe
    pub settle: Duration,
    /// Deadline for one request/response exchange
    pub transaction_timeout: Duration,
}

impl Default for HidppTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            transaction_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatteryFeature {
    Unified(u8),
    Status(u8),
}

/// A device found behind the session's interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDevice {
    pub index: u8,
    pub key: String,
    pub name: String,
    pub device_type: DeviceType,
    battery: Option<BatteryFeature>,
}

impl SubDevice {
    pub fn has_battery(&self) -> bool {
        self.battery.is_some()
    }
}

#[derive(Default)]
struct Handles {
    short: Option<SharedHandle>,
    long: Option<SharedHandle>,
}

#[derive(Default)]
struct Discovery {
    devices: Vec<SubDevice>,
    /// Indices never probed again (receiver itself, disabled devices)
    skipped: HashSet<u8>,
}

pub struct HidppSession {
    container_id: ContainerId,
    gate: Arc<PublishGate>,
    handles: Mutex<Handles>,
    io: Mutex<()>,
    discovery: Mutex<Discovery>,
    started: AtomicBool,
}

impl HidppSession {
    pub fn new(container_id: ContainerId, gate: Arc<PublishGate>) -> Self {
        Self {
            container_id,
            gate,
            handles: Mutex::new(Handles::default()),
            io: Mutex::new(()),
            discovery: Mutex::new(Discovery::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Give the session a handle for one of its collections
    pub fn attach(&self, family: ProtocolFamily, handle: SharedHandle) {
        let mut handles = self.handles.lock();
        match family {
            ProtocolFamily::ShortReport => handles.short = Some(handle),
            ProtocolFamily::LongReport => handles.long = Some(handle),
            _ => {}
        }
    }

    /// True exactly once, for the caller that should spawn [`Self::run`]
    pub fn begin(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn sub_devices(&self) -> Vec<SubDevice> {
        self.discovery.lock().devices.clone()
    }

    /// Keys of sub-devices that were announced with an Init event
    pub fn announced_keys(&self) -> Vec<String> {
        self.discovery
            .lock()
            .devices
            .iter()
            .map(|d| d.key.clone())
            .collect()
    }

    fn sub_key(&self, index: u8) -> String {
        if index == DEVICE_INDEX_DIRECT {
            self.container_id.key()
        } else {
            format!("{}/{}", self.container_id.key(), index)
        }
    }

    /// Writer plus every live reader, long collection first
    fn io_handles(&self) -> Result<(SharedHandle, bool, Vec<SharedHandle>), TransportError> {
        let handles = self.handles.lock();
        let live = |h: &Option<SharedHandle>| h.as_ref().filter(|h| !h.is_closed()).cloned();
        let long = live(&handles.long);
        let short = live(&handles.short);

        let (writer, is_long) = match (&long, &short) {
            (Some(l), _) => (Arc::clone(l), true),
            (None, Some(s)) => (Arc::clone(s), false),
            (None, None) => return Err(TransportError::Disconnected),
        };
        let readers = long.into_iter().chain(short).collect();
        Ok((writer, is_long, readers))
    }

    /// One request/response exchange (blocking)
    fn transaction(
        &self,
        device_index: u8,
        feature_index: u8,
        function: u8,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let _io = self.io.lock();
        let (writer, is_long, readers) = self.io_handles()?;
        let mut buf = [0u8; LONG_LEN];

        for reader in &readers {
            for _ in 0..MAX_DRAIN {
                if reader.read_timeout(&mut buf, 0)? == 0 {
                    break;
                }
            }
        }

        let request = if is_long {
            hidpp::long_request(device_index, feature_index, function, params).to_vec()
        } else {
            hidpp::short_request(device_index, feature_index, function, params).to_vec()
        };
        writer.write(&request)?;

        let deadline = Instant::now() + timeout;
        loop {
            for reader in &readers {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(TransportError::Timeout);
                }
                let wait = if readers.len() > 1 {
                    remaining.min(READ_SLICE)
                } else {
                    remaining
                };
                let wait_ms = i32::try_from(wait.as_millis()).unwrap_or(i32::MAX).max(1);
                let n = reader.read_timeout(&mut buf, wait_ms)?;
                if n == 0 {
                    continue;
                }
                match match_reply(&buf[..n], device_index, feature_index, function) {
                    Reply::Data(payload) => return Ok(payload.to_vec()),
                    Reply::Error(code) => return Err(TransportError::Protocol(code)),
                    Reply::Unrelated => {}
                }
            }
        }
    }

    /// IRoot ping; returns the protocol (major, minor)
    fn ping(&self, index: u8, timeout: Duration) -> Result<(u8, u8), TransportError> {
        let payload = self.transaction(
            index,
            0,
            function::ROOT_PING,
            &[0, 0, PING_DATA],
            timeout,
        )?;
        match payload.as_slice() {
            [major, minor, echo, ..] if *echo == PING_DATA => Ok((*major, *minor)),
            _ => Err(TransportError::Internal("malformed ping reply".into())),
        }
    }

    /// IRoot getFeature; `None` when the device lacks the feature
    fn feature_index(
        &self,
        index: u8,
        feature_id: u16,
        timeout: Duration,
    ) -> Result<Option<u8>, TransportError> {
        let payload = self.transaction(
            index,
            0,
            function::ROOT_GET_FEATURE,
            &feature_id.to_be_bytes(),
            timeout,
        )?;
        Ok(payload.first().copied().filter(|&fi| fi != 0))
    }

    fn read_name(
        &self,
        index: u8,
        feature_index: u8,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let count = self.transaction(index, feature_index, function::NAME_GET_COUNT, &[], timeout)?;
        let length = usize::from(count.first().copied().unwrap_or(0));

        let mut name = Vec::with_capacity(length);
        while name.len() < length {
            let offset = u8::try_from(name.len()).unwrap_or(u8::MAX);
            let chunk =
                self.transaction(index, feature_index, function::NAME_GET_NAME, &[offset], timeout)?;
            let take = chunk.len().min(length - name.len());
            if take == 0 {
                break;
            }
            name.extend_from_slice(&chunk[..take]);
        }
        let name = String::from_utf8_lossy(&name);
        Ok(name.trim_end_matches('\0').trim().to_string())
    }

    /// Identify the device at `index` (blocking)
    ///
    /// `Ok(None)` for HID++ 1.0 devices, which have no feature table.
    fn probe(&self, index: u8, timeout: Duration) -> Result<Option<SubDevice>, TransportError> {
        let (major, minor) = self.ping(index, timeout)?;
        if major < 2 {
            debug!(container = %self.container_id, index, "HID++ {}.{} device, skipping", major, minor);
            return Ok(None);
        }

        let mut name = String::new();
        let mut device_type = DeviceType::Other;
        if let Some(fi) = self.feature_index(index, feature::DEVICE_NAME, timeout)? {
            name = self.read_name(index, fi, timeout).unwrap_or_default();
            if let Ok(kind) = self.transaction(index, fi, function::NAME_GET_TYPE, &[], timeout) {
                device_type = DeviceType::from_hidpp_type(kind.first().copied().unwrap_or(0xFF));
            }
        }
        if name.is_empty() {
            name = FALLBACK_NAME.to_string();
        }

        let battery = match self.feature_index(index, feature::UNIFIED_BATTERY, timeout)? {
            Some(fi) => Some(BatteryFeature::Unified(fi)),
            None => self
                .feature_index(index, feature::BATTERY_STATUS, timeout)?
                .map(BatteryFeature::Status),
        };

        Ok(Some(SubDevice {
            index,
            key: self.sub_key(index),
            name,
            device_type,
            battery,
        }))
    }

    /// Probe every index not yet known (blocking)
    fn probe_new(&self, timeout: Duration) -> Vec<SubDevice> {
        let (known, skipped): (HashSet<u8>, HashSet<u8>) = {
            let discovery = self.discovery.lock();
            (
                discovery.devices.iter().map(|d| d.index).collect(),
                discovery.skipped.clone(),
            )
        };

        let mut found = Vec::new();
        if known.contains(&DEVICE_INDEX_DIRECT) {
            return found;
        }
        if !skipped.contains(&DEVICE_INDEX_DIRECT) {
            match self.probe(DEVICE_INDEX_DIRECT, timeout) {
                Ok(Some(device)) => {
                    // Direct device: no receiver slots behind it
                    found.push(device);
                    return found;
                }
                Ok(None) | Err(TransportError::Protocol(_)) => {
                    self.discovery.lock().skipped.insert(DEVICE_INDEX_DIRECT);
                }
                Err(e) => debug!(container = %self.container_id, "Direct ping failed: {}", e),
            }
        }

        for index in RECEIVER_SLOTS {
            if known.contains(&index) || skipped.contains(&index) {
                continue;
            }
            match self.probe(index, timeout) {
                Ok(Some(device)) => found.push(device),
                Ok(None) => {}
                Err(TransportError::Disconnected) => break,
                Err(e) => debug!(container = %self.container_id, index, "Slot empty: {}", e),
            }
        }
        found
    }

    /// Battery reading of one sub-device (blocking)
    fn read_level(&self, device: &SubDevice, timeout: Duration) -> BatteryReading {
        let level = match device.battery {
            Some(BatteryFeature::Unified(fi)) => self
                .transaction(device.index, fi, function::UNIFIED_GET_STATUS, &[], timeout)
                .map(|p| parse_unified_battery(&p)),
            Some(BatteryFeature::Status(fi)) => self
                .transaction(device.index, fi, function::BATTERY_GET_LEVEL, &[], timeout)
                .map(|p| parse_battery_status(&p)),
            None => return BatteryReading::unknown(),
        };
        match level {
            Ok(Some(level)) => BatteryReading::percent(level.percentage, level.state.into()),
            Ok(None) => BatteryReading::unknown(),
            Err(e) => {
                debug!(device = %device.key, "Battery read failed: {}", e);
                BatteryReading::unknown()
            }
        }
    }

    /// Find new sub-devices and announce them; returns how many
    async fn discover(self: &Arc<Self>, ctx: &PollContext) -> usize {
        let this = Arc::clone(self);
        let timeout = ctx.hidpp_timing.transaction_timeout;
        let found = match tokio::task::spawn_blocking(move || this.probe_new(timeout)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(container = %self.container_id, "Discovery task failed: {}", e);
                return 0;
            }
        };

        let mut announced = 0;
        for device in found {
            if ctx
                .settings
                .read()
                .native
                .is_disabled(&device.key, &device.name)
            {
                info!(device = %device.key, "{} is disabled, ignoring", device.name);
                self.discovery.lock().skipped.insert(device.index);
                continue;
            }

            let init = DeviceEvent::init(
                &device.key,
                &device.name,
                device.has_battery(),
                device.device_type,
            );
            let mut discovery = self.discovery.lock();
            if !self.gate.publish(&ctx.publisher, init) {
                break;
            }
            info!(device = %device.key, "Found {} ({})", device.name, device.device_type.as_str());
            discovery.devices.push(device);
            announced += 1;
        }
        announced
    }

    /// Read and publish every battery-capable sub-device once
    pub async fn refresh(self: &Arc<Self>, ctx: &PollContext) {
        let devices: Vec<SubDevice> = self
            .sub_devices()
            .into_iter()
            .filter(SubDevice::has_battery)
            .collect();
        if devices.is_empty() || self.gate.is_closed() {
            return;
        }

        let this = Arc::clone(self);
        let timeout = ctx.hidpp_timing.transaction_timeout;
        let readings = tokio::task::spawn_blocking(move || {
            devices
                .iter()
                .map(|d| (d.key.clone(), this.read_level(d, timeout)))
                .collect::<Vec<_>>()
        })
        .await;

        let readings = match readings {
            Ok(readings) => readings,
            Err(e) => {
                warn!(container = %self.container_id, "Battery task failed: {}", e);
                return;
            }
        };
        for (key, reading) in readings {
            if !self.gate.publish(&ctx.publisher, DeviceEvent::update(key, reading)) {
                break;
            }
        }
    }

    /// Settle, discover, then poll until the device goes away
    pub async fn run(self: Arc<Self>, ctx: Arc<PollContext>) {
        let token = self.gate.token().clone();
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(ctx.hidpp_timing.settle) => {}
        }

        loop {
            self.discover(&ctx).await;
            if token.is_cancelled() {
                break;
            }
            self.refresh(&ctx).await;

            let wait = {
                let settings = ctx.settings.read();
                if self.discovery.lock().devices.is_empty() {
                    debug!(container = %self.container_id, "Nothing found, retrying later");
                    settings.native.retry_interval()
                } else {
                    settings.native.poll_interval()
                }
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        debug!(container = %self.container_id, "HID++ session stopped");
    }
}
