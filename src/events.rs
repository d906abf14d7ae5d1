//! Normalized device events and their fan-out publisher

use chrono::{DateTime, Local};
use hidtray_transport::protocol::hidpp::ChargeState;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Power supply status values (matching kernel power_supply.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSupplyStatus {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl PowerSupplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Charging => "Charging",
            Self::Discharging => "Discharging",
            Self::NotCharging => "Not charging",
            Self::Full => "Full",
        }
    }
}

impl From<ChargeState> for PowerSupplyStatus {
    fn from(state: ChargeState) -> Self {
        match state {
            ChargeState::Discharging => Self::Discharging,
            ChargeState::Charging => Self::Charging,
            ChargeState::Full => Self::Full,
            ChargeState::NotCharging => Self::NotCharging,
            ChargeState::Unknown => Self::Unknown,
        }
    }
}

/// Coarse device category shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Keyboard,
    Mouse,
    Headset,
    Other,
}

impl DeviceType {
    /// Map a HID++ DEVICE_NAME getType value
    pub fn from_hidpp_type(value: u8) -> Self {
        match value {
            0 | 2 => Self::Keyboard,
            3..=5 => Self::Mouse,
            8 => Self::Headset,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyboard => "Keyboard",
            Self::Mouse => "Mouse",
            Self::Headset => "Headset",
            Self::Other => "Other",
        }
    }
}

/// One battery measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryReading {
    /// 0-100, or -1 when unknown / device off
    #[serde(rename = "battery_percentage")]
    pub percentage: f64,
    #[serde(rename = "power_supply_status")]
    pub status: PowerSupplyStatus,
    /// Volts, 0 when not reported
    #[serde(rename = "battery_voltage")]
    pub voltage: f64,
    /// Estimated remaining runtime, 0 when not reported
    #[serde(rename = "battery_mileage")]
    pub mileage: f64,
    pub timestamp: DateTime<Local>,
}

impl BatteryReading {
    /// Reading for an unreachable or switched-off device
    pub fn unknown() -> Self {
        Self {
            percentage: -1.0,
            status: PowerSupplyStatus::Unknown,
            voltage: 0.0,
            mileage: 0.0,
            timestamp: Local::now(),
        }
    }

    pub fn percent(percentage: u8, status: PowerSupplyStatus) -> Self {
        Self {
            percentage: f64::from(percentage.min(100)),
            status,
            ..Self::unknown()
        }
    }

    /// Percentage if known, `None` for -1
    pub fn level(&self) -> Option<f64> {
        (self.percentage >= 0.0).then_some(self.percentage)
    }
}

/// Device became visible
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitMessage {
    pub device_id: String,
    pub device_name: String,
    pub has_battery: bool,
    pub device_type: DeviceType,
}

/// New battery telemetry for a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateMessage {
    pub device_id: String,
    #[serde(flatten)]
    pub reading: BatteryReading,
}

/// Normalized lifecycle / telemetry event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    Init(InitMessage),
    Update(UpdateMessage),
}

impl DeviceEvent {
    pub fn init(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        has_battery: bool,
        device_type: DeviceType,
    ) -> Self {
        Self::Init(InitMessage {
            device_id: device_id.into(),
            device_name: device_name.into(),
            has_battery,
            device_type,
        })
    }

    pub fn update(device_id: impl Into<String>, reading: BatteryReading) -> Self {
        Self::Update(UpdateMessage {
            device_id: device_id.into(),
            reading,
        })
    }

    /// Device key the event refers to
    pub fn device_id(&self) -> &str {
        match self {
            Self::Init(m) => &m.device_id,
            Self::Update(m) => &m.device_id,
        }
    }
}

/// Fan-out point for device events
///
/// Every subscriber gets its own unbounded channel, so publishing never
/// blocks and never drops events for a live subscriber.
#[derive(Default)]
pub struct EventPublisher {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DeviceEvent>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all events published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: DeviceEvent) {
        debug!(device = event.device_id(), "Publishing {:?}", event);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Per-device publish gate
///
/// Poll loops publish through the gate; the removal path closes it.
/// Closing waits for an in-flight publish, so once [`PublishGate::close`]
/// returns no poll loop can emit another event for the device. The gate
/// also remembers every key it let an Init through for.
pub struct PublishGate {
    token: CancellationToken,
    announced: Mutex<Vec<String>>,
}

impl PublishGate {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            announced: Mutex::new(Vec::new()),
        }
    }

    /// Cancellation token tied to the device's lifetime
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Publish unless the device has been closed; returns whether it was sent
    pub fn publish(&self, publisher: &EventPublisher, event: DeviceEvent) -> bool {
        let mut announced = self.announced.lock();
        if self.token.is_cancelled() {
            return false;
        }
        if let DeviceEvent::Init(init) = &event {
            if !announced.contains(&init.device_id) {
                announced.push(init.device_id.clone());
            }
        }
        publisher.publish(event);
        true
    }

    /// Keys that had an Init published so far
    pub fn announced_keys(&self) -> Vec<String> {
        self.announced.lock().clone()
    }

    /// Close the gate and cancel everything tied to the device
    ///
    /// Returns the announced keys; nothing can be added to them afterwards.
    pub fn close(&self) -> Vec<String> {
        let announced = self.announced.lock();
        self.token.cancel();
        announced.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_fans_out_in_order() {
        let publisher = EventPublisher::new();
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();

        publisher.publish(DeviceEvent::init("dev", "Headset", true, DeviceType::Headset));
        publisher.publish(DeviceEvent::update("dev", BatteryReading::unknown()));

        for rx in [&mut a, &mut b] {
            assert!(matches!(rx.try_recv().unwrap(), DeviceEvent::Init(_)));
            assert!(matches!(rx.try_recv().unwrap(), DeviceEvent::Update(_)));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let publisher = EventPublisher::new();
        let rx = publisher.subscribe();
        let _keep = publisher.subscribe();
        drop(rx);
        publisher.publish(DeviceEvent::update("dev", BatteryReading::unknown()));
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn test_gate_blocks_after_close() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();
        let gate = PublishGate::new(CancellationToken::new());

        assert!(gate.publish(&publisher, DeviceEvent::update("dev", BatteryReading::unknown())));
        gate.close();
        assert!(gate.is_closed());
        assert!(!gate.publish(&publisher, DeviceEvent::update("dev", BatteryReading::unknown())));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gate_remembers_announced_keys() {
        let publisher = EventPublisher::new();
        let gate = PublishGate::new(CancellationToken::new());

        gate.publish(&publisher, DeviceEvent::update("rx/1", BatteryReading::unknown()));
        assert!(gate.announced_keys().is_empty());

        gate.publish(&publisher, DeviceEvent::init("rx/1", "Mouse", true, DeviceType::Mouse));
        gate.publish(&publisher, DeviceEvent::init("rx/2", "Keys", true, DeviceType::Keyboard));
        gate.publish(&publisher, DeviceEvent::init("rx/1", "Mouse", true, DeviceType::Mouse));
        assert_eq!(gate.close(), vec!["rx/1".to_string(), "rx/2".to_string()]);

        // Refused after close, so the list is final
        gate.publish(&publisher, DeviceEvent::init("rx/3", "Late", true, DeviceType::Other));
        assert_eq!(gate.announced_keys().len(), 2);
    }

    #[test]
    fn test_reading_helpers() {
        let off = BatteryReading::unknown();
        assert_eq!(off.percentage, -1.0);
        assert_eq!(off.level(), None);
        assert_eq!(off.status, PowerSupplyStatus::Unknown);

        let r = BatteryReading::percent(73, PowerSupplyStatus::Discharging);
        assert_eq!(r.level(), Some(73.0));
    }

    #[test]
    fn test_event_json_shape() {
        let event = DeviceEvent::init("abc", "Cloud Alpha", true, DeviceType::Headset);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["device_id"], "abc");
        assert_eq!(json["device_type"], "headset");

        let event = DeviceEvent::update("abc", BatteryReading::unknown());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["battery_percentage"], -1.0);
        assert_eq!(json["power_supply_status"], "unknown");
    }

    #[test]
    fn test_hidpp_type_mapping() {
        assert_eq!(DeviceType::from_hidpp_type(0), DeviceType::Keyboard);
        assert_eq!(DeviceType::from_hidpp_type(3), DeviceType::Mouse);
        assert_eq!(DeviceType::from_hidpp_type(8), DeviceType::Headset);
        assert_eq!(DeviceType::from_hidpp_type(7), DeviceType::Other);
    }
}
