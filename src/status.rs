//! Per-device status table fed by the event stream

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Local};

use crate::events::{DeviceEvent, DeviceType, InitMessage, PowerSupplyStatus, UpdateMessage};

/// Age after which the tooltip mentions when the reading was taken
const STALE_MINUTES: i64 = 10;

/// Last known state of one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub has_battery: bool,
    pub percentage: f64,
    pub voltage: f64,
    pub mileage: f64,
    pub status: PowerSupplyStatus,
    pub last_update: Option<DateTime<Local>>,
}

impl DeviceStatus {
    fn from_init(init: &InitMessage) -> Self {
        Self {
            device_id: init.device_id.clone(),
            device_name: init.device_name.clone(),
            device_type: init.device_type,
            has_battery: init.has_battery,
            percentage: -1.0,
            voltage: 0.0,
            mileage: 0.0,
            status: PowerSupplyStatus::Unknown,
            last_update: None,
        }
    }

    fn apply_init(&mut self, init: &InitMessage) {
        self.device_name = init.device_name.clone();
        self.device_type = init.device_type;
        self.has_battery = init.has_battery;
    }

    fn apply_update(&mut self, update: &UpdateMessage) {
        let reading = &update.reading;
        self.percentage = reading.percentage;
        self.voltage = reading.voltage;
        self.mileage = reading.mileage;
        self.status = reading.status;
        self.last_update = Some(reading.timestamp);
    }

    pub fn is_off(&self) -> bool {
        self.percentage < 0.0
    }

    pub fn tooltip(&self) -> String {
        self.tooltip_at(Local::now())
    }

    /// One-line summary, plus the reading age once it is stale
    pub fn tooltip_at(&self, now: DateTime<Local>) -> String {
        if self.is_off() {
            return format!("{} — Off", self.device_name);
        }
        let header = format!("{} — {}%", self.device_name, self.percentage.round() as i64);
        match self.last_update {
            Some(at) => {
                let minutes = (now - at).num_minutes();
                if minutes >= STALE_MINUTES {
                    format!("{header}\nUpdated: {minutes}m ago")
                } else {
                    header
                }
            }
            None => header,
        }
    }

    pub fn xml(&self) -> String {
        let last_update = self
            .last_update
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><xml>\
             <device_id>{}</device_id>\
             <device_name>{}</device_name>\
             <device_type>{}</device_type>\
             <battery_percent>{:.2}</battery_percent>\
             <battery_voltage>{:.2}</battery_voltage>\
             <mileage>{:.2}</mileage>\
             <charging>{}</charging>\
             <last_update>{}</last_update>\
             </xml>",
            escape(&self.device_id),
            escape(&self.device_name),
            self.device_type.as_str(),
            self.percentage,
            self.voltage,
            self.mileage,
            self.status == PowerSupplyStatus::Charging,
            last_update,
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// All devices seen so far, keyed by device ID
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: BTreeMap<String, DeviceStatus>,
    /// Updates that arrived before their Init; latest wins
    pending: HashMap<String, UpdateMessage>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event; returns the record it changed
    pub fn apply(&mut self, event: &DeviceEvent) -> Option<&DeviceStatus> {
        match event {
            DeviceEvent::Init(init) => {
                let status = self
                    .devices
                    .entry(init.device_id.clone())
                    .and_modify(|s| s.apply_init(init))
                    .or_insert_with(|| DeviceStatus::from_init(init));
                if let Some(update) = self.pending.remove(&init.device_id) {
                    status.apply_update(&update);
                }
                Some(&*status)
            }
            DeviceEvent::Update(update) => match self.devices.get_mut(&update.device_id) {
                Some(status) => {
                    status.apply_update(update);
                    Some(&*status)
                }
                None => {
                    self.pending
                        .insert(update.device_id.clone(), update.clone());
                    None
                }
            },
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceStatus> {
        self.devices.get(device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceStatus> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
