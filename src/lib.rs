//! hidtray - battery monitor for Logitech HID++ and HyperX wireless peripherals
//!
//! Discovers HID interfaces as they are plugged in, groups them into
//! physical devices, polls each device's battery with the protocol it
//! speaks, and publishes normalized events:
//!
//! - [`manager::DeviceManager`]: hotplug intake and device lifecycle
//! - [`registry::DeviceRegistry`]: container → logical device map
//! - [`hidpp::HidppSession`] / [`hyperx::VendorBinaryDevice`]: protocol handlers
//! - [`events::EventPublisher`]: Init/Update fan-out
//! - [`status::DeviceTable`]: last known state per device

pub mod config;
pub mod events;
pub mod hidpp;
pub mod hyperx;
pub mod identity;
pub mod manager;
pub mod power_supply;
pub mod queue;
pub mod registry;
pub mod status;

#[cfg(test)]
mod testing;

pub use config::{NativeSettings, Settings, SharedSettings};
pub use events::{
    BatteryReading, DeviceEvent, DeviceType, EventPublisher, InitMessage, PowerSupplyStatus,
    UpdateMessage,
};
pub use identity::{IdentityResolver, ProtocolFamily};
pub use manager::{DeviceManager, PollContext};
pub use power_supply::PowerSupplyExporter;
pub use status::{DeviceStatus, DeviceTable};
