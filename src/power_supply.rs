//! Power supply file export
//!
//! Mirrors each device's battery into a sysfs-like directory so shell
//! tools and status bars can read it without talking to the daemon:
//!
//! ```text
//! <export-dir>/<device>/type        Battery
//! <export-dir>/<device>/present     1 when the device reports a level
//! <export-dir>/<device>/capacity    0-100
//! <export-dir>/<device>/status      Charging, Discharging, ...
//! <export-dir>/<device>/model_name  display name
//! ```

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::status::DeviceStatus;

/// Power supply status file paths (mimics sysfs structure)
const STATUS_FILE: &str = "status";
const CAPACITY_FILE: &str = "capacity";
const PRESENT_FILE: &str = "present";
const TYPE_FILE: &str = "type";
const MODEL_NAME_FILE: &str = "model_name";

/// Directory name for a device ID (receiver sub-devices contain '/')
fn dir_name(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

/// One exported device
pub struct PowerSupply {
    base_path: PathBuf,
}

impl PowerSupply {
    pub fn new(export_dir: &Path, device_id: &str) -> io::Result<Self> {
        let base_path = export_dir.join(dir_name(device_id));
        fs::create_dir_all(&base_path)?;

        let ps = Self { base_path };
        ps.write_file(TYPE_FILE, "Battery")?;
        ps.write_file(PRESENT_FILE, "0")?;
        ps.write_file(CAPACITY_FILE, "0")?;
        ps.write_file(STATUS_FILE, "Unknown")?;
        Ok(ps)
    }

    /// Write the current state to the files
    pub fn update(&self, status: &DeviceStatus) -> io::Result<()> {
        self.write_file(MODEL_NAME_FILE, &status.device_name)?;
        if status.is_off() {
            self.write_file(PRESENT_FILE, "0")?;
            self.write_file(CAPACITY_FILE, "0")?;
        } else {
            self.write_file(PRESENT_FILE, "1")?;
            let capacity = status.percentage.round().clamp(0.0, 100.0) as u8;
            self.write_file(CAPACITY_FILE, &capacity.to_string())?;
        }
        self.write_file(STATUS_FILE, status.status.as_str())?;
        Ok(())
    }

    /// Write a value to a sysfs-like file
    fn write_file(&self, name: &str, value: &str) -> io::Result<()> {
        let path = self.base_path.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        writeln!(file, "{}", value)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }
}

impl Drop for PowerSupply {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.base_path);
    }
}

/// Exported devices under one directory
pub struct PowerSupplyExporter {
    export_dir: PathBuf,
    supplies: HashMap<String, PowerSupply>,
}

impl PowerSupplyExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let export_dir = export_dir.into();
        fs::create_dir_all(&export_dir)?;
        Ok(Self {
            export_dir,
            supplies: HashMap::new(),
        })
    }

    /// Create or refresh the directory of one device
    pub fn sync(&mut self, status: &DeviceStatus) -> io::Result<()> {
        if !self.supplies.contains_key(&status.device_id) {
            let supply = PowerSupply::new(&self.export_dir, &status.device_id)?;
            debug!(path = %supply.path().display(), "Exporting {}", status.device_name);
            self.supplies.insert(status.device_id.clone(), supply);
        }
        match self.supplies.get(&status.device_id) {
            Some(supply) => supply.update(status),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.supplies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supplies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BatteryReading, DeviceEvent, DeviceType, PowerSupplyStatus};
    use crate::status::DeviceTable;

    fn read(dir: &Path, file: &str) -> String {
        fs::read_to_string(dir.join(file)).unwrap().trim_end().to_string()
    }

    #[test]
    fn test_dir_name_flattens_sub_devices() {
        assert_eq!(dir_name("abc/3"), "abc-3");
        assert_eq!(dir_name("plain"), "plain");
    }

    #[test]
    fn test_export_tracks_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut exporter = PowerSupplyExporter::new(tmp.path().join("power")).unwrap();
        let mut table = DeviceTable::new();

        let status = table
            .apply(&DeviceEvent::init("rx/1", "MX Master 3", true, DeviceType::Mouse))
            .unwrap()
            .clone();
        exporter.sync(&status).unwrap();
        let dir = tmp.path().join("power").join("rx-1");
        assert_eq!(read(&dir, "type"), "Battery");
        assert_eq!(read(&dir, "present"), "0");
        assert_eq!(read(&dir, "model_name"), "MX Master 3");

        let status = table
            .apply(&DeviceEvent::update(
                "rx/1",
                BatteryReading::percent(45, PowerSupplyStatus::Charging),
            ))
            .unwrap()
            .clone();
        exporter.sync(&status).unwrap();
        assert_eq!(read(&dir, "present"), "1");
        assert_eq!(read(&dir, "capacity"), "45");
        assert_eq!(read(&dir, "status"), "Charging");

        let status = table
            .apply(&DeviceEvent::update("rx/1", BatteryReading::unknown()))
            .unwrap()
            .clone();
        exporter.sync(&status).unwrap();
        assert_eq!(read(&dir, "present"), "0");
        assert_eq!(read(&dir, "status"), "Unknown");
        assert_eq!(exporter.len(), 1);
    }

    #[test]
    fn test_dropping_exporter_removes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut table = DeviceTable::new();
        let status = table
            .apply(&DeviceEvent::init("h", "Cloud II", true, DeviceType::Headset))
            .unwrap()
            .clone();
        {
            let mut exporter = PowerSupplyExporter::new(tmp.path()).unwrap();
            exporter.sync(&status).unwrap();
            assert!(tmp.path().join("h").exists());
        }
        assert!(!tmp.path().join("h").exists());
    }
}
