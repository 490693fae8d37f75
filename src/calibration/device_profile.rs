// DeviceCalibrationStore: per-output-device dB offsets
//
// Persisted as one JSON document holding every known device:
// { "active_device": "...", "profiles": { "<device>": { "<freq>": offset_db } } }

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::storage::{read_json, write_json_atomic};
use crate::ear::{frequency_map_from_value, FrequencyMap};
use crate::error::{log_calibration_error, CalibrationError};

/// Offsets for one output device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCalibrationProfile {
    pub device_id: String,
    pub active: bool,
    pub offsets: FrequencyMap,
}

#[derive(Debug, Default, Serialize)]
struct DeviceCalibrationFile {
    active_device: Option<String>,
    profiles: BTreeMap<String, FrequencyMap>,
}

impl DeviceCalibrationFile {
    fn from_value(value: &Value) -> Self {
        let active_device = value
            .get("active_device")
            .and_then(Value::as_str)
            .map(str::to_string);
        let profiles = value
            .get("profiles")
            .and_then(Value::as_object)
            .map(|profiles| {
                profiles
                    .iter()
                    .map(|(device, offsets)| (device.clone(), frequency_map_from_value(offsets)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            active_device,
            profiles,
        }
    }
}

/// File-backed store of device calibration profiles
///
/// Profiles are created with zero offsets for the configured frequency list
/// the first time a device is activated with `create_if_missing`. They are
/// never deleted by the store.
#[derive(Debug)]
pub struct DeviceCalibrationStore {
    path: PathBuf,
    frequencies: Vec<u32>,
    data: DeviceCalibrationFile,
}

impl DeviceCalibrationStore {
    /// Open the store at `path`
    ///
    /// A missing file starts an empty store. A corrupt file is logged and
    /// replaced by an empty store on the next save.
    pub fn open(path: impl Into<PathBuf>, frequencies: &[u32]) -> Self {
        let path = path.into();
        let data = match read_json::<Value>(&path) {
            Ok(Some(value)) => DeviceCalibrationFile::from_value(&value),
            Ok(None) => DeviceCalibrationFile::default(),
            Err(err) => {
                log_calibration_error(&err, "DeviceCalibrationStore::open");
                tracing::warn!("[DeviceCalibration] Falling back to empty store");
                DeviceCalibrationFile::default()
            }
        };
        Self {
            path,
            frequencies: frequencies.to_vec(),
            data,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn active_device(&self) -> Option<&str> {
        self.data.active_device.as_deref()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.data.profiles.keys().map(String::as_str)
    }

    pub fn has_profile(&self, device: &str) -> bool {
        self.data.profiles.contains_key(device)
    }

    /// Make `device` the active device
    pub fn set_active(&mut self, device: &str, create_if_missing: bool) {
        if create_if_missing {
            self.ensure_profile(device);
        }
        self.data.active_device = Some(device.to_string());
    }

    /// Activate an existing profile
    pub fn load_profile(&mut self, device: &str) -> Result<(), CalibrationError> {
        if !self.has_profile(device) {
            return Err(CalibrationError::ProfileNotFound {
                device: device.to_string(),
            });
        }
        self.set_active(device, false);
        Ok(())
    }

    /// Zero every offset of `device`, creating it if unknown
    pub fn reset(&mut self, device: &str) {
        self.data
            .profiles
            .insert(device.to_string(), self.zero_map());
    }

    /// Offsets of the active device
    ///
    /// Configured frequencies without a stored value read as 0; with no
    /// active device the whole map is zero.
    pub fn get_map(&self) -> FrequencyMap {
        let mut map = self.zero_map();
        if let Some(stored) = self
            .active_device()
            .and_then(|device| self.data.profiles.get(device))
        {
            map.extend(stored.iter().map(|(f, v)| (*f, *v)));
        }
        map
    }

    pub fn get_offset(&self, frequency_hz: u32) -> f64 {
        self.active_device()
            .and_then(|device| self.data.profiles.get(device))
            .and_then(|offsets| offsets.get(&frequency_hz).copied())
            .unwrap_or(0.0)
    }

    /// Set an offset on the active device; ignored when none is active
    pub fn set_offset(&mut self, frequency_hz: u32, offset_db: f64) {
        let Some(device) = self.data.active_device.clone() else {
            tracing::debug!("[DeviceCalibration] set_offset ignored: no active device");
            return;
        };
        self.ensure_profile(&device).insert(frequency_hz, offset_db);
    }

    pub fn profile(&self, device: &str) -> Option<DeviceCalibrationProfile> {
        self.data
            .profiles
            .get(device)
            .map(|offsets| DeviceCalibrationProfile {
                device_id: device.to_string(),
                active: self.active_device() == Some(device),
                offsets: offsets.clone(),
            })
    }

    /// Persist the store atomically
    pub fn save(&mut self) -> Result<&Path, CalibrationError> {
        if let Some(device) = self.data.active_device.clone() {
            self.ensure_profile(&device);
        }
        write_json_atomic(&self.path, &self.data)
            .inspect_err(|err| log_calibration_error(err, "DeviceCalibrationStore::save"))?;
        tracing::info!("[DeviceCalibration] Saved {}", self.path.display());
        Ok(&self.path)
    }

    fn zero_map(&self) -> FrequencyMap {
        self.frequencies.iter().map(|f| (*f, 0.0)).collect()
    }

    fn ensure_profile(&mut self, device: &str) -> &mut FrequencyMap {
        let zeros = self.zero_map();
        let profile = self.data.profiles.entry(device.to_string()).or_default();
        for (freq, zero) in zeros {
            profile.entry(freq).or_insert(zero);
        }
        profile
    }
}
