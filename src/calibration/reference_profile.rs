//! Reference (dBFS) calibration profiles
//!
//! A reference profile records, per ear and frequency, the digital level in
//! dBFS that produces 0 dB HL on a specific device/headphone pair. Two
//! document schemas are accepted:
//!
//! - legacy: `{device_name, wasapi_id, sample_rate?, max_db_hl?, channels | mapping}`
//! - `audiocalib.v1`: `{schema, device{wasapi_id, name?, sample_rate?, channels?},
//!   mapping_dbfs{ear: {freq: dbfs}}, headphones?, max_db_hl?}`
//!
//! Both may carry channel routing under `channel_map` (or `channels_map`,
//! `channel_indices`, `channel_roles`) or `left_channel_index` /
//! `right_channel_index`, at the top level or inside `device` / `headphones`.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ear::{parse_frequency_key, Ear, EarFrequencyMap, FrequencyMap};
use crate::error::CalibrationError;

pub const DEFAULT_MAX_DB_HL: f64 = 100.0;

/// Frequency key holding the profile-wide fallback reference
const DEFAULT_ENTRY_KEY: &str = "-1";

const CHANNEL_MAP_KEYS: [&str; 4] = [
    "channel_map",
    "channels_map",
    "channel_indices",
    "channel_roles",
];

/// Partial ear→channel routing carried by a profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelRouting {
    pub left: Option<usize>,
    pub right: Option<usize>,
}

impl ChannelRouting {
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn set(&mut self, ear: Ear, channel: usize) {
        match ear {
            Ear::Left => self.left = Some(channel),
            Ear::Right => self.right = Some(channel),
        }
    }
}

/// Output device described by a profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceDevice {
    pub name: Option<String>,
    pub id: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceProfile {
    pub schema: String,
    pub device: ReferenceDevice,
    /// Opaque headphone description, kept for reports
    pub headphones: Option<Value>,
    pub reference_dbfs: EarFrequencyMap,
    pub default_dbfs: BTreeMap<Ear, f64>,
    pub max_db_hl: f64,
    pub routing: ChannelRouting,
    pub source_path: Option<PathBuf>,
}

impl ReferenceProfile {
    /// Empty profile for `device_id`; every lookup falls back to -40 dBFS
    pub fn new(device_id: &str) -> Self {
        Self {
            schema: "calibration.v1".to_string(),
            device: ReferenceDevice {
                id: device_id.to_string(),
                ..ReferenceDevice::default()
            },
            headphones: None,
            reference_dbfs: EarFrequencyMap::new(),
            default_dbfs: BTreeMap::new(),
            max_db_hl: DEFAULT_MAX_DB_HL,
            routing: ChannelRouting::default(),
            source_path: None,
        }
    }

    pub fn with_reference(mut self, ear: Ear, frequency_hz: u32, dbfs: f64) -> Self {
        self.reference_dbfs.insert(ear, frequency_hz, dbfs);
        self
    }

    pub fn with_default(mut self, ear: Ear, dbfs: f64) -> Self {
        self.default_dbfs.insert(ear, dbfs);
        self
    }

    pub fn with_routing(mut self, routing: ChannelRouting) -> Self {
        self.routing = routing;
        self
    }

    /// Reference level for an exact frequency, else the profile-wide default
    pub fn reference_for(&self, ear: Ear, frequency_hz: u32) -> Option<f64> {
        self.reference_dbfs
            .get(ear, frequency_hz)
            .or_else(|| self.default_dbfs.get(&ear).copied())
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.device.sample_rate
    }

    /// Load and validate a profile document from disk
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path).map_err(|e| CalibrationError::storage(path, e))?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|e| CalibrationError::MalformedCalibrationFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let mut profile = Self::from_value(&value)?;
        profile.source_path = Some(path.to_path_buf());
        tracing::info!(
            "[ReferenceProfile] Loaded {} ({}) from {}",
            profile.device.id,
            profile.schema,
            path.display()
        );
        Ok(profile)
    }

    /// Validate and normalize a parsed document
    pub fn from_value(value: &Value) -> Result<Self, CalibrationError> {
        let root = value
            .as_object()
            .ok_or_else(|| invalid("expected a JSON object"))?;

        let is_audiocalib = root.contains_key("mapping_dbfs")
            || root
                .get("schema")
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with("audiocalib"));

        let mut profile = if is_audiocalib {
            parse_audiocalib(root)?
        } else {
            parse_legacy(root)?
        };
        profile.routing = extract_routing(root);
        Ok(profile)
    }
}

fn invalid(reason: impl Into<String>) -> CalibrationError {
    CalibrationError::InvalidProfile {
        reason: reason.into(),
    }
}

fn optional_number(container: &Map<String, Value>, field: &str) -> Result<Option<f64>, CalibrationError> {
    match container.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(invalid(format!("'{}' must be numeric", field))),
    }
}

fn required_string(container: &Map<String, Value>, field: &str) -> Result<String, CalibrationError> {
    container
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("field '{}' missing or empty", field)))
}

/// Strict per-ear map: every value numeric, every key a positive frequency
/// (or the `-1` default entry)
fn parse_reference_map(
    raw: &Value,
    transform: impl Fn(f64) -> f64,
) -> Result<(FrequencyMap, Option<f64>), CalibrationError> {
    let entries = raw
        .as_object()
        .ok_or_else(|| invalid("expected a frequency->value map"))?;
    let mut map = FrequencyMap::new();
    let mut default = None;
    for (key, value) in entries {
        let level = value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid("calibration values must be numeric"))?;
        let level = transform(level);
        if key.trim() == DEFAULT_ENTRY_KEY {
            default = Some(level);
            continue;
        }
        let freq = parse_frequency_key(key)
            .ok_or_else(|| invalid(format!("invalid frequency {:?}", key)))?;
        map.insert(freq, level);
    }
    Ok((map, default))
}

fn parse_legacy(root: &Map<String, Value>) -> Result<ReferenceProfile, CalibrationError> {
    let id = required_string(root, "wasapi_id")?;
    let name = required_string(root, "device_name")?;
    let sample_rate = optional_number(root, "sample_rate")?;
    let max_db_hl = optional_number(root, "max_db_hl")?.unwrap_or(DEFAULT_MAX_DB_HL);

    let channels: Vec<(Ear, &Value)> = match root.get("channels") {
        Some(Value::Object(channels)) if !channels.is_empty() => channels
            .iter()
            .filter_map(|(label, map)| Ear::from_alias(label).map(|ear| (ear, map)))
            .collect(),
        Some(_) => return Err(invalid("section 'channels' missing or empty")),
        None => match root.get("mapping") {
            Some(mapping @ Value::Object(_)) => vec![(Ear::Right, mapping), (Ear::Left, mapping)],
            _ => return Err(invalid("section 'channels' missing or empty")),
        },
    };

    let mut profile = ReferenceProfile::new(&id);
    profile.schema = root
        .get("schema")
        .and_then(Value::as_str)
        .unwrap_or("calibration.v1")
        .to_string();
    profile.device.name = Some(name);
    profile.device.sample_rate = sample_rate.map(|sr| sr as u32);
    profile.max_db_hl = max_db_hl;
    for (ear, raw) in channels {
        let (map, default) = parse_reference_map(raw, |v| v)?;
        *profile.reference_dbfs.ear_mut(ear) = map;
        if let Some(default) = default {
            profile.default_dbfs.insert(ear, default);
        }
    }
    Ok(profile)
}

fn audiocalib_ear(label: &str) -> Option<Ear> {
    match label.trim() {
        "1" => Some(Ear::Right),
        "0" => Some(Ear::Left),
        other => Ear::from_alias(other),
    }
}

fn parse_audiocalib(root: &Map<String, Value>) -> Result<ReferenceProfile, CalibrationError> {
    let device = root
        .get("device")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("audiocalib: section 'device' missing"))?;
    let id = device
        .get("wasapi_id")
        .map(|v| match v {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("audiocalib: 'device.wasapi_id' missing"))?;

    let mapping = root
        .get("mapping_dbfs")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| invalid("audiocalib: 'mapping_dbfs' missing or empty"))?;

    let mut profile = ReferenceProfile::new(&id);
    profile.schema = root
        .get("schema")
        .and_then(Value::as_str)
        .unwrap_or("audiocalib.v1")
        .to_string();
    profile.device.name = device.get("name").and_then(Value::as_str).map(str::to_string);
    profile.device.sample_rate = optional_number(device, "sample_rate")?.map(|sr| sr as u32);
    profile.device.channels = device
        .get("channels")
        .and_then(Value::as_u64)
        .map(|c| c as u16);
    profile.headphones = root.get("headphones").cloned().filter(|h| !h.is_null());
    profile.max_db_hl = optional_number(root, "max_db_hl")?.unwrap_or(DEFAULT_MAX_DB_HL);

    for (label, raw) in mapping {
        let Some(ear) = audiocalib_ear(label) else {
            tracing::debug!("[ReferenceProfile] Skipping unknown ear '{}'", label);
            continue;
        };
        // mapping_dbfs stores magnitudes; references are always below full scale
        let (map, default) = parse_reference_map(raw, |v| -v.abs())?;
        *profile.reference_dbfs.ear_mut(ear) = map;
        if let Some(default) = default {
            profile.default_dbfs.insert(ear, default);
        }
    }
    Ok(profile)
}

fn channel_index(value: &Value) -> Option<usize> {
    let idx = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (idx.is_finite() && idx >= 0.0 && idx < u16::MAX as f64).then_some(idx.trunc() as usize)
}

fn routing_from_dict(raw: &Map<String, Value>) -> ChannelRouting {
    let mut routing = ChannelRouting::default();
    for (label, value) in raw {
        if let (Some(ear), Some(idx)) = (Ear::from_alias(label), channel_index(value)) {
            routing.set(ear, idx);
        }
    }
    routing
}

fn routing_from_container(container: &Map<String, Value>) -> ChannelRouting {
    for key in CHANNEL_MAP_KEYS {
        if let Some(Value::Object(raw)) = container.get(key) {
            let routing = routing_from_dict(raw);
            if !routing.is_empty() {
                return routing;
            }
        }
    }
    ChannelRouting {
        left: container.get("left_channel_index").and_then(channel_index),
        right: container.get("right_channel_index").and_then(channel_index),
    }
}

fn extract_routing(root: &Map<String, Value>) -> ChannelRouting {
    let nested = ["device", "headphones"]
        .into_iter()
        .filter_map(|key| root.get(key).and_then(Value::as_object));
    std::iter::once(root)
        .chain(nested)
        .map(routing_from_container)
        .find(|routing| !routing.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_legacy_channels_schema() {
        let doc = json!({
            "device_name": "USB Audio",
            "wasapi_id": "{0.0.0.00000000}.{abc}",
            "sample_rate": 44100,
            "channels": {
                "Right": {"1000": -60.0, "2000": -58.5, "-1": -50.0},
                "SX": {"1000": -61.0}
            }
        });
        let profile = ReferenceProfile::from_value(&doc).unwrap();
        assert_eq!(profile.schema, "calibration.v1");
        assert_eq!(profile.device.sample_rate, Some(44100));
        assert_eq!(profile.max_db_hl, 100.0);
        assert_eq!(profile.reference_for(Ear::Right, 1000), Some(-60.0));
        assert_eq!(profile.reference_for(Ear::Right, 4000), Some(-50.0));
        assert_eq!(profile.reference_for(Ear::Left, 1000), Some(-61.0));
        assert_eq!(profile.reference_for(Ear::Left, 4000), None);
    }

    #[test]
    fn test_legacy_mapping_applies_to_both_ears() {
        let doc = json!({
            "device_name": "Speakers",
            "wasapi_id": "id-1",
            "max_db_hl": 80,
            "mapping": {"500": -55.0}
        });
        let profile = ReferenceProfile::from_value(&doc).unwrap();
        assert_eq!(profile.max_db_hl, 80.0);
        assert_eq!(profile.reference_for(Ear::Left, 500), Some(-55.0));
        assert_eq!(profile.reference_for(Ear::Right, 500), Some(-55.0));
    }

    #[test]
    fn test_legacy_requires_identity_fields() {
        let doc = json!({"device_name": "x", "channels": {"R": {"1000": -60}}});
        let err = ReferenceProfile::from_value(&doc).unwrap_err();
        assert!(err.message().contains("wasapi_id"));

        let doc = json!({"device_name": "x", "wasapi_id": "y"});
        assert!(ReferenceProfile::from_value(&doc).is_err());
    }

    #[test]
    fn test_legacy_rejects_non_numeric_values() {
        let doc = json!({
            "device_name": "x",
            "wasapi_id": "y",
            "channels": {"R": {"1000": "loud"}}
        });
        assert!(matches!(
            ReferenceProfile::from_value(&doc),
            Err(CalibrationError::InvalidProfile { .. })
        ));
    }

    #[test]
    fn test_audiocalib_schema_forces_negative_values() {
        let doc = json!({
            "schema": "audiocalib.v1",
            "device": {"wasapi_id": "dev-9", "name": "DAC", "sample_rate": 96000, "channels": 4},
            "headphones": {"model": "DD45", "left_channel_index": 2, "right_channel_index": 3},
            "mapping_dbfs": {
                "1": {"1000": 62.0},
                "OS": {"1000": -63.5},
                "center": {"1000": 1.0}
            }
        });
        let profile = ReferenceProfile::from_value(&doc).unwrap();
        assert_eq!(profile.device.id, "dev-9");
        assert_eq!(profile.device.sample_rate, Some(96000));
        assert_eq!(profile.device.channels, Some(4));
        assert_eq!(profile.reference_for(Ear::Right, 1000), Some(-62.0));
        assert_eq!(profile.reference_for(Ear::Left, 1000), Some(-63.5));
        assert_eq!(
            profile.routing,
            ChannelRouting {
                left: Some(2),
                right: Some(3)
            }
        );
        assert!(profile.headphones.is_some());
    }

    #[test]
    fn test_audiocalib_requires_device_id() {
        let doc = json!({"mapping_dbfs": {"R": {"1000": 60}}, "device": {"name": "x"}});
        let err = ReferenceProfile::from_value(&doc).unwrap_err();
        assert!(err.message().contains("wasapi_id"));
    }

    #[test]
    fn test_channel_map_aliases() {
        let doc = json!({
            "device_name": "x",
            "wasapi_id": "y",
            "mapping": {"1000": -60},
            "channel_map": {"OD": 0, "left": "1", "bogus": 7}
        });
        let profile = ReferenceProfile::from_value(&doc).unwrap();
        assert_eq!(
            profile.routing,
            ChannelRouting {
                left: Some(1),
                right: Some(0)
            }
        );
    }

    #[test]
    fn test_out_of_range_channel_index_is_ignored() {
        let doc = json!({
            "device_name": "x",
            "wasapi_id": "y",
            "mapping": {"1000": -60},
            "left_channel_index": 1,
            "right_channel_index": 1e30
        });
        let profile = ReferenceProfile::from_value(&doc).unwrap();
        assert_eq!(
            profile.routing,
            ChannelRouting {
                left: Some(1),
                right: None
            }
        );

        let doc = json!({
            "device_name": "x",
            "wasapi_id": "y",
            "mapping": {"1000": -60},
            "channel_map": {"L": 65535, "R": "-2"}
        });
        let profile = ReferenceProfile::from_value(&doc).unwrap();
        assert_eq!(profile.routing, ChannelRouting::default());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(
            &path,
            r#"{"device_name": "x", "wasapi_id": "y", "mapping": {"1000": -60}}"#,
        )
        .unwrap();
        let profile = ReferenceProfile::load(&path).unwrap();
        assert_eq!(profile.source_path.as_deref(), Some(path.as_path()));

        fs::write(&path, "{").unwrap();
        assert!(matches!(
            ReferenceProfile::load(&path),
            Err(CalibrationError::MalformedCalibrationFile { .. })
        ));
    }
}
