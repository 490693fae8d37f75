// HeadphoneBiasStore: per-headphone, per-ear frequency bias
//
// Each headphone unit has `<root>/<headphone_id>.json` shaped as
// { "L": { "<freq>": bias_db }, "R": { ... } }.

use serde_json::Value;
use std::path::{Path, PathBuf};

use super::storage::{read_json, write_json_atomic};
use crate::ear::{Ear, EarFrequencyMap};
use crate::error::{log_calibration_error, CalibrationError};

pub const DEFAULT_HEADPHONE_ID: &str = "default";

/// Bias profile of one headphone unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeadphoneBiasProfile {
    pub headphone_id: String,
    pub bias: EarFrequencyMap,
}

/// Reduce a headphone id to a safe file stem
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
/// An empty or all-dot id maps to [`DEFAULT_HEADPHONE_ID`].
pub fn sanitize_headphone_id(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        DEFAULT_HEADPHONE_ID.to_string()
    } else {
        cleaned
    }
}

/// File-backed bias maps, one active headphone at a time
#[derive(Debug)]
pub struct HeadphoneBiasStore {
    root: PathBuf,
    current: Option<HeadphoneBiasProfile>,
}

impl HeadphoneBiasStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            current: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_for(&self, headphone_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", sanitize_headphone_id(headphone_id)))
    }

    pub fn headphone_id(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.headphone_id.as_str())
    }

    pub fn profile(&self) -> Option<&HeadphoneBiasProfile> {
        self.current.as_ref()
    }

    /// Select a headphone and load its bias map
    ///
    /// An empty id selects `"default"`. A missing or unreadable file yields
    /// an empty map.
    pub fn set_headphone(&mut self, headphone_id: &str) -> &EarFrequencyMap {
        let headphone_id = sanitize_headphone_id(headphone_id);
        let bias = self.load_bias(&headphone_id);
        tracing::info!(
            "[HeadphoneBias] Selected '{}' ({} left, {} right points)",
            headphone_id,
            bias.left.len(),
            bias.right.len()
        );
        &self
            .current
            .insert(HeadphoneBiasProfile { headphone_id, bias })
            .bias
    }

    pub fn get_bias(&self, ear: Ear, frequency_hz: u32) -> f64 {
        self.current
            .as_ref()
            .and_then(|p| p.bias.get(ear, frequency_hz))
            .unwrap_or(0.0)
    }

    /// Current bias map (empty when no headphone is selected)
    pub fn bias_map(&self) -> EarFrequencyMap {
        self.current
            .as_ref()
            .map(|p| p.bias.clone())
            .unwrap_or_default()
    }

    pub fn set_bias(&mut self, ear: Ear, frequency_hz: u32, bias_db: f64) -> Result<(), CalibrationError> {
        self.current_mut()?.bias.insert(ear, frequency_hz, bias_db);
        Ok(())
    }

    /// Replace the whole bias map
    pub fn set_bias_map(&mut self, bias: EarFrequencyMap) -> Result<(), CalibrationError> {
        self.current_mut()?.bias = bias;
        Ok(())
    }

    /// Replace the bias map from untyped JSON, dropping malformed entries
    pub fn set_bias_map_from_value(&mut self, value: &Value) -> Result<(), CalibrationError> {
        self.set_bias_map(EarFrequencyMap::from_value(value))
    }

    /// Normal-hearing rule: bias = -measured threshold
    pub fn compute_bias_from_thresholds(measured: &EarFrequencyMap) -> EarFrequencyMap {
        measured.map_values(|threshold| -threshold)
    }

    pub fn save(&self) -> Result<PathBuf, CalibrationError> {
        let profile = self
            .current
            .as_ref()
            .ok_or(CalibrationError::NoHeadphoneSelected)?;
        let path = self.file_for(&profile.headphone_id);
        write_json_atomic(&path, &profile.bias)
            .inspect_err(|err| log_calibration_error(err, "HeadphoneBiasStore::save"))?;
        tracing::info!("[HeadphoneBias] Saved {}", path.display());
        Ok(path)
    }

    fn current_mut(&mut self) -> Result<&mut HeadphoneBiasProfile, CalibrationError> {
        self.current
            .as_mut()
            .ok_or(CalibrationError::NoHeadphoneSelected)
    }

    fn load_bias(&self, headphone_id: &str) -> EarFrequencyMap {
        match read_json::<Value>(&self.file_for(headphone_id)) {
            Ok(Some(value)) => EarFrequencyMap::from_value(&value),
            Ok(None) => EarFrequencyMap::default(),
            Err(err) => {
                log_calibration_error(&err, "HeadphoneBiasStore::set_headphone");
                EarFrequencyMap::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_headphone_id(""), "default");
        assert_eq!(sanitize_headphone_id("  "), "default");
        assert_eq!(sanitize_headphone_id(".."), "default");
        assert_eq!(sanitize_headphone_id("HD 280/Pro"), "HD_280_Pro");
        assert_eq!(sanitize_headphone_id("wasapi__usb-dac"), "wasapi__usb-dac");
    }

    #[test]
    fn test_unknown_headphone_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HeadphoneBiasStore::new(dir.path());
        assert!(store.set_headphone("new-unit").is_empty());
        assert_eq!(store.get_bias(Ear::Left, 1000), 0.0);
    }

    #[test]
    fn test_save_requires_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeadphoneBiasStore::new(dir.path());
        assert_eq!(store.save().unwrap_err(), CalibrationError::NoHeadphoneSelected);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HeadphoneBiasStore::new(dir.path());
        store.set_headphone("hd280");
        store.set_bias(Ear::Left, 1000, -12.5).unwrap();
        store.set_bias(Ear::Right, 4000, 3.0).unwrap();
        let path = store.save().unwrap();
        assert_eq!(path, dir.path().join("hd280.json"));

        let mut other = HeadphoneBiasStore::new(dir.path());
        let loaded = other.set_headphone("hd280").clone();
        assert_eq!(loaded, store.bias_map());
    }

    #[test]
    fn test_lenient_bias_map() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HeadphoneBiasStore::new(dir.path());
        store.set_headphone("hp");
        store
            .set_bias_map_from_value(&json!({
                "L": {"1000": -4, "2000": "bad", "nope": 1},
                "R": {"500": "2.5"}
            }))
            .unwrap();
        assert_eq!(store.get_bias(Ear::Left, 1000), -4.0);
        assert_eq!(store.get_bias(Ear::Left, 2000), 0.0);
        assert_eq!(store.get_bias(Ear::Right, 500), 2.5);
        assert_eq!(store.bias_map().left.len(), 1);
    }

    #[test]
    fn test_normal_hearing_rule() {
        let mut measured = EarFrequencyMap::new();
        measured.insert(Ear::Left, 1000, 15.0);
        measured.insert(Ear::Right, 2000, -5.0);
        let bias = HeadphoneBiasStore::compute_bias_from_thresholds(&measured);
        assert_eq!(bias.get(Ear::Left, 1000), Some(-15.0));
        assert_eq!(bias.get(Ear::Right, 2000), Some(5.0));
    }

    #[test]
    fn test_corrupt_bias_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hp.json"), "[1, 2").unwrap();
        let mut store = HeadphoneBiasStore::new(dir.path());
        assert!(store.set_headphone("hp").is_empty());
    }
}
