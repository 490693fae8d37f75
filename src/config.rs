//! Configuration management for the audiometer core
//!
//! Runtime configuration is loaded from a JSON file so protocol timing,
//! level ranges and calibration aggregation can be adjusted without
//! recompiling. Every section falls back to defaults independently.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::AmplitudeStrategy;
use crate::calibration::Aggregator;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub screening: ScreeningConfig,
    pub audio: AudioConfig,
    pub calibration: CalibrationConfig,
    pub storage: StorageConfig,
}

/// Threshold search protocol parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    /// Test order; the staircase walks this list as given
    pub frequencies_hz: Vec<u32>,
    pub min_level_db_hl: f64,
    pub max_level_db_hl: f64,
    /// Initial cursor level for manual entry
    pub start_level_db_hl: f64,
    pub step_db: f64,
    pub tone_duration_ms: u64,
    pub isi_ms_min: u64,
    pub isi_ms_max: u64,
    /// Verification ascents allowed before falling back to the mode
    pub verification_max_cycles: u32,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            frequencies_hz: vec![1000, 2000, 4000, 8000, 500, 250],
            min_level_db_hl: 0.0,
            max_level_db_hl: 100.0,
            start_level_db_hl: 40.0,
            step_db: 5.0,
            tone_duration_ms: 1500,
            isi_ms_min: 1200,
            isi_ms_max: 2500,
            verification_max_cycles: 8,
        }
    }
}

/// Tone engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Used until a reference profile supplies its own rate
    pub sample_rate: u32,
    /// Failsafe mute after this much continuous tone
    pub auto_stop_seconds: f64,
    /// Requested callback size in frames
    pub block_size: u32,
    pub strategy: AmplitudeStrategy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            auto_stop_seconds: 3.0,
            block_size: 256,
            strategy: AmplitudeStrategy::SimpleOffset,
        }
    }
}

/// Headphone bias aggregation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub outlier_abs_db: f64,
    pub smoothing: bool,
    pub aggregator: Aggregator,
    /// Frequencies covered by device profiles and bias recomputation
    pub frequencies_hz: Vec<u32>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            outlier_abs_db: 25.0,
            smoothing: true,
            aggregator: Aggregator::Median,
            frequencies_hz: vec![250, 500, 1000, 2000, 4000, 8000],
        }
    }
}

/// On-disk layout for calibration data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Device calibration store file
    pub fn device_calibration_path(&self) -> PathBuf {
        self.data_dir.join("calibrations.json")
    }

    /// Root holding `<headphone_id>.json` bias files and session folders
    pub fn headphones_dir(&self) -> PathBuf {
        self.data_dir.join("headphones")
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Missing or unparsable files yield the default configuration; the
    /// failure is logged, never returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from_file("assets/audiometer_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(
            config.screening.frequencies_hz,
            vec![1000, 2000, 4000, 8000, 500, 250]
        );
        assert_eq!(config.screening.step_db, 5.0);
        assert_eq!(config.screening.verification_max_cycles, 8);
        assert_eq!(config.audio.auto_stop_seconds, 3.0);
        assert_eq!(config.audio.strategy, AmplitudeStrategy::SimpleOffset);
        assert_eq!(config.calibration.outlier_abs_db, 25.0);
        assert_eq!(config.calibration.aggregator, Aggregator::Median);
    }

    #[test]
    fn test_partial_json_keeps_section_defaults() {
        let json = r#"{"screening": {"step_db": 2.5}, "audio": {"strategy": "reference_dbfs"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.screening.step_db, 2.5);
        assert_eq!(config.screening.max_level_db_hl, 100.0);
        assert_eq!(config.audio.strategy, AmplitudeStrategy::ReferenceDbfs);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/audiometer_config.json");
        assert_eq!(config.screening, ScreeningConfig::default());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_from_file(&path);
        assert_eq!(config.calibration, CalibrationConfig::default());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/audiometer_config.json");
        assert_eq!(AppConfig::load_from_file(path), AppConfig::default());
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig::with_data_dir("/var/audiometer");
        assert_eq!(
            storage.device_calibration_path(),
            PathBuf::from("/var/audiometer/calibrations.json")
        );
        assert_eq!(
            storage.headphones_dir(),
            PathBuf::from("/var/audiometer/headphones")
        );
    }
}
