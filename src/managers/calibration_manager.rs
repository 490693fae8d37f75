// CalibrationManager: Focused manager for headphone calibration workflows
//
// Single Responsibility: headphone selection, session history, bias
// recomputation and calibration file exchange. Device offsets are handled
// by the context where the output device is chosen.

use chrono::Local;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::calibration::storage::{read_json, write_json_atomic};
use crate::calibration::{
    AggregationOptions, AggregationReport, BiasAggregator, CalibrationSession,
    CalibrationSessionStore, CombinedCalibration, HeadphoneBiasStore, SessionSummary,
};
use crate::config::CalibrationConfig;
use crate::ear::{Ear, EarFrequencyMap};
use crate::error::{log_calibration_error, CalibrationError};

const IMPORTED_HEADPHONE_ID: &str = "imported";

/// Calibration notifications for subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalibrationEvent {
    HeadphoneSelected {
        headphone_id: String,
    },
    SessionStored {
        headphone_id: String,
        path: PathBuf,
    },
    BiasUpdated {
        headphone_id: String,
        points: usize,
        outliers: usize,
    },
    Exported {
        headphone_id: String,
        path: PathBuf,
    },
    Imported {
        headphone_id: String,
        path: PathBuf,
    },
}

/// Manages headphone calibration and its persistence
///
/// This manager handles:
/// - Selecting the active headphone and its bias profile
/// - Finishing a normal-hearing calibration directly from measured thresholds
/// - Storing calibration sessions and recomputing the aggregated bias
/// - Single-point bias edits
/// - Export/import of headphone calibration files
pub struct CalibrationManager {
    calibration: Arc<RwLock<CombinedCalibration>>,
    sessions: CalibrationSessionStore,
    frequencies: Vec<u32>,
    options: AggregationOptions,
    events: Mutex<Option<broadcast::Sender<CalibrationEvent>>>,
}

impl CalibrationManager {
    pub fn new(
        calibration: Arc<RwLock<CombinedCalibration>>,
        sessions: CalibrationSessionStore,
        config: &CalibrationConfig,
    ) -> Self {
        Self {
            calibration,
            sessions,
            frequencies: config.frequencies_hz.clone(),
            options: AggregationOptions::from(config),
            events: Mutex::new(None),
        }
    }

    /// Publish events on `tx` from now on
    pub fn set_event_sender(&self, tx: broadcast::Sender<CalibrationEvent>) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(tx);
        }
    }

    pub fn calibration(&self) -> Arc<RwLock<CombinedCalibration>> {
        Arc::clone(&self.calibration)
    }

    pub fn sessions(&self) -> &CalibrationSessionStore {
        &self.sessions
    }

    pub fn options(&self) -> AggregationOptions {
        self.options
    }

    // ========================================================================
    // LOCK HELPERS
    // ========================================================================

    fn read(&self) -> Result<RwLockReadGuard<'_, CombinedCalibration>, CalibrationError> {
        self.calibration
            .read()
            .map_err(|_| CalibrationError::StatePoisoned)
            .inspect_err(|err| log_calibration_error(err, "CalibrationManager::read"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CombinedCalibration>, CalibrationError> {
        self.calibration
            .write()
            .map_err(|_| CalibrationError::StatePoisoned)
            .inspect_err(|err| log_calibration_error(err, "CalibrationManager::write"))
    }

    fn emit(&self, event: CalibrationEvent) {
        if let Some(tx) = self.events.lock().ok().and_then(|slot| slot.clone()) {
            let _ = tx.send(event);
        }
    }

    fn current_headphone(&self) -> Result<String, CalibrationError> {
        self.read()?
            .headphones
            .headphone_id()
            .map(str::to_string)
            .ok_or(CalibrationError::NoHeadphoneSelected)
    }

    // ========================================================================
    // HEADPHONE SELECTION
    // ========================================================================

    /// Select a headphone and return its bias map
    pub fn select_headphone(&self, headphone_id: &str) -> Result<EarFrequencyMap, CalibrationError> {
        let (selected, bias) = {
            let mut calibration = self.write()?;
            let bias = calibration.headphones.set_headphone(headphone_id).clone();
            let selected = calibration
                .headphones
                .headphone_id()
                .unwrap_or(headphone_id)
                .to_string();
            (selected, bias)
        };
        self.emit(CalibrationEvent::HeadphoneSelected {
            headphone_id: selected,
        });
        Ok(bias)
    }

    pub fn headphone_id(&self) -> Option<String> {
        self.read()
            .ok()
            .and_then(|c| c.headphones.headphone_id().map(str::to_string))
    }

    pub fn headphone_bias(&self) -> Result<EarFrequencyMap, CalibrationError> {
        Ok(self.read()?.headphones.bias_map())
    }

    // ========================================================================
    // CALIBRATION WORKFLOWS
    // ========================================================================

    /// Finish a normal-hearing calibration for the selected headphone
    ///
    /// The bias becomes the negated measurement; the measurement is also kept
    /// as a session so later recomputation includes it.
    pub fn finish_normal_hearing(
        &self,
        measured: &EarFrequencyMap,
        subject_id: &str,
    ) -> Result<PathBuf, CalibrationError> {
        let headphone_id = self.current_headphone()?;
        let bias = HeadphoneBiasStore::compute_bias_from_thresholds(measured);
        let points = bias.left.len() + bias.right.len();
        {
            let mut calibration = self.write()?;
            calibration.headphones.set_bias_map(bias)?;
            calibration.headphones.save()?;
        }

        let mut options = Map::new();
        options.insert("mode".to_string(), json!("normo_direct"));
        let session = CalibrationSession::new(subject_id, true, measured.clone(), None, options);
        let path = self.sessions.append(&headphone_id, &session)?;

        tracing::info!(
            "[CalibrationManager] Normal-hearing calibration stored for '{}' ({} points)",
            headphone_id,
            points
        );
        self.emit(CalibrationEvent::SessionStored {
            headphone_id: headphone_id.clone(),
            path: path.clone(),
        });
        self.emit(CalibrationEvent::BiasUpdated {
            headphone_id,
            points,
            outliers: 0,
        });
        Ok(path)
    }

    /// Store a calibration session and recompute the headphone bias
    ///
    /// `options` defaults to the configured aggregation options and is
    /// recorded in the session file.
    pub fn apply_calibration_bias(
        &self,
        headphone_id: &str,
        subject_id: &str,
        is_normal_hearing: bool,
        measured: &EarFrequencyMap,
        reference: Option<&EarFrequencyMap>,
        options: Option<AggregationOptions>,
    ) -> Result<AggregationReport, CalibrationError> {
        if headphone_id.trim().is_empty() {
            return Err(CalibrationError::NoHeadphoneSelected);
        }
        let options = options.unwrap_or(self.options);

        let mut recorded = Map::new();
        recorded.insert("aggregator".to_string(), json!(options.aggregator.as_str()));
        recorded.insert("smoothing".to_string(), json!(options.smoothing));
        recorded.insert("outlier_abs".to_string(), json!(options.outlier_abs_db));
        let session = CalibrationSession::new(
            subject_id,
            is_normal_hearing,
            measured.clone(),
            reference.cloned(),
            recorded,
        );
        let path = self.sessions.append(headphone_id, &session)?;
        self.emit(CalibrationEvent::SessionStored {
            headphone_id: headphone_id.to_string(),
            path,
        });

        self.recompute_with(headphone_id, &options)
    }

    /// Recompute the bias of `headphone_id` from its stored sessions
    pub fn recompute(&self, headphone_id: &str) -> Result<AggregationReport, CalibrationError> {
        self.recompute_with(headphone_id, &self.options)
    }

    pub fn recompute_with(
        &self,
        headphone_id: &str,
        options: &AggregationOptions,
    ) -> Result<AggregationReport, CalibrationError> {
        let report = {
            let mut calibration = self.write()?;
            BiasAggregator::recompute(
                &self.sessions,
                &mut calibration.headphones,
                headphone_id,
                &self.frequencies,
                options,
            )?
        };
        self.emit(CalibrationEvent::BiasUpdated {
            headphone_id: headphone_id.to_string(),
            points: report.bias.left.len() + report.bias.right.len(),
            outliers: report.outliers.len(),
        });
        Ok(report)
    }

    pub fn list_sessions(&self, headphone_id: &str) -> Result<Vec<SessionSummary>, CalibrationError> {
        self.sessions.list(headphone_id)
    }

    /// Edit one bias point of the selected headphone and save
    pub fn set_headphone_bias(
        &self,
        ear: Ear,
        frequency_hz: u32,
        bias_db: f64,
    ) -> Result<PathBuf, CalibrationError> {
        if frequency_hz == 0 || !bias_db.is_finite() {
            return Err(CalibrationError::InvalidProfile {
                reason: format!("bias point {} Hz = {} dB", frequency_hz, bias_db),
            });
        }
        let mut calibration = self.write()?;
        calibration.headphones.set_bias(ear, frequency_hz, bias_db)?;
        calibration.headphones.save()
    }

    // ========================================================================
    // EXPORT / IMPORT
    // ========================================================================

    /// Write `{hp_id, bias_db, meta}` for `headphone_id` to `destination`
    ///
    /// Selects the headphone as a side effect.
    pub fn export_headphone_calibration(
        &self,
        headphone_id: &str,
        destination: &Path,
    ) -> Result<PathBuf, CalibrationError> {
        let bias = self.select_headphone(headphone_id)?;
        let document = json!({
            "hp_id": headphone_id,
            "bias_db": bias.to_value(),
            "meta": {
                "exported_at": Local::now().to_rfc3339(),
            },
        });
        write_json_atomic(destination, &document)?;
        tracing::info!(
            "[CalibrationManager] Exported '{}' to {}",
            headphone_id,
            destination.display()
        );
        self.emit(CalibrationEvent::Exported {
            headphone_id: headphone_id.to_string(),
            path: destination.to_path_buf(),
        });
        Ok(destination.to_path_buf())
    }

    /// Load an exported file, select its headphone and save the bias
    ///
    /// Returns the headphone id the bias was stored under.
    pub fn import_headphone_calibration(&self, source: &Path) -> Result<String, CalibrationError> {
        let document: Value = read_json(source)?.ok_or_else(|| CalibrationError::Storage {
            path: source.display().to_string(),
            reason: "file not found".to_string(),
        })?;

        let headphone_id = document
            .get("hp_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(IMPORTED_HEADPHONE_ID)
            .to_string();
        let empty = Value::Object(Map::new());
        let bias = document
            .get("bias_db")
            .or_else(|| document.get("bias"))
            .unwrap_or(&empty);

        let stored_as = {
            let mut calibration = self.write()?;
            calibration.headphones.set_headphone(&headphone_id);
            calibration.headphones.set_bias_map_from_value(bias)?;
            calibration.headphones.save()?;
            calibration
                .headphones
                .headphone_id()
                .unwrap_or(&headphone_id)
                .to_string()
        };

        tracing::info!(
            "[CalibrationManager] Imported '{}' from {}",
            stored_as,
            source.display()
        );
        self.emit(CalibrationEvent::Imported {
            headphone_id: stored_as.clone(),
            path: source.to_path_buf(),
        });
        Ok(stored_as)
    }
}
