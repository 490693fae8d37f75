// AudiometerContext: Dependency Injection Container
// Wires configuration, tone engine, calibration stores and protocols

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audio::{find_device_match, list_output_devices, NullOutput, OutputBackend, OutputDeviceInfo, ToneEngine};
use crate::calibration::{
    CalibrationSessionStore, CombinedCalibration, CorrectionSource, DeviceCalibrationStore,
    HeadphoneBiasStore, ReferenceProfile,
};
use crate::config::AppConfig;
use crate::ear::Ear;
use crate::error::{log_audio_error, log_calibration_error, AudioError, CalibrationError, ToneError};
use crate::managers::{BroadcastChannelManager, CalibrationManager};
use crate::screening::{
    EventEmitter, ManualParams, ManualThresholdEntry, ResponseSignal, ResultsStore, Staircase,
    StaircaseParams,
};

/// Outcome of binding an output device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSelection {
    pub name: String,
    pub stable_id: String,
    /// An existing device profile was activated (otherwise a zeroed one was created)
    pub profile_loaded: bool,
    pub headphone_id: Option<String>,
}

/// AudiometerContext: single owner of the application state
///
/// - ToneEngine on the configured output backend
/// - Device offsets + headphone bias behind one `CombinedCalibration`
/// - CalibrationManager for sessions, recomputation and export/import
/// - Shared ResultsStore and ResponseSignal for the screening protocols
/// - Screening/calibration broadcast channels
pub struct AudiometerContext {
    config: AppConfig,
    engine: Arc<ToneEngine>,
    calibration: Arc<RwLock<CombinedCalibration>>,
    calibration_manager: CalibrationManager,
    broadcasts: BroadcastChannelManager,
    results: ResultsStore,
    response: ResponseSignal,
}

impl AudiometerContext {
    pub fn new(config: AppConfig, backend: Arc<dyn OutputBackend>) -> Self {
        let storage = &config.storage;
        let device = DeviceCalibrationStore::open(
            storage.device_calibration_path(),
            &config.calibration.frequencies_hz,
        );
        let headphones = HeadphoneBiasStore::new(storage.headphones_dir());
        let calibration = Arc::new(RwLock::new(CombinedCalibration::new(device, headphones)));

        let broadcasts = BroadcastChannelManager::new();
        broadcasts.init_screening();
        let calibration_manager = CalibrationManager::new(
            Arc::clone(&calibration),
            CalibrationSessionStore::new(storage.headphones_dir()),
            &config.calibration,
        );
        calibration_manager.set_event_sender(broadcasts.init_calibration());

        tracing::info!(
            "[AudiometerContext] Data dir {}, strategy {:?}",
            storage.data_dir.display(),
            config.audio.strategy
        );

        Self {
            engine: Arc::new(ToneEngine::new(backend, &config.audio)),
            config,
            calibration,
            calibration_manager,
            broadcasts,
            results: ResultsStore::new(),
            response: ResponseSignal::new(),
        }
    }

    /// Context on the platform's real output (cpal on desktop)
    pub fn with_default_output(config: AppConfig) -> Self {
        #[cfg(not(target_os = "android"))]
        let backend: Arc<dyn OutputBackend> = Arc::new(crate::audio::CpalOutput::new());
        #[cfg(target_os = "android")]
        let backend: Arc<dyn OutputBackend> = Arc::new(NullOutput::new());
        Self::new(config, backend)
    }

    /// Context without audio hardware
    pub fn headless(config: AppConfig) -> (Self, Arc<NullOutput>) {
        let backend = Arc::new(NullOutput::new());
        (Self::new(config, backend.clone()), backend)
    }

    // ========================================================================
    // LOCK HELPER METHODS
    // ========================================================================

    fn read_calibration(&self) -> Result<RwLockReadGuard<'_, CombinedCalibration>, CalibrationError> {
        self.calibration
            .read()
            .map_err(|_| CalibrationError::StatePoisoned)
    }

    fn write_calibration(&self) -> Result<RwLockWriteGuard<'_, CombinedCalibration>, CalibrationError> {
        self.calibration
            .write()
            .map_err(|_| CalibrationError::StatePoisoned)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<ToneEngine> {
        &self.engine
    }

    pub fn calibration(&self) -> Arc<RwLock<CombinedCalibration>> {
        Arc::clone(&self.calibration)
    }

    pub fn correction_source(&self) -> Arc<dyn CorrectionSource> {
        self.calibration.clone()
    }

    pub fn calibration_manager(&self) -> &CalibrationManager {
        &self.calibration_manager
    }

    pub fn broadcasts(&self) -> &BroadcastChannelManager {
        &self.broadcasts
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    pub fn response(&self) -> &ResponseSignal {
        &self.response
    }

    // ========================================================================
    // OUTPUT DEVICE
    // ========================================================================

    pub fn list_output_devices(&self) -> Result<Vec<OutputDeviceInfo>, AudioError> {
        list_output_devices()
    }

    /// Resolve `query` against the device catalogue and bind to it
    pub fn select_output_device(&self, query: &str) -> Result<DeviceSelection, ToneError> {
        let devices = list_output_devices()?;
        let Some(device) = find_device_match(&devices, query) else {
            let err = AudioError::DeviceUnavailable {
                device: query.to_string(),
            };
            log_audio_error(&err, "AudiometerContext::select_output_device");
            return Err(err.into());
        };
        self.apply_device_selection(&device.name, &device.stable_id)
    }

    /// Bind the engine to `name` and activate its calibration
    ///
    /// Loads the device profile if one exists, otherwise creates a zeroed
    /// one. Without a selected headphone the device's stable id becomes the
    /// headphone id.
    pub fn apply_device_selection(&self, name: &str, stable_id: &str) -> Result<DeviceSelection, ToneError> {
        self.engine.set_output_device(Some(name))?;

        let profile_loaded = {
            let mut calibration = self.write_calibration()?;
            let existing = calibration.device.has_profile(name);
            if existing {
                calibration.device.load_profile(name)?;
            } else {
                calibration.device.set_active(name, true);
                calibration
                    .device
                    .save()
                    .inspect_err(|err| log_calibration_error(err, "AudiometerContext::apply_device_selection"))?;
                tracing::info!("[AudiometerContext] New zeroed profile for '{}'", name);
            }
            existing
        };

        if self.calibration_manager.headphone_id().is_none() {
            self.calibration_manager.select_headphone(stable_id)?;
        }

        Ok(DeviceSelection {
            name: name.to_string(),
            stable_id: stable_id.to_string(),
            profile_loaded,
            headphone_id: self.calibration_manager.headphone_id(),
        })
    }

    /// Set one device offset on the active device and save
    pub fn set_device_offset(&self, frequency_hz: u32, offset_db: f64) -> Result<PathBuf, CalibrationError> {
        let mut calibration = self.write_calibration()?;
        if calibration.device.active_device().is_none() {
            return Err(CalibrationError::ProfileNotFound {
                device: "<none>".to_string(),
            });
        }
        calibration.device.set_offset(frequency_hz, offset_db);
        calibration.device.save().map(Path::to_path_buf)
    }

    pub fn total_correction(&self, ear: Ear, frequency_hz: u32) -> Result<f64, CalibrationError> {
        Ok(self.read_calibration()?.get_total_offset(ear, frequency_hz))
    }

    // ========================================================================
    // TONES
    // ========================================================================

    /// Load a reference profile file and install it on the engine
    pub fn load_reference_profile(&self, path: &Path) -> Result<ReferenceProfile, ToneError> {
        let profile = ReferenceProfile::load(path)
            .inspect_err(|err| log_calibration_error(err, "AudiometerContext::load_reference_profile"))?;
        self.engine.set_profile(profile.clone())?;
        Ok(profile)
    }

    /// Play a tone with the combined calibration applied
    pub fn play_tone(&self, frequency_hz: u32, level_db_hl: f64, ear: Ear) -> Result<(), ToneError> {
        let correction = self.total_correction(ear, frequency_hz)?;
        self.engine
            .play_tone_corrected(frequency_hz, level_db_hl, ear, correction)
    }

    pub fn stop_tone(&self, immediate: bool) -> Result<(), ToneError> {
        Ok(self.engine.stop(immediate)?)
    }

    // ========================================================================
    // PROTOCOLS
    // ========================================================================

    fn screening_events(&self) -> EventEmitter {
        match self.broadcasts.screening_sender() {
            Some(tx) => EventEmitter::new(tx),
            None => EventEmitter::new(self.broadcasts.init_screening()),
        }
    }

    /// Staircase over the configured frequencies, recording into `results()`
    pub fn staircase(&self) -> Staircase {
        Staircase::new(
            self.engine.clone(),
            self.correction_source(),
            StaircaseParams::from(&self.config.screening),
        )
        .with_response(self.response.clone())
        .with_results(self.results.clone())
        .with_events(self.screening_events())
    }

    /// Manual entry recording into `results`
    ///
    /// Calibration runs pass their own store so patient results stay apart.
    pub fn manual_entry(&self, results: ResultsStore) -> ManualThresholdEntry {
        ManualThresholdEntry::new(
            self.engine.clone(),
            self.correction_source(),
            ManualParams::from(&self.config.screening),
        )
        .with_results(results)
        .with_events(self.screening_events())
    }
}
