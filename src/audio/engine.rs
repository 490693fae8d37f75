//! ToneEngine: calibrated pure-tone output
//!
//! The engine owns one lazily opened output stream and the shared
//! [`PlaybackState`] its callback renders from. Control calls only stage
//! parameters under the state lock; the callback ramps toward them.

use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{OutputBackend, StreamRequest};
use super::level::AmplitudeStrategy;
use super::render::{ChannelMap, PlaybackState, ToneRenderer};
use crate::calibration::ReferenceProfile;
use crate::config::AudioConfig;
use crate::ear::Ear;
use crate::error::{log_audio_error, AudioError, CalibrationError, ErrorCode, ToneError};

struct EngineSettings {
    profile: Option<ReferenceProfile>,
    strategy: AmplitudeStrategy,
    sample_rate: u32,
    channel_map: ChannelMap,
    device: Option<String>,
    auto_stop_seconds: f64,
    block_size: u32,
    /// Set after a failed open; cleared by selecting a device
    device_failed: bool,
}

pub struct ToneEngine {
    backend: Arc<dyn OutputBackend>,
    state: Arc<Mutex<PlaybackState>>,
    settings: Mutex<EngineSettings>,
}

impl ToneEngine {
    pub fn new(backend: Arc<dyn OutputBackend>, config: &AudioConfig) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(PlaybackState::default())),
            settings: Mutex::new(EngineSettings {
                profile: None,
                strategy: config.strategy,
                sample_rate: config.sample_rate,
                channel_map: ChannelMap::default(),
                device: None,
                auto_stop_seconds: config.auto_stop_seconds,
                block_size: config.block_size,
                device_failed: false,
            }),
        }
    }

    // ========================================================================
    // LOCK HELPERS
    // ========================================================================

    fn lock_state(&self) -> Result<MutexGuard<'_, PlaybackState>, AudioError> {
        self.state.lock().map_err(|_| AudioError::LockPoisoned {
            component: "playback_state".to_string(),
        })
    }

    fn lock_settings(&self) -> Result<MutexGuard<'_, EngineSettings>, AudioError> {
        self.settings.lock().map_err(|_| AudioError::LockPoisoned {
            component: "engine_settings".to_string(),
        })
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Install a reference profile
    ///
    /// Takes sample rate and channel routing from the profile; ears the
    /// profile does not route fall back to the default layout. A change to
    /// either closes the stream; it reopens with the new layout on the next
    /// tone.
    pub fn set_profile(&self, profile: ReferenceProfile) -> Result<(), AudioError> {
        let rebuild = {
            let mut settings = self.lock_settings()?;
            let mut channel_map = ChannelMap::default();
            channel_map.apply(profile.routing);
            let mut rebuild = channel_map != settings.channel_map;
            settings.channel_map = channel_map;
            if let Some(rate) = profile.sample_rate().filter(|r| *r > 0) {
                rebuild |= rate != settings.sample_rate;
                settings.sample_rate = rate;
            }
            tracing::info!(
                "[ToneEngine] Profile '{}' installed (max {} dB HL, {} Hz, map L={} R={})",
                profile.device.id,
                profile.max_db_hl,
                settings.sample_rate,
                settings.channel_map.left,
                settings.channel_map.right
            );
            settings.profile = Some(profile);
            rebuild
        };
        if rebuild {
            self.shutdown_stream()?;
        }
        Ok(())
    }

    pub fn clear_profile(&self) -> Result<(), AudioError> {
        self.lock_settings()?.profile = None;
        Ok(())
    }

    pub fn set_strategy(&self, strategy: AmplitudeStrategy) -> Result<(), AudioError> {
        self.lock_settings()?.strategy = strategy;
        Ok(())
    }

    /// Bind to another output device (`None` = host default)
    ///
    /// Unchanged ids are a no-op unless the previous open failed, in which
    /// case selecting again re-enables playback.
    pub fn set_output_device(&self, device: Option<&str>) -> Result<(), AudioError> {
        let changed = {
            let mut settings = self.lock_settings()?;
            let changed = settings.device.as_deref() != device;
            if !changed && !settings.device_failed {
                return Ok(());
            }
            settings.device = device.map(str::to_string);
            settings.device_failed = false;
            changed
        };
        if changed {
            tracing::info!("[ToneEngine] Output device -> {}", device.unwrap_or("default"));
            self.shutdown_stream()?;
        }
        Ok(())
    }

    // ========================================================================
    // PLAYBACK
    // ========================================================================

    pub fn play_tone(&self, frequency_hz: u32, level_db_hl: f64, ear: Ear) -> Result<(), ToneError> {
        self.play_tone_corrected(frequency_hz, level_db_hl, ear, 0.0)
    }

    /// Start (or retarget) a tone with an additional dB correction
    ///
    /// Fails with `CalibrationMissing`/`CalibrationGap` before touching the
    /// stream, and with `DeviceUnavailable` if the stream cannot be opened.
    pub fn play_tone_corrected(
        &self,
        frequency_hz: u32,
        level_db_hl: f64,
        ear: Ear,
        correction_db: f64,
    ) -> Result<(), ToneError> {
        let amplitude = {
            let settings = self.lock_settings()?;
            if frequency_hz == 0 {
                return Err(CalibrationError::CalibrationGap { ear, frequency_hz }.into());
            }
            settings.strategy.amplitude(
                settings.profile.as_ref(),
                ear,
                frequency_hz,
                level_db_hl,
                correction_db,
            )?
        };

        self.ensure_stream()?;

        let mut state = self.lock_state()?;
        state.frequency_hz = frequency_hz as f64;
        state.ear = ear;
        state.target_gain = amplitude;
        state.playing = true;
        state.running = true;
        state.elapsed_samples = 0;
        drop(state);

        tracing::debug!(
            "[ToneEngine] Tone {} Hz {} dB HL ({:+} dB) {} -> amplitude {:.6}",
            frequency_hz,
            level_db_hl,
            correction_db,
            ear.clinical_code(),
            amplitude
        );
        Ok(())
    }

    /// Stop the tone
    ///
    /// `immediate` zeroes both gains before returning; otherwise the
    /// callback ramps the current gain down over the following buffers.
    pub fn stop(&self, immediate: bool) -> Result<(), AudioError> {
        let mut state = self.lock_state()?;
        if immediate {
            state.silence();
        } else {
            state.playing = false;
            state.target_gain = 0.0;
        }
        Ok(())
    }

    /// Close the stream and reset playback
    pub fn shutdown_stream(&self) -> Result<(), AudioError> {
        self.backend.close_stream();
        self.lock_state()?.silence();
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn playback(&self) -> Result<PlaybackState, AudioError> {
        Ok(self.lock_state()?.clone())
    }

    pub fn is_playing(&self) -> bool {
        self.lock_state().map(|s| s.playing).unwrap_or(false)
    }

    pub fn sample_rate(&self) -> Result<u32, AudioError> {
        Ok(self.lock_settings()?.sample_rate)
    }

    pub fn channel_map(&self) -> Result<ChannelMap, AudioError> {
        Ok(self.lock_settings()?.channel_map)
    }

    pub fn channel_count(&self) -> Result<u16, AudioError> {
        Ok(self.lock_settings()?.channel_map.channel_count())
    }

    pub fn strategy(&self) -> Result<AmplitudeStrategy, AudioError> {
        Ok(self.lock_settings()?.strategy)
    }

    pub fn profile(&self) -> Result<Option<ReferenceProfile>, AudioError> {
        Ok(self.lock_settings()?.profile.clone())
    }

    pub fn output_device(&self) -> Result<Option<String>, AudioError> {
        Ok(self.lock_settings()?.device.clone())
    }

    pub fn is_stream_open(&self) -> bool {
        self.backend.is_open()
    }

    fn ensure_stream(&self) -> Result<(), AudioError> {
        if self.backend.is_open() {
            return Ok(());
        }
        let mut settings = self.lock_settings()?;
        let device_label = settings.device.clone().unwrap_or_else(|| "default".to_string());
        if settings.device_failed {
            return Err(AudioError::DeviceUnavailable {
                device: device_label,
            });
        }

        let channels = settings.channel_map.channel_count();
        let request = StreamRequest {
            device: settings.device.clone(),
            sample_rate: settings.sample_rate,
            channels,
            block_size: settings.block_size,
        };
        let renderer = ToneRenderer::new(
            Arc::clone(&self.state),
            settings.sample_rate,
            channels,
            settings.channel_map,
            settings.auto_stop_seconds,
        );

        match self.backend.open_stream(&request, renderer) {
            Ok(()) => Ok(()),
            Err(AudioError::AlreadyRunning) => Ok(()),
            Err(err) => {
                log_audio_error(&err, "ToneEngine::ensure_stream");
                settings.device_failed = true;
                Err(match err {
                    AudioError::DeviceUnavailable { .. } => err,
                    other => AudioError::DeviceUnavailable {
                        device: format!("{} ({})", device_label, other.message()),
                    },
                })
            }
        }
    }
}

impl Drop for ToneEngine {
    fn drop(&mut self) {
        self.backend.close_stream();
    }
}

#[cfg(test)]
mod tests;
