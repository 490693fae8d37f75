// ManualThresholdEntry: operator-paced threshold search
//
// The operator moves a cursor over (frequency, level, ear), toggles a
// looping tone and commits the cursor as a threshold. Every cursor move
// stops the tone first. The loop thread carries the generation it was
// started with and only plays while that generation is current; the check
// and the play happen under the same lock a move takes, so a stale
// iteration never restarts the tone.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::events::{EventEmitter, ScreeningEvent};
use super::player::TonePlayer;
use super::results::{ResultsStore, ThresholdMeasurement};
use super::timing::{IsiSource, RandomIsi, Sleeper, ThreadSleeper};
use crate::calibration::CorrectionSource;
use crate::config::ScreeningConfig;
use crate::ear::Ear;
use crate::error::{log_screening_error, ErrorCode, ScreeningError};

#[derive(Debug, Clone, PartialEq)]
pub struct ManualParams {
    pub frequencies_hz: Vec<u32>,
    pub min_level_db_hl: f64,
    pub max_level_db_hl: f64,
    pub start_level_db_hl: f64,
    pub step_db: f64,
    pub tone_duration_ms: u64,
    pub isi_ms_min: u64,
    pub isi_ms_max: u64,
}

impl From<&ScreeningConfig> for ManualParams {
    fn from(config: &ScreeningConfig) -> Self {
        Self {
            frequencies_hz: config.frequencies_hz.clone(),
            min_level_db_hl: config.min_level_db_hl,
            max_level_db_hl: config.max_level_db_hl,
            start_level_db_hl: config.start_level_db_hl,
            step_db: config.step_db,
            tone_duration_ms: config.tone_duration_ms,
            isi_ms_min: config.isi_ms_min,
            isi_ms_max: config.isi_ms_max,
        }
    }
}

/// Cursor snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualCursor {
    pub frequency_index: usize,
    pub frequency_hz: u32,
    pub level_db_hl: f64,
    pub ear: Ear,
}

struct CursorState {
    frequency_index: usize,
    level_db_hl: f64,
    ear: Ear,
    tone_on: bool,
    generation: u64,
}

struct Shared {
    player: Arc<dyn TonePlayer>,
    correction: Arc<dyn CorrectionSource>,
    results: ResultsStore,
    events: EventEmitter,
    sleeper: Arc<dyn Sleeper>,
    isi: Arc<dyn IsiSource>,
    params: ManualParams,
    state: Mutex<CursorState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CursorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cursor_of(&self, state: &CursorState) -> ManualCursor {
        ManualCursor {
            frequency_index: state.frequency_index,
            frequency_hz: self
                .params
                .frequencies_hz
                .get(state.frequency_index)
                .copied()
                .unwrap_or(0),
            level_db_hl: state.level_db_hl,
            ear: state.ear,
        }
    }

    /// Invalidate the loop and silence the output; caller holds the lock
    fn halt(&self, state: &mut CursorState) {
        state.generation = state.generation.wrapping_add(1);
        state.tone_on = false;
        if let Err(err) = self.player.stop(true) {
            tracing::warn!("[ManualEntry] Stop failed: {}", err);
        }
    }

    fn emit_cursor(&self, state: &CursorState) {
        let cursor = self.cursor_of(state);
        self.events.emit(ScreeningEvent::CursorMoved {
            ear: cursor.ear,
            frequency_hz: cursor.frequency_hz,
            level_db_hl: cursor.level_db_hl,
        });
    }

    fn run_loop(&self, generation: u64) {
        let tone = Duration::from_millis(self.params.tone_duration_ms);
        loop {
            {
                let mut state = self.lock();
                if state.generation != generation || !state.tone_on {
                    return;
                }
                let cursor = self.cursor_of(&state);
                self.events.emit(ScreeningEvent::ManualStatus {
                    ear: cursor.ear,
                    frequency_hz: cursor.frequency_hz,
                    level_db_hl: cursor.level_db_hl,
                });
                let correction_db = self
                    .correction
                    .total_correction(cursor.ear, cursor.frequency_hz);
                if let Err(err) = self.player.play_tone(
                    cursor.frequency_hz,
                    cursor.level_db_hl,
                    cursor.ear,
                    correction_db,
                ) {
                    let err = ScreeningError::from(err);
                    log_screening_error(&err, "ManualThresholdEntry::loop");
                    state.tone_on = false;
                    self.events.emit(ScreeningEvent::Error {
                        code: err.code(),
                        message: err.message(),
                    });
                    return;
                }
            }

            self.sleeper.sleep(tone);
            {
                let state = self.lock();
                if state.generation != generation {
                    return;
                }
                let _ = self.player.stop(false);
            }
            let isi = self
                .isi
                .next_isi(self.params.isi_ms_min, self.params.isi_ms_max);
            self.sleeper.sleep(isi);
        }
    }
}

pub struct ManualThresholdEntry {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ManualThresholdEntry {
    pub fn new(
        player: Arc<dyn TonePlayer>,
        correction: Arc<dyn CorrectionSource>,
        params: ManualParams,
    ) -> Self {
        let level = params
            .start_level_db_hl
            .clamp(params.min_level_db_hl, params.max_level_db_hl.max(params.min_level_db_hl));
        Self {
            shared: Arc::new(Shared {
                player,
                correction,
                results: ResultsStore::new(),
                events: EventEmitter::silent(),
                sleeper: Arc::new(ThreadSleeper),
                isi: Arc::new(RandomIsi::new()),
                params,
                state: Mutex::new(CursorState {
                    frequency_index: 0,
                    level_db_hl: level,
                    ear: Ear::Right,
                    tone_on: false,
                    generation: 0,
                }),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Apply a builder change; only possible before the first tone
    fn configure(mut self, f: impl FnOnce(&mut Shared)) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => f(shared),
            None => tracing::warn!("[ManualEntry] Ignoring reconfiguration of a running entry"),
        }
        self
    }

    pub fn with_results(self, results: ResultsStore) -> Self {
        self.configure(|s| s.results = results)
    }

    pub fn with_events(self, events: EventEmitter) -> Self {
        self.configure(|s| s.events = events)
    }

    pub fn with_sleeper(self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.configure(|s| s.sleeper = sleeper)
    }

    pub fn with_isi(self, isi: Arc<dyn IsiSource>) -> Self {
        self.configure(|s| s.isi = isi)
    }

    pub fn results(&self) -> &ResultsStore {
        &self.shared.results
    }

    pub fn cursor(&self) -> ManualCursor {
        let state = self.shared.lock();
        self.shared.cursor_of(&state)
    }

    pub fn is_tone_on(&self) -> bool {
        self.shared.lock().tone_on
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    /// Announce the cursor without playing
    pub fn start(&self) -> Result<(), ScreeningError> {
        if self.shared.params.frequencies_hz.is_empty() {
            return Err(ScreeningError::EmptyFrequencyList);
        }
        let mut state = self.shared.lock();
        self.shared.halt(&mut state);
        self.shared.emit_cursor(&state);
        Ok(())
    }

    pub fn stop(&self) {
        self.stop_tone();
        tracing::info!("[ManualEntry] Session stopped");
    }

    // ========================================================================
    // CURSOR
    // ========================================================================

    fn move_cursor(&self, apply: impl FnOnce(&mut CursorState, &ManualParams)) -> ManualCursor {
        let mut state = self.shared.lock();
        self.shared.halt(&mut state);
        apply(&mut state, &self.shared.params);
        self.shared.emit_cursor(&state);
        self.shared.cursor_of(&state)
    }

    /// Step through the frequency list, clamped to its ends
    pub fn move_frequency(&self, delta: i32) -> ManualCursor {
        self.move_cursor(|state, params| {
            let last = params.frequencies_hz.len().saturating_sub(1) as i64;
            let index = (state.frequency_index as i64 + delta as i64).clamp(0, last);
            state.frequency_index = index as usize;
        })
    }

    /// Move by `delta_steps` level steps, clamped to the level range
    pub fn move_level(&self, delta_steps: i32) -> ManualCursor {
        self.move_cursor(|state, params| {
            let level = state.level_db_hl + delta_steps as f64 * params.step_db;
            state.level_db_hl = level
                .min(params.max_level_db_hl)
                .max(params.min_level_db_hl);
        })
    }

    pub fn toggle_ear(&self) -> ManualCursor {
        self.move_cursor(|state, _| state.ear = state.ear.other())
    }

    pub fn set_ear(&self, ear: Ear) -> ManualCursor {
        self.move_cursor(|state, _| state.ear = ear)
    }

    // ========================================================================
    // TONE
    // ========================================================================

    /// Start the looping tone at the cursor; no-op if already on
    pub fn start_tone(&self) -> Result<(), ScreeningError> {
        if self.shared.params.frequencies_hz.is_empty() {
            return Err(ScreeningError::EmptyFrequencyList);
        }
        let generation = {
            let mut state = self.shared.lock();
            if state.tone_on {
                return Ok(());
            }
            state.generation = state.generation.wrapping_add(1);
            state.tone_on = true;
            state.generation
        };

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || shared.run_loop(generation));
        if let Ok(mut worker) = self.worker.lock() {
            // the previous loop exits on its own once its generation is stale
            *worker = Some(handle);
        }
        Ok(())
    }

    pub fn stop_tone(&self) {
        let mut state = self.shared.lock();
        self.shared.halt(&mut state);
    }

    /// Returns whether the tone is on afterwards
    pub fn toggle_tone(&self) -> Result<bool, ScreeningError> {
        if self.is_tone_on() {
            self.stop_tone();
            Ok(false)
        } else {
            self.start_tone()?;
            Ok(true)
        }
    }

    /// Record the cursor as a threshold and stop the tone
    pub fn commit(&self) -> Result<ThresholdMeasurement, ScreeningError> {
        if self.shared.params.frequencies_hz.is_empty() {
            return Err(ScreeningError::EmptyFrequencyList);
        }
        let mut state = self.shared.lock();
        let cursor = self.shared.cursor_of(&state);
        self.shared
            .results
            .add(cursor.ear, cursor.frequency_hz, cursor.level_db_hl);
        self.shared.events.emit(ScreeningEvent::PointMarked {
            ear: cursor.ear,
            frequency_hz: cursor.frequency_hz,
            level_db_hl: cursor.level_db_hl,
        });
        self.shared.halt(&mut state);
        tracing::info!(
            "[ManualEntry] Marked {} {} Hz = {} dB HL",
            cursor.ear.clinical_code(),
            cursor.frequency_hz,
            cursor.level_db_hl
        );
        Ok(ThresholdMeasurement {
            ear: cursor.ear,
            frequency_hz: cursor.frequency_hz,
            level_db_hl: cursor.level_db_hl,
        })
    }
}

impl Drop for ManualThresholdEntry {
    fn drop(&mut self) {
        self.stop_tone();
    }
}
