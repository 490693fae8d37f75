// Staircase: automated ascending threshold search
//
// Per frequency: ascend from the floor until the operator signals a
// response, then verify by restarting two steps below the last confirmed
// level until some level has been confirmed twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::events::{EventEmitter, ScreeningEvent};
use super::player::TonePlayer;
use super::response::ResponseSignal;
use super::results::{ResultsStore, ThresholdMeasurement};
use super::timing::{IsiSource, RandomIsi, Sleeper, ThreadSleeper};
use crate::calibration::CorrectionSource;
use crate::config::ScreeningConfig;
use crate::ear::Ear;
use crate::error::{log_screening_error, ErrorCode, ScreeningError};

const LEVEL_EPSILON: f64 = 1e-9;

/// Protocol parameters for one run
#[derive(Debug, Clone, PartialEq)]
pub struct StaircaseParams {
    pub frequencies_hz: Vec<u32>,
    pub min_level_db_hl: f64,
    pub max_level_db_hl: f64,
    pub step_db: f64,
    pub tone_duration_ms: u64,
    pub isi_ms_min: u64,
    pub isi_ms_max: u64,
    pub verification_max_cycles: u32,
}

impl From<&ScreeningConfig> for StaircaseParams {
    fn from(config: &ScreeningConfig) -> Self {
        Self {
            frequencies_hz: config.frequencies_hz.clone(),
            min_level_db_hl: config.min_level_db_hl,
            max_level_db_hl: config.max_level_db_hl,
            step_db: config.step_db,
            tone_duration_ms: config.tone_duration_ms,
            isi_ms_min: config.isi_ms_min,
            isi_ms_max: config.isi_ms_max,
            verification_max_cycles: config.verification_max_cycles,
        }
    }
}

impl Default for StaircaseParams {
    fn default() -> Self {
        Self::from(&ScreeningConfig::default())
    }
}

impl StaircaseParams {
    pub fn validate(&self) -> Result<(), ScreeningError> {
        if self.frequencies_hz.is_empty() {
            return Err(ScreeningError::EmptyFrequencyList);
        }
        let usable = self.step_db.is_finite()
            && self.step_db > 0.0
            && self.min_level_db_hl.is_finite()
            && self.max_level_db_hl.is_finite()
            && self.min_level_db_hl <= self.max_level_db_hl;
        if !usable {
            return Err(ScreeningError::InvalidLevelRange {
                min: self.min_level_db_hl,
                max: self.max_level_db_hl,
                step: self.step_db,
            });
        }
        Ok(())
    }

    /// Stimuli presented by one full ascent from the floor
    pub fn levels_per_ascent(&self) -> usize {
        ((self.max_level_db_hl - self.min_level_db_hl) / self.step_db + LEVEL_EPSILON).floor()
            as usize
            + 1
    }
}

/// Thresholds recorded by one `run_ear`
#[derive(Debug, Clone, PartialEq)]
pub struct StaircaseOutcome {
    pub ear: Ear,
    pub thresholds: Vec<ThresholdMeasurement>,
    pub cancelled: bool,
}

enum Ascent {
    Heard(f64),
    NotHeard,
    Cancelled,
}

/// Occurrence count per confirmed level
#[derive(Debug, Default)]
struct LevelTally {
    counts: Vec<(f64, u32)>,
}

impl LevelTally {
    fn record(&mut self, level: f64) -> u32 {
        if let Some(entry) = self
            .counts
            .iter_mut()
            .find(|(l, _)| (*l - level).abs() < LEVEL_EPSILON)
        {
            entry.1 += 1;
            return entry.1;
        }
        self.counts.push((level, 1));
        1
    }

    /// Most frequent level, lowest on ties
    fn mode(&self) -> Option<f64> {
        let best = self.counts.iter().map(|(_, c)| *c).max()?;
        self.counts
            .iter()
            .filter(|(_, c)| *c == best)
            .map(|(l, _)| *l)
            .min_by(f64::total_cmp)
    }
}

pub struct Staircase {
    player: Arc<dyn TonePlayer>,
    correction: Arc<dyn CorrectionSource>,
    response: ResponseSignal,
    results: ResultsStore,
    events: EventEmitter,
    sleeper: Arc<dyn Sleeper>,
    isi: Arc<dyn IsiSource>,
    params: StaircaseParams,
    stop_flag: AtomicBool,
}

impl Staircase {
    pub fn new(
        player: Arc<dyn TonePlayer>,
        correction: Arc<dyn CorrectionSource>,
        params: StaircaseParams,
    ) -> Self {
        Self {
            player,
            correction,
            response: ResponseSignal::new(),
            results: ResultsStore::new(),
            events: EventEmitter::silent(),
            sleeper: Arc::new(ThreadSleeper),
            isi: Arc::new(RandomIsi::new()),
            params,
            stop_flag: AtomicBool::new(false),
        }
    }

    pub fn with_response(mut self, response: ResponseSignal) -> Self {
        self.response = response;
        self
    }

    pub fn with_results(mut self, results: ResultsStore) -> Self {
        self.results = results;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_isi(mut self, isi: Arc<dyn IsiSource>) -> Self {
        self.isi = isi;
        self
    }

    pub fn response(&self) -> &ResponseSignal {
        &self.response
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    pub fn params(&self) -> &StaircaseParams {
        &self.params
    }

    /// Request cancellation and silence the output at once
    pub fn cancel(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Err(err) = self.player.stop(true) {
            tracing::warn!("[Staircase] Stop on cancel failed: {}", err);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
    }

    // ========================================================================
    // RUN
    // ========================================================================

    /// Test every configured frequency on `ear`, blocking until done
    ///
    /// Clears an earlier cancellation first. A cancelled run keeps the
    /// thresholds already captured; the frequency in progress is discarded.
    pub fn run_ear(&self, ear: Ear) -> Result<StaircaseOutcome, ScreeningError> {
        self.reset();
        self.run_armed(ear)
    }

    /// Run without touching the stop flag; the runner resets it before spawning
    fn run_armed(&self, ear: Ear) -> Result<StaircaseOutcome, ScreeningError> {
        self.params
            .validate()
            .inspect_err(|err| log_screening_error(err, "Staircase::run_ear"))?;

        tracing::info!(
            "[Staircase] Starting {} ear: {:?} Hz, {}..{} dB HL step {}",
            ear.clinical_code(),
            self.params.frequencies_hz,
            self.params.min_level_db_hl,
            self.params.max_level_db_hl,
            self.params.step_db
        );
        self.events.emit(ScreeningEvent::TestStarted { ear });

        let mut outcome = StaircaseOutcome {
            ear,
            thresholds: Vec::new(),
            cancelled: false,
        };

        match self.run_frequencies(ear, &mut outcome) {
            Ok(()) => {}
            Err(err) => {
                log_screening_error(&err, "Staircase::run_ear");
                let _ = self.player.stop(true);
                self.events.emit(ScreeningEvent::Error {
                    code: err.code(),
                    message: err.message(),
                });
                self.events.emit(ScreeningEvent::TestFinished {
                    ear,
                    cancelled: true,
                });
                return Err(err);
            }
        }

        outcome.cancelled = self.is_cancelled();
        if outcome.cancelled {
            let _ = self.player.stop(true);
            tracing::info!(
                "[Staircase] {} ear cancelled after {} threshold(s)",
                ear.clinical_code(),
                outcome.thresholds.len()
            );
        } else {
            tracing::info!("[Staircase] {} ear finished", ear.clinical_code());
        }
        self.events.emit(ScreeningEvent::TestFinished {
            ear,
            cancelled: outcome.cancelled,
        });
        Ok(outcome)
    }

    fn run_frequencies(&self, ear: Ear, outcome: &mut StaircaseOutcome) -> Result<(), ScreeningError> {
        let floor = self.params.min_level_db_hl;
        let ceiling = self.params.max_level_db_hl;

        for &frequency_hz in &self.params.frequencies_hz {
            if self.is_cancelled() {
                break;
            }
            self.events
                .emit(ScreeningEvent::FrequencyStarted { ear, frequency_hz });

            let threshold = match self.ascend(ear, frequency_hz, floor)? {
                Ascent::Cancelled => break,
                Ascent::NotHeard => ceiling,
                Ascent::Heard(first) => match self.verify(ear, frequency_hz, first)? {
                    Some(level) => level,
                    None => break,
                },
            };
            self.record(outcome, ear, frequency_hz, threshold);
        }
        Ok(())
    }

    fn record(&self, outcome: &mut StaircaseOutcome, ear: Ear, frequency_hz: u32, level_db_hl: f64) {
        self.results.add(ear, frequency_hz, level_db_hl);
        outcome.thresholds.push(ThresholdMeasurement {
            ear,
            frequency_hz,
            level_db_hl,
        });
        tracing::info!(
            "[Staircase] Threshold {} {} Hz = {} dB HL",
            ear.clinical_code(),
            frequency_hz,
            level_db_hl
        );
        self.events.emit(ScreeningEvent::ThresholdCaptured {
            ear,
            frequency_hz,
            level_db_hl,
        });
    }

    /// Present rising levels until the operator responds
    ///
    /// A response raised during the tone or the following interval counts
    /// for that level.
    fn ascend(&self, ear: Ear, frequency_hz: u32, start: f64) -> Result<Ascent, ScreeningError> {
        let correction_db = self.correction.total_correction(ear, frequency_hz);
        let tone = Duration::from_millis(self.params.tone_duration_ms);
        let mut level = start;

        while level <= self.params.max_level_db_hl + LEVEL_EPSILON {
            if self.is_cancelled() {
                return Ok(Ascent::Cancelled);
            }
            self.response.clear();
            self.events.emit(ScreeningEvent::LevelChanged {
                ear,
                frequency_hz,
                level_db_hl: level,
            });
            self.player
                .play_tone(frequency_hz, level, ear, correction_db)?;

            self.sleeper.sleep(tone);
            if self.is_cancelled() {
                return Ok(Ascent::Cancelled);
            }
            self.player.stop(false)?;

            let isi = self
                .isi
                .next_isi(self.params.isi_ms_min, self.params.isi_ms_max);
            self.sleeper.sleep(isi);
            if self.is_cancelled() {
                return Ok(Ascent::Cancelled);
            }

            if self.response.take() {
                tracing::debug!(
                    "[Staircase] Heard {} {} Hz at {} dB HL",
                    ear.clinical_code(),
                    frequency_hz,
                    level
                );
                return Ok(Ascent::Heard(level));
            }
            level += self.params.step_db;
        }
        Ok(Ascent::NotHeard)
    }

    /// Repeat ascents until a level is confirmed twice
    ///
    /// Returns `None` when cancelled. Past the cycle limit, or when an
    /// ascent gets no response, the most frequent level wins.
    fn verify(&self, ear: Ear, frequency_hz: u32, first: f64) -> Result<Option<f64>, ScreeningError> {
        let mut tally = LevelTally::default();
        tally.record(first);
        let mut last_confirmed = first;
        let mut cycles = 0;

        loop {
            if self.is_cancelled() {
                return Ok(None);
            }
            cycles += 1;
            if cycles > self.params.verification_max_cycles {
                tracing::debug!(
                    "[Staircase] {} Hz: no repeat within {} cycles, using mode",
                    frequency_hz,
                    self.params.verification_max_cycles
                );
                return Ok(tally.mode());
            }

            let restart = (last_confirmed - 2.0 * self.params.step_db).max(self.params.min_level_db_hl);
            self.events
                .emit(ScreeningEvent::FrequencyStarted { ear, frequency_hz });
            match self.ascend(ear, frequency_hz, restart)? {
                Ascent::Cancelled => return Ok(None),
                Ascent::NotHeard => return Ok(tally.mode()),
                Ascent::Heard(level) => {
                    last_confirmed = level;
                    if tally.record(level) >= 2 {
                        return Ok(Some(level));
                    }
                }
            }
        }
    }
}

// ============================================================================
// BACKGROUND RUNNER
// ============================================================================

type Worker = JoinHandle<Result<StaircaseOutcome, ScreeningError>>;

/// Runs a [`Staircase`] on a worker thread
pub struct StaircaseRunner {
    staircase: Arc<Staircase>,
    worker: Mutex<Option<Worker>>,
}

impl StaircaseRunner {
    pub fn new(staircase: Staircase) -> Self {
        Self {
            staircase: Arc::new(staircase),
            worker: Mutex::new(None),
        }
    }

    pub fn staircase(&self) -> &Arc<Staircase> {
        &self.staircase
    }

    /// Start testing `ear`; fails if a run is still in progress
    pub fn start(&self, ear: Ear) -> Result<(), ScreeningError> {
        let mut worker = self.worker.lock().map_err(|_| ScreeningError::AlreadyRunning)?;
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            let err = ScreeningError::AlreadyRunning;
            log_screening_error(&err, "StaircaseRunner::start");
            return Err(err);
        }
        self.staircase.params.validate()?;
        self.staircase.reset();
        self.staircase.response.clear();

        let staircase = Arc::clone(&self.staircase);
        *worker = Some(std::thread::spawn(move || staircase.run_armed(ear)));
        Ok(())
    }

    pub fn cancel(&self) {
        self.staircase.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Wait for the current run; `None` if nothing was started
    pub fn join(&self) -> Option<Result<StaircaseOutcome, ScreeningError>> {
        let handle = self.worker.lock().ok()?.take()?;
        match handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::warn!("[Staircase] Worker thread panicked");
                None
            }
        }
    }
}

impl Drop for StaircaseRunner {
    fn drop(&mut self) {
        if self.is_running() {
            self.staircase.cancel();
        }
    }
}

#[cfg(test)]
#[path = "staircase_tests.rs"]
mod tests;
