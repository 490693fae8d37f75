//! Integration tests for the threshold search protocols
//!
//! A simulated listener stands in for the patient: it answers whenever the
//! corrected level of a tone reaches its hearing threshold. The staircase
//! runs on a worker thread against the context's results store, response
//! signal, calibration and broadcast channel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use audiometer_core::config::StorageConfig;
use audiometer_core::error::{ScreeningError, ToneError};
use audiometer_core::screening::{
    EventEmitter, NoopSleeper, ResponseSignal, ResultsStore, ScreeningEvent, SequenceIsi,
    Staircase, StaircaseParams, StaircaseRunner, TonePlayer,
};
use audiometer_core::{AppConfig, AudiometerContext, Ear};

struct SimulatedListener {
    response: ResponseSignal,
    /// Hearing threshold per frequency, on the corrected scale
    thresholds: HashMap<u32, f64>,
    corrections: Mutex<Vec<f64>>,
    playing: AtomicBool,
}

impl SimulatedListener {
    fn new(response: &ResponseSignal, thresholds: &[(u32, f64)]) -> Arc<Self> {
        Arc::new(Self {
            response: response.clone(),
            thresholds: thresholds.iter().copied().collect(),
            corrections: Mutex::new(Vec::new()),
            playing: AtomicBool::new(false),
        })
    }
}

impl TonePlayer for SimulatedListener {
    fn play_tone(
        &self,
        frequency_hz: u32,
        level_db_hl: f64,
        _ear: Ear,
        correction_db: f64,
    ) -> Result<(), ToneError> {
        self.corrections.lock().unwrap().push(correction_db);
        self.playing.store(true, Ordering::SeqCst);
        let threshold = self.thresholds.get(&frequency_hz).copied().unwrap_or(f64::MAX);
        if level_db_hl + correction_db >= threshold {
            self.response.signal();
        }
        Ok(())
    }

    fn stop(&self, _immediate: bool) -> Result<(), ToneError> {
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

fn context(dir: &Path) -> AudiometerContext {
    let config = AppConfig {
        storage: StorageConfig::with_data_dir(dir),
        ..AppConfig::default()
    };
    AudiometerContext::headless(config).0
}

fn params(frequencies: &[u32]) -> StaircaseParams {
    StaircaseParams {
        frequencies_hz: frequencies.to_vec(),
        min_level_db_hl: -10.0,
        max_level_db_hl: 80.0,
        step_db: 5.0,
        ..StaircaseParams::default()
    }
}

fn staircase_for(ctx: &AudiometerContext, listener: Arc<SimulatedListener>, frequencies: &[u32]) -> Staircase {
    Staircase::new(listener, ctx.correction_source(), params(frequencies))
        .with_response(ctx.response().clone())
        .with_results(ctx.results().clone())
        .with_events(EventEmitter::new(
            ctx.broadcasts().screening_sender().unwrap(),
        ))
        .with_sleeper(Arc::new(NoopSleeper))
        .with_isi(Arc::new(SequenceIsi::new([0])))
}

#[test]
fn test_staircase_runner_measures_calibrated_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    ctx.calibration_manager().select_headphone("hp").unwrap();
    ctx.calibration_manager()
        .set_headphone_bias(Ear::Left, 1000, 10.0)
        .unwrap();

    let listener = SimulatedListener::new(ctx.response(), &[(1000, 30.0), (2000, 30.0)]);
    let mut events = ctx.broadcasts().subscribe_screening().unwrap();
    let runner = StaircaseRunner::new(staircase_for(&ctx, listener.clone(), &[1000, 2000]));

    runner.start(Ear::Left).unwrap();
    let outcome = runner.join().unwrap().unwrap();
    assert!(!outcome.cancelled);
    assert!(!runner.is_running());

    // the bias at 1000 Hz makes the tone louder, so the measured level drops
    let measured = ctx.results().to_map_by_ear();
    assert_eq!(measured.get(Ear::Left, 1000), Some(20.0));
    assert_eq!(measured.get(Ear::Left, 2000), Some(30.0));
    assert!(measured.right.is_empty());
    assert!(listener.corrections.lock().unwrap().contains(&10.0));

    let mut captured = Vec::new();
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ScreeningEvent::ThresholdCaptured {
                frequency_hz,
                level_db_hl,
                ..
            } => captured.push((frequency_hz, level_db_hl)),
            ScreeningEvent::TestFinished { cancelled, .. } => {
                assert!(!cancelled);
                finished = true;
            }
            _ => {}
        }
    }
    assert_eq!(captured, vec![(1000, 20.0), (2000, 30.0)]);
    assert!(finished);
}

#[test]
fn test_staircase_results_feed_normal_hearing_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    ctx.calibration_manager().select_headphone("lab-hp").unwrap();

    let listener = SimulatedListener::new(ctx.response(), &[(500, 15.0), (4000, 5.0)]);
    let staircase = staircase_for(&ctx, listener, &[500, 4000]);
    staircase.run_ear(Ear::Right).unwrap();
    staircase.run_ear(Ear::Left).unwrap();

    let measured = ctx.results().to_map_by_ear();
    assert_eq!(measured.get(Ear::Right, 500), Some(15.0));
    assert_eq!(measured.get(Ear::Left, 4000), Some(5.0));

    ctx.calibration_manager()
        .finish_normal_hearing(&measured, "operator")
        .unwrap();
    assert_eq!(ctx.total_correction(Ear::Right, 500).unwrap(), -15.0);
    assert_eq!(ctx.total_correction(Ear::Left, 4000).unwrap(), -5.0);
    assert_eq!(ctx.calibration_manager().list_sessions("lab-hp").unwrap().len(), 1);
}

#[test]
fn test_runner_cancel_from_another_thread() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    // nobody answers and every interval is real, so the run stays busy
    let listener = SimulatedListener::new(ctx.response(), &[]);
    let busy = StaircaseParams {
        tone_duration_ms: 20,
        ..params(&[1000, 2000])
    };
    let staircase = Staircase::new(listener, ctx.correction_source(), busy)
        .with_response(ctx.response().clone())
        .with_results(ctx.results().clone())
        .with_isi(Arc::new(SequenceIsi::new([20])));
    let runner = StaircaseRunner::new(staircase);

    runner.start(Ear::Right).unwrap();
    assert!(matches!(
        runner.start(Ear::Left),
        Err(ScreeningError::AlreadyRunning)
    ));
    runner.cancel();

    let outcome = runner.join().unwrap().unwrap();
    assert!(outcome.cancelled);
    assert!(ctx.results().is_empty());
}

#[test]
fn test_manual_entry_on_headless_engine() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let results = ResultsStore::new();
    let entry = ctx.manual_entry(results.clone());

    entry.start().unwrap();
    entry.set_ear(Ear::Left);
    entry.move_frequency(2);
    entry.move_level(-3);
    let cursor = entry.cursor();
    assert_eq!(cursor.frequency_hz, 4000);
    assert_eq!(cursor.level_db_hl, 25.0);

    assert!(entry.toggle_tone().unwrap());
    let deadline = Instant::now() + Duration::from_secs(1);
    while !ctx.engine().is_playing() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(ctx.engine().is_playing());
    assert!(!entry.toggle_tone().unwrap());
    assert!(!ctx.engine().is_playing());

    let measurement = entry.commit().unwrap();
    assert_eq!(measurement.ear, Ear::Left);
    assert_eq!(measurement.frequency_hz, 4000);
    assert_eq!(results.to_map_by_ear().get(Ear::Left, 4000), Some(25.0));
    // calibration runs keep their own store
    assert!(ctx.results().is_empty());
    entry.stop();
}
