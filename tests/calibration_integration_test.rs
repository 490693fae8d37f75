//! Integration tests for the calibration workflow
//!
//! These tests drive the public API end to end on a headless context:
//! - Device profile activation and per-frequency offsets
//! - Normal-hearing sessions and headphone bias recomputation
//! - Export/import of a headphone calibration into a fresh data directory
//! - Combined correction reaching the tone engine

use std::path::Path;

use audiometer_core::audio::simple_offset_amplitude;
use audiometer_core::calibration::{AggregationOptions, Aggregator};
use audiometer_core::config::StorageConfig;
use audiometer_core::error::CalibrationError;
use audiometer_core::managers::CalibrationEvent;
use audiometer_core::{AppConfig, AudiometerContext, Ear, EarFrequencyMap};

const FREQUENCIES: [u32; 6] = [250, 500, 1000, 2000, 4000, 8000];

fn context(dir: &Path) -> AudiometerContext {
    let config = AppConfig {
        storage: StorageConfig::with_data_dir(dir),
        ..AppConfig::default()
    };
    AudiometerContext::headless(config).0
}

/// Same threshold on every configured frequency of both ears
fn flat_thresholds(level_db_hl: f64) -> EarFrequencyMap {
    let mut map = EarFrequencyMap::new();
    for ear in [Ear::Left, Ear::Right] {
        for hz in FREQUENCIES {
            map.insert(ear, hz, level_db_hl);
        }
    }
    map
}

#[test]
fn test_normal_hearing_sessions_aggregate_into_bias() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let manager = ctx.calibration_manager();
    manager.select_headphone("studio-hp").unwrap();

    for (subject, level) in [("s1", 10.0), ("s2", 20.0), ("s3", 12.0)] {
        manager
            .finish_normal_hearing(&flat_thresholds(level), subject)
            .unwrap();
    }
    // the last direct calibration wins until a recompute
    assert_eq!(manager.headphone_bias().unwrap().get(Ear::Left, 1000), Some(-12.0));

    let sessions = manager.list_sessions("studio-hp").unwrap();
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.is_normoacusic && !s.has_ref));

    let median = manager.recompute("studio-hp").unwrap();
    assert_eq!(median.sessions_used, 3);
    assert!(median.outliers.is_empty());
    for hz in FREQUENCIES {
        assert_eq!(median.bias.get(Ear::Right, hz), Some(-12.0));
    }

    let mean = manager
        .recompute_with(
            "studio-hp",
            &AggregationOptions {
                aggregator: Aggregator::Mean,
                ..AggregationOptions::default()
            },
        )
        .unwrap();
    for hz in FREQUENCIES {
        let value = mean.bias.get(Ear::Left, hz).unwrap();
        assert!((value + 14.0).abs() < 1e-9);
    }
    assert!((ctx.total_correction(Ear::Left, 500).unwrap() + 14.0).abs() < 1e-9);
}

#[test]
fn test_outlier_session_is_reported_and_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let manager = ctx.calibration_manager();

    let reference = flat_thresholds(0.0);
    for (subject, level) in [("a", 5.0), ("b", 7.0), ("c", 60.0)] {
        manager
            .apply_calibration_bias(
                "desk-hp",
                subject,
                false,
                &flat_thresholds(level),
                Some(&reference),
                None,
            )
            .unwrap();
    }

    let report = manager.recompute("desk-hp").unwrap();
    assert_eq!(report.sessions_used, 3);
    // one outlier per ear and frequency from subject "c"
    assert_eq!(report.outliers.len(), FREQUENCIES.len() * 2);
    assert!(report.outliers.iter().all(|o| o.subject_id == "c"));
    assert_eq!(report.bias.get(Ear::Left, 2000), Some(-6.0));
}

#[test]
fn test_recompute_without_sessions_keeps_bias() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let manager = ctx.calibration_manager();
    manager.select_headphone("empty-hp").unwrap();
    manager.set_headphone_bias(Ear::Right, 1000, 3.0).unwrap();

    assert!(matches!(
        manager.recompute("empty-hp"),
        Err(CalibrationError::NoSessions { .. })
    ));
    assert_eq!(manager.headphone_bias().unwrap().get(Ear::Right, 1000), Some(3.0));
}

#[test]
fn test_export_import_into_fresh_data_dir() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let export_path = source_dir.path().join("export.json");

    let source = context(source_dir.path());
    let manager = source.calibration_manager();
    manager.select_headphone("travel-hp").unwrap();
    manager.set_headphone_bias(Ear::Left, 4000, -5.5).unwrap();
    manager.set_headphone_bias(Ear::Right, 250, 2.0).unwrap();
    manager
        .export_headphone_calibration("travel-hp", &export_path)
        .unwrap();

    let target = context(target_dir.path());
    let imported = target
        .calibration_manager()
        .import_headphone_calibration(&export_path)
        .unwrap();
    assert_eq!(imported, "travel-hp");
    assert_eq!(target.total_correction(Ear::Left, 4000).unwrap(), -5.5);
    assert_eq!(target.total_correction(Ear::Right, 250).unwrap(), 2.0);

    // persisted: a third context on the same directory sees the bias
    let reopened = context(target_dir.path());
    reopened.calibration_manager().select_headphone("travel-hp").unwrap();
    assert_eq!(reopened.total_correction(Ear::Left, 4000).unwrap(), -5.5);
}

#[test]
fn test_import_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let result = ctx
        .calibration_manager()
        .import_headphone_calibration(&dir.path().join("nope.json"));
    assert!(matches!(result, Err(CalibrationError::Storage { .. })));
}

#[test]
fn test_device_offset_and_bias_reach_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let mut events = ctx.broadcasts().subscribe_calibration().unwrap();

    let selection = ctx
        .apply_device_selection("Line Out", "host__Line_Out")
        .unwrap();
    assert_eq!(selection.headphone_id.as_deref(), Some("host__Line_Out"));
    assert!(matches!(
        events.try_recv().unwrap(),
        CalibrationEvent::HeadphoneSelected { .. }
    ));

    ctx.set_device_offset(2000, -3.0).unwrap();
    ctx.calibration_manager()
        .set_headphone_bias(Ear::Left, 2000, 8.0)
        .unwrap();
    assert_eq!(ctx.total_correction(Ear::Left, 2000).unwrap(), 5.0);
    assert_eq!(ctx.total_correction(Ear::Right, 2000).unwrap(), -3.0);

    ctx.play_tone(2000, 30.0, Ear::Left).unwrap();
    let gain = ctx.engine().playback().unwrap().target_gain;
    assert!((gain - simple_offset_amplitude(30.0, 5.0)).abs() < 1e-12);
    ctx.stop_tone(true).unwrap();
}
