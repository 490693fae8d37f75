use super::*;
use crate::audio::backend::NullOutput;
use crate::calibration::ChannelRouting;

fn engine_with(strategy: AmplitudeStrategy) -> (ToneEngine, Arc<NullOutput>) {
    let backend = Arc::new(NullOutput::new());
    let config = AudioConfig {
        strategy,
        ..AudioConfig::default()
    };
    (ToneEngine::new(backend.clone(), &config), backend)
}

fn profile() -> ReferenceProfile {
    ReferenceProfile::new("test-device").with_reference(Ear::Right, 1000, -60.0)
}

#[test]
fn test_reference_strategy_requires_profile() {
    let (engine, backend) = engine_with(AmplitudeStrategy::ReferenceDbfs);
    let err = engine.play_tone(1000, 30.0, Ear::Right).unwrap_err();
    assert_eq!(err, ToneError::Calibration(CalibrationError::CalibrationMissing));
    assert!(!engine.is_playing());
    assert_eq!(backend.open_count(), 0);
}

#[test]
fn test_play_opens_stream_lazily_and_stages_state() {
    let (engine, backend) = engine_with(AmplitudeStrategy::ReferenceDbfs);
    engine.set_profile(profile()).unwrap();
    assert!(!engine.is_stream_open());

    engine.play_tone(1000, 30.0, Ear::Right).unwrap();
    assert!(engine.is_stream_open());
    assert_eq!(backend.open_count(), 1);

    let state = engine.playback().unwrap();
    assert!(state.playing);
    assert_eq!(state.ear, Ear::Right);
    assert_eq!(state.frequency_hz, 1000.0);
    assert!((state.target_gain - 10f64.powf(-30.0 / 20.0)).abs() < 1e-9);
    assert_eq!(state.elapsed_samples, 0);

    // second tone reuses the stream
    engine.play_tone(1000, 40.0, Ear::Right).unwrap();
    assert_eq!(backend.open_count(), 1);
}

#[test]
fn test_default_layout_is_stereo_left_zero() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    engine.play_tone(1000, 60.0, Ear::Left).unwrap();
    let request = backend.last_request().unwrap();
    assert_eq!(request.channels, 2);
    assert_eq!(request.sample_rate, 48_000);
    assert_eq!(request.block_size, 256);

    let buf = backend.tap().pull(256).unwrap();
    assert!(buf.iter().skip(1).step_by(2).all(|s| *s == 0.0));
}

#[test]
fn test_immediate_stop_is_synchronous() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    backend.tap().pull(256).unwrap();

    engine.stop(true).unwrap();
    let state = engine.playback().unwrap();
    assert!(!state.playing);
    assert_eq!(state.current_gain, 0.0);
    assert_eq!(state.target_gain, 0.0);

    let buf = backend.tap().pull(256).unwrap();
    assert!(buf.iter().all(|s| *s == 0.0));
}

#[test]
fn test_soft_stop_decays_without_jumping() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    let tap = backend.tap();
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    for _ in 0..4 {
        tap.pull(256).unwrap();
    }
    let before = engine.playback().unwrap().current_gain;
    assert!(before > 0.4);

    engine.stop(false).unwrap();
    let state = engine.playback().unwrap();
    assert!(!state.playing);
    assert_eq!(state.current_gain, before);

    let buf = tap.pull(256).unwrap();
    let after = engine.playback().unwrap().current_gain;
    assert!(after < before && after >= 0.0);

    // consecutive samples of the fade never exceed the starting gain
    assert!(buf.iter().all(|s| (s.abs() as f64) <= before + 1e-6));

    for _ in 0..8 {
        tap.pull(256).unwrap();
    }
    assert_eq!(engine.playback().unwrap().current_gain, 0.0);
}

#[test]
fn test_auto_stop_without_command() {
    let backend = Arc::new(NullOutput::new());
    let config = AudioConfig {
        auto_stop_seconds: 0.02,
        ..AudioConfig::default()
    };
    let engine = ToneEngine::new(backend.clone(), &config);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    // 0.02 s at 48 kHz = 960 frames
    for _ in 0..4 {
        backend.tap().pull(256).unwrap();
    }
    let state = engine.playback().unwrap();
    assert!(!state.playing);
    assert_eq!(state.target_gain, 0.0);
}

#[test]
fn test_routing_change_rebuilds_stream() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    assert_eq!(backend.open_count(), 1);

    let routed = profile().with_routing(ChannelRouting {
        left: Some(2),
        right: Some(3),
    });
    engine.set_profile(routed).unwrap();
    assert!(!engine.is_stream_open());
    assert!(!engine.is_playing());
    assert_eq!(engine.channel_count().unwrap(), 4);

    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    assert_eq!(backend.open_count(), 2);
    assert_eq!(backend.last_request().unwrap().channels, 4);

    let buf = backend.tap().pull(128).unwrap();
    for (i, sample) in buf.iter().enumerate() {
        if i % 4 != 3 {
            assert_eq!(*sample, 0.0);
        }
    }
}

#[test]
fn test_unrouted_profile_restores_default_layout() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    let routed = profile().with_routing(ChannelRouting {
        left: Some(2),
        right: Some(3),
    });
    engine.set_profile(routed).unwrap();
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    assert_eq!(backend.last_request().unwrap().channels, 4);

    engine.set_profile(profile()).unwrap();
    assert!(!engine.is_stream_open());
    assert_eq!(engine.channel_map().unwrap(), ChannelMap::default());
    assert_eq!(engine.channel_count().unwrap(), 2);

    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    assert_eq!(backend.last_request().unwrap().channels, 2);
}

#[test]
fn test_out_of_range_routing_still_plays() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    let doc = serde_json::json!({
        "device_name": "x",
        "wasapi_id": "y",
        "mapping": {"1000": -60},
        "right_channel_index": 1e30
    });
    engine.set_profile(ReferenceProfile::from_value(&doc).unwrap()).unwrap();
    assert_eq!(engine.channel_count().unwrap(), 2);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    assert_eq!(backend.last_request().unwrap().channels, 2);
}

#[test]
fn test_same_routing_keeps_stream() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    engine.set_profile(profile()).unwrap();
    assert!(engine.is_stream_open());
    assert_eq!(backend.open_count(), 1);
}

#[test]
fn test_output_device_change() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();

    engine.set_output_device(None).unwrap();
    assert!(engine.is_stream_open());

    engine.set_output_device(Some("USB DAC")).unwrap();
    assert!(!engine.is_stream_open());
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    assert_eq!(
        backend.last_request().unwrap().device.as_deref(),
        Some("USB DAC")
    );
}

#[test]
fn test_unavailable_device_disables_playback_until_reselected() {
    let backend = Arc::new(NullOutput::unavailable());
    let engine = ToneEngine::new(backend, &AudioConfig::default());
    engine.set_output_device(Some("Ghost")).unwrap();

    let err = engine.play_tone(1000, 60.0, Ear::Right).unwrap_err();
    assert!(matches!(
        err,
        ToneError::Audio(AudioError::DeviceUnavailable { .. })
    ));
    assert!(!engine.is_playing());

    // still disabled without a reselect
    let err = engine.play_tone(1000, 60.0, Ear::Right).unwrap_err();
    assert_eq!(
        err,
        ToneError::Audio(AudioError::DeviceUnavailable {
            device: "Ghost".to_string()
        })
    );
}

#[test]
fn test_shutdown_resets_state() {
    let (engine, backend) = engine_with(AmplitudeStrategy::SimpleOffset);
    engine.play_tone(1000, 60.0, Ear::Right).unwrap();
    backend.tap().pull(256).unwrap();
    engine.shutdown_stream().unwrap();

    let state = engine.playback().unwrap();
    assert!(!state.playing && !state.running);
    assert_eq!(state.current_gain, 0.0);
    assert!(backend.tap().pull(256).is_none());
}
