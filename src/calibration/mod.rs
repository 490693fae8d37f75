// Calibration module - level corrections and their persistence
//
// Two correction layers are summed before a tone is converted to amplitude:
// 1. DeviceCalibrationStore: per output device, per frequency offset
// 2. HeadphoneBiasStore: per headphone unit, per ear, per frequency bias
//
// Calibration sessions are appended to a per-headphone history; the
// BiasAggregator recomputes the headphone bias from that history. The
// ReferenceProfile holds the dBFS reference used by the ReferenceDbfs
// amplitude strategy.

pub mod aggregator;
pub mod combined;
pub mod device_profile;
pub mod headphone_bias;
pub mod reference_profile;
pub mod session;
pub mod storage;

pub use aggregator::{
    AggregationOptions, AggregationReport, Aggregator, BiasAggregator, SessionOutlier,
};
pub use combined::{CombinedCalibration, CorrectionSource, NoCorrection};
pub use device_profile::{DeviceCalibrationProfile, DeviceCalibrationStore};
pub use headphone_bias::{
    sanitize_headphone_id, HeadphoneBiasProfile, HeadphoneBiasStore, DEFAULT_HEADPHONE_ID,
};
pub use reference_profile::{ChannelRouting, ReferenceDevice, ReferenceProfile};
pub use session::{CalibrationSession, CalibrationSessionStore, SessionSummary, StoredSession};
