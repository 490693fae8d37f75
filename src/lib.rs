// Audiometer Core - calibrated tone engine and threshold measurement
// Real-time pure-tone output, staircase/manual threshold search and
// per-device / per-headphone calibration

// Module declarations
pub mod audio;
pub mod calibration;
pub mod config;
pub mod context;
pub mod ear;
pub mod error;
pub mod managers;
pub mod screening;

// Re-exports for convenience
pub use audio::{AmplitudeStrategy, ToneEngine};
pub use config::AppConfig;
pub use context::{AudiometerContext, DeviceSelection};
pub use ear::{Ear, EarFrequencyMap};
pub use error::{AudioError, CalibrationError, ErrorCode, ScreeningError, ToneError};
