// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes surfaced to the operator.
///
/// Error code range: 1001-1008
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Requested output device is not present or cannot be opened
    pub const DEVICE_UNAVAILABLE: i32 = 1001;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1002;

    /// Audio stream failed while running
    pub const STREAM_FAILURE: i32 = 1003;

    /// Device only offers a sample format the engine cannot render
    pub const UNSUPPORTED_SAMPLE_FORMAT: i32 = 1004;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1005;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1006;

    /// Audio stream is not running
    pub const NOT_RUNNING: i32 = 1007;

    /// Audio stream is already running
    pub const ALREADY_RUNNING: i32 = 1008;
}

/// Log an audio error with structured context
///
/// Emits error_code, component and message so log scrapers can group
/// failures by code.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=ToneEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover output device selection, stream management and
/// hardware access.
///
/// Error code ranges: 1001-1008
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Output device cannot be found or opened
    DeviceUnavailable { device: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Stream failed while running
    StreamFailure { reason: String },

    /// Device sample format is not supported
    UnsupportedSampleFormat { format: String },

    /// Hardware error occurred
    HardwareError { details: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Audio stream is not running
    NotRunning,

    /// Audio stream is already running
    AlreadyRunning,
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DeviceUnavailable { .. } => AudioErrorCodes::DEVICE_UNAVAILABLE,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::UnsupportedSampleFormat { .. } => {
                AudioErrorCodes::UNSUPPORTED_SAMPLE_FORMAT
            }
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DeviceUnavailable { device } => {
                format!(
                    "Output device '{}' is unavailable. Select another device.",
                    device
                )
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::UnsupportedSampleFormat { format } => {
                format!("Unsupported output sample format: {}", format)
            }
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::NotRunning => "Audio stream not running".to_string(),
            AudioError::AlreadyRunning => "Audio stream already running".to_string(),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}
