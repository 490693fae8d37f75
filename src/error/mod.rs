// Error types for the audiometer core
//
// This module defines custom error types for audio output, calibration and
// screening operations, providing structured error handling with numeric
// error codes that embedders can surface to the operator.

mod audio;
mod calibration;
mod screening;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use screening::{log_screening_error, ScreeningError, ScreeningErrorCodes};

use std::fmt;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the CLI and any embedding UI.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Failure of a single tone presentation
///
/// Playing a tone can fail either because the calibration cannot produce an
/// amplitude for the request or because the output device cannot be opened.
#[derive(Debug, Clone, PartialEq)]
pub enum ToneError {
    Audio(AudioError),
    Calibration(CalibrationError),
}

impl ErrorCode for ToneError {
    fn code(&self) -> i32 {
        match self {
            ToneError::Audio(err) => err.code(),
            ToneError::Calibration(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            ToneError::Audio(err) => err.message(),
            ToneError::Calibration(err) => err.message(),
        }
    }
}

impl fmt::Display for ToneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToneError::Audio(err) => err.fmt(f),
            ToneError::Calibration(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ToneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ToneError::Audio(err) => Some(err),
            ToneError::Calibration(err) => Some(err),
        }
    }
}

impl From<AudioError> for ToneError {
    fn from(err: AudioError) -> Self {
        ToneError::Audio(err)
    }
}

impl From<CalibrationError> for ToneError {
    fn from(err: CalibrationError) -> Self {
        ToneError::Calibration(err)
    }
}
