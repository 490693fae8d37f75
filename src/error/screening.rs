// Screening protocol error types and constants

use crate::error::{ErrorCode, ToneError};
use log::error;
use std::fmt;

/// Screening error code constants
///
/// Error code range: 3001-3004
pub struct ScreeningErrorCodes {}

impl ScreeningErrorCodes {
    /// A staircase run is already active
    pub const ALREADY_RUNNING: i32 = 3001;

    /// Protocol configured without frequencies
    pub const EMPTY_FREQUENCY_LIST: i32 = 3002;

    /// Level range or step is unusable
    pub const INVALID_LEVEL_RANGE: i32 = 3003;

    /// Tone presentation failed (the wrapped error carries its own code)
    pub const TONE_FAILED: i32 = 3004;
}

/// Log a screening error with structured context
pub fn log_screening_error(err: &ScreeningError, context: &str) {
    error!(
        "Screening error in {}: code={}, component=ScreeningProtocol, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the staircase and manual protocols
#[derive(Debug, Clone, PartialEq)]
pub enum ScreeningError {
    /// A run is already in progress
    AlreadyRunning,

    /// No frequencies to test
    EmptyFrequencyList,

    /// min/max/step combination cannot produce a level sequence
    InvalidLevelRange { min: f64, max: f64, step: f64 },

    /// The tone engine refused a stimulus
    Tone(ToneError),
}

impl ErrorCode for ScreeningError {
    fn code(&self) -> i32 {
        match self {
            ScreeningError::AlreadyRunning => ScreeningErrorCodes::ALREADY_RUNNING,
            ScreeningError::EmptyFrequencyList => ScreeningErrorCodes::EMPTY_FREQUENCY_LIST,
            ScreeningError::InvalidLevelRange { .. } => ScreeningErrorCodes::INVALID_LEVEL_RANGE,
            ScreeningError::Tone(inner) => inner.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            ScreeningError::AlreadyRunning => "Screening test already running".to_string(),
            ScreeningError::EmptyFrequencyList => "No test frequencies configured".to_string(),
            ScreeningError::InvalidLevelRange { min, max, step } => {
                format!(
                    "Invalid level range: min {} dB HL, max {} dB HL, step {} dB",
                    min, max, step
                )
            }
            ScreeningError::Tone(inner) => inner.message(),
        }
    }
}

impl fmt::Display for ScreeningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScreeningError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ScreeningError {}

impl From<ToneError> for ScreeningError {
    fn from(err: ToneError) -> Self {
        ScreeningError::Tone(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalibrationError;

    #[test]
    fn test_screening_error_codes() {
        assert_eq!(
            ScreeningError::AlreadyRunning.code(),
            ScreeningErrorCodes::ALREADY_RUNNING
        );
        assert_eq!(
            ScreeningError::EmptyFrequencyList.code(),
            ScreeningErrorCodes::EMPTY_FREQUENCY_LIST
        );
        assert_eq!(
            ScreeningError::InvalidLevelRange {
                min: 0.0,
                max: -10.0,
                step: 5.0
            }
            .code(),
            ScreeningErrorCodes::INVALID_LEVEL_RANGE
        );
    }

    #[test]
    fn test_tone_failure_keeps_inner_code() {
        let err = ScreeningError::from(ToneError::from(CalibrationError::CalibrationMissing));
        assert_eq!(err.code(), 2001);
        assert!(err.message().contains("not loaded"));
    }
}
