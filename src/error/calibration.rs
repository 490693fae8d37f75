// Calibration error types and constants

use crate::ear::Ear;
use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2009
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// No calibration profile loaded at all
    pub const CALIBRATION_MISSING: i32 = 2001;

    /// Profile loaded but unusable for the requested frequency
    pub const CALIBRATION_GAP: i32 = 2002;

    /// Calibration file failed to parse or validate
    pub const MALFORMED_FILE: i32 = 2003;

    /// No stored profile for the requested device
    pub const PROFILE_NOT_FOUND: i32 = 2004;

    /// Headphone bias operation attempted before selecting a headphone
    pub const NO_HEADPHONE_SELECTED: i32 = 2005;

    /// Reading or writing calibration storage failed
    pub const STORAGE: i32 = 2006;

    /// Reference profile content is structurally invalid
    pub const INVALID_PROFILE: i32 = 2007;

    /// Calibration state lock was poisoned
    pub const STATE_POISONED: i32 = 2008;

    /// No calibration sessions stored for the headphone
    pub const NO_SESSIONS: i32 = 2009;
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=Calibration, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration-related errors
///
/// These errors cover level conversion, calibration file handling and
/// session storage.
///
/// Error code ranges: 2001-2009
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// No calibration profile is loaded
    CalibrationMissing,

    /// No usable calibration for the requested ear/frequency
    CalibrationGap { ear: Ear, frequency_hz: u32 },

    /// Calibration file could not be parsed
    MalformedCalibrationFile { path: String, reason: String },

    /// No stored profile for the device
    ProfileNotFound { device: String },

    /// No headphone has been selected
    NoHeadphoneSelected,

    /// Filesystem failure while reading or writing calibration data
    Storage { path: String, reason: String },

    /// Reference profile failed validation
    InvalidProfile { reason: String },

    /// Calibration state lock was poisoned
    StatePoisoned,

    /// No calibration sessions exist for the headphone
    NoSessions { headphone_id: String },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::CalibrationMissing => CalibrationErrorCodes::CALIBRATION_MISSING,
            CalibrationError::CalibrationGap { .. } => CalibrationErrorCodes::CALIBRATION_GAP,
            CalibrationError::MalformedCalibrationFile { .. } => {
                CalibrationErrorCodes::MALFORMED_FILE
            }
            CalibrationError::ProfileNotFound { .. } => CalibrationErrorCodes::PROFILE_NOT_FOUND,
            CalibrationError::NoHeadphoneSelected => CalibrationErrorCodes::NO_HEADPHONE_SELECTED,
            CalibrationError::Storage { .. } => CalibrationErrorCodes::STORAGE,
            CalibrationError::InvalidProfile { .. } => CalibrationErrorCodes::INVALID_PROFILE,
            CalibrationError::StatePoisoned => CalibrationErrorCodes::STATE_POISONED,
            CalibrationError::NoSessions { .. } => CalibrationErrorCodes::NO_SESSIONS,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::CalibrationMissing => {
                "Calibration profile not loaded".to_string()
            }
            CalibrationError::CalibrationGap { ear, frequency_hz } => {
                format!(
                    "No calibration for {} Hz on the {} ear",
                    frequency_hz,
                    ear.display_name()
                )
            }
            CalibrationError::MalformedCalibrationFile { path, reason } => {
                format!("Malformed calibration file {}: {}", path, reason)
            }
            CalibrationError::ProfileNotFound { device } => {
                format!("No calibration profile for device: {}", device)
            }
            CalibrationError::NoHeadphoneSelected => "Headphone ID not set".to_string(),
            CalibrationError::Storage { path, reason } => {
                format!("Calibration storage error at {}: {}", path, reason)
            }
            CalibrationError::InvalidProfile { reason } => {
                format!("Invalid calibration profile: {}", reason)
            }
            CalibrationError::StatePoisoned => "Calibration state lock poisoned".to_string(),
            CalibrationError::NoSessions { headphone_id } => {
                format!("No calibration sessions for headphone {}", headphone_id)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

impl CalibrationError {
    /// Wrap an I/O failure on `path`
    pub fn storage(path: &std::path::Path, err: impl fmt::Display) -> Self {
        CalibrationError::Storage {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_codes() {
        assert_eq!(
            CalibrationError::CalibrationMissing.code(),
            CalibrationErrorCodes::CALIBRATION_MISSING
        );
        assert_eq!(
            CalibrationError::CalibrationGap {
                ear: Ear::Left,
                frequency_hz: 1000
            }
            .code(),
            CalibrationErrorCodes::CALIBRATION_GAP
        );
        assert_eq!(
            CalibrationError::MalformedCalibrationFile {
                path: "x".to_string(),
                reason: "y".to_string()
            }
            .code(),
            CalibrationErrorCodes::MALFORMED_FILE
        );
        assert_eq!(
            CalibrationError::ProfileNotFound {
                device: "x".to_string()
            }
            .code(),
            CalibrationErrorCodes::PROFILE_NOT_FOUND
        );
        assert_eq!(
            CalibrationError::NoHeadphoneSelected.code(),
            CalibrationErrorCodes::NO_HEADPHONE_SELECTED
        );
        assert_eq!(
            CalibrationError::StatePoisoned.code(),
            CalibrationErrorCodes::STATE_POISONED
        );
        assert_eq!(
            CalibrationError::NoSessions {
                headphone_id: "hp".to_string()
            }
            .code(),
            CalibrationErrorCodes::NO_SESSIONS
        );
    }

    #[test]
    fn test_calibration_error_messages() {
        let err = CalibrationError::CalibrationGap {
            ear: Ear::Right,
            frequency_hz: 8000,
        };
        assert_eq!(err.message(), "No calibration for 8000 Hz on the right ear");

        let err = CalibrationError::ProfileNotFound {
            device: "Speakers".to_string(),
        };
        assert!(err.message().contains("Speakers"));

        let err = CalibrationError::storage(std::path::Path::new("/tmp/x.json"), "denied");
        assert_eq!(
            err.message(),
            "Calibration storage error at /tmp/x.json: denied"
        );
    }

    #[test]
    fn test_calibration_error_display() {
        let err = CalibrationError::CalibrationMissing;
        let display = format!("{}", err);
        assert!(display.contains("CalibrationError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
