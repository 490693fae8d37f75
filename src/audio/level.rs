//! dB HL → linear amplitude conversion
//!
//! Two conversion conventions coexist and are selected explicitly:
//!
//! - [`AmplitudeStrategy::ReferenceDbfs`] uses a full [`ReferenceProfile`]
//!   (per-ear dBFS reference for 0 dB HL).
//! - [`AmplitudeStrategy::SimpleOffset`] maps dB HL through a fixed 60 dB
//!   anchor plus an additive per-frequency correction, and needs no profile.

use serde::{Deserialize, Serialize};

use crate::calibration::ReferenceProfile;
use crate::ear::Ear;
use crate::error::CalibrationError;

/// Fallback reference when the profile has neither an exact nor default entry
pub const DEFAULT_REFERENCE_DBFS: f64 = -40.0;
/// References at or above this are implausibly hot
pub const HOT_REFERENCE_DBFS: f64 = -5.0;
/// Replacement for a hot reference
pub const CLAMPED_REFERENCE_DBFS: f64 = -35.0;
pub const MIN_LEVEL_DB_HL: f64 = -10.0;
/// Output ceiling for the reference strategy
pub const CEILING_DBFS: f64 = -2.0;

pub const SIMPLE_OFFSET_ANCHOR_DB: f64 = 60.0;
pub const SIMPLE_OFFSET_SCALE: f64 = 0.5;
pub const SIMPLE_OFFSET_MIN_AMPLITUDE: f64 = 0.0005;
pub const SIMPLE_OFFSET_MAX_AMPLITUDE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeStrategy {
    ReferenceDbfs,
    #[default]
    SimpleOffset,
}

impl AmplitudeStrategy {
    /// Convert with this strategy
    ///
    /// `profile` is only consulted by `ReferenceDbfs`.
    pub fn amplitude(
        self,
        profile: Option<&ReferenceProfile>,
        ear: Ear,
        frequency_hz: u32,
        level_db_hl: f64,
        correction_db: f64,
    ) -> Result<f64, CalibrationError> {
        match self {
            AmplitudeStrategy::ReferenceDbfs => {
                let profile = profile.ok_or(CalibrationError::CalibrationMissing)?;
                reference_dbfs_amplitude(profile, ear, frequency_hz, level_db_hl, correction_db)
            }
            AmplitudeStrategy::SimpleOffset => Ok(simple_offset_amplitude(level_db_hl, correction_db)),
        }
    }
}

/// Profile-based conversion
///
/// The correction is added to the requested level before clamping to
/// `[-10, max_db_hl]`, so a bias can never push past the profile's ceiling.
/// A non-positive result is reported as `CalibrationGap` instead of
/// silently playing nothing.
pub fn reference_dbfs_amplitude(
    profile: &ReferenceProfile,
    ear: Ear,
    frequency_hz: u32,
    level_db_hl: f64,
    correction_db: f64,
) -> Result<f64, CalibrationError> {
    let mut reference = profile
        .reference_for(ear, frequency_hz)
        .unwrap_or(DEFAULT_REFERENCE_DBFS);
    if reference >= HOT_REFERENCE_DBFS {
        reference = CLAMPED_REFERENCE_DBFS;
    }

    let level = (level_db_hl + correction_db).clamp(MIN_LEVEL_DB_HL, profile.max_db_hl.max(MIN_LEVEL_DB_HL));
    let target_dbfs = (reference + level).min(CEILING_DBFS);
    let amplitude = 10f64.powf(target_dbfs / 20.0).clamp(0.0, 1.0);

    if !amplitude.is_finite() || amplitude <= 0.0 {
        return Err(CalibrationError::CalibrationGap { ear, frequency_hz });
    }
    Ok(amplitude)
}

/// Offset-table conversion: `0.5 · 10^((level + correction − 60)/20)`
pub fn simple_offset_amplitude(level_db_hl: f64, correction_db: f64) -> f64 {
    let db = level_db_hl + correction_db - SIMPLE_OFFSET_ANCHOR_DB;
    let amplitude = SIMPLE_OFFSET_SCALE * 10f64.powf(db / 20.0);
    if amplitude.is_nan() {
        return SIMPLE_OFFSET_MIN_AMPLITUDE;
    }
    amplitude.clamp(SIMPLE_OFFSET_MIN_AMPLITUDE, SIMPLE_OFFSET_MAX_AMPLITUDE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn profile() -> ReferenceProfile {
        ReferenceProfile::new("dev")
            .with_reference(Ear::Right, 1000, -60.0)
            .with_reference(Ear::Right, 2000, -3.0)
            .with_default(Ear::Left, -50.0)
    }

    #[test]
    fn test_reference_lookup_chain() {
        let p = profile();
        // exact entry: -60 + 30 = -30 dBFS
        let a = reference_dbfs_amplitude(&p, Ear::Right, 1000, 30.0, 0.0).unwrap();
        assert!(close(a, 10f64.powf(-30.0 / 20.0)));

        // profile default: -50 + 30
        let a = reference_dbfs_amplitude(&p, Ear::Left, 1000, 30.0, 0.0).unwrap();
        assert!(close(a, 10f64.powf(-20.0 / 20.0)));

        // hard default: -40 + 30
        let a = reference_dbfs_amplitude(&p, Ear::Right, 4000, 30.0, 0.0).unwrap();
        assert!(close(a, 10f64.powf(-10.0 / 20.0)));
    }

    #[test]
    fn test_hot_reference_is_clamped() {
        let p = profile();
        let a = reference_dbfs_amplitude(&p, Ear::Right, 2000, 0.0, 0.0).unwrap();
        assert!(close(a, 10f64.powf(CLAMPED_REFERENCE_DBFS / 20.0)));
    }

    #[test]
    fn test_ceiling_and_level_clamps() {
        let p = profile();
        let loud = reference_dbfs_amplitude(&p, Ear::Right, 1000, 120.0, 0.0).unwrap();
        assert!(close(loud, 10f64.powf(CEILING_DBFS / 20.0)));

        let quiet = reference_dbfs_amplitude(&p, Ear::Right, 1000, -40.0, 0.0).unwrap();
        assert!(close(quiet, 10f64.powf(-70.0 / 20.0)));
    }

    #[test]
    fn test_correction_shifts_level() {
        let p = profile();
        let plain = reference_dbfs_amplitude(&p, Ear::Right, 1000, 30.0, 0.0).unwrap();
        let boosted = reference_dbfs_amplitude(&p, Ear::Right, 1000, 20.0, 10.0).unwrap();
        assert!(close(plain, boosted));
    }

    #[test]
    fn test_monotonic_in_level_and_bounded() {
        let p = profile();
        for ear in Ear::BOTH {
            for freq in [250, 1000, 2000, 8000] {
                let mut previous = 0.0;
                let mut level = -20.0;
                while level <= 130.0 {
                    let a = reference_dbfs_amplitude(&p, ear, freq, level, 0.0).unwrap();
                    assert!((0.0..=1.0).contains(&a));
                    assert!(a >= previous, "{ear:?} {freq} {level}");
                    previous = a;
                    level += 2.5;
                }
            }
        }
    }

    #[test]
    fn test_missing_profile() {
        let err = AmplitudeStrategy::ReferenceDbfs
            .amplitude(None, Ear::Left, 1000, 20.0, 0.0)
            .unwrap_err();
        assert_eq!(err, CalibrationError::CalibrationMissing);
    }

    #[test]
    fn test_simple_offset_formula() {
        assert!(close(simple_offset_amplitude(60.0, 0.0), 0.5));
        assert!(close(simple_offset_amplitude(40.0, 0.0), 0.05));
        assert!(close(simple_offset_amplitude(30.0, 10.0), 0.05));
        assert_eq!(simple_offset_amplitude(-50.0, 0.0), SIMPLE_OFFSET_MIN_AMPLITUDE);
        assert_eq!(simple_offset_amplitude(100.0, 0.0), SIMPLE_OFFSET_MAX_AMPLITUDE);
    }

    #[test]
    fn test_simple_offset_needs_no_profile() {
        let a = AmplitudeStrategy::SimpleOffset
            .amplitude(None, Ear::Right, 1000, 60.0, 0.0)
            .unwrap();
        assert!(close(a, 0.5));
    }
}
