// CombinedCalibration: device offset + headphone bias

use std::sync::RwLock;

use super::device_profile::DeviceCalibrationStore;
use super::headphone_bias::HeadphoneBiasStore;
use crate::ear::Ear;

/// Supplies the total dB correction applied on top of a requested level
pub trait CorrectionSource: Send + Sync {
    fn total_correction(&self, ear: Ear, frequency_hz: u32) -> f64;
}

/// Correction source that always returns 0 dB
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCorrection;

impl CorrectionSource for NoCorrection {
    fn total_correction(&self, _ear: Ear, _frequency_hz: u32) -> f64 {
        0.0
    }
}

/// Both calibration stores behind one lookup
///
/// `get_total_offset(ear, f) == device.get_offset(f) + headphones.get_bias(ear, f)`,
/// with a missing entry on either side counting as 0.
#[derive(Debug)]
pub struct CombinedCalibration {
    pub device: DeviceCalibrationStore,
    pub headphones: HeadphoneBiasStore,
}

impl CombinedCalibration {
    pub fn new(device: DeviceCalibrationStore, headphones: HeadphoneBiasStore) -> Self {
        Self { device, headphones }
    }

    pub fn get_total_offset(&self, ear: Ear, frequency_hz: u32) -> f64 {
        self.device.get_offset(frequency_hz) + self.headphones.get_bias(ear, frequency_hz)
    }
}

impl CorrectionSource for CombinedCalibration {
    fn total_correction(&self, ear: Ear, frequency_hz: u32) -> f64 {
        self.get_total_offset(ear, frequency_hz)
    }
}

impl CorrectionSource for RwLock<CombinedCalibration> {
    fn total_correction(&self, ear: Ear, frequency_hz: u32) -> f64 {
        match self.read() {
            Ok(calibration) => calibration.get_total_offset(ear, frequency_hz),
            Err(poisoned) => {
                tracing::warn!("[Calibration] Lock poisoned; reading last known offsets");
                poisoned.into_inner().get_total_offset(ear, frequency_hz)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combined(dir: &tempfile::TempDir) -> CombinedCalibration {
        let device =
            DeviceCalibrationStore::open(dir.path().join("calibrations.json"), &[500, 1000]);
        let headphones = HeadphoneBiasStore::new(dir.path().join("headphones"));
        CombinedCalibration::new(device, headphones)
    }

    #[test]
    fn test_total_is_sum_of_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let mut cal = combined(&dir);
        cal.device.set_active("Speakers", true);
        cal.device.set_offset(1000, 2.0);
        cal.headphones.set_headphone("hp");
        cal.headphones.set_bias(Ear::Left, 1000, -7.0).unwrap();
        cal.headphones.set_bias(Ear::Right, 500, 1.5).unwrap();

        assert_eq!(cal.get_total_offset(Ear::Left, 1000), -5.0);
        assert_eq!(cal.get_total_offset(Ear::Right, 1000), 2.0);
        assert_eq!(cal.get_total_offset(Ear::Right, 500), 1.5);
        // neither side knows 8 kHz
        assert_eq!(cal.get_total_offset(Ear::Left, 8000), 0.0);
    }

    #[test]
    fn test_missing_sides_are_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cal = combined(&dir);
        for ear in Ear::BOTH {
            for freq in [250, 1000, 8000] {
                assert_eq!(cal.get_total_offset(ear, freq), 0.0);
            }
        }
    }

    #[test]
    fn test_rwlock_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut cal = combined(&dir);
        cal.headphones.set_headphone("hp");
        cal.headphones.set_bias(Ear::Left, 1000, 4.0).unwrap();
        let shared = RwLock::new(cal);
        assert_eq!(shared.total_correction(Ear::Left, 1000), 4.0);
        assert_eq!(NoCorrection.total_correction(Ear::Left, 1000), 0.0);
    }
}
