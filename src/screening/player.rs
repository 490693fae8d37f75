// TonePlayer: the playback seam the protocols drive

use crate::audio::ToneEngine;
use crate::ear::Ear;
use crate::error::ToneError;

pub trait TonePlayer: Send + Sync {
    /// Start a tone at `level_db_hl` plus `correction_db`
    fn play_tone(
        &self,
        frequency_hz: u32,
        level_db_hl: f64,
        ear: Ear,
        correction_db: f64,
    ) -> Result<(), ToneError>;

    fn stop(&self, immediate: bool) -> Result<(), ToneError>;

    fn is_playing(&self) -> bool;
}

impl TonePlayer for ToneEngine {
    fn play_tone(
        &self,
        frequency_hz: u32,
        level_db_hl: f64,
        ear: Ear,
        correction_db: f64,
    ) -> Result<(), ToneError> {
        self.play_tone_corrected(frequency_hz, level_db_hl, ear, correction_db)
    }

    fn stop(&self, immediate: bool) -> Result<(), ToneError> {
        ToneEngine::stop(self, immediate).map_err(ToneError::from)
    }

    fn is_playing(&self) -> bool {
        ToneEngine::is_playing(self)
    }
}
