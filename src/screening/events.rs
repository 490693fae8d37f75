// Screening events published to subscribers (UI, CLI, loggers)

use serde::Serialize;
use tokio::sync::broadcast;

use crate::ear::Ear;

/// Progress notifications from the staircase and manual protocols
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScreeningEvent {
    TestStarted {
        ear: Ear,
    },
    /// Also emitted at the start of each verification ascent
    FrequencyStarted {
        ear: Ear,
        frequency_hz: u32,
    },
    LevelChanged {
        ear: Ear,
        frequency_hz: u32,
        level_db_hl: f64,
    },
    ThresholdCaptured {
        ear: Ear,
        frequency_hz: u32,
        level_db_hl: f64,
    },
    TestFinished {
        ear: Ear,
        cancelled: bool,
    },
    CursorMoved {
        ear: Ear,
        frequency_hz: u32,
        level_db_hl: f64,
    },
    /// One iteration of the manual tone loop
    ManualStatus {
        ear: Ear,
        frequency_hz: u32,
        level_db_hl: f64,
    },
    PointMarked {
        ear: Ear,
        frequency_hz: u32,
        level_db_hl: f64,
    },
    Error {
        code: i32,
        message: String,
    },
}

/// Optional broadcast sender; sending without subscribers is not an error
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<broadcast::Sender<ScreeningEvent>>,
}

impl EventEmitter {
    pub fn new(tx: broadcast::Sender<ScreeningEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Emitter that drops every event
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ScreeningEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
