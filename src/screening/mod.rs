// Screening module - threshold search protocols
//
// Two ways of finding a hearing threshold with the calibrated tone engine:
// 1. Staircase: automated ascend-and-verify driven by the response signal
// 2. ManualThresholdEntry: operator-paced cursor with a looping tone
//
// Both play through the TonePlayer seam, apply the CorrectionSource for
// every stimulus and record into a shared ResultsStore.

pub mod events;
pub mod manual;
pub mod player;
pub mod response;
pub mod results;
pub mod staircase;
pub mod timing;

pub use events::{EventEmitter, ScreeningEvent};
pub use manual::{ManualCursor, ManualParams, ManualThresholdEntry};
pub use player::TonePlayer;
pub use response::ResponseSignal;
pub use results::{ResultsStore, ThresholdMeasurement};
pub use staircase::{Staircase, StaircaseOutcome, StaircaseParams, StaircaseRunner};
pub use timing::{IsiSource, NoopSleeper, RandomIsi, SequenceIsi, Sleeper, ThreadSleeper};
