// Managers Module
//
// Focused manager classes extracted from AudiometerContext.
//
// Each manager handles one specific concern:
// - CalibrationManager: headphone calibration workflows and persistence
// - BroadcastChannelManager: Tokio broadcast channel management

pub mod broadcast_manager;
pub mod calibration_manager;

pub use broadcast_manager::BroadcastChannelManager;
pub use calibration_manager::{CalibrationEvent, CalibrationManager};
