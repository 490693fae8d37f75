// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel lifecycle and subscription

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::calibration_manager::CalibrationEvent;
use crate::screening::ScreeningEvent;

/// Manages all tokio broadcast channels
///
/// # Channel Types
/// - Screening: staircase and manual-entry progress
/// - Calibration: headphone selection, stored sessions, bias updates
pub struct BroadcastChannelManager {
    screening: Arc<Mutex<Option<broadcast::Sender<ScreeningEvent>>>>,
    calibration: Arc<Mutex<Option<broadcast::Sender<CalibrationEvent>>>>,
}

impl BroadcastChannelManager {
    /// Create a manager with all channels uninitialized
    pub fn new() -> Self {
        Self {
            screening: Arc::new(Mutex::new(None)),
            calibration: Arc::new(Mutex::new(None)),
        }
    }

    // ========================================================================
    // SCREENING CHANNEL
    // ========================================================================

    /// Initialize the screening channel
    ///
    /// A manual session emits one status event per tone loop and the
    /// staircase one event per stimulus; 256 messages leave room for a slow
    /// subscriber before it starts lagging.
    pub fn init_screening(&self) -> broadcast::Sender<ScreeningEvent> {
        let (tx, _) = broadcast::channel(256);
        if let Ok(mut slot) = self.screening.lock() {
            *slot = Some(tx.clone());
        }
        tx
    }

    /// Current screening sender, if initialized
    pub fn screening_sender(&self) -> Option<broadcast::Sender<ScreeningEvent>> {
        self.screening.lock().ok().and_then(|slot| slot.clone())
    }

    /// Subscribe to screening events; `None` until `init_screening()`
    pub fn subscribe_screening(&self) -> Option<broadcast::Receiver<ScreeningEvent>> {
        self.screening
            .lock()
            .ok()?
            .as_ref()
            .map(|tx| tx.subscribe())
    }

    // ========================================================================
    // CALIBRATION CHANNEL
    // ========================================================================

    pub fn init_calibration(&self) -> broadcast::Sender<CalibrationEvent> {
        let (tx, _) = broadcast::channel(50);
        if let Ok(mut slot) = self.calibration.lock() {
            *slot = Some(tx.clone());
        }
        tx
    }

    pub fn subscribe_calibration(&self) -> Option<broadcast::Receiver<CalibrationEvent>> {
        self.calibration
            .lock()
            .ok()?
            .as_ref()
            .map(|tx| tx.subscribe())
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ear::Ear;

    #[test]
    fn test_screening_channel_lifecycle() {
        let manager = BroadcastChannelManager::new();
        assert!(manager.subscribe_screening().is_none());
        assert!(manager.screening_sender().is_none());

        let _tx = manager.init_screening();
        assert!(manager.subscribe_screening().is_some());
        assert!(manager.screening_sender().is_some());
    }

    #[test]
    fn test_screening_multiple_subscribers() {
        let manager = BroadcastChannelManager::new();
        let tx = manager.init_screening();

        let mut rx1 = manager.subscribe_screening().unwrap();
        let mut rx2 = manager.subscribe_screening().unwrap();

        let event = ScreeningEvent::TestStarted { ear: Ear::Left };
        tx.send(event.clone()).unwrap();

        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }

    #[test]
    fn test_calibration_channel_lifecycle() {
        let manager = BroadcastChannelManager::default();
        assert!(manager.subscribe_calibration().is_none());

        let tx = manager.init_calibration();
        let mut rx = manager.subscribe_calibration().unwrap();
        tx.send(CalibrationEvent::HeadphoneSelected {
            headphone_id: "hp".to_string(),
        })
        .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            CalibrationEvent::HeadphoneSelected { .. }
        ));
    }
}
