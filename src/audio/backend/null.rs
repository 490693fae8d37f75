//! Headless output backend
//!
//! Nothing is sent to hardware. The renderer handed over on open is kept
//! behind a [`RenderTap`], so tests and offline rendering pull buffers
//! exactly as a device callback would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{OutputBackend, StreamRequest};
use crate::audio::render::ToneRenderer;
use crate::error::AudioError;

/// Pulls buffers from the renderer of the currently open null stream
#[derive(Clone, Default)]
pub struct RenderTap {
    renderer: Arc<Mutex<Option<ToneRenderer>>>,
}

impl RenderTap {
    /// Render one interleaved buffer; `false` when no stream is open
    pub fn render_into(&self, data: &mut [f32]) -> bool {
        match self.renderer.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(renderer) => {
                    renderer.render(data);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Render `frames` frames into a fresh buffer
    pub fn pull(&self, frames: usize) -> Option<Vec<f32>> {
        let channels = self.channels()?;
        let mut buffer = vec![0.0; frames * channels];
        self.render_into(&mut buffer).then_some(buffer)
    }

    pub fn channels(&self) -> Option<usize> {
        self.renderer
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(ToneRenderer::channels))
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.renderer
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(ToneRenderer::sample_rate))
    }
}

/// Output backend without a device
#[derive(Default)]
pub struct NullOutput {
    tap: RenderTap,
    last_request: Mutex<Option<StreamRequest>>,
    opens: AtomicUsize,
    fail_open: bool,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose device can never be opened
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn tap(&self) -> RenderTap {
        self.tap.clone()
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<StreamRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

impl OutputBackend for NullOutput {
    fn open_stream(&self, request: &StreamRequest, renderer: ToneRenderer) -> Result<(), AudioError> {
        if self.fail_open {
            return Err(AudioError::DeviceUnavailable {
                device: request
                    .device
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
            });
        }
        let mut slot = self.tap.renderer.lock().map_err(|_| AudioError::LockPoisoned {
            component: "null_output".to_string(),
        })?;
        if slot.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        *slot = Some(renderer);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close_stream(&self) {
        match self.tap.renderer.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn is_open(&self) -> bool {
        self.tap
            .renderer
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }
}
