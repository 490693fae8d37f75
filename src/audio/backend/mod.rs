//! Output backend abstraction for the tone engine.

use crate::error::AudioError;

use super::render::ToneRenderer;

/// Parameters for opening an output stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Device name or stable id; `None` selects the host default
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: u32,
}

/// Trait implemented by audio output backends.
///
/// A backend owns at most one open stream. `open_stream` hands it the
/// renderer that the stream callback must drive.
pub trait OutputBackend: Send + Sync {
    fn open_stream(&self, request: &StreamRequest, renderer: ToneRenderer) -> Result<(), AudioError>;
    fn close_stream(&self);
    fn is_open(&self) -> bool;
}

#[cfg(not(target_os = "android"))]
mod cpal;
#[cfg(not(target_os = "android"))]
pub use self::cpal::CpalOutput;

mod null;
pub use null::{NullOutput, RenderTap};
