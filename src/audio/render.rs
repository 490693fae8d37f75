//! Real-time tone renderer
//!
//! [`ToneRenderer::render`] is the body of the output callback. It takes
//! the playback-state lock once per buffer, synthesizes into the selected
//! channel and writes phase/gain/elapsed back before releasing it. It never
//! allocates, logs or touches the filesystem.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use crate::calibration::ChannelRouting;
use crate::ear::Ear;

/// Gains at or below this are treated as silent
pub const GAIN_EPSILON: f64 = 1e-6;

/// Playback parameters shared between the control side and the callback
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub target_gain: f64,
    pub current_gain: f64,
    pub frequency_hz: f64,
    pub ear: Ear,
    pub playing: bool,
    /// Set while the callback is producing non-silent output
    pub running: bool,
    pub elapsed_samples: u64,
    /// Sample-position accumulator, wrapped modulo the sample rate
    pub phase: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            target_gain: 0.0,
            current_gain: 0.0,
            frequency_hz: 0.0,
            ear: Ear::Right,
            playing: false,
            running: false,
            elapsed_samples: 0,
            phase: 0.0,
        }
    }
}

impl PlaybackState {
    /// Snap to silence (immediate stop / teardown)
    pub fn silence(&mut self) {
        self.playing = false;
        self.target_gain = 0.0;
        self.current_gain = 0.0;
        self.running = false;
    }
}

/// Ear → output channel routing
///
/// Canonical layout is left on channel 0 ("OS") and right on channel 1 ("OD").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    pub left: usize,
    pub right: usize,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self { left: 0, right: 1 }
    }
}

impl ChannelMap {
    /// Channels required to address both ears
    pub fn channel_count(&self) -> u16 {
        self.left.max(self.right).saturating_add(1).min(u16::MAX as usize) as u16
    }

    /// Channel index for `ear`, clamped into `[0, channel_count)`
    pub fn channel_for(&self, ear: Ear, channel_count: usize) -> usize {
        let channel = match ear {
            Ear::Left => self.left,
            Ear::Right => self.right,
        };
        channel.min(channel_count.saturating_sub(1))
    }

    /// Merge a partial routing; returns whether anything changed
    pub fn apply(&mut self, routing: ChannelRouting) -> bool {
        let before = *self;
        if let Some(left) = routing.left {
            self.left = left;
        }
        if let Some(right) = routing.right {
            self.right = right;
        }
        before != *self
    }
}

/// Renders interleaved f32 frames from the shared playback state
pub struct ToneRenderer {
    state: Arc<Mutex<PlaybackState>>,
    sample_rate: u32,
    channels: usize,
    channel_map: ChannelMap,
    auto_stop_samples: u64,
}

impl ToneRenderer {
    /// `auto_stop_seconds <= 0` disables the failsafe
    pub fn new(
        state: Arc<Mutex<PlaybackState>>,
        sample_rate: u32,
        channels: u16,
        channel_map: ChannelMap,
        auto_stop_seconds: f64,
    ) -> Self {
        let auto_stop_samples = if auto_stop_seconds > 0.0 {
            (sample_rate as f64 * auto_stop_seconds) as u64
        } else {
            0
        };
        Self {
            state,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1) as usize,
            channel_map,
            auto_stop_samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fill one interleaved buffer
    pub fn render(&self, data: &mut [f32]) {
        data.fill(0.0);
        let frames = data.len() / self.channels;
        if frames == 0 {
            return;
        }

        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if state.frequency_hz <= 0.0
            || (!state.playing
                && state.current_gain <= GAIN_EPSILON
                && state.target_gain <= GAIN_EPSILON)
        {
            state.current_gain = 0.0;
            state.running = false;
            return;
        }

        let sample_rate = self.sample_rate as f64;
        let angular = TAU * state.frequency_hz / sample_rate;
        let current = state.current_gain;
        let delta = state.target_gain - current;
        let step = if delta.abs() > GAIN_EPSILON {
            delta / frames as f64
        } else {
            0.0
        };
        let channel = self.channel_map.channel_for(state.ear, self.channels);

        for (i, frame) in data.chunks_exact_mut(self.channels).enumerate() {
            let gain = current + step * i as f64;
            frame[channel] = ((angular * (i as f64 + state.phase)).sin() * gain) as f32;
        }

        state.current_gain = current + step * (frames - 1) as f64;
        state.phase = (state.phase + frames as f64) % sample_rate;
        state.running = true;

        if state.playing {
            state.elapsed_samples += frames as u64;
            if self.auto_stop_samples > 0 && state.elapsed_samples >= self.auto_stop_samples {
                state.playing = false;
                state.target_gain = 0.0;
            }
        }
    }
}
