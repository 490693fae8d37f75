//! CPAL output backend for desktop platforms (Linux, macOS, Windows)

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Mutex;

use super::{OutputBackend, StreamRequest};
use crate::audio::devices::{match_device_name, stable_device_id};
use crate::audio::render::ToneRenderer;
use crate::error::{log_audio_error, AudioError};

/// Wrapper to make Stream Send+Sync
struct StreamHolder(cpal::Stream);

// SAFETY: the stream is only created, paused and dropped behind the
// backend's mutex; the audio thread never touches the handle itself.
unsafe impl Send for StreamHolder {}
unsafe impl Sync for StreamHolder {}

/// Output backend that plays through a real device via cpal
#[derive(Default)]
pub struct CpalOutput {
    stream: Mutex<Option<StreamHolder>>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_device(request: &StreamRequest) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        let Some(query) = request.device.as_deref() else {
            return host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    device: "default".to_string(),
                });
        };

        let devices: Vec<(cpal::Device, String)> = host
            .output_devices()
            .map_err(|e| AudioError::DeviceUnavailable {
                device: format!("{} ({})", query, e),
            })?
            .filter_map(|d| d.name().ok().map(|name| (d, name)))
            .collect();

        let stable_ids: Vec<String> = devices
            .iter()
            .map(|(_, name)| stable_device_id(host.id().name(), name))
            .collect();
        let names: Vec<&str> = devices.iter().map(|(_, name)| name.as_str()).collect();

        let index = stable_ids
            .iter()
            .position(|id| id == query)
            .or_else(|| match_device_name(&names, query));

        index
            .and_then(|idx| devices.into_iter().nth(idx))
            .map(|(device, _)| device)
            .ok_or_else(|| AudioError::DeviceUnavailable {
                device: query.to_string(),
            })
    }

    fn build_stream(
        device: &cpal::Device,
        request: &StreamRequest,
        renderer: ToneRenderer,
    ) -> Result<cpal::Stream, AudioError> {
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("Failed to get default output config: {:?}", e),
            })?;

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedSampleFormat {
                format: format!("{:?}", supported.sample_format()),
            });
        }

        let mut stream_config = cpal::StreamConfig {
            channels: request.channels,
            sample_rate: cpal::SampleRate(request.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(request.block_size),
        };

        let err_fn = |err: cpal::StreamError| {
            let err = AudioError::StreamFailure {
                reason: err.to_string(),
            };
            log_audio_error(&err, "CpalOutput::stream");
        };

        let renderer = std::sync::Arc::new(renderer);
        let build = |config: &cpal::StreamConfig| {
            let renderer = std::sync::Arc::clone(&renderer);
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data),
                err_fn,
                None,
            )
        };

        match build(&stream_config) {
            Ok(stream) => Ok(stream),
            Err(first) => {
                // Some hosts refuse fixed buffer sizes; retry with the device default
                tracing::warn!(
                    "[CpalOutput] Fixed block size {} rejected ({}); using device default",
                    request.block_size,
                    first
                );
                stream_config.buffer_size = cpal::BufferSize::Default;
                build(&stream_config).map_err(|e| AudioError::StreamOpenFailed {
                    reason: format!("{:?}", e),
                })
            }
        }
    }
}

impl OutputBackend for CpalOutput {
    fn open_stream(&self, request: &StreamRequest, renderer: ToneRenderer) -> Result<(), AudioError> {
        let mut slot = self.stream.lock().map_err(|_| AudioError::LockPoisoned {
            component: "cpal_stream".to_string(),
        })?;
        if slot.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let device = Self::resolve_device(request)?;
        let stream = Self::build_stream(&device, request, renderer)
            .inspect_err(|err| log_audio_error(err, "CpalOutput::open_stream"))?;
        stream.play().map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to start output stream: {:?}", e),
        })?;

        tracing::info!(
            "[CpalOutput] Stream open: device={}, {} Hz, {} ch, block {}",
            device.name().unwrap_or_else(|_| "<unknown>".to_string()),
            request.sample_rate,
            request.channels,
            request.block_size
        );
        *slot = Some(StreamHolder(stream));
        Ok(())
    }

    fn close_stream(&self) {
        let holder = match self.stream.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(StreamHolder(stream)) = holder {
            let _ = stream.pause();
            drop(stream);
            tracing::info!("[CpalOutput] Stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}
