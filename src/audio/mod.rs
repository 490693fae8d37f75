// Audio module - calibrated tone synthesis and output device handling

pub mod backend;
pub mod devices;
pub mod engine;
pub mod level;
pub mod render;

// Re-export commonly used types for convenience
#[cfg(not(target_os = "android"))]
pub use backend::CpalOutput;
pub use backend::{NullOutput, OutputBackend, RenderTap, StreamRequest};
pub use devices::{find_device_match, list_output_devices, OutputDeviceInfo};
pub use engine::ToneEngine;
pub use level::{reference_dbfs_amplitude, simple_offset_amplitude, AmplitudeStrategy};
pub use render::{ChannelMap, PlaybackState, ToneRenderer};
