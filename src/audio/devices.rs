//! Output device catalogue
//!
//! Lists playable outputs and resolves a requested device by name with the
//! order exact → case-insensitive → prefix → substring. Devices also get a
//! stable id `host__name` (slugged) used to key headphone calibration.

use serde::Serialize;

use crate::error::AudioError;

const SLUG_MAX_LEN: usize = 48;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub stable_id: String,
    pub default_sample_rate: Option<u32>,
    pub is_default: bool,
    pub channels: u16,
}

/// Collapse runs of non-alphanumerics to `_`, trim, cap at 48 chars
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    slug.truncate(SLUG_MAX_LEN);
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "device".to_string()
    } else {
        slug.to_string()
    }
}

pub fn stable_device_id(host: &str, name: &str) -> String {
    format!("{}__{}", slugify(host), slugify(name))
}

/// Index of the best name match for `query`
pub fn match_device_name<S: AsRef<str>>(names: &[S], query: &str) -> Option<usize> {
    if let Some(idx) = names.iter().position(|n| n.as_ref() == query) {
        return Some(idx);
    }
    let query = query.to_lowercase();
    let lowered: Vec<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
    lowered
        .iter()
        .position(|n| *n == query)
        .or_else(|| lowered.iter().position(|n| n.starts_with(&query)))
        .or_else(|| lowered.iter().position(|n| n.contains(&query)))
}

/// Resolve a device by stable id or name
pub fn find_device_match<'a>(
    devices: &'a [OutputDeviceInfo],
    query: &str,
) -> Option<&'a OutputDeviceInfo> {
    if let Some(device) = devices.iter().find(|d| d.stable_id == query) {
        return Some(device);
    }
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    match_device_name(&names, query).map(|idx| &devices[idx])
}

/// Enumerate output devices on the default host
#[cfg(not(target_os = "android"))]
pub fn list_output_devices() -> Result<Vec<OutputDeviceInfo>, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let host_name = host.id().name();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::HardwareError {
            details: format!("Failed to enumerate output devices: {}", e),
        })?;

    let mut out = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        let config = device.default_output_config().ok();
        let channels = config.as_ref().map(|c| c.channels()).unwrap_or(0);
        if channels == 0 {
            continue;
        }
        out.push(OutputDeviceInfo {
            stable_id: stable_device_id(host_name, &name),
            is_default: default_name.as_deref() == Some(name.as_str()),
            default_sample_rate: config.map(|c| c.sample_rate().0),
            channels,
            name,
        });
    }
    tracing::debug!("[Devices] Found {} output devices on {}", out.len(), host_name);
    Ok(out)
}

#[cfg(target_os = "android")]
pub fn list_output_devices() -> Result<Vec<OutputDeviceInfo>, AudioError> {
    Ok(Vec::new())
}
