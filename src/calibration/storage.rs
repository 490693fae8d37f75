//! JSON persistence helpers shared by the calibration stores

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CalibrationError;

/// Serialize `value` as pretty JSON and atomically replace `path`
///
/// Writes to a sibling `.tmp` file first and renames it over the target so a
/// crash mid-save never leaves a truncated calibration file.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), CalibrationError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CalibrationError::storage(parent, e))?;
        }
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| CalibrationError::storage(path, e))?;
    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(|e| CalibrationError::storage(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CalibrationError::storage(path, e)
    })
}

/// Read and parse a JSON document
///
/// `Ok(None)` when the file does not exist. Parse failures surface as
/// `MalformedCalibrationFile` so callers can decide whether to recover.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CalibrationError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(CalibrationError::storage(path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| CalibrationError::MalformedCalibrationFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
