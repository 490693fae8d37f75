// CalibrationSessionStore: append-only calibration history per headphone
//
// Layout: <headphones_root>/<headphone_id>/calibration_sessions/<YYYYMMDD_HHMMSS>_<subject>.json

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::headphone_bias::sanitize_headphone_id;
use super::storage::{read_json, write_json_atomic};
use crate::ear::{Ear, EarFrequencyMap};
use crate::error::{log_calibration_error, CalibrationError};

const SESSIONS_DIR: &str = "calibration_sessions";
const ANONYMOUS_SUBJECT: &str = "anon";

/// One completed calibration run
///
/// Fields are read-only; a session is never edited after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSession {
    subject_id: String,
    is_normal_hearing: bool,
    measured: EarFrequencyMap,
    reference: Option<EarFrequencyMap>,
    created_at: Option<DateTime<Utc>>,
    options: Map<String, Value>,
}

impl CalibrationSession {
    /// New session stamped with the current time
    ///
    /// An empty reference map is stored as "no reference".
    pub fn new(
        subject_id: &str,
        is_normal_hearing: bool,
        measured: EarFrequencyMap,
        reference: Option<EarFrequencyMap>,
        options: Map<String, Value>,
    ) -> Self {
        Self {
            subject_id: subject_id.trim().to_string(),
            is_normal_hearing,
            measured,
            reference: reference.filter(|r| !r.is_empty()),
            created_at: Some(Utc::now()),
            options,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn is_normal_hearing(&self) -> bool {
        self.is_normal_hearing
    }

    pub fn measured_thresholds(&self) -> &EarFrequencyMap {
        &self.measured
    }

    pub fn reference_thresholds(&self) -> Option<&EarFrequencyMap> {
        self.reference.as_ref()
    }

    /// Whether this session carries reference thresholds for `ear`
    pub fn has_reference_for(&self, ear: Ear) -> bool {
        self.reference.as_ref().is_some_and(|r| !r.ear(ear).is_empty())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn to_value(&self) -> Value {
        let mut root = json!({
            "subject": {
                "id": self.subject_id,
                "is_normoacusic": self.is_normal_hearing,
            },
            "hl_app": self.measured.to_value(),
            "hl_ref": self.reference.clone().unwrap_or_default().to_value(),
            "options": Value::Object(self.options.clone()),
        });
        if let (Some(created_at), Some(obj)) = (self.created_at, root.as_object_mut()) {
            obj.insert("created_at".to_string(), Value::from(created_at.to_rfc3339()));
        }
        root
    }

    /// Parse a stored session; numeric entries are read leniently
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let root = value.as_object().ok_or("session is not a JSON object")?;
        let subject = root.get("subject").and_then(Value::as_object);
        let subject_id = subject
            .and_then(|s| s.get("id"))
            .map(|id| match id {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let is_normal_hearing = subject
            .and_then(|s| s.get("is_normoacusic"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let measured = root
            .get("hl_app")
            .map(EarFrequencyMap::from_value)
            .unwrap_or_default();
        let reference = root
            .get("hl_ref")
            .map(EarFrequencyMap::from_value)
            .filter(|r| !r.is_empty());
        let created_at = root
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let options = root
            .get("options")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            subject_id,
            is_normal_hearing,
            measured,
            reference,
            created_at,
            options,
        })
    }
}

/// Listing entry for a stored session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub path: PathBuf,
    pub subject_id: String,
    pub is_normoacusic: bool,
    pub has_ref: bool,
}

/// A session together with the file it came from
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub name: String,
    pub path: PathBuf,
    pub session: CalibrationSession,
}

#[derive(Debug, Clone)]
pub struct CalibrationSessionStore {
    root: PathBuf,
}

impl CalibrationSessionStore {
    /// `root` is the headphones directory shared with the bias store
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sessions_dir(&self, headphone_id: &str) -> PathBuf {
        self.root
            .join(sanitize_headphone_id(headphone_id))
            .join(SESSIONS_DIR)
    }

    /// Persist a new session file; existing files are never overwritten
    pub fn append(
        &self,
        headphone_id: &str,
        session: &CalibrationSession,
    ) -> Result<PathBuf, CalibrationError> {
        let dir = self.sessions_dir(headphone_id);
        fs::create_dir_all(&dir).map_err(|e| CalibrationError::storage(&dir, e))?;

        let stamp = session
            .created_at()
            .unwrap_or_else(Utc::now)
            .with_timezone(&Local)
            .format("%Y%m%d_%H%M%S");
        let subject = match session.subject_id() {
            "" => ANONYMOUS_SUBJECT.to_string(),
            id => sanitize_headphone_id(id),
        };
        let stem = format!("{}_{}", stamp, subject);
        let path = unused_path(&dir, &stem);

        write_json_atomic(&path, &session.to_value())
            .inspect_err(|err| log_calibration_error(err, "CalibrationSessionStore::append"))?;
        tracing::info!("[CalibrationSessions] Stored {}", path.display());
        Ok(path)
    }

    /// All readable sessions in file-name order
    ///
    /// Unreadable or malformed files are skipped with a warning.
    pub fn load_all(&self, headphone_id: &str) -> Result<Vec<StoredSession>, CalibrationError> {
        let dir = self.sessions_dir(headphone_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CalibrationError::storage(&dir, err)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .collect();
        paths.sort();

        let mut sessions = Vec::with_capacity(paths.len());
        for path in paths {
            match load_session(&path) {
                Ok(session) => sessions.push(StoredSession {
                    name: file_name(&path),
                    path,
                    session,
                }),
                Err(reason) => {
                    tracing::warn!(
                        "[CalibrationSessions] Skipping {}: {}",
                        path.display(),
                        reason
                    );
                }
            }
        }
        Ok(sessions)
    }

    pub fn list(&self, headphone_id: &str) -> Result<Vec<SessionSummary>, CalibrationError> {
        Ok(self
            .load_all(headphone_id)?
            .into_iter()
            .map(|stored| SessionSummary {
                has_ref: stored.session.reference_thresholds().is_some(),
                subject_id: stored.session.subject_id().to_string(),
                is_normoacusic: stored.session.is_normal_hearing(),
                name: stored.name,
                path: stored.path,
            })
            .collect())
    }
}

fn load_session(path: &Path) -> Result<CalibrationSession, String> {
    match read_json::<Value>(path) {
        Ok(Some(value)) => CalibrationSession::from_value(&value),
        Ok(None) => Err("file vanished".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn unused_path(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{}.json", stem));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}.json", stem, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}
