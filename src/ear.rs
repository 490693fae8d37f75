//! Ear identity and per-ear frequency maps
//!
//! Calibration documents label ears with a zoo of aliases ("R", "Right",
//! "DX", "OD", ...). They are normalized into [`Ear`] once, at load time,
//! so nothing downstream handles stringly-typed ear codes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Test ear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ear {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
}

impl Ear {
    pub const BOTH: [Ear; 2] = [Ear::Left, Ear::Right];

    /// Normalize an ear label from a calibration or session document
    ///
    /// Accepts `R/RIGHT/DX/OD/EAR_R` and `L/LEFT/SX/OS/EAR_L`, case-insensitive
    /// and trimmed. Returns `None` for anything else.
    pub fn from_alias(label: &str) -> Option<Ear> {
        match label.trim().to_ascii_uppercase().as_str() {
            "R" | "RIGHT" | "DX" | "OD" | "EAR_R" => Some(Ear::Right),
            "L" | "LEFT" | "SX" | "OS" | "EAR_L" => Some(Ear::Left),
            _ => None,
        }
    }

    /// Two-letter code used as JSON key in bias and session files
    pub fn code(self) -> &'static str {
        match self {
            Ear::Left => "L",
            Ear::Right => "R",
        }
    }

    /// Clinical notation (oculus sinister / oculus dexter convention)
    pub fn clinical_code(self) -> &'static str {
        match self {
            Ear::Left => "OS",
            Ear::Right => "OD",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Ear::Left => "left",
            Ear::Right => "right",
        }
    }

    pub fn other(self) -> Ear {
        match self {
            Ear::Left => Ear::Right,
            Ear::Right => Ear::Left,
        }
    }
}

impl std::fmt::Display for Ear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// dB values keyed by frequency in Hz
///
/// Serialized with stringified integer keys (`{"1000": -3.5}`).
pub type FrequencyMap = BTreeMap<u32, f64>;

/// Parse a frequency key such as `"1000"`, `"1000.0"` or `1000`
///
/// Only positive integer-valued frequencies are accepted.
pub fn parse_frequency_key(key: &str) -> Option<u32> {
    let value: f64 = key.trim().parse().ok()?;
    if !value.is_finite() || value < 1.0 || value > u32::MAX as f64 {
        return None;
    }
    Some(value.trunc() as u32)
}

/// Parse a dB value that may arrive as a JSON number or numeric string
pub fn parse_db_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Leniently parse a `{"<freq>": db}` object, dropping malformed entries
pub fn frequency_map_from_value(value: &Value) -> FrequencyMap {
    let mut map = FrequencyMap::new();
    if let Value::Object(entries) = value {
        for (key, raw) in entries {
            match (parse_frequency_key(key), parse_db_value(raw)) {
                (Some(freq), Some(db)) => {
                    map.insert(freq, db);
                }
                _ => {
                    tracing::debug!("[Calibration] Dropping malformed entry {}={}", key, raw);
                }
            }
        }
    }
    map
}

/// Per-ear frequency maps, serialized as `{"L": {...}, "R": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarFrequencyMap {
    #[serde(rename = "L", default)]
    pub left: FrequencyMap,
    #[serde(rename = "R", default)]
    pub right: FrequencyMap,
}

impl EarFrequencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ear(&self, ear: Ear) -> &FrequencyMap {
        match ear {
            Ear::Left => &self.left,
            Ear::Right => &self.right,
        }
    }

    pub fn ear_mut(&mut self, ear: Ear) -> &mut FrequencyMap {
        match ear {
            Ear::Left => &mut self.left,
            Ear::Right => &mut self.right,
        }
    }

    pub fn get(&self, ear: Ear, frequency_hz: u32) -> Option<f64> {
        self.ear(ear).get(&frequency_hz).copied()
    }

    pub fn insert(&mut self, ear: Ear, frequency_hz: u32, value: f64) {
        self.ear_mut(ear).insert(frequency_hz, value);
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    /// Apply `f` to every value, keeping keys
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        let apply = |src: &FrequencyMap| src.iter().map(|(k, v)| (*k, f(*v))).collect();
        Self {
            left: apply(&self.left),
            right: apply(&self.right),
        }
    }

    /// Leniently parse an ear-keyed JSON object
    ///
    /// Ear keys go through [`Ear::from_alias`]; unknown ears, non-numeric
    /// frequencies and non-numeric values are dropped rather than failing
    /// the whole document.
    pub fn from_value(value: &Value) -> Self {
        let mut out = Self::new();
        if let Value::Object(ears) = value {
            for (label, inner) in ears {
                match Ear::from_alias(label) {
                    Some(ear) => out.ear_mut(ear).extend(frequency_map_from_value(inner)),
                    None => {
                        tracing::debug!("[Calibration] Ignoring unknown ear label '{}'", label);
                    }
                }
            }
        }
        out
    }

    pub fn to_value(&self) -> Value {
        let encode = |map: &FrequencyMap| {
            let obj: Map<String, Value> = map
                .iter()
                .map(|(freq, db)| (freq.to_string(), Value::from(*db)))
                .collect();
            Value::Object(obj)
        };
        let mut root = Map::new();
        root.insert("L".to_string(), encode(&self.left));
        root.insert("R".to_string(), encode(&self.right));
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alias_normalization() {
        for label in ["R", "right", " Right ", "DX", "od", "EAR_R"] {
            assert_eq!(Ear::from_alias(label), Some(Ear::Right), "{label}");
        }
        for label in ["L", "left", "SX", "os", "ear_l"] {
            assert_eq!(Ear::from_alias(label), Some(Ear::Left), "{label}");
        }
        assert_eq!(Ear::from_alias("center"), None);
        assert_eq!(Ear::from_alias(""), None);
    }

    #[test]
    fn test_codes() {
        assert_eq!(Ear::Left.code(), "L");
        assert_eq!(Ear::Right.clinical_code(), "OD");
        assert_eq!(Ear::Left.other(), Ear::Right);
    }

    #[test]
    fn test_frequency_key_parsing() {
        assert_eq!(parse_frequency_key("1000"), Some(1000));
        assert_eq!(parse_frequency_key("250.0"), Some(250));
        assert_eq!(parse_frequency_key("0"), None);
        assert_eq!(parse_frequency_key("-500"), None);
        assert_eq!(parse_frequency_key("abc"), None);
    }

    #[test]
    fn test_lenient_map_drops_bad_entries() {
        let value = json!({
            "OD": {"1000": -5.0, "2000": "-3.5", "x": 1.0, "4000": "loud"},
            "left": {"500": 2},
            "middle": {"1000": 9.0}
        });
        let map = EarFrequencyMap::from_value(&value);
        assert_eq!(map.get(Ear::Right, 1000), Some(-5.0));
        assert_eq!(map.get(Ear::Right, 2000), Some(-3.5));
        assert_eq!(map.right.len(), 2);
        assert_eq!(map.get(Ear::Left, 500), Some(2.0));
    }

    #[test]
    fn test_serde_uses_string_keys() {
        let mut map = EarFrequencyMap::new();
        map.insert(Ear::Left, 1000, -10.0);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, json!({"L": {"1000": -10.0}, "R": {}}));
        assert_eq!(map.to_value(), json);

        let back: EarFrequencyMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
