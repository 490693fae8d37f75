// BiasAggregator: recompute a headphone bias curve from stored sessions
//
// Per session and ear a delta curve is derived (reference − measured, or
// −measured for normal-hearing subjects), outliers are dropped, the rest is
// reduced per frequency and optionally smoothed along the frequency axis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::headphone_bias::HeadphoneBiasStore;
use super::session::{CalibrationSession, CalibrationSessionStore};
use crate::config::CalibrationConfig;
use crate::ear::{Ear, EarFrequencyMap, FrequencyMap};
use crate::error::{log_calibration_error, CalibrationError};

/// Per-frequency reduction applied to the session deltas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    #[default]
    Median,
    Mean,
}

impl Aggregator {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregator::Median => "median",
            Aggregator::Mean => "mean",
        }
    }

    /// Reduce a non-empty sample set
    fn reduce(self, samples: &mut [f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        match self {
            Aggregator::Mean => Some(samples.iter().sum::<f64>() / samples.len() as f64),
            Aggregator::Median => {
                samples.sort_by(f64::total_cmp);
                let mid = samples.len() / 2;
                if samples.len() % 2 == 0 {
                    Some((samples[mid - 1] + samples[mid]) / 2.0)
                } else {
                    Some(samples[mid])
                }
            }
        }
    }
}

impl std::str::FromStr for Aggregator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "median" => Ok(Aggregator::Median),
            "mean" => Ok(Aggregator::Mean),
            other => Err(format!("unknown aggregator '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationOptions {
    pub outlier_abs_db: f64,
    pub smoothing: bool,
    pub aggregator: Aggregator,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            outlier_abs_db: 25.0,
            smoothing: true,
            aggregator: Aggregator::Median,
        }
    }
}

impl From<&CalibrationConfig> for AggregationOptions {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            outlier_abs_db: config.outlier_abs_db,
            smoothing: config.smoothing,
            aggregator: config.aggregator,
        }
    }
}

/// A delta rejected for exceeding the outlier threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutlier {
    /// Position of the session in the aggregated slice
    pub session_index: usize,
    pub subject_id: String,
    pub ear: Ear,
    pub frequency_hz: u32,
    pub delta_db: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregationReport {
    pub bias: EarFrequencyMap,
    pub outliers: Vec<SessionOutlier>,
    /// Sessions that contributed at least one sample
    pub sessions_used: usize,
}

pub struct BiasAggregator;

impl BiasAggregator {
    /// Aggregate sessions into a bias curve restricted to `frequencies`
    pub fn aggregate(
        sessions: &[CalibrationSession],
        frequencies: &[u32],
        options: &AggregationOptions,
    ) -> AggregationReport {
        let mut axis: Vec<u32> = frequencies.to_vec();
        axis.sort_unstable();
        axis.dedup();

        let mut samples: BTreeMap<(Ear, u32), Vec<f64>> = BTreeMap::new();
        let mut report = AggregationReport::default();

        for (index, session) in sessions.iter().enumerate() {
            let mut contributed = false;
            for ear in Ear::BOTH {
                for (frequency_hz, delta_db) in session_deltas(session, ear, &axis) {
                    if delta_db.abs() > options.outlier_abs_db {
                        tracing::warn!(
                            "[BiasAggregator] Outlier dropped: session #{} ({}) {} {} Hz delta {:+.1} dB",
                            index,
                            session.subject_id(),
                            ear.clinical_code(),
                            frequency_hz,
                            delta_db
                        );
                        report.outliers.push(SessionOutlier {
                            session_index: index,
                            subject_id: session.subject_id().to_string(),
                            ear,
                            frequency_hz,
                            delta_db,
                        });
                        continue;
                    }
                    samples.entry((ear, frequency_hz)).or_default().push(delta_db);
                    contributed = true;
                }
            }
            if contributed {
                report.sessions_used += 1;
            }
        }

        for ((ear, frequency_hz), mut values) in samples {
            if let Some(value) = options.aggregator.reduce(&mut values) {
                report.bias.insert(ear, frequency_hz, value);
            }
        }

        if options.smoothing {
            for ear in Ear::BOTH {
                let smoothed = smooth(report.bias.ear(ear), &axis);
                *report.bias.ear_mut(ear) = smoothed;
            }
        }

        tracing::info!(
            "[BiasAggregator] {} session(s) used, {} outlier(s), aggregator={}, smoothing={}",
            report.sessions_used,
            report.outliers.len(),
            options.aggregator.as_str(),
            options.smoothing
        );
        report
    }

    /// Aggregate every stored session of `headphone_id` and save the result
    /// as that headphone's bias profile
    pub fn recompute(
        sessions: &CalibrationSessionStore,
        headphones: &mut HeadphoneBiasStore,
        headphone_id: &str,
        frequencies: &[u32],
        options: &AggregationOptions,
    ) -> Result<AggregationReport, CalibrationError> {
        let stored = sessions.load_all(headphone_id)?;
        if stored.is_empty() {
            let err = CalibrationError::NoSessions {
                headphone_id: headphone_id.to_string(),
            };
            log_calibration_error(&err, "BiasAggregator::recompute");
            return Err(err);
        }

        let loaded: Vec<CalibrationSession> = stored.into_iter().map(|s| s.session).collect();
        let report = Self::aggregate(&loaded, frequencies, options);

        headphones.set_headphone(headphone_id);
        headphones.set_bias_map(report.bias.clone())?;
        headphones.save()?;
        Ok(report)
    }
}

/// Deltas of one session for one ear, limited to the target frequencies
fn session_deltas(session: &CalibrationSession, ear: Ear, axis: &[u32]) -> Vec<(u32, f64)> {
    let measured = session.measured_thresholds().ear(ear);
    let in_axis = |f: &u32| axis.binary_search(f).is_ok();

    if session.has_reference_for(ear) {
        let Some(reference) = session.reference_thresholds().map(|r| r.ear(ear)) else {
            return Vec::new();
        };
        reference
            .iter()
            .filter(|(f, _)| in_axis(*f))
            .filter_map(|(f, ref_db)| measured.get(f).map(|app_db| (*f, ref_db - app_db)))
            .collect()
    } else if session.is_normal_hearing() {
        measured
            .iter()
            .filter(|(f, _)| in_axis(*f))
            .map(|(f, app_db)| (*f, -app_db))
            .collect()
    } else {
        Vec::new()
    }
}

/// Single-pass 3-point moving average over neighbours on the axis that have values
fn smooth(curve: &FrequencyMap, axis: &[u32]) -> FrequencyMap {
    let mut out = FrequencyMap::new();
    for (i, frequency_hz) in axis.iter().enumerate() {
        let Some(center) = curve.get(frequency_hz) else {
            continue;
        };
        let mut sum = *center;
        let mut count = 1.0;
        let neighbours = [i.checked_sub(1), Some(i + 1)];
        for j in neighbours.into_iter().flatten() {
            if let Some(value) = axis.get(j).and_then(|f| curve.get(f)) {
                sum += value;
                count += 1.0;
            }
        }
        out.insert(*frequency_hz, sum / count);
    }
    out
}
