//! Data preprocessing
//!
//! Turns raw, possibly gappy samples into a dense normalized series and
//! derives the temporal feature matrix consumed by the scorer.

mod features;
mod rolling;

pub use features::FeatureExtractor;
pub use rolling::RollingWindow;

use crate::error::{PipelineError, Result};
use crate::models::MetricSample;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Minimum number of samples a series needs to be scaled
pub const MIN_SAMPLES: usize = 2;

/// Dense, gap-free series with one column per metric
#[derive(Debug, Clone)]
pub struct CleanedSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    /// Sorted metric names; column order of `raw` and `normalized`
    pub metric_names: Vec<String>,
    /// Gap-filled readings in original units, `raw[metric][row]`
    pub raw: Vec<Vec<f64>>,
    /// Min-max scaled readings in [0, 1], same layout as `raw`
    pub normalized: Vec<Vec<f64>>,
    /// Number of readings that were filled in
    pub filled_gaps: usize,
}

impl CleanedSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Filled raw readings of one row, keyed by metric name
    pub fn raw_row(&self, row: usize) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.metric_names
            .iter()
            .zip(self.raw.iter())
            .map(move |(name, column)| (name.as_str(), column[row]))
    }
}

/// Gap filling and min-max normalization
#[derive(Debug, Default, Clone, Copy)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, samples: &[MetricSample]) -> Result<CleanedSeries> {
        if samples.len() < MIN_SAMPLES {
            return Err(PipelineError::InsufficientData {
                required: MIN_SAMPLES,
                got: samples.len(),
            });
        }

        if let Some(pos) = samples
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(PipelineError::Malformed(format!(
                "timestamps out of order at row {}",
                pos + 1
            )));
        }

        let metric_names: Vec<String> = samples
            .iter()
            .flat_map(|s| s.readings.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if metric_names.is_empty() {
            return Err(PipelineError::Malformed("no metric columns".to_string()));
        }

        let timestamps: Vec<DateTime<Utc>> = samples.iter().map(|s| s.timestamp).collect();
        let mut filled_gaps = 0;
        let mut raw = Vec::with_capacity(metric_names.len());

        for name in &metric_names {
            let observed: Vec<Option<f64>> = samples.iter().map(|s| s.get(name)).collect();
            let (column, filled) = fill_gaps(&timestamps, &observed).ok_or_else(|| {
                PipelineError::Malformed(format!("metric '{}' has no finite readings", name))
            })?;
            filled_gaps += filled;
            raw.push(column);
        }

        let normalized = raw.iter().map(|column| min_max_scale(column)).collect();

        Ok(CleanedSeries {
            timestamps,
            metric_names,
            raw,
            normalized,
            filled_gaps,
        })
    }
}

/// Fill missing readings: interior gaps are interpolated linearly in time,
/// trailing gaps take the last observation and leading gaps the first.
///
/// Returns `None` when the column has no observation at all.
fn fill_gaps(timestamps: &[DateTime<Utc>], observed: &[Option<f64>]) -> Option<(Vec<f64>, usize)> {
    let known: Vec<(usize, f64)> = observed
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();

    let (first_idx, first_val) = *known.first()?;
    let (last_idx, last_val) = *known.last()?;

    let mut column = Vec::with_capacity(observed.len());
    let mut filled = 0;
    // Index into `known` of the last observation at or before the current row
    let mut prev = 0;

    for (i, value) in observed.iter().enumerate() {
        if let Some(v) = value {
            column.push(*v);
            if known[prev].0 < i {
                prev += 1;
            }
            continue;
        }

        filled += 1;
        let v = if i < first_idx {
            first_val
        } else if i > last_idx {
            last_val
        } else {
            let (left_idx, left) = known[prev];
            let (right_idx, right) = known[prev + 1];
            interpolate(
                timestamps[left_idx],
                left,
                timestamps[right_idx],
                right,
                timestamps[i],
            )
        };
        column.push(v);
    }

    Some((column, filled))
}

fn interpolate(
    t0: DateTime<Utc>,
    v0: f64,
    t1: DateTime<Utc>,
    v1: f64,
    t: DateTime<Utc>,
) -> f64 {
    let span = (t1 - t0).num_milliseconds() as f64;
    if span <= 0.0 {
        return v0;
    }
    let offset = (t - t0).num_milliseconds() as f64;
    v0 + (v1 - v0) * (offset / span)
}

/// Scale into [0, 1]; a constant column maps to all zeros
pub(crate) fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range < f64::EPSILON {
        return vec![0.0; values.len()];
    }

    values.iter().map(|v| (v - min) / range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metric;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn series(values: &[Option<f64>]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let sample = MetricSample::new(start() + Duration::hours(i as i64));
                match v {
                    Some(v) => sample.with_reading(metric::CPU_USAGE, *v),
                    None => sample,
                }
            })
            .collect()
    }

    #[test]
    fn test_single_sample_is_insufficient() {
        let err = Preprocessor::new().clean(&series(&[Some(1.0)])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientData { required: 2, got: 1 }
        ));
        assert!(Preprocessor::new().clean(&[]).is_err());
    }

    #[test]
    fn test_unordered_timestamps_rejected() {
        let mut samples = series(&[Some(1.0), Some(2.0), Some(3.0)]);
        samples.swap(1, 2);
        assert!(matches!(
            Preprocessor::new().clean(&samples),
            Err(PipelineError::Malformed(_))
        ));
    }

    #[test]
    fn test_interior_gap_interpolated() {
        let cleaned = Preprocessor::new()
            .clean(&series(&[Some(1.0), None, None, Some(4.0)]))
            .unwrap();
        assert_eq!(cleaned.raw[0], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(cleaned.filled_gaps, 2);
    }

    #[test]
    fn test_interpolation_respects_time_spacing() {
        let mut samples = series(&[Some(0.0), None, Some(10.0)]);
        // Right neighbour four hours after the gap instead of one
        samples[2].timestamp = start() + Duration::hours(5);
        let cleaned = Preprocessor::new().clean(&samples).unwrap();
        assert!((cleaned.raw[0][1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_edge_gaps_filled_from_nearest_observation() {
        let cleaned = Preprocessor::new()
            .clean(&series(&[None, Some(2.0), Some(6.0), None]))
            .unwrap();
        assert_eq!(cleaned.raw[0], vec![2.0, 2.0, 6.0, 6.0]);
    }

    #[test]
    fn test_min_max_scaling() {
        let cleaned = Preprocessor::new()
            .clean(&series(&[Some(10.0), Some(20.0), Some(15.0)]))
            .unwrap();
        assert_eq!(cleaned.normalized[0], vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_constant_metric_scales_to_zero() {
        let cleaned = Preprocessor::new()
            .clean(&series(&[Some(3.0), Some(3.0), Some(3.0)]))
            .unwrap();
        assert_eq!(cleaned.normalized[0], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_metric_without_observations_is_malformed() {
        let samples: Vec<MetricSample> = series(&[Some(1.0), Some(2.0)])
            .into_iter()
            .map(|s| s.with_reading(metric::NETWORK_TRAFFIC, f64::NAN))
            .collect();
        assert!(matches!(
            Preprocessor::new().clean(&samples),
            Err(PipelineError::Malformed(_))
        ));
    }

    #[test]
    fn test_metric_names_sorted_union() {
        let samples = vec![
            MetricSample::new(start()).with_reading(metric::NETWORK_TRAFFIC, 0.1),
            MetricSample::new(start() + Duration::hours(1))
                .with_reading(metric::CPU_USAGE, 0.2)
                .with_reading(metric::NETWORK_TRAFFIC, 0.3),
        ];
        let cleaned = Preprocessor::new().clean(&samples).unwrap();
        assert_eq!(
            cleaned.metric_names,
            vec![metric::CPU_USAGE.to_string(), metric::NETWORK_TRAFFIC.to_string()]
        );
        // Leading cpu gap back-filled
        assert_eq!(cleaned.raw[0], vec![0.2, 0.2]);
        assert_eq!(cleaned.len(), 2);
    }
}
