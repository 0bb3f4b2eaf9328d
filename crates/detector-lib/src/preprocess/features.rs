//! Temporal feature extraction
//!
//! For every metric the extractor emits the normalized value, its rolling
//! mean and variance, and the previous value. Calendar context (hour, day
//! of week, weekend flag) is appended when enabled.

use super::{CleanedSeries, RollingWindow};
use crate::models::{FeatureMatrix, FeatureVector};
use chrono::{Datelike, Timelike, Weekday};

/// Extracts one feature vector per timestamp of a cleaned series
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window_size: usize,
    calendar: bool,
}

impl FeatureExtractor {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            calendar: true,
        }
    }

    /// Enable or disable hour/day-of-week/weekend features
    pub fn with_calendar(mut self, calendar: bool) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Column names in the order `extract` fills them
    pub fn feature_names(&self, metric_names: &[String]) -> Vec<String> {
        let mut names = Vec::with_capacity(metric_names.len() * 4 + 3);
        for metric in metric_names {
            names.push(metric.clone());
            names.push(format!("{}_rolling_mean", metric));
            names.push(format!("{}_rolling_var", metric));
            names.push(format!("{}_lag1", metric));
        }
        if self.calendar {
            names.push("hour_of_day".to_string());
            names.push("day_of_week".to_string());
            names.push("is_weekend".to_string());
        }
        names
    }

    pub fn extract(&self, series: &CleanedSeries) -> FeatureMatrix {
        let names = self.feature_names(&series.metric_names);
        let mut windows: Vec<RollingWindow> = series
            .metric_names
            .iter()
            .map(|_| RollingWindow::new(self.window_size))
            .collect();

        let rows = series
            .timestamps
            .iter()
            .enumerate()
            .map(|(row, timestamp)| {
                let mut values = Vec::with_capacity(names.len());

                for (column, window) in series.normalized.iter().zip(windows.iter_mut()) {
                    let current = column[row];
                    window.push(current);
                    // First row lags itself
                    let lag = if row == 0 { current } else { column[row - 1] };

                    values.push(current);
                    values.push(window.mean());
                    values.push(window.variance());
                    values.push(lag);
                }

                if self.calendar {
                    let weekday = timestamp.weekday();
                    values.push(timestamp.hour() as f64 / 24.0);
                    values.push(weekday.num_days_from_monday() as f64 / 7.0);
                    values.push(if matches!(weekday, Weekday::Sat | Weekday::Sun) {
                        1.0
                    } else {
                        0.0
                    });
                }

                FeatureVector {
                    timestamp: *timestamp,
                    values,
                }
            })
            .collect();

        FeatureMatrix { names, rows }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(5)
    }
}
