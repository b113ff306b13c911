//! Period statistics: value summaries and per-day time-of-day window averages.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{GluError, Sample};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1); `None` below two values.
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std = if count >= 2 {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Some((ss / (count - 1) as f64).sqrt())
        } else {
            None
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count,
            mean,
            std,
            min,
            max,
        })
    }

    pub fn of_samples<'a, I>(samples: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let values: Vec<f64> = samples.into_iter().map(|s| s.value).collect();
        Self::from_values(&values)
    }
}

/// Half-open `[start_hour, end_hour)` window over the hour of day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub const NIGHT: HourWindow = HourWindow {
        start_hour: 0,
        end_hour: 6,
    };
    pub const DAY: HourWindow = HourWindow {
        start_hour: 6,
        end_hour: 24,
    };

    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, GluError> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(GluError::InvalidParameter(format!(
                "hour window {}-{} is empty or beyond 24 h",
                start_hour, end_hour
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        let hour = timestamp.hour();
        self.start_hour <= hour && hour < self.end_hour
    }

    pub fn label(&self) -> String {
        format!("{}-{} h", self.start_hour, self.end_hour)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyWindowStat {
    pub date: NaiveDate,
    pub count: usize,
    pub mean: f64,
    pub std: Option<f64>,
}

/// Mean and spread per calendar date of the samples falling inside `window`.
/// Dates with no sample in the window are omitted.
pub fn daily_window_stats(samples: &[Sample], window: HourWindow) -> Vec<DailyWindowStat> {
    let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for sample in samples.iter().filter(|s| window.contains(&s.timestamp)) {
        by_day.entry(sample.date()).or_default().push(sample.value);
    }
    by_day
        .into_iter()
        .filter_map(|(date, values)| {
            Summary::from_values(&values).map(|summary| DailyWindowStat {
                date,
                count: summary.count,
                mean: summary.mean,
                std: summary.std,
            })
        })
        .collect()
}

/// Summary across all days of the samples inside `window`.
pub fn window_summary(samples: &[Sample], window: HourWindow) -> Option<Summary> {
    Summary::of_samples(samples.iter().filter(|s| window.contains(&s.timestamp)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(d: u32, h: u32, m: u32, value: f64) -> Sample {
        Sample::new(
            NaiveDate::from_ymd_opt(2023, 11, d)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            value,
        )
    }

    #[test]
    fn summary_of_values() {
        let summary = Summary::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(summary.count, 8);
        assert_eq!(summary.mean, 5.0);
        assert!((summary.std.unwrap() - 2.138_089_935).abs() < 1e-6);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
    }

    #[test]
    fn single_value_has_no_spread() {
        let summary = Summary::from_values(&[101.0]).unwrap();
        assert_eq!(summary.mean, 101.0);
        assert_eq!(summary.std, None);
        assert!(Summary::from_values(&[]).is_none());
    }

    #[test]
    fn windows_split_at_six() {
        let five = sample(1, 5, 59, 0.0).timestamp;
        let six = sample(1, 6, 0, 0.0).timestamp;
        let late = sample(1, 23, 59, 0.0).timestamp;
        assert!(HourWindow::NIGHT.contains(&five));
        assert!(!HourWindow::NIGHT.contains(&six));
        assert!(HourWindow::DAY.contains(&six));
        assert!(HourWindow::DAY.contains(&late));
        assert_eq!(HourWindow::NIGHT.label(), "0-6 h");
    }

    #[test]
    fn window_bounds_are_validated() {
        assert!(HourWindow::new(6, 6).is_err());
        assert!(HourWindow::new(8, 25).is_err());
        assert_eq!(HourWindow::new(6, 24).unwrap(), HourWindow::DAY);
    }

    #[test]
    fn daily_stats_per_window() {
        let samples = vec![
            sample(12, 1, 0, 80.0),
            sample(12, 3, 0, 90.0),
            sample(12, 12, 0, 140.0),
            sample(13, 2, 0, 85.0),
            sample(14, 9, 0, 120.0),
            sample(14, 18, 0, 100.0),
        ];
        let night = daily_window_stats(&samples, HourWindow::NIGHT);
        assert_eq!(night.len(), 2);
        assert_eq!(night[0].date, NaiveDate::from_ymd_opt(2023, 11, 12).unwrap());
        assert_eq!(night[0].mean, 85.0);
        assert!(night[0].std.is_some());
        assert_eq!(night[1].count, 1);
        assert_eq!(night[1].std, None);

        let day = daily_window_stats(&samples, HourWindow::DAY);
        let means: Vec<f64> = day.iter().map(|d| d.mean).collect();
        assert_eq!(means, vec![140.0, 110.0]);

        let overall = window_summary(&samples, HourWindow::NIGHT).unwrap();
        assert_eq!(overall.count, 3);
        assert_eq!(overall.mean, 85.0);
        assert!(window_summary(&samples[..1], HourWindow::DAY).is_none());
    }
}
