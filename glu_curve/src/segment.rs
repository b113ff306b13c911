//! Day bucketing, gap-based segmentation and duplicate-abscissa resolution.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DateRange, GluError, Sample};

/// A sample whose time-of-day has been projected onto the shared reference date.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebasedPoint {
    pub time: NaiveDateTime,
    pub value: f64,
}

impl RebasedPoint {
    /// Position on the intraday axis, in seconds after midnight.
    pub fn axis_seconds(&self) -> f64 {
        let t = self.time.time();
        t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 / 1e9
    }
}

/// Maximal run of same-day points with no internal gap above the threshold.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub points: Vec<RebasedPoint>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(RebasedPoint::axis_seconds).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// Group samples by calendar date, order each day, and rebase onto `reference`.
///
/// Every observed date is checked against `range` before any grouping happens.
/// Ties on timestamp keep their input order.
pub fn bucket_by_day(
    samples: &[Sample],
    range: &DateRange,
    reference: NaiveDate,
) -> Result<BTreeMap<NaiveDate, Vec<RebasedPoint>>, GluError> {
    if let Some(outside) = samples.iter().find(|s| !range.contains(s.date())) {
        return Err(GluError::RangeMismatch {
            date: outside.date(),
            start: range.start(),
            end: range.end(),
        });
    }

    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.sort_by(|&a, &b| {
        samples[a]
            .timestamp
            .cmp(&samples[b].timestamp)
            .then(a.cmp(&b))
    });

    let mut buckets: BTreeMap<NaiveDate, Vec<RebasedPoint>> = BTreeMap::new();
    for idx in order {
        let sample = &samples[idx];
        buckets
            .entry(sample.date())
            .or_default()
            .push(RebasedPoint {
                time: reference.and_time(sample.timestamp.time()),
                value: sample.value,
            });
    }
    Ok(buckets)
}

/// Split time-ordered points wherever consecutive points are more than
/// `gap_threshold_s` seconds apart. A gap of exactly the threshold does not split.
pub fn split_on_gaps(points: &[RebasedPoint], gap_threshold_s: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Vec<RebasedPoint> = Vec::new();
    for point in points {
        if let Some(prev) = current.last() {
            let gap_s = (point.time - prev.time).num_milliseconds() as f64 / 1000.0;
            if gap_s > gap_threshold_s {
                segments.push(Segment {
                    points: std::mem::take(&mut current),
                });
            }
        }
        current.push(*point);
    }
    if !current.is_empty() {
        segments.push(Segment { points: current });
    }
    debug!(
        points = points.len(),
        segments = segments.len(),
        "split on gaps"
    );
    segments
}

/// Collapse points sharing an abscissa into one point at the mean of their values.
///
/// Output abscissas are strictly increasing. Input already strictly increasing
/// passes through unchanged.
pub fn collapse_duplicates(xs: &[f64], ys: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut pairs: Vec<(f64, f64)> = xs.iter().copied().zip(ys.iter().copied()).collect();
    if pairs.windows(2).all(|w| w[1].0 > w[0].0) {
        return pairs.into_iter().unzip();
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut out_x: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut out_y: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut idx = 0;
    while idx < pairs.len() {
        let x = pairs[idx].0;
        let mut sum = 0.0;
        let mut count = 0usize;
        while idx < pairs.len() && pairs[idx].0 == x {
            sum += pairs[idx].1;
            count += 1;
            idx += 1;
        }
        out_x.push(x);
        out_y.push(sum / count as f64);
    }
    (out_x, out_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THIRTY_MIN: f64 = 1800.0;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()
    }

    fn at(day: u32, h: u32, m: u32, value: f64) -> Sample {
        Sample {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            value,
        }
    }

    fn rebased(h: u32, m: u32, s: u32, value: f64) -> RebasedPoint {
        RebasedPoint {
            time: reference().and_hms_opt(h, m, s).unwrap(),
            value,
        }
    }

    fn range(first: u32, last: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, first).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, last).unwrap(),
        )
        .unwrap()
    }

    /// Small deterministic generator for property-style checks.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    fn random_day(rng: &mut Lcg) -> Vec<RebasedPoint> {
        let mut seconds = rng.next(3600) as u32;
        let mut points = Vec::new();
        let count = 1 + rng.next(60);
        for _ in 0..count {
            if seconds >= 86_399 {
                break;
            }
            points.push(rebased(
                seconds / 3600,
                (seconds / 60) % 60,
                seconds % 60,
                70.0 + rng.next(150) as f64,
            ));
            let step = match rng.next(4) {
                0 => 0,
                1 => 1800,
                2 => 1801 + rng.next(7200) as u32,
                _ => 60 + rng.next(900) as u32,
            };
            seconds = (seconds + step).min(86_399);
        }
        points
    }

    #[test]
    fn buckets_group_sort_and_rebase() {
        let samples = vec![
            at(2, 9, 0, 120.0),
            at(1, 23, 30, 95.0),
            at(2, 7, 45, 101.0),
            at(1, 6, 15, 88.0),
        ];
        let buckets = bucket_by_day(&samples, &range(1, 2), reference()).unwrap();
        assert_eq!(buckets.len(), 2);
        let day1 = &buckets[&NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()];
        assert_eq!(day1, &vec![rebased(6, 15, 0, 88.0), rebased(23, 30, 0, 95.0)]);
        let day2 = &buckets[&NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()];
        assert_eq!(day2, &vec![rebased(7, 45, 0, 101.0), rebased(9, 0, 0, 120.0)]);
        assert!(day2.iter().all(|p| p.time.date() == reference()));
    }

    #[test]
    fn equal_timestamps_keep_input_order() {
        let samples = vec![at(1, 8, 0, 100.0), at(1, 7, 0, 90.0), at(1, 8, 0, 120.0)];
        let buckets = bucket_by_day(&samples, &range(1, 1), reference()).unwrap();
        let values: Vec<f64> = buckets.values().next().unwrap().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![90.0, 100.0, 120.0]);
    }

    #[test]
    fn date_outside_range_is_a_mismatch() {
        let samples = vec![at(1, 8, 0, 100.0), at(4, 8, 0, 110.0)];
        let err = bucket_by_day(&samples, &range(1, 3), reference()).unwrap_err();
        assert_eq!(
            err,
            GluError::RangeMismatch {
                date: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
                start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            }
        );
    }

    #[test]
    fn empty_input_yields_no_buckets_or_segments() {
        assert!(bucket_by_day(&[], &range(1, 1), reference()).unwrap().is_empty());
        assert!(split_on_gaps(&[], THIRTY_MIN).is_empty());
    }

    #[test]
    fn splits_on_gap_strictly_greater_than_threshold() {
        let points = vec![
            rebased(8, 0, 0, 100.0),
            rebased(8, 15, 0, 105.0),
            rebased(8, 50, 0, 130.0),
            rebased(10, 0, 0, 140.0),
        ];
        let segments = split_on_gaps(&points, THIRTY_MIN);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].points, points[0..2].to_vec());
        assert_eq!(segments[1].points, points[2..3].to_vec());
        assert_eq!(segments[2].points, points[3..4].to_vec());
    }

    #[test]
    fn exact_threshold_gap_does_not_split() {
        let points = vec![
            rebased(8, 0, 0, 100.0),
            rebased(8, 30, 0, 105.0),
            rebased(9, 0, 1, 110.0),
        ];
        let segments = split_on_gaps(&points, THIRTY_MIN);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[1].len(), 1);
    }

    #[test]
    fn three_gaps_give_four_segments() {
        let points = vec![
            rebased(1, 0, 0, 90.0),
            rebased(2, 0, 0, 91.0),
            rebased(2, 10, 0, 92.0),
            rebased(5, 0, 0, 93.0),
            rebased(9, 0, 0, 94.0),
            rebased(9, 5, 0, 95.0),
        ];
        let lens: Vec<usize> = split_on_gaps(&points, THIRTY_MIN)
            .iter()
            .map(Segment::len)
            .collect();
        assert_eq!(lens, vec![1, 2, 1, 2]);
    }

    #[test]
    fn segments_partition_and_respect_gap_invariant() {
        let mut rng = Lcg(7);
        for _ in 0..200 {
            let points = random_day(&mut rng);
            let segments = split_on_gaps(&points, THIRTY_MIN);

            let rejoined: Vec<RebasedPoint> =
                segments.iter().flat_map(|s| s.points.iter().copied()).collect();
            assert_eq!(rejoined, points);
            assert!(segments.iter().all(|s| !s.is_empty()));

            for segment in &segments {
                for w in segment.points.windows(2) {
                    assert!((w[1].time - w[0].time).num_seconds() <= 1800);
                }
            }
            for pair in segments.windows(2) {
                let last = pair[0].points.last().unwrap();
                let first = pair[1].points.first().unwrap();
                assert!((first.time - last.time).num_seconds() > 1800);
            }
        }
    }

    #[test]
    fn segmentation_is_deterministic() {
        let mut rng = Lcg(99);
        let points = random_day(&mut rng);
        assert_eq!(
            split_on_gaps(&points, THIRTY_MIN),
            split_on_gaps(&points, THIRTY_MIN)
        );
    }

    #[test]
    fn duplicate_abscissas_collapse_to_mean() {
        let (xs, ys) = collapse_duplicates(&[600.0, 600.0], &[100.0, 120.0]);
        assert_eq!(xs, vec![600.0]);
        assert_eq!(ys, vec![110.0]);

        let (xs, ys) = collapse_duplicates(
            &[0.0, 60.0, 60.0, 60.0, 120.0, 120.0],
            &[90.0, 100.0, 110.0, 120.0, 80.0, 81.0],
        );
        assert_eq!(xs, vec![0.0, 60.0, 120.0]);
        assert_eq!(ys, vec![90.0, 110.0, 80.5]);
    }

    #[test]
    fn distinct_abscissas_pass_through() {
        let (xs, ys) = collapse_duplicates(&[0.0, 300.0, 900.0], &[90.0, 95.0, 99.0]);
        assert_eq!(xs, vec![0.0, 300.0, 900.0]);
        assert_eq!(ys, vec![90.0, 95.0, 99.0]);
    }

    #[test]
    fn collapsed_abscissas_strictly_increase() {
        let mut rng = Lcg(3);
        for _ in 0..200 {
            let points = random_day(&mut rng);
            for segment in split_on_gaps(&points, THIRTY_MIN) {
                let (xs, ys) = collapse_duplicates(&segment.xs(), &segment.ys());
                assert_eq!(xs.len(), ys.len());
                assert!(xs.windows(2).all(|w| w[1] > w[0]));
            }
        }
    }

    #[test]
    fn axis_seconds_counts_from_midnight() {
        assert_eq!(rebased(0, 0, 0, 0.0).axis_seconds(), 0.0);
        assert_eq!(rebased(8, 15, 30, 0.0).axis_seconds(), 29_730.0);
        assert_eq!(rebased(23, 59, 59, 0.0).axis_seconds(), 86_399.0);
    }
}
