//! Two-interval split around a pivot instant, bridged at the pivot so the
//! "before" and "after" curves meet.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::stats::Summary;
use crate::{GluError, LinearSpline, Params, Sample};

/// Dense curve on an absolute axis: `xs` are seconds after [`PivotCurves::origin`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PivotCurves {
    pub origin: NaiveDateTime,
    pub pivot: NaiveDateTime,
    /// Mean of the last sample before and the first sample at/after the pivot.
    pub bridge_value: f64,
    pub before: Vec<Sample>,
    pub after: Vec<Sample>,
    pub before_curve: Option<Polyline>,
    pub after_curve: Option<Polyline>,
    /// Samples with `t <= pivot`.
    pub before_summary: Option<Summary>,
    /// Samples with `t > pivot`.
    pub after_summary: Option<Summary>,
}

impl PivotCurves {
    pub fn seconds_from_origin(&self, t: NaiveDateTime) -> f64 {
        offset_s(self.origin, t)
    }
}

/// Split `samples` at `pivot` and fit one order-1 curve per side with
/// `params.pivot_samples` points each.
pub fn split_at_pivot(
    samples: &[Sample],
    pivot: NaiveDateTime,
    params: &Params,
) -> Result<PivotCurves, GluError> {
    params.validate()?;
    let dense = params.pivot_samples;
    let mut ordered = samples.to_vec();
    ordered.sort_by_key(|s| s.timestamp);

    let (before, after): (Vec<Sample>, Vec<Sample>) =
        ordered.iter().copied().partition(|s| s.timestamp < pivot);
    let (last_before, first_after) = match (before.last(), after.first()) {
        (Some(b), Some(a)) => (*b, *a),
        (None, _) => {
            return Err(GluError::InsufficientData(format!(
                "no samples before pivot {}",
                pivot
            )))
        }
        (_, None) => {
            return Err(GluError::InsufficientData(format!(
                "no samples at or after pivot {}",
                pivot
            )))
        }
    };
    let bridge_value = (last_before.value + first_after.value) / 2.0;
    let origin = ordered[0].timestamp;

    let mut before_pts: Vec<(f64, f64)> = before
        .iter()
        .map(|s| (offset_s(origin, s.timestamp), s.value))
        .collect();
    // `before` is strictly earlier than the pivot, so it always takes the bridge.
    before_pts.push((offset_s(origin, pivot), bridge_value));

    let mut after_pts: Vec<(f64, f64)> = Vec::with_capacity(after.len() + 1);
    if !after.iter().any(|s| s.timestamp == pivot) {
        after_pts.push((offset_s(origin, pivot), bridge_value));
    }
    after_pts.extend(after.iter().map(|s| (offset_s(origin, s.timestamp), s.value)));

    let before_curve = fit_side(before_pts, dense)?;
    let after_curve = fit_side(after_pts, dense)?;

    let before_summary = Summary::of_samples(ordered.iter().filter(|s| s.timestamp <= pivot));
    let after_summary = Summary::of_samples(ordered.iter().filter(|s| s.timestamp > pivot));

    Ok(PivotCurves {
        origin,
        pivot,
        bridge_value,
        before,
        after,
        before_curve,
        after_curve,
        before_summary,
        after_summary,
    })
}

fn offset_s(origin: NaiveDateTime, t: NaiveDateTime) -> f64 {
    (t - origin).num_milliseconds() as f64 / 1000.0
}

/// Sort by abscissa and keep the first value seen for each repeated abscissa.
fn keep_first(mut points: Vec<(f64, f64)>) -> (Vec<f64>, Vec<f64>) {
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.dedup_by(|later, earlier| later.0 == earlier.0);
    points.into_iter().unzip()
}

fn fit_side(points: Vec<(f64, f64)>, dense: usize) -> Result<Option<Polyline>, GluError> {
    let (xs, ys) = keep_first(points);
    if xs.len() < 2 {
        return Ok(None);
    }
    let (xs, ys) = LinearSpline::new(xs, ys)?.sample(dense);
    Ok(Some(Polyline { xs, ys }))
}
