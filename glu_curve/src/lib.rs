//! Multi-day glucose curve building: day bucketing, gap segmentation,
//! duplicate resolution, order-1 spline smoothing and per-day colours.

use chrono::{NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod interp;
pub mod palette;
pub mod pivot;
pub mod segment;
pub mod stats;

pub use interp::LinearSpline;
pub use palette::{assign_colors, ColorMap, Palette, Rgb, DEFAULT_PALETTE_HEX};
pub use pivot::{split_at_pivot, PivotCurves};
pub use segment::{bucket_by_day, collapse_duplicates, split_on_gaps, RebasedPoint, Segment};
pub use stats::{daily_window_stats, window_summary, DailyWindowStat, HourWindow, Summary};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GluError {
    #[error("sample date {date} is outside the declared range {start}..={end}")]
    RangeMismatch {
        date: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("palette has {colors} colors but the range spans {days} days")]
    PaletteExhausted { days: usize, colors: usize },
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid color: {0:?}")]
    InvalidColor(String),
    #[error("palette must contain at least one color")]
    EmptyPalette,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

/// One glucose reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Inclusive calendar-date range at daily granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange", into = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

/// Wire form of [`DateRange`]; deserialising goes back through [`DateRange::new`].
#[derive(Serialize, Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = GluError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl From<DateRange> for RawDateRange {
    fn from(range: DateRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, GluError> {
        if start > end {
            return Err(GluError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.num_days())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Consecutive samples further apart than this start a new segment.
    pub gap_threshold_s: f64,
    /// Dense evaluation points per segment curve.
    pub smoothing_samples: usize,
    /// Date every day's time-of-day is projected onto.
    pub reference_date: NaiveDate,
    /// Dense evaluation points per side of a pivot split.
    pub pivot_samples: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            gap_threshold_s: 30.0 * 60.0,
            smoothing_samples: 300,
            reference_date: NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN),
            pivot_samples: 100,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), GluError> {
        if !self.gap_threshold_s.is_finite() || self.gap_threshold_s <= 0.0 {
            return Err(GluError::InvalidParameter(format!(
                "gap threshold must be positive, got {}",
                self.gap_threshold_s
            )));
        }
        if self.smoothing_samples < 2 {
            return Err(GluError::InvalidParameter(
                "smoothing_samples must be at least 2".into(),
            ));
        }
        if self.pivot_samples < 2 {
            return Err(GluError::InvalidParameter(
                "pivot_samples must be at least 2".into(),
            ));
        }
        if self.reference_date.succ_opt().is_none() {
            return Err(GluError::InvalidParameter(format!(
                "reference date {} has no following day",
                self.reference_date
            )));
        }
        Ok(())
    }
}

/// Dense polyline for one segment. `xs` are seconds after midnight on the intraday axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentCurve {
    /// Position of the source segment within its day.
    pub segment: usize,
    /// Distinct abscissas the spline was fitted through.
    pub knots: usize,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl SegmentCurve {
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DayCurves {
    pub date: NaiveDate,
    pub color: Rgb,
    pub sample_count: usize,
    pub segment_count: usize,
    pub curves: Vec<SegmentCurve>,
}

impl DayCurves {
    /// Segments that produced no curve (fewer than two distinct abscissas).
    pub fn skipped_segments(&self) -> usize {
        self.segment_count - self.curves.len()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveSet {
    pub range: DateRange,
    pub colors: ColorMap,
    /// Days with at least one sample, ascending.
    pub days: Vec<DayCurves>,
}

impl CurveSet {
    /// Legend entries: every observed day with its colour, in date order.
    pub fn legend(&self) -> Vec<(NaiveDate, Rgb)> {
        self.days.iter().map(|day| (day.date, day.color)).collect()
    }

    pub fn curve_count(&self) -> usize {
        self.days.iter().map(|day| day.curves.len()).sum()
    }
}

/// Build every day's smoothed segment curves over the declared range.
///
/// The colour map is assigned up front; a palette smaller than the range or a
/// sample outside the range aborts before any curve is produced.
pub fn build_curves(
    samples: &[Sample],
    range: &DateRange,
    palette: &Palette,
    params: &Params,
) -> Result<CurveSet, GluError> {
    params.validate()?;
    if let Some(bad) = samples.iter().find(|s| !s.value.is_finite()) {
        return Err(GluError::InvalidParameter(format!(
            "non-finite glucose value at {}",
            bad.timestamp
        )));
    }
    let colors = assign_colors(range, palette)?;
    let buckets: Vec<(NaiveDate, Vec<RebasedPoint>)> =
        bucket_by_day(samples, range, params.reference_date)?
            .into_iter()
            .collect();

    let days = buckets
        .into_par_iter()
        .map(|(date, points)| {
            match colors.get(date) {
                Some(color) => build_day_curves(date, color, &points, params),
                None => Err(GluError::RangeMismatch {
                    date,
                    start: range.start(),
                    end: range.end(),
                }),
            }
        })
        .collect::<Result<Vec<_>, GluError>>()?;

    Ok(CurveSet {
        range: *range,
        colors,
        days,
    })
}

/// Segment one day's ordered, rebased points and smooth each segment.
pub fn build_day_curves(
    date: NaiveDate,
    color: Rgb,
    points: &[RebasedPoint],
    params: &Params,
) -> Result<DayCurves, GluError> {
    let segments = split_on_gaps(points, params.gap_threshold_s);
    let mut curves = Vec::with_capacity(segments.len());
    for (idx, segment) in segments.iter().enumerate() {
        match segment_curve(idx, segment, params.smoothing_samples)? {
            Some(curve) => curves.push(curve),
            None => debug!(%date, segment = idx, points = segment.len(), "segment skipped"),
        }
    }
    debug!(
        %date,
        samples = points.len(),
        segments = segments.len(),
        curves = curves.len(),
        "day curves built"
    );
    Ok(DayCurves {
        date,
        color,
        sample_count: points.len(),
        segment_count: segments.len(),
        curves,
    })
}

fn segment_curve(
    idx: usize,
    segment: &Segment,
    samples: usize,
) -> Result<Option<SegmentCurve>, GluError> {
    if segment.len() < 2 {
        return Ok(None);
    }
    let (xs, ys) = collapse_duplicates(&segment.xs(), &segment.ys());
    if xs.len() < 2 {
        return Ok(None);
    }
    let knots = xs.len();
    let spline = LinearSpline::new(xs, ys)?;
    let (xs, ys) = spline.sample(samples);
    Ok(Some(SegmentCurve {
        segment: idx,
        knots,
        xs,
        ys,
    }))
}
