use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use glu_curve::{
    build_curves, daily_window_stats, split_at_pivot, window_summary, CurveSet, DailyWindowStat,
    DateRange, HourWindow, Palette, Params, PivotCurves, Rgb, Sample, Summary,
};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")");

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "Glucose overlay, daily average and race charts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Overlay every day's smoothed glucose curves on one 24-hour axis
    Overlay(OverlayArgs),
    /// Per-day 0-6 h / 6-24 h averages with spread
    Daily(DailyArgs),
    /// Before/after curves split at a pivot instant, with interval summaries
    Race(RaceArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Glucose CSV with `time` and `glucose` columns
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Args, Debug)]
struct PlotArgs {
    /// Output PNG figure path (defaults next to the CSV output)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Parser, Debug)]
struct OverlayArgs {
    #[command(flatten)]
    input: InputArgs,

    /// First calendar date of the report (inclusive)
    #[arg(long, value_parser = parse_date_arg)]
    start: NaiveDate,

    /// Last calendar date of the report (inclusive)
    #[arg(long, value_parser = parse_date_arg)]
    end: NaiveDate,

    /// Sampling gap (minutes) above which a day's curve is broken
    #[arg(long, default_value_t = 30.0)]
    gap_minutes: f64,

    /// Dense evaluation points per segment curve
    #[arg(long, default_value_t = Params::default().smoothing_samples)]
    samples: usize,

    /// Comma-separated day colours (`#RRGGBB,...`), overrides the built-in palette
    #[arg(long)]
    palette: Option<String>,

    /// JSON array of day colours
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "palette")]
    palette_file: Option<PathBuf>,

    /// Output CSV path for dense curves (`-` for stdout)
    #[arg(short, long, default_value = "overlay.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    plot: PlotArgs,

    /// Lower y-axis limit (mg/dL)
    #[arg(long, default_value_t = 60.0)]
    y_min: f64,

    /// Upper y-axis limit (mg/dL)
    #[arg(long, default_value_t = 280.0)]
    y_max: f64,
}

#[derive(Parser, Debug)]
struct DailyArgs {
    #[command(flatten)]
    input: InputArgs,

    /// First calendar date of the report (inclusive)
    #[arg(long, value_parser = parse_date_arg)]
    start: NaiveDate,

    /// Last calendar date of the report (inclusive)
    #[arg(long, value_parser = parse_date_arg)]
    end: NaiveDate,

    /// Output CSV path for per-day statistics (`-` for stdout)
    #[arg(short, long, default_value = "daily.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    plot: PlotArgs,

    /// Lower y-axis limit (mg/dL)
    #[arg(long, default_value_t = 40.0)]
    y_min: f64,

    /// Upper y-axis limit (mg/dL)
    #[arg(long, default_value_t = 160.0)]
    y_max: f64,
}

#[derive(Parser, Debug)]
struct RaceArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Window start (`YYYY-MM-DD HH:MM`)
    #[arg(long, value_parser = parse_datetime_arg)]
    from: NaiveDateTime,

    /// Split instant between the two intervals
    #[arg(long, value_parser = parse_datetime_arg)]
    pivot: NaiveDateTime,

    /// Window end (inclusive)
    #[arg(long, value_parser = parse_datetime_arg)]
    to: NaiveDateTime,

    /// Dense evaluation points per interval curve
    #[arg(long, default_value_t = Params::default().pivot_samples)]
    samples: usize,

    /// Output CSV path for interval summaries (`-` for stdout)
    #[arg(short, long, default_value = "race.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    plot: PlotArgs,

    /// Lower y-axis limit (mg/dL)
    #[arg(long, default_value_t = 60.0)]
    y_min: f64,

    /// Upper y-axis limit (mg/dL)
    #[arg(long, default_value_t = 280.0)]
    y_max: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Overlay(args) => args.input.verbose,
        Command::Daily(args) => args.input.verbose,
        Command::Race(args) => args.input.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Overlay(args) => handle_overlay(args),
        Command::Daily(args) => handle_daily(args),
        Command::Race(args) => handle_race(args),
    }
}

fn handle_overlay(args: OverlayArgs) -> Result<()> {
    check_y_limits(args.y_min, args.y_max)?;
    if !args.gap_minutes.is_finite() || args.gap_minutes <= 0.0 {
        bail!("--gap-minutes must be > 0");
    }
    let range = DateRange::new(args.start, args.end)?;
    let palette = resolve_palette(args.palette.as_deref(), args.palette_file.as_deref())?;
    let timing = args.input.profile || args.input.verbose;

    let t_load = Instant::now();
    let samples = filter_to_range(load_samples(&args.input.input)?, &range);
    if timing {
        info!("Load stage: {:.1} ms", t_load.elapsed().as_secs_f64() * 1000.0);
    }
    info!(
        "Loaded {} samples between {} and {}",
        samples.len(),
        range.start(),
        range.end()
    );

    let params = Params {
        gap_threshold_s: args.gap_minutes * 60.0,
        smoothing_samples: args.samples,
        ..Params::default()
    };
    let t_build = Instant::now();
    let set = build_curves(&samples, &range, &palette, &params)?;
    if timing {
        info!(
            "Build stage: {:.1} ms ({} curves)",
            t_build.elapsed().as_secs_f64() * 1000.0,
            set.curve_count()
        );
    }
    for day in &set.days {
        debug!(
            "{}: {} samples, {} segments, {} skipped",
            day.date,
            day.sample_count,
            day.segment_count,
            day.skipped_segments()
        );
    }
    info!(
        "Curves built: {} days, {} curves",
        set.days.len(),
        set.curve_count()
    );

    let t_csv = Instant::now();
    let mut writer = open_csv_writer(&args.output)?;
    write_overlay_rows(&set, &mut writer)?;
    if timing {
        info!("CSV stage: {:.1} ms", t_csv.elapsed().as_secs_f64() * 1000.0);
    }
    if args.output.as_os_str() != "-" {
        info!("Wrote curve CSV: {}", args.output.display());
    }

    let y_range = (args.y_min, args.y_max);
    for (path, kind) in plot_targets(&args.plot, &args.output) {
        let t_plot = Instant::now();
        render_chart_guard(&path, || render_overlay(&set, &path, kind, y_range));
        if timing {
            info!("Plot stage: {:.1} ms", t_plot.elapsed().as_secs_f64() * 1000.0);
        }
    }
    Ok(())
}

fn handle_daily(args: DailyArgs) -> Result<()> {
    check_y_limits(args.y_min, args.y_max)?;
    let range = DateRange::new(args.start, args.end)?;
    let samples = filter_to_range(load_samples(&args.input.input)?, &range);
    if samples.is_empty() {
        bail!("no samples between {} and {}", range.start(), range.end());
    }

    let windows = [HourWindow::NIGHT, HourWindow::DAY];
    let mut series = Vec::with_capacity(windows.len());
    for window in windows {
        let overall = window_summary(&samples, window);
        match overall.as_ref() {
            Some(summary) => info!("Average {}: {:.1} mg/dL", window.label(), summary.mean),
            None => warn!("No samples in the {} window", window.label()),
        }
        series.push(WindowSeries {
            window,
            overall,
            stats: daily_window_stats(&samples, window),
        });
    }

    let mut writer = open_csv_writer(&args.output)?;
    write_daily_rows(&series, &mut writer)?;
    if args.output.as_os_str() != "-" {
        info!("Wrote daily CSV: {}", args.output.display());
    }

    let y_range = (args.y_min, args.y_max);
    for (path, kind) in plot_targets(&args.plot, &args.output) {
        render_chart_guard(&path, || render_daily(&series, &range, &path, kind, y_range));
    }
    Ok(())
}

fn handle_race(args: RaceArgs) -> Result<()> {
    check_y_limits(args.y_min, args.y_max)?;
    if !(args.from < args.pivot && args.pivot <= args.to) {
        bail!("expected --from < --pivot <= --to");
    }
    let samples: Vec<Sample> = load_samples(&args.input.input)?
        .into_iter()
        .filter(|s| args.from <= s.timestamp && s.timestamp <= args.to)
        .collect();
    info!(
        "Loaded {} samples between {} and {}",
        samples.len(),
        args.from,
        args.to
    );

    let params = Params {
        pivot_samples: args.samples,
        ..Params::default()
    };
    let curves = split_at_pivot(&samples, args.pivot, &params)?;
    log_interval("Before", curves.before_summary.as_ref());
    log_interval("During", curves.after_summary.as_ref());

    let mut writer = open_csv_writer(&args.output)?;
    write_race_rows(&curves, &args, &mut writer)?;
    if args.output.as_os_str() != "-" {
        info!("Wrote interval CSV: {}", args.output.display());
    }

    let view = RaceView {
        from: args.from,
        to: args.to,
        y_range: (args.y_min, args.y_max),
    };
    for (path, kind) in plot_targets(&args.plot, &args.output) {
        render_chart_guard(&path, || render_race(&curves, &view, &path, kind));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct InRow {
    time: String,
    #[serde(default)]
    glucose: Option<f64>,
}

fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<InRow>() {
        let parsed = row.ok().and_then(|r| {
            let value = r.glucose.filter(|v| v.is_finite())?;
            Some(Sample::new(parse_timestamp(&r.time)?, value))
        });
        match parsed {
            Some(sample) => samples.push(sample),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} unusable rows in {}", skipped, path.display());
    }
    if samples.is_empty() {
        bail!("no usable glucose rows in {}", path.display());
    }
    Ok(samples)
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let trimmed = input.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| parse_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date(input: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input.trim(), fmt).ok())
}

fn parse_date_arg(input: &str) -> Result<NaiveDate, String> {
    parse_date(input).ok_or_else(|| format!("invalid date '{}': expected YYYY-MM-DD", input))
}

fn parse_datetime_arg(input: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(input)
        .ok_or_else(|| format!("invalid time '{}': expected YYYY-MM-DD HH:MM", input))
}

fn filter_to_range(samples: Vec<Sample>, range: &DateRange) -> Vec<Sample> {
    samples
        .into_iter()
        .filter(|s| range.contains(s.date()))
        .collect()
}

fn parse_palette_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn resolve_palette(list: Option<&str>, file: Option<&Path>) -> Result<Palette> {
    if let Some(path) = file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read palette {}", path.display()))?;
        return Palette::from_json(&text)
            .with_context(|| format!("invalid palette in {}", path.display()));
    }
    if let Some(list) = list {
        let items = parse_palette_list(list);
        return Palette::from_hex_list(&items).context("invalid --palette");
    }
    Ok(Palette::default())
}

fn check_y_limits(y_min: f64, y_max: f64) -> Result<()> {
    if !(y_min.is_finite() && y_max.is_finite() && y_min < y_max) {
        return Err(anyhow!("y limits must satisfy y-min < y-max"));
    }
    Ok(())
}

fn log_interval(label: &str, summary: Option<&Summary>) {
    match summary {
        Some(s) => info!(
            "{}: Ave. {:.1} mg/dL, Max {:.1} mg/dL ({} samples)",
            label, s.mean, s.max, s.count
        ),
        None => warn!("{}: no samples", label),
    }
}

fn open_csv_writer(path: &Path) -> Result<csv::Writer<Box<dyn Write>>> {
    let sink: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )
    };
    Ok(csv::Writer::from_writer(sink))
}

fn write_overlay_rows<W: Write>(set: &CurveSet, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["date", "color", "segment", "seconds", "time", "glucose"])?;
    for day in &set.days {
        let date = day.date.format("%Y-%m-%d").to_string();
        let color = day.color.to_hex();
        for curve in &day.curves {
            let segment = curve.segment.to_string();
            for (x, y) in curve.points() {
                let seconds = format!("{:.3}", x);
                let clock = format_clock_seconds(x);
                let glucose = format!("{:.3}", y);
                writer.write_record([
                    date.as_str(),
                    color.as_str(),
                    segment.as_str(),
                    seconds.as_str(),
                    clock.as_str(),
                    glucose.as_str(),
                ])?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

struct WindowSeries {
    window: HourWindow,
    overall: Option<Summary>,
    stats: Vec<DailyWindowStat>,
}

fn write_daily_rows<W: Write>(series: &[WindowSeries], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["date", "window", "count", "mean", "std"])?;
    for entry in series {
        let label = entry.window.label();
        for stat in &entry.stats {
            writer.write_record([
                stat.date.format("%Y-%m-%d").to_string(),
                label.clone(),
                stat.count.to_string(),
                format!("{:.2}", stat.mean),
                stat.std.map_or(String::new(), |s| format!("{:.2}", s)),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_race_rows<W: Write>(
    curves: &PivotCurves,
    args: &RaceArgs,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(["interval", "from", "to", "count", "mean", "max"])?;
    let rows = [
        ("before", args.from, args.pivot, curves.before_summary.as_ref()),
        ("during", args.pivot, args.to, curves.after_summary.as_ref()),
    ];
    for (label, from, to, summary) in rows {
        let (count, mean, max) = summary.map_or((0, String::new(), String::new()), |s| {
            (s.count, format!("{:.1}", s.mean), format!("{:.1}", s.max))
        });
        writer.write_record([
            label.to_string(),
            from.format("%Y-%m-%d %H:%M").to_string(),
            to.format("%Y-%m-%d %H:%M").to_string(),
            count.to_string(),
            mean,
            max,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChartKind {
    Png,
    Svg,
}

/// Explicit `--png`/`--svg` targets, or a PNG next to a file CSV output.
fn plot_targets(plot: &PlotArgs, output: &Path) -> Vec<(PathBuf, ChartKind)> {
    if plot.no_plot {
        return Vec::new();
    }
    let mut targets = Vec::new();
    match plot.png.as_ref() {
        Some(path) => targets.push((path.clone(), ChartKind::Png)),
        None if output.as_os_str() != "-" && plot.svg.is_none() => {
            targets.push((output.with_extension("png"), ChartKind::Png))
        }
        None => {}
    }
    if let Some(path) = plot.svg.as_ref() {
        targets.push((path.clone(), ChartKind::Svg));
    }
    targets
}

/// Run a render, logging rather than propagating failures or backend panics.
fn render_chart_guard<F>(path: &Path, render: F)
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(panic::AssertUnwindSafe(render)) {
        Ok(Ok(())) => info!("Wrote plot: {}", path.display()),
        Ok(Err(err)) => warn!("Skipping plot render ({}): {:#}", path.display(), err),
        Err(_) => warn!(
            "Skipping plot render ({}): plotting backend panicked",
            path.display()
        ),
    }
}

fn plot_color(color: Rgb) -> RGBColor {
    RGBColor(color.r, color.g, color.b)
}

fn axis_font(size: f64) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, size, FontStyle::Bold)
}

/// `HH:MM` for an hour-of-day axis value.
fn format_clock_hours(hours: &f64) -> String {
    let minutes = (hours * 60.0).round().max(0.0) as i64;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// `HH:MM:SS` for seconds after midnight.
fn format_clock_seconds(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as i64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

const OVERLAY_SIZE: (u32, u32) = (2000, 900);

fn render_overlay(set: &CurveSet, path: &Path, kind: ChartKind, y_range: (f64, f64)) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, OVERLAY_SIZE).into_drawing_area();
            draw_overlay(root, set, y_range)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, OVERLAY_SIZE).into_drawing_area();
            draw_overlay(root, set, y_range)
        }
    }
}

fn draw_overlay<DB>(
    root: DrawingArea<DB, Shift>,
    set: &CurveSet,
    (y_min, y_max): (f64, f64),
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(30)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 70)
        .build_cartesian_2d(0.0..24.0, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_labels(25)
        .x_label_formatter(&format_clock_hours)
        .y_label_formatter(&|v| format!("{:.0}", v))
        .x_desc("Time")
        .y_desc("Interstitial glucose level / mg/dL")
        .light_line_style(&TRANSPARENT)
        .bold_line_style(&BLACK.mix(0.15))
        .label_style(axis_font(20.0))
        .axis_desc_style(axis_font(24.0))
        .draw()?;

    for day in &set.days {
        let color = plot_color(day.color);
        for curve in &day.curves {
            let hours = || curve.points().map(|(x, y)| (x / 3600.0, y));
            chart.draw_series(LineSeries::new(hours(), BLACK.stroke_width(6)))?;
            chart.draw_series(LineSeries::new(hours(), color.stroke_width(4)))?;
        }
        chart
            .draw_series(std::iter::empty::<PathElement<(f64, f64)>>())?
            .label(day.date.format("%Y-%m-%d").to_string())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(4)));
    }

    if !set.days.is_empty() {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&TRANSPARENT)
            .label_font(axis_font(18.0))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

const DAILY_SIZE: (u32, u32) = (1800, 800);

fn render_daily(
    series: &[WindowSeries],
    range: &DateRange,
    path: &Path,
    kind: ChartKind,
    y_range: (f64, f64),
) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, DAILY_SIZE).into_drawing_area();
            draw_daily(root, series, range, y_range)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, DAILY_SIZE).into_drawing_area();
            draw_daily(root, series, range, y_range)
        }
    }
}

fn window_color(window: HourWindow) -> (RGBColor, RGBColor) {
    if window == HourWindow::NIGHT {
        (BLUE, BLUE)
    } else {
        (RED, RGBColor(240, 128, 128))
    }
}

/// Points of a dashed horizontal line, as separate dash segments.
fn dashes(y: f64, x_start: f64, x_end: f64, dash: f64) -> Vec<Vec<(f64, f64)>> {
    let mut out = Vec::new();
    let mut x = x_start;
    while x < x_end {
        let stop = (x + dash).min(x_end);
        out.push(vec![(x, y), (stop, y)]);
        x += dash * 2.0;
    }
    out
}

fn draw_daily<DB>(
    root: DrawingArea<DB, Shift>,
    series: &[WindowSeries],
    range: &DateRange,
    (y_min, y_max): (f64, f64),
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let start = range.start();
    let n_days = range.num_days();
    let x_start = -0.5;
    let x_end = n_days as f64 - 0.5;
    let day_label = move |v: &f64| {
        let rounded = v.round();
        if (v - rounded).abs() > 1e-6 || rounded < 0.0 {
            return String::new();
        }
        start
            .checked_add_days(chrono::Days::new(rounded as u64))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };

    let mut chart = ChartBuilder::on(&root)
        .margin(30)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 110)
        .build_cartesian_2d(x_start..x_end, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_labels(n_days.min(60))
        .x_label_formatter(&day_label)
        .x_label_style(axis_font(14.0).transform(FontTransform::Rotate90))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .x_desc("Date")
        .y_desc("Average glucose level / mg/dL")
        .light_line_style(&TRANSPARENT)
        .label_style(axis_font(18.0))
        .axis_desc_style(axis_font(22.0))
        .draw()?;

    for entry in series {
        let (color, avg_color) = window_color(entry.window);
        let offset = |date: NaiveDate| (date - start).num_days() as f64;
        let points: Vec<(f64, f64)> = entry
            .stats
            .iter()
            .map(|s| (offset(s.date), s.mean))
            .collect();

        for stat in &entry.stats {
            if let Some(std) = stat.std {
                let x = offset(stat.date);
                let (lo, hi) = (stat.mean - std, stat.mean + std);
                let cap = 0.15;
                for line in [
                    vec![(x, lo), (x, hi)],
                    vec![(x - cap, lo), (x + cap, lo)],
                    vec![(x - cap, hi), (x + cap, hi)],
                ] {
                    chart.draw_series(std::iter::once(PathElement::new(line, color.stroke_width(2))))?;
                }
            }
        }

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(entry.window.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(2)));
        chart.draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 6, color.filled())),
        )?;

        if let Some(overall) = entry.overall {
            let dash = (x_end - x_start) / 120.0;
            chart
                .draw_series(
                    dashes(overall.mean, x_start, x_end, dash)
                        .into_iter()
                        .map(|seg| PathElement::new(seg, avg_color.stroke_width(2))),
                )?
                .label(format!("Average {}", entry.window.label()))
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 30, y)], avg_color.stroke_width(2))
                });
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(axis_font(16.0))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(())
}

struct RaceView {
    from: NaiveDateTime,
    to: NaiveDateTime,
    y_range: (f64, f64),
}

const RACE_SIZE: (u32, u32) = (1400, 700);

fn render_race(curves: &PivotCurves, view: &RaceView, path: &Path, kind: ChartKind) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, RACE_SIZE).into_drawing_area();
            draw_race(root, curves, view)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, RACE_SIZE).into_drawing_area();
            draw_race(root, curves, view)
        }
    }
}

fn draw_race<DB>(root: DrawingArea<DB, Shift>, curves: &PivotCurves, view: &RaceView) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    // x axis: minutes after the window start.
    let to_minutes = |seconds_from_origin: f64| {
        (seconds_from_origin - curves.seconds_from_origin(view.from)) / 60.0
    };
    let span_min = (view.to - view.from).num_minutes().max(1) as f64;
    let from = view.from;
    let clock = move |v: &f64| {
        let t = from + chrono::Duration::seconds((v * 60.0).round() as i64);
        t.format("%H:%M").to_string()
    };

    let (y_min, y_max) = view.y_range;
    let mut chart = ChartBuilder::on(&root)
        .margin(30)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 70)
        .build_cartesian_2d(0.0..span_min, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_labels((span_min / 30.0).ceil() as usize + 1)
        .x_label_formatter(&clock)
        .y_label_formatter(&|v| format!("{:.0}", v))
        .x_desc("Time")
        .y_desc("Interstitial glucose level / mg/dL")
        .bold_line_style(&BLACK.mix(0.4))
        .light_line_style(&TRANSPARENT)
        .label_style(axis_font(20.0))
        .axis_desc_style(axis_font(22.0))
        .draw()?;

    let sides = [
        ("Before", &curves.before_curve, &curves.before, BLUE),
        ("During", &curves.after_curve, &curves.after, RED),
    ];
    for (label, curve, raw, color) in sides {
        if let Some(line) = curve {
            chart
                .draw_series(LineSeries::new(
                    line.xs
                        .iter()
                        .zip(line.ys.iter())
                        .map(|(&x, &y)| (to_minutes(x), y)),
                    color.stroke_width(4),
                ))?
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(4)));
        }
        chart.draw_series(raw.iter().map(|s| {
            let x = to_minutes(curves.seconds_from_origin(s.timestamp));
            Circle::new((x, s.value), 5, color.filled())
        }))?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(axis_font(18.0))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}
