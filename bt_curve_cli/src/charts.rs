use std::panic;
use std::path::Path;

use anyhow::Result;
use bt_curve::AlignedFrame;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

const NAVY: RGBColor = RGBColor(0, 0, 128);
const FIREBRICK: RGBColor = RGBColor(178, 34, 34);
const Y_TICK_STEP: f64 = 0.025;

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    pub fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Chart {
    EquityCurve,
    Distribution,
}

#[derive(Clone, Debug)]
pub struct PlotOptions {
    pub size: (u32, u32),
    pub bins: usize,
    /// Every n-th underlying close feeds the distribution chart.
    pub hist_stride: usize,
}

#[derive(Clone, Debug)]
pub struct ChartLabels {
    pub title: String,
    pub strategy: String,
    pub underlying: String,
}

pub fn render_chart_guard(
    chart: Chart,
    frame: &AlignedFrame,
    labels: &ChartLabels,
    path: &Path,
    kind: ChartKind,
    opts: &PlotOptions,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(chart, frame, labels, path, kind, opts)
            .map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(
    chart: Chart,
    frame: &AlignedFrame,
    labels: &ChartLabels,
    path: &Path,
    kind: ChartKind,
    opts: &PlotOptions,
) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, opts.size).into_drawing_area();
            draw(chart, root, frame, labels, opts)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, opts.size).into_drawing_area();
            draw(chart, root, frame, labels, opts)
        }
    }
}

fn draw<DB>(
    chart: Chart,
    root: DrawingArea<DB, Shift>,
    frame: &AlignedFrame,
    labels: &ChartLabels,
    opts: &PlotOptions,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    match chart {
        Chart::EquityCurve => draw_equity_curve(root, frame, labels),
        Chart::Distribution => draw_distribution(root, frame, labels, opts),
    }
}

fn draw_equity_curve<DB>(
    root: DrawingArea<DB, Shift>,
    frame: &AlignedFrame,
    labels: &ChartLabels,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let rows = frame.len();
    let cubic = frame.cubic_cumulative();
    let linear = frame.linear_cumulative();
    let underlying = frame.underlying_cumulative();

    let x_max = (rows as f64).max(1.0);
    let (y_min, y_max) = value_extent(
        cubic
            .iter()
            .chain(linear.iter())
            .copied()
            .chain(underlying.iter().flatten().copied()),
    );

    let area = root;
    area.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&area)
        .caption(
            &labels.title,
            FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal),
        )
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 80)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    let x_labels = major_tick_spacing(rows)
        .map(|step| (rows as f64 / step).ceil() as usize + 1)
        .unwrap_or(10);
    let y_labels = (((y_max - y_min) / Y_TICK_STEP).round() as usize + 1).clamp(3, 25);

    chart
        .configure_mesh()
        .x_desc("Units [1 min tick interval]")
        .x_labels(x_labels)
        .y_labels(y_labels)
        .x_label_formatter(&|v| format_thousands(*v))
        .y_label_formatter(&|v| format_percent(*v))
        .bold_line_style(RGBColor(105, 105, 105).mix(0.5))
        .light_line_style(RGBColor(128, 128, 128).mix(0.2))
        .label_style(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(0.0, 0.0), (x_max, 0.0)],
        FIREBRICK.stroke_width(2),
    ))?;

    let linear_color = NAVY.mix(0.35);
    chart
        .draw_series(LineSeries::new(
            linear.iter().enumerate().map(|(i, v)| (i as f64, *v)),
            linear_color.stroke_width(1),
        ))?
        .label("Linear interpolation")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], linear_color));

    chart
        .draw_series(LineSeries::new(
            cubic.iter().enumerate().map(|(i, v)| (i as f64, *v)),
            NAVY.stroke_width(1),
        ))?
        .label(labels.strategy.as_str())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], NAVY));

    chart
        .draw_series(LineSeries::new(
            underlying
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i as f64, v))),
            BLACK.stroke_width(1),
        ))?
        .label(labels.underlying.as_str())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], BLACK));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.7))
        .border_style(BLACK.mix(0.3))
        .label_font(FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    area.present()?;
    Ok(())
}

fn draw_distribution<DB>(
    root: DrawingArea<DB, Shift>,
    frame: &AlignedFrame,
    labels: &ChartLabels,
    opts: &PlotOptions,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let strategy: Vec<f64> = frame
        .sparse
        .values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    let underlying = frame.dense.sampled_close_returns(opts.hist_stride);

    let Some((lo, hi)) = histogram_range(strategy.iter().chain(underlying.iter()).copied())
    else {
        return Ok(());
    };
    let bins = opts.bins.max(1);
    let width = (hi - lo) / bins as f64;
    let strategy_counts = histogram_counts(&strategy, bins, lo, hi);
    let underlying_counts = histogram_counts(&underlying, bins, lo, hi);
    let y_max = strategy_counts
        .iter()
        .chain(underlying_counts.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(1) as f64
        * 1.1;

    let area = root;
    area.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&area)
        .caption(
            &labels.title,
            FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal),
        )
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Right, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(lo..hi, 0.0..y_max)?;

    chart
        .configure_mesh()
        .x_label_formatter(&|v| format_percent(*v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .bold_line_style(RGBColor(105, 105, 105).mix(0.5))
        .light_line_style(RGBColor(128, 128, 128).mix(0.2))
        .label_style(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .draw()?;

    let strategy_fill = NAVY.mix(0.6);
    chart
        .draw_series(bars(&strategy_counts, lo, width).map(|(x0, x1, count)| {
            Rectangle::new([(x0, 0.0), (x1, count)], strategy_fill.filled())
        }))?
        .label(labels.strategy.as_str())
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], strategy_fill.filled()));

    let underlying_fill = BLACK.mix(0.4);
    chart
        .draw_series(bars(&underlying_counts, lo, width).map(|(x0, x1, count)| {
            Rectangle::new([(x0, 0.0), (x1, count)], underlying_fill.filled())
        }))?
        .label(labels.underlying.as_str())
        .legend(move |(x, y)| {
            Rectangle::new([(x, y - 5), (x + 20, y + 5)], underlying_fill.filled())
        });

    if lo <= 0.0 && hi >= 0.0 {
        chart.draw_series(LineSeries::new(
            vec![(0.0, 0.0), (0.0, y_max)],
            FIREBRICK.stroke_width(2),
        ))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.7))
        .border_style(BLACK.mix(0.3))
        .label_font(FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    area.present()?;
    Ok(())
}

fn bars(counts: &[usize], lo: f64, width: f64) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
    counts
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .map(move |(i, &count)| {
            let x0 = lo + i as f64 * width;
            (x0, x0 + width, count as f64)
        })
}

/// Min/max of the finite values with zero included and 5% headroom.
fn value_extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (mut min_v, mut max_v) = values
        .filter(|v| v.is_finite())
        .fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if max_v - min_v < f64::EPSILON {
        min_v -= Y_TICK_STEP;
        max_v += Y_TICK_STEP;
    }
    let pad = (max_v - min_v) * 0.05;
    (min_v - pad, max_v + pad)
}

fn histogram_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min_v, max_v) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min_v.is_finite() || !max_v.is_finite() {
        return None;
    }
    if min_v == max_v {
        // widen flat ranges
        let adjust = if min_v == 0.0 { 1e-3 } else { min_v.abs() * 0.1 };
        return Some((min_v - adjust, max_v + adjust));
    }
    Some((min_v, max_v))
}

fn histogram_counts(values: &[f64], bins: usize, lo: f64, hi: f64) -> Vec<usize> {
    let bins = bins.max(1);
    let mut counts = vec![0usize; bins];
    let width = (hi - lo) / bins as f64;
    if !(width > 0.0) {
        return counts;
    }
    for v in values.iter().filter(|v| v.is_finite()) {
        if *v < lo || *v > hi {
            continue;
        }
        let idx = (((v - lo) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
}

/// Spacing between major x ticks: `round_down(rows, 10_000) / 10`.
fn major_tick_spacing(rows: usize) -> Option<f64> {
    let spacing = round_down(rows, 10_000) as f64 / 10.0;
    (spacing > 0.0).then_some(spacing)
}

fn round_down(number: usize, divisor: usize) -> usize {
    (number / divisor) * divisor
}

fn format_percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn format_thousands(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        grouped.insert(0, '-');
    }
    grouped
}
