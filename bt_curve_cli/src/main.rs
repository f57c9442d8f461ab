use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use bt_curve::{align_series, parse_dense_csv, parse_sparse_csv, AlignedFrame};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod charts;

use charts::{render_chart_guard, Chart, ChartKind, ChartLabels, PlotOptions};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    long_version = LONG_VERSION,
    about = "Backtest equity curve CLI",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Align backtest returns onto the underlying and render equity/distribution charts
    Plot(PlotArgs),
    /// Print the alignment summary without rendering
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Backtest returns CSV (one return column, `.csv` optional)
    #[arg(value_hint = ValueHint::FilePath)]
    backtest: PathBuf,

    /// Underlying price CSV with `Date` and `Close` columns (`.csv` optional)
    #[arg(value_hint = ValueHint::FilePath)]
    underlying: PathBuf,
}

#[derive(Parser, Debug)]
struct PlotArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Directory receiving the chart images
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Image format
    #[arg(long, value_enum, default_value_t = FormatOpt::Png)]
    format: FormatOpt,

    /// Histogram bin count
    #[arg(long, default_value_t = 58)]
    bins: usize,

    /// Use every n-th underlying close for the distribution chart
    #[arg(long, default_value_t = 58)]
    hist_stride: usize,

    /// Legend prefix for the strategy series
    #[arg(long, default_value = "Automated Performance Trading")]
    strategy_label: String,

    /// Figure width in pixels
    #[arg(long, default_value_t = 1428)]
    width: u32,

    /// Figure height in pixels
    #[arg(long, default_value_t = 952)]
    height: u32,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Png,
    Svg,
}

impl From<FormatOpt> for ChartKind {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Png => ChartKind::Png,
            FormatOpt::Svg => ChartKind::Svg,
        }
    }
}

struct Loaded {
    frame: AlignedFrame,
    ticker: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Plot(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Plot(args) => handle_plot(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn handle_plot(args: PlotArgs) -> Result<()> {
    let Loaded { frame, ticker } = load_and_align(&args.input)?;

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    let kind = ChartKind::from(args.format);
    let opts = PlotOptions {
        size: (args.width, args.height),
        bins: args.bins,
        hist_stride: args.hist_stride,
    };
    let labels = ChartLabels {
        title: plot_title(&ticker, &frame),
        strategy: strategy_label(&args.strategy_label, &ticker, frame.sparse.len()),
        underlying: format!("{ticker} Performance"),
    };

    let charts = [
        (Chart::EquityCurve, "equity_curve"),
        (Chart::Distribution, "return_distribution"),
    ];
    for (chart, suffix) in charts {
        let path = args
            .output_dir
            .join(format!("{ticker}_{suffix}.{}", kind.extension()));
        let t_plot = Instant::now();
        match render_chart_guard(chart, &frame, &labels, &path, kind, &opts) {
            Ok(()) => info!(
                "Wrote {} ({:.1} ms)",
                path.display(),
                t_plot.elapsed().as_secs_f64() * 1000.0
            ),
            Err(err) => warn!("Failed to render {}: {}", path.display(), err),
        }
    }
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let loaded = load_and_align(&args.input)?;
    let report = inspect_report(&loaded);
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(report.as_bytes())
        .context("failed to write report to stdout")?;
    Ok(())
}

fn load_and_align(input: &InputArgs) -> Result<Loaded> {
    let backtest_path = resolve_csv_path(&input.backtest);
    let underlying_path = resolve_csv_path(&input.underlying);

    let t_parse = Instant::now();
    let backtest = fs::read(&backtest_path)
        .with_context(|| format!("failed to read {}", backtest_path.display()))?;
    let sparse = parse_sparse_csv(&backtest)
        .with_context(|| format!("failed to parse {}", backtest_path.display()))?;
    let underlying = fs::read(&underlying_path)
        .with_context(|| format!("failed to read {}", underlying_path.display()))?;
    let dense = parse_dense_csv(&underlying)
        .with_context(|| format!("failed to parse {}", underlying_path.display()))?;
    debug!(
        "Parse stage: {:.1} ms",
        t_parse.elapsed().as_secs_f64() * 1000.0
    );
    info!(
        "Loaded {} returns ('{}') and {} underlying rows",
        sparse.len(),
        sparse.name,
        dense.len()
    );

    let t_align = Instant::now();
    let frame = align_series(dense, sparse).with_context(|| {
        format!(
            "failed to align {} onto {}",
            backtest_path.display(),
            underlying_path.display()
        )
    })?;
    let stats = &frame.stats;
    debug!(
        "Align stage: {:.1} ms (stride {}, {} candidates, {} dropped)",
        t_align.elapsed().as_secs_f64() * 1000.0,
        stats.stride,
        stats.candidate_count,
        stats.dropped_count
    );
    if stats.forced_head || stats.forced_tail {
        debug!(
            "Zero-filled boundary rows: head={} tail={}",
            stats.forced_head, stats.forced_tail
        );
    }

    Ok(Loaded {
        frame,
        ticker: ticker_symbol(&underlying_path),
    })
}

/// Append `.csv` to names that lack it.
fn resolve_csv_path(path: &Path) -> PathBuf {
    let has_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if has_csv {
        return path.to_path_buf();
    }
    let mut raw = path.as_os_str().to_owned();
    raw.push(".csv");
    PathBuf::from(raw)
}

/// `SPXSubset20220422.csv` -> `SPX`.
fn ticker_symbol(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let trimmed = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    let trimmed = trimmed.strip_suffix("Subset").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches(['_', '-', ' ']);
    if trimmed.is_empty() {
        stem
    } else {
        trimmed.to_string()
    }
}

fn strategy_label(prefix: &str, ticker: &str, trades: usize) -> String {
    format!("{prefix} {ticker} [{trades} Trades]")
}

fn plot_title(ticker: &str, frame: &AlignedFrame) -> String {
    let mut title =
        format!("Long System over {ticker} with Overnight Holding Periods Permitted");
    if let Some((first, last)) = frame.dense.date_range() {
        title.push_str(&format!(", {first} – {last}"));
    }
    title
}

fn inspect_report(loaded: &Loaded) -> String {
    let frame = &loaded.frame;
    let stats = &frame.stats;
    let mapping = frame.mapping.as_slice();
    let head: Vec<usize> = mapping.iter().take(5).copied().collect();
    let tail: Vec<usize> = mapping
        .iter()
        .skip(mapping.len().saturating_sub(5))
        .copied()
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "ticker:            {}", loaded.ticker);
    if let Some((first, last)) = frame.dense.date_range() {
        let _ = writeln!(out, "date range:        {first} – {last}");
    }
    let _ = writeln!(out, "underlying rows:   {}", stats.dense_len);
    let _ = writeln!(out, "backtest returns:  {} ('{}')", stats.sparse_len, frame.sparse.name);
    let _ = writeln!(out, "stride:            {}", stats.stride);
    let _ = writeln!(out, "candidates:        {}", stats.candidate_count);
    let _ = writeln!(out, "dropped:           {}", stats.dropped_count);
    let _ = writeln!(
        out,
        "forced zeros:      head={} tail={}",
        stats.forced_head, stats.forced_tail
    );
    let _ = writeln!(out, "mapping head:      {:?}", head);
    let _ = writeln!(out, "mapping tail:      {:?}", tail);
    if let (Some(linear), Some(cubic)) = (
        frame.linear_cumulative().last(),
        frame.cubic_cumulative().last(),
    ) {
        let _ = writeln!(out, "final linear:      {:.4}%", linear * 100.0);
        let _ = writeln!(out, "final cubic:       {:.4}%", cubic * 100.0);
    }
    if let Some(Some(underlying)) = frame.underlying_cumulative().last() {
        let _ = writeln!(out, "final underlying:  {:.4}%", underlying * 100.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_curve::{DenseRecord, DenseSeries, SparseSeries};

    fn frame() -> AlignedFrame {
        let dense = DenseSeries::new(
            (0..10)
                .map(|i| DenseRecord {
                    date: format!("2022-04-{:02}", 20 + i / 5),
                    timestamp: None,
                    close: 100.0 + i as f64,
                })
                .collect(),
        );
        align_series(dense, SparseSeries::new("Returns", vec![0.01, 0.02, -0.01])).unwrap()
    }

    #[test]
    fn test_resolve_csv_path_appends_extension() {
        assert_eq!(
            resolve_csv_path(Path::new("data/SPXSubset20220422")),
            PathBuf::from("data/SPXSubset20220422.csv")
        );
        assert_eq!(
            resolve_csv_path(Path::new("returns.CSV")),
            PathBuf::from("returns.CSV")
        );
        assert_eq!(
            resolve_csv_path(Path::new("returns.v2")),
            PathBuf::from("returns.v2.csv")
        );
    }

    #[test]
    fn test_ticker_symbol() {
        assert_eq!(ticker_symbol(Path::new("data/SPXSubset20220422.csv")), "SPX");
        assert_eq!(ticker_symbol(Path::new("QQQ_20230101.csv")), "QQQ");
        assert_eq!(ticker_symbol(Path::new("AAPL.csv")), "AAPL");
        assert_eq!(ticker_symbol(Path::new("20220422.csv")), "20220422");
    }

    #[test]
    fn test_labels() {
        let frame = frame();
        assert_eq!(
            strategy_label("Automated Performance Trading", "SPX", 582),
            "Automated Performance Trading SPX [582 Trades]"
        );
        assert_eq!(
            plot_title("SPX", &frame),
            "Long System over SPX with Overnight Holding Periods Permitted, 2022-04-20 – 2022-04-21"
        );
    }

    #[test]
    fn test_inspect_report_lists_alignment() {
        let loaded = Loaded {
            frame: frame(),
            ticker: "SPX".into(),
        };
        let report = inspect_report(&loaded);
        assert!(report.contains("stride:            3"));
        assert!(report.contains("dropped:           1"));
        assert!(report.contains("forced zeros:      head=true tail=false"));
        assert!(report.contains("mapping head:      [3, 6, 9]"));
        assert!(report.contains("final linear:      2.0000%"));
    }
}
