use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use letagg::config::Config;
use letagg::engine::pipeline::Pipeline;
use letagg::export::json::write_table;
use letagg::export::metrics::EngineMetrics;
use letagg::record::source::read_json_lines;
use letagg::record::stats::SkipStats;

/// Windowed latency/error/throughput and resource-usage aggregation.
#[derive(Parser)]
#[command(name = "letagg", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines record input; "-" reads stdin.
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// Time-series output file. Default: stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Summary output file. Default: appended to the time-series output.
    #[arg(long)]
    summary_output: Option<PathBuf>,

    /// Write Prometheus self-metrics to this file after the run.
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("letagg {}", version::full());
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    // Results may go to stdout, so logs always go to stderr.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let config_path = cli
        .config
        .as_deref()
        .context("--config is required (use --help for usage)")?;
    let cfg = Config::load(config_path)?;
    let pipeline = Pipeline::from_config(&cfg).context("building pipeline")?;

    tracing::info!(
        version = version::RELEASE,
        pipeline = pipeline.kind(),
        window_seconds = pipeline.window().seconds(),
        workers = cfg.workers,
        "starting letagg",
    );

    run(&cli, &pipeline)
}

fn run(cli: &Cli, pipeline: &Pipeline) -> Result<()> {
    let metrics = EngineMetrics::new().context("registering metrics")?;

    let read_stats = SkipStats::new();
    let records = read_json_lines(open_input(&cli.input)?, &read_stats)?;
    let read_skips = read_stats.take();
    metrics.observe_skips(&read_skips);
    if !read_skips.is_empty() {
        tracing::warn!(skipped = read_skips.total(), "skipped malformed input lines");
    }

    let output = pipeline.run(&records, &metrics)?;

    let mut out = open_output(cli.output.as_deref())?;
    let rows = write_table(&output.series, &mut out)?;
    tracing::debug!(rows, "wrote time series");

    if let Some(summary) = &output.summary {
        let rows = match &cli.summary_output {
            Some(path) => {
                let mut file = open_output(Some(path))?;
                let rows = write_table(summary, &mut file)?;
                file.flush().context("flushing summary output")?;
                rows
            }
            None => write_table(summary, &mut out)?,
        };
        tracing::debug!(rows, "wrote summary");
    }
    out.flush().context("flushing output")?;

    if let Some(path) = &cli.metrics_out {
        std::fs::write(path, metrics.render()?)
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    Ok(())
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("opening input {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating output {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}
