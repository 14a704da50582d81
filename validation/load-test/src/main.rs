//! Load test CLI for tile servers.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tile_load_test::{LoadRunner, ResultsReport, TestConfig, TileBounds};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "tile-load-test")]
#[command(about = "Load testing tool for z/x/y tile servers", long_about = None)]
struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test configured from flags
    Run(RunArgs),

    /// Run a load test from a scenario file
    Scenario {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override worker count
        #[arg(short, long)]
        threads: Option<usize>,

        /// Override test duration (e.g. 60s)
        #[arg(short, long)]
        duration: Option<String>,

        /// Override output CSV path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Console output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Tile URL template (e.g. https://tile.server/path/{z}/{x}/{y}.pbf)
    #[arg(long)]
    url: String,

    /// Single zoom level, shorthand for equal min and max zoom
    #[arg(long, conflicts_with_all = ["min_zoom", "max_zoom"])]
    zoom: Option<u32>,

    #[arg(long, default_value_t = 0)]
    min_zoom: u32,

    #[arg(long, default_value_t = 0)]
    max_zoom: u32,

    #[arg(long, default_value_t = 0)]
    min_x: u32,

    #[arg(long, default_value_t = 0)]
    max_x: u32,

    #[arg(long, default_value_t = 0)]
    min_y: u32,

    #[arg(long, default_value_t = 0)]
    max_y: u32,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Request pattern: random or fixed
    #[arg(long, default_value = "random")]
    pattern: String,

    /// What the fixed pattern repeats: sweep or single
    #[arg(long, default_value = "sweep")]
    fixed_mode: String,

    /// Maximum test duration (e.g. 60s)
    #[arg(long)]
    duration: Option<String>,

    /// Per-request timeout
    #[arg(long, default_value = "1s")]
    timeout: String,

    /// Name identifier for the tile server
    #[arg(long, default_value = "default")]
    name: String,

    /// Environment description
    #[arg(long, default_value = "default")]
    environment: String,

    /// Output CSV file path
    #[arg(long, default_value = "results.csv")]
    output: PathBuf,

    /// Accept-Encoding header to send (e.g. gzip)
    #[arg(long)]
    accept_encoding: Option<String>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Master seed for reproducible coordinate streams
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many requests in total
    #[arg(long)]
    requests: Option<u64>,

    /// Console output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<TestConfig> {
        let bounds = match self.zoom {
            Some(zoom) => TileBounds::at_zoom(zoom, (self.min_x, self.max_x), (self.min_y, self.max_y)),
            None => TileBounds {
                min_zoom: self.min_zoom,
                max_zoom: self.max_zoom,
                min_x: self.min_x,
                max_x: self.max_x,
                min_y: self.min_y,
                max_y: self.max_y,
            },
        };

        let mut config = TestConfig::new(self.url, bounds);
        config.threads = self.threads;
        config.pattern = self.pattern.parse()?;
        config.fixed_mode = self.fixed_mode.parse()?;
        config.duration = self.duration;
        config.timeout = self.timeout;
        config.name = self.name;
        config.environment = self.environment;
        config.output = self.output;
        config.accept_encoding = self.accept_encoding;
        config.headers = self.headers;
        config.seed = self.seed;
        config.requests = self.requests;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let format = args.format;
            let config = args.into_config().context("invalid configuration")?;
            execute(config, format).await
        }
        Commands::Scenario {
            scenario,
            threads,
            duration,
            output,
            format,
        } => {
            let mut config = TestConfig::from_file(&scenario)?;

            // Apply overrides
            if let Some(t) = threads {
                config.threads = t;
            }
            if let Some(d) = duration {
                config.duration = Some(d);
            }
            if let Some(o) = output {
                config.output = o;
            }

            execute(config, format).await
        }
        Commands::List { dir } => list_scenarios(&dir),
    }
}

/// Run the test, append the CSV row and print the summary.
async fn execute(config: TestConfig, format: OutputFormat) -> anyhow::Result<()> {
    let output = config.output.clone();
    let mut runner = LoadRunner::new(config)
        .context("invalid configuration")?
        .with_progress(spinner());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping run");
            interrupt.cancel();
        }
    });

    let results = runner.run_with_cancel(cancel).await?;

    ResultsReport::append_csv(&output, runner.config(), &results)?;

    match format {
        OutputFormat::Table => {
            println!("{}", ResultsReport::format_table(runner.config(), &results));
        }
        OutputFormat::Json => {
            println!("{}", ResultsReport::format_json(&results)?);
        }
    }
    println!("Results written to {}", output.display());

    Ok(())
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed_precise}] {pos} requests")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn list_scenarios(dir: &Path) -> anyhow::Result<()> {
    println!("Available scenarios in {}:", dir.display());
    println!();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read scenarios directory {}", dir.display()))?;

    let mut scenarios = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }
        match TestConfig::from_file(&path) {
            Ok(config) => {
                let filename = entry.file_name().to_string_lossy().to_string();
                scenarios.push((filename, config));
            }
            Err(e) => warn!(error = %e, "Skipping unreadable scenario"),
        }
    }

    scenarios.sort_by(|a, b| a.0.cmp(&b.0));

    if scenarios.is_empty() {
        println!("No scenario files found");
    } else {
        for (filename, config) in scenarios {
            println!("  {} - {} ({})", filename, config.name, config.environment);
            println!("    {} [{}]", config.url_template, config.pattern);
            println!();
        }
    }

    Ok(())
}
