//! CLI entry point for the water-quality trends pipeline.
//!
//! Provides subcommands for building the cleaned daily table, fitting a
//! single model against an exported table, and running the full pipeline
//! with every configured model.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use wq_trends::{
    config::PipelineConfig,
    means::{DEFAULT_LEVEL, marginal_means, pairwise_contrasts},
    models::{FitOptions, Formula, Method, ModelKind, fit_model},
    output::print_json,
    pipeline::{self, RunOptions, load_observations},
    plots::means_chart,
    report::{self, MeansTable, ModelOutcome, ModelSection},
    stats::RunStats,
};

#[derive(Parser)]
#[command(name = "wq_trends")]
#[command(about = "Clean water-quality logger data and model its trends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the cleaned daily table from the configured inputs
    Prepare {
        /// Pipeline config (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fit one model against an exported table
    Fit {
        /// Daily table written by `prepare` (plain or .gz)
        #[arg(short, long)]
        data: PathBuf,

        /// Model formula, e.g. "do_mg_l ~ site * time"
        #[arg(short, long)]
        formula: String,

        #[arg(short, long, value_enum, default_value_t = ModelKind::Gls)]
        kind: ModelKind,

        /// AR(1) errors within each group, ordered by time
        #[arg(long, default_value_t = false)]
        ar1: bool,

        /// Grouping column for the AR(1) structure
        #[arg(long, default_value = "site")]
        group: String,

        #[arg(long, value_enum, default_value_t = Method::Reml)]
        method: Method,

        /// Factors to report marginal means and contrasts for
        #[arg(long)]
        means: Vec<String>,

        /// Write a chart of the first factor's marginal means here
        #[arg(long)]
        plot: Option<PathBuf>,
    },
    /// Run the full pipeline: prepare, fit every model, write the report
    Run {
        /// Pipeline config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Maximum number of models fitted at once
        #[arg(long, default_value_t = 2)]
        concurrency: usize,

        /// Refit every model even when a cached fit matches
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/wq_trends.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("wq_trends.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare { config } => {
            let cfg = PipelineConfig::load(&config)?;
            let mut stats = RunStats::new(&config.to_string_lossy());
            let prepared = pipeline::prepare(&cfg, &mut stats).await?;
            info!(
                rows = prepared.daily.len(),
                path = %prepared.daily_path.display(),
                qc_pct = stats.qc_pct(),
                "Prepare finished"
            );
        }
        Commands::Fit {
            data,
            formula,
            kind,
            ar1,
            group,
            method,
            means,
            plot,
        } => {
            if plot.is_some() && means.is_empty() {
                bail!("--plot draws marginal means; name a factor with --means");
            }
            let parsed = Formula::parse(&formula)?;
            let opts = FitOptions {
                ar1,
                group: Some(group),
                method,
                ..FitOptions::default()
            };
            let rows = load_observations(&data)?;
            info!(rows = rows.len(), data = %data.display(), "Table loaded");

            let model = tokio::task::spawn_blocking(move || {
                fit_model(kind, &parsed, &rows, &opts)
            })
            .await??;
            print_json(&model)?;

            let mut tables = Vec::new();
            for factor in &means {
                let table = MeansTable {
                    factor: factor.clone(),
                    means: marginal_means(&model, factor, DEFAULT_LEVEL)?,
                    contrasts: pairwise_contrasts(&model, factor)?,
                };
                print_json(&table.means)?;
                print_json(&table.contrasts)?;
                tables.push(table);
            }

            let mut plots = Vec::new();
            if let (Some(path), Some(first)) = (plot, tables.first()) {
                let title = format!("{} by {}", model.formula, first.factor);
                means_chart(&first.means, &title, &model.design.formula.response.to_string(), &path)?;
                plots.push(path);
            }

            let section = ModelSection {
                name: data
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "model".to_string()),
                formula,
                kind,
                outcome: ModelOutcome::Fitted {
                    model: Box::new(model),
                    cached: false,
                    means: tables,
                    plots,
                },
            };
            println!("{}", report::render_section(&section));
        }
        Commands::Run {
            config,
            concurrency,
            no_cache,
        } => {
            let cfg = PipelineConfig::load(&config)?;
            let opts = RunOptions {
                concurrency,
                use_cache: !no_cache,
            };
            let outcome = pipeline::run(&cfg, &config.to_string_lossy(), &opts).await?;
            info!(report = %outcome.report_path.display(), "Report written");
        }
    }

    Ok(())
}
