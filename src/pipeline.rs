//! The batch pipeline: ingest, clean, aggregate, derive, export, then fit
//! every configured model and write its tables, charts and the report.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};

use crate::aggregate;
use crate::cache::{ModelCache, fingerprint};
use crate::cleaning::{CorrectionOutcome, QcReport, Stage, apply_corrections, apply_qc, dedupe};
use crate::config::{ModelConfig, PipelineConfig};
use crate::derive::derive_all;
use crate::fetch::fetch_source;
use crate::ingest::{parse_instrument, parse_sites, parse_weather};
use crate::means::{DEFAULT_LEVEL, marginal_means, pairwise_contrasts, trend_curve};
use crate::model::{DailyRecord, RawReading};
use crate::models::{Cell, FittedModel, fit_model, parse_cell};
use crate::output::{append_record, read_table, write_json, write_table};
use crate::plots::{means_chart, trend_chart};
use crate::report::{self, MeansTable, ModelOutcome, ModelSection, Report};
use crate::stats::RunStats;

/// The cleaned daily table and what it took to produce it.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub daily: Vec<DailyRecord>,
    pub corrections: Vec<CorrectionOutcome>,
    pub daily_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Models fitted at once.
    pub concurrency: usize,
    pub use_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            concurrency: 2,
            use_cache: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stats: RunStats,
    pub models: Vec<ModelSection>,
    pub report_path: PathBuf,
}

async fn load_readings(config: &PipelineConfig) -> Result<Vec<RawReading>> {
    let mut readings = Vec::new();
    for source in &config.inputs.instruments {
        let source = config.source(source);
        let bytes = fetch_source(&source).await?;
        let parsed = parse_instrument(&bytes).with_context(|| format!("parsing {}", source))?;
        info!(source = %source, readings = parsed.len(), "Instrument file loaded");
        readings.extend(parsed);
    }
    Ok(readings)
}

/// Ingest through export: returns the derived daily table after writing
/// `daily.csv` and `corrections.csv` into the output dir.
#[tracing::instrument(skip_all, fields(output = %config.output_dir().display()))]
pub async fn prepare(config: &PipelineConfig, stats: &mut RunStats) -> Result<Prepared> {
    let mut readings = load_readings(config).await?;
    stats.raw_readings = readings.len();

    let weather = match &config.inputs.weather {
        Some(source) => {
            let source = config.source(source);
            let bytes = fetch_source(&source).await?;
            parse_weather(&bytes, config.inputs.weather_units)
                .with_context(|| format!("parsing {}", source))?
        }
        None => {
            warn!("No weather file configured");
            Vec::new()
        }
    };
    stats.weather_days = weather.len();

    let sites = match &config.inputs.sites {
        Some(source) => {
            let source = config.source(source);
            let bytes = fetch_source(&source).await?;
            parse_sites(&bytes).with_context(|| format!("parsing {}", source))?
        }
        None => Vec::new(),
    };
    stats.sites = sites.len();

    let rules = config.corrections()?;
    let mut outcomes = apply_corrections(&mut readings, &rules, Stage::Raw)?;

    let mut qc = QcReport::default();
    apply_qc(&mut readings, &config.qc, &mut qc);
    dedupe(&mut readings, &mut qc);
    stats.record_qc(&qc);

    let (mut daily, agg) = aggregate::daily(
        &readings,
        config.aggregation.min_readings,
        config.aggregation.chloride_from_spcond.as_ref(),
    );
    stats.record_aggregation(&agg);

    outcomes.extend(apply_corrections(&mut daily, &rules, Stage::Daily)?);
    stats.record_corrections(&outcomes);
    if daily.is_empty() {
        bail!("no daily rows left after cleaning");
    }

    derive_all(&mut daily, &weather, &sites, &config.derive);

    let out = config.output_dir();
    let daily_path = write_table(&out.join("daily.csv"), &daily, config.output.gzip)?;
    write_table(&out.join("corrections.csv"), &outcomes, false)?;

    info!(
        rows = daily.len(),
        corrections = outcomes.len(),
        "Daily table prepared"
    );
    Ok(Prepared {
        daily,
        corrections: outcomes,
        daily_path,
    })
}

/// Shared, read-only inputs of every model task.
struct ModelContext {
    daily: Vec<DailyRecord>,
    out_dir: PathBuf,
    cache: ModelCache,
    use_cache: bool,
    plots: bool,
    gzip: bool,
}

#[derive(Debug)]
struct ModelResult {
    model: FittedModel,
    cached: bool,
    means: Vec<MeansTable>,
    plots: Vec<PathBuf>,
}

fn plot_or_warn(model: &str, path: PathBuf, draw: impl FnOnce(&Path) -> Result<()>) -> Option<PathBuf> {
    match draw(&path) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(model, path = %path.display(), error = %e, "Plot not written");
            None
        }
    }
}

/// Fits (or loads) one model and writes its JSON, means tables and charts.
fn process_model(entry: &ModelConfig, ctx: &ModelContext) -> Result<ModelResult> {
    let formula = entry.validate()?;
    let rows: Vec<&DailyRecord> = ctx
        .daily
        .iter()
        .filter(|r| entry.sites.is_empty() || entry.sites.contains(&r.site))
        .collect();
    if rows.is_empty() {
        bail!("no daily rows for sites {:?}", entry.sites);
    }

    let columns = formula.columns();
    let fp = fingerprint(entry.kind, &entry.formula, &columns, &entry.options, &rows)?;
    let cached = if ctx.use_cache {
        ctx.cache.load(&entry.name, &fp)
    } else {
        None
    };
    let (model, cached) = match cached {
        Some(model) => (model, true),
        None => {
            let model = fit_model(entry.kind, &formula, &rows, &entry.options)?;
            if let Err(e) = ctx.cache.store(&entry.name, &fp, &model) {
                warn!(model = %entry.name, error = %e, "Model not cached");
            }
            (model, false)
        }
    };
    write_json(&ctx.out_dir.join("models").join(format!("{}.json", entry.name)), &model)?;

    let response = formula.response.to_string();
    let plot_dir = ctx.out_dir.join("plots");
    if ctx.plots {
        std::fs::create_dir_all(&plot_dir)?;
    }
    let mut tables = Vec::new();
    let mut plots = Vec::new();

    for factor in &entry.means {
        let means = marginal_means(&model, factor, DEFAULT_LEVEL)
            .with_context(|| format!("marginal means of {}", factor))?;
        let contrasts = pairwise_contrasts(&model, factor)?;
        let stem = format!("{}_{}", entry.name, factor);
        write_table(
            &ctx.out_dir.join("means").join(format!("{}_means.csv", stem)),
            &means,
            ctx.gzip,
        )?;
        write_table(
            &ctx.out_dir.join("means").join(format!("{}_contrasts.csv", stem)),
            &contrasts,
            ctx.gzip,
        )?;
        if ctx.plots {
            let title = format!("{}: {} by {}", entry.name, response, factor);
            plots.extend(plot_or_warn(&entry.name, plot_dir.join(format!("{}.png", stem)), |p| {
                means_chart(&means, &title, &response, p)
            }));
        }
        tables.push(MeansTable {
            factor: factor.clone(),
            means,
            contrasts,
        });
    }

    if let Some(trend) = &entry.trend {
        let curve = trend_curve(&model, &trend.var, trend.by.as_deref(), trend.points, DEFAULT_LEVEL)
            .with_context(|| format!("trend over {}", trend.var))?;
        let stem = format!("{}_trend_{}", entry.name, trend.var);
        write_table(
            &ctx.out_dir.join("means").join(format!("{}.csv", stem)),
            &curve,
            ctx.gzip,
        )?;
        if ctx.plots {
            let title = format!("{}: {} over {}", entry.name, response, trend.var);
            plots.extend(plot_or_warn(&entry.name, plot_dir.join(format!("{}.png", stem)), |p| {
                trend_chart(&curve, model.is_log_response(), &title, &trend.var, &response, p)
            }));
        }
    }

    Ok(ModelResult {
        model,
        cached,
        means: tables,
        plots,
    })
}

/// Runs every configured model, at most `concurrency` at a time on the
/// blocking pool. A failing model becomes a failed section.
#[tracing::instrument(skip_all, fields(models = config.models.len(), concurrency = concurrency))]
async fn run_models(
    config: &PipelineConfig,
    daily: Vec<DailyRecord>,
    concurrency: usize,
    use_cache: bool,
) -> Vec<ModelSection> {
    let ctx = Arc::new(ModelContext {
        daily,
        out_dir: config.output_dir(),
        cache: ModelCache::from_env(&config.cache_dir()),
        use_cache,
        plots: config.output.plots,
        gzip: config.output.gzip,
    });
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));

    let mut tasks = vec![];
    for entry in &config.models {
        let sem = semaphore.clone();
        let ctx = ctx.clone();
        let entry = entry.clone();
        let span = tracing::info_span!("model", name = %entry.name);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                let span = tracing::Span::current();
                tokio::task::spawn_blocking(move || {
                    let _enter = span.enter();
                    process_model(&entry, &ctx)
                })
                .await?
            }
            .instrument(span),
        );
        tasks.push(task);
    }

    let mut sections = Vec::with_capacity(tasks.len());
    for (entry, task) in config.models.iter().zip(tasks) {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };
        let outcome = match result {
            Ok(r) => {
                info!(model = %entry.name, cached = r.cached, "Model done");
                ModelOutcome::Fitted {
                    model: Box::new(r.model),
                    cached: r.cached,
                    means: r.means,
                    plots: r.plots,
                }
            }
            Err(e) => {
                error!(model = %entry.name, error = %format!("{:#}", e), "Model failed");
                ModelOutcome::Failed(format!("{:#}", e))
            }
        };
        sections.push(ModelSection {
            name: entry.name.clone(),
            formula: entry.formula.clone(),
            kind: entry.kind,
            outcome,
        });
    }
    sections
}

/// The whole pipeline. Appends a row to `runs.csv` whether or not the run
/// succeeds.
#[tracing::instrument(skip_all, fields(config = %label))]
pub async fn run(config: &PipelineConfig, label: &str, opts: &RunOptions) -> Result<RunOutcome> {
    let out = config.output_dir();
    std::fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;
    let runs_csv = out.join(&config.output.runs_csv);

    let mut stats = RunStats::new(label);
    let prepared = match prepare(config, &mut stats).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Preparation failed");
            let failed = RunStats::from_error(label, "prepare_error", &format!("{:#}", e));
            if let Err(write_err) = append_record(&runs_csv, &failed) {
                warn!(error = %write_err, path = %runs_csv.display(), "Run stats not recorded");
            }
            return Err(e);
        }
    };

    let site_summaries = report::site_summaries(&prepared.daily);
    let models = run_models(config, prepared.daily, opts.concurrency, opts.use_cache).await;
    for section in &models {
        match &section.outcome {
            ModelOutcome::Fitted { cached: true, .. } => stats.models_cached += 1,
            ModelOutcome::Fitted { .. } => stats.models_fitted += 1,
            ModelOutcome::Failed(_) => stats.models_failed += 1,
        }
    }

    let text = report::render(&Report {
        title: "Water quality trends",
        stats: &stats,
        sites: &site_summaries,
        corrections: &prepared.corrections,
        models: &models,
    });
    let report_path = out.join("report.md");
    std::fs::write(&report_path, text)
        .with_context(|| format!("writing {}", report_path.display()))?;
    append_record(&runs_csv, &stats)?;

    info!(
        fitted = stats.models_fitted,
        cached = stats.models_cached,
        failed = stats.models_failed,
        report = %report_path.display(),
        "Run complete"
    );
    Ok(RunOutcome {
        stats,
        models,
        report_path,
    })
}

/// Reads any exported CSV (plain or `.gz`) as formula rows.
pub fn load_observations(path: &Path) -> Result<Vec<HashMap<String, Option<Cell>>>> {
    let raw: Vec<HashMap<String, String>> = read_table(path)?;
    Ok(raw
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(k, v)| {
                    let cell = parse_cell(&v);
                    (k, cell)
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FitOptions, ModelKind};
    use chrono::NaiveDate;
    use std::fs;

    fn daily_rows() -> Vec<DailyRecord> {
        let mut rows = Vec::new();
        for (s, site) in ["A", "B"].iter().enumerate() {
            for d in 0..40 {
                let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap() + chrono::Days::new(d);
                let mut r = DailyRecord::new(site, date);
                r.time = d as f64;
                r.do_mg_l = Some(6.0 + 2.0 * s as f64 + 0.01 * d as f64 + ((d % 5) as f64 - 2.0) * 0.1);
                rows.push(r);
            }
        }
        rows
    }

    fn context(name: &str, daily: Vec<DailyRecord>) -> ModelContext {
        let out_dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&out_dir);
        ModelContext {
            daily,
            cache: ModelCache::new(out_dir.join("cache")),
            out_dir,
            use_cache: true,
            plots: false,
            gzip: false,
        }
    }

    fn model_entry(name: &str, formula: &str) -> ModelConfig {
        ModelConfig {
            name: name.into(),
            formula: formula.into(),
            kind: ModelKind::Gls,
            options: FitOptions::default(),
            sites: vec![],
            means: vec!["site".into()],
            trend: None,
        }
    }

    #[test]
    fn test_process_model_writes_outputs_and_caches() {
        let ctx = context("wq_trends_test_process_model", daily_rows());
        let entry = model_entry("do_site", "do_mg_l ~ site + time");

        let first = process_model(&entry, &ctx).unwrap();
        assert!(!first.cached);
        assert_eq!(first.means.len(), 1);
        assert_eq!(first.means[0].means.len(), 2);
        let diff = first.means[0].means[1].estimate - first.means[0].means[0].estimate;
        assert!((diff - 2.0).abs() < 0.1);
        assert!(ctx.out_dir.join("models/do_site.json").exists());
        assert!(ctx.out_dir.join("means/do_site_site_contrasts.csv").exists());

        let second = process_model(&entry, &ctx).unwrap();
        assert!(second.cached);
        assert_eq!(second.model.beta, first.model.beta);

        fs::remove_dir_all(&ctx.out_dir).unwrap();
    }

    #[test]
    fn test_process_model_site_subset() {
        let ctx = context("wq_trends_test_process_subset", daily_rows());
        let mut only_a = model_entry("only_a", "do_mg_l ~ time");
        only_a.means.clear();
        only_a.sites = vec!["A".into()];
        let r = process_model(&only_a, &ctx).unwrap();
        assert_eq!(r.model.n, 40);

        let mut nowhere = only_a.clone();
        nowhere.sites = vec!["Z".into()];
        let err = process_model(&nowhere, &ctx).unwrap_err();
        assert!(err.to_string().contains("no daily rows"));

        let _ = fs::remove_dir_all(&ctx.out_dir);
    }

    #[test]
    fn test_load_observations_reads_daily_export() {
        let path = std::env::temp_dir().join("wq_trends_test_observations.csv");
        let written = write_table(&path, &daily_rows(), true).unwrap();
        let rows = load_observations(&written).unwrap();

        assert_eq!(rows.len(), 80);
        assert_eq!(rows[0].get("site"), Some(&Some(Cell::Level("A".into()))));
        assert_eq!(rows[0].get("flow_index"), Some(&None));
        assert!(matches!(rows[0].get("do_mg_l"), Some(Some(Cell::Num(_)))));
        fs::remove_file(&written).unwrap();
    }
}
