//! Markdown run report: data summary, cleaning outcomes, model tables,
//! marginal means and links to the charts.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

use crate::cleaning::CorrectionOutcome;
use crate::means::{Contrast, MarginalMean};
use crate::model::DailyRecord;
use crate::models::{FittedModel, ModelKind};
use crate::stats::RunStats;
use crate::utility::{mean, stddev};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSummary {
    pub site: String,
    pub days: usize,
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub do_mean: Option<f64>,
    pub do_sd: Option<f64>,
    pub chloride_mean: Option<f64>,
    pub days_do_below: usize,
    pub days_chloride_chronic: usize,
}

/// Per-site summary of the daily table.
pub fn site_summaries(rows: &[DailyRecord]) -> Vec<SiteSummary> {
    let mut by_site: BTreeMap<&str, Vec<&DailyRecord>> = BTreeMap::new();
    for row in rows {
        by_site.entry(row.site.as_str()).or_default().push(row);
    }

    by_site
        .into_iter()
        .filter_map(|(site, rows)| {
            let first = rows.iter().map(|r| r.date).min()?;
            let last = rows.iter().map(|r| r.date).max()?;
            let dos: Vec<f64> = rows.iter().filter_map(|r| r.do_mg_l).collect();
            let cls: Vec<f64> = rows.iter().filter_map(|r| r.chloride_mg_l).collect();
            let do_mean = (!dos.is_empty()).then(|| mean(&dos));
            Some(SiteSummary {
                site: site.to_string(),
                days: rows.len(),
                first,
                last,
                do_mean,
                do_sd: do_mean.filter(|_| dos.len() > 1).map(|m| stddev(&dos, m)),
                chloride_mean: (!cls.is_empty()).then(|| mean(&cls)),
                days_do_below: rows.iter().filter(|r| r.do_below_threshold == Some(true)).count(),
                days_chloride_chronic: rows
                    .iter()
                    .filter(|r| r.chloride_chronic == Some(true))
                    .count(),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct MeansTable {
    pub factor: String,
    pub means: Vec<MarginalMean>,
    pub contrasts: Vec<Contrast>,
}

#[derive(Debug, Clone)]
pub enum ModelOutcome {
    Fitted {
        model: Box<FittedModel>,
        cached: bool,
        means: Vec<MeansTable>,
        plots: Vec<PathBuf>,
    },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ModelSection {
    pub name: String,
    pub formula: String,
    pub kind: ModelKind,
    pub outcome: ModelOutcome,
}

pub struct Report<'a> {
    pub title: &'a str,
    pub stats: &'a RunStats,
    pub sites: &'a [SiteSummary],
    pub corrections: &'a [CorrectionOutcome],
    pub models: &'a [ModelSection],
}

fn num(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else if v != 0.0 && (v.abs() < 1e-3 || v.abs() >= 1e5) {
        format!("{:.3e}", v)
    } else {
        format!("{:.4}", v)
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(num).unwrap_or_else(|| "NA".to_string())
}

fn p_value(p: f64) -> String {
    if p < 1e-4 { "<0.0001".to_string() } else { format!("{:.4}", p) }
}

fn stars(p: f64) -> &'static str {
    match p {
        p if p < 0.001 => "***",
        p if p < 0.01 => "**",
        p if p < 0.05 => "*",
        p if p < 0.1 => ".",
        _ => "",
    }
}

fn model_tables(out: &mut String, model: &FittedModel) -> std::fmt::Result {
    writeln!(
        out,
        "n = {} ({} dropped), residual df = {}, sigma = {}",
        model.n,
        model.n_dropped,
        num(model.df_residual),
        num(model.sigma)
    )?;
    if let Some(phi) = model.phi {
        writeln!(out, "AR(1) phi = {}", num(phi))?;
    }
    if let (Some(ll), Some(aic), Some(bic)) = (model.log_likelihood, model.aic, model.bic) {
        writeln!(out, "logLik = {}, AIC = {}, BIC = {}", num(ll), num(aic), num(bic))?;
    }
    if let Some(reml) = model.reml_score {
        writeln!(out, "REML = {}", num(reml))?;
    }
    writeln!(
        out,
        "adj. R² = {}, deviance explained = {:.1}%, lag-1 ACF of normalized residuals = {}\n",
        num(model.r_squared_adj),
        model.deviance_explained * 100.0,
        num(model.residual_acf1)
    )?;

    writeln!(out, "| term | estimate | SE | t | p | |")?;
    writeln!(out, "|---|---:|---:|---:|---:|---|")?;
    for c in &model.coefficients {
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            c.term,
            num(c.estimate),
            num(c.std_error),
            num(c.t_value),
            p_value(c.p_value),
            stars(c.p_value)
        )?;
    }
    writeln!(out)?;

    if !model.terms.is_empty() {
        writeln!(out, "| term | df | F | p |")?;
        writeln!(out, "|---|---:|---:|---:|")?;
        for t in &model.terms {
            writeln!(
                out,
                "| {} | {} | {} | {} |",
                t.term,
                num(t.df),
                num(t.f_value),
                p_value(t.p_value)
            )?;
        }
        writeln!(out)?;
    }

    if !model.smooths.is_empty() {
        writeln!(out, "| smooth | edf | ref. df | F | p |")?;
        writeln!(out, "|---|---:|---:|---:|---:|")?;
        for s in &model.smooths {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                s.term,
                num(s.edf),
                num(s.ref_df),
                num(s.f_value),
                p_value(s.p_value)
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn means_tables(out: &mut String, table: &MeansTable) -> std::fmt::Result {
    writeln!(out, "#### Marginal means by {}\n", table.factor)?;
    let back = table.means.iter().any(|m| m.response.is_some());
    if back {
        writeln!(out, "| level | estimate | SE | 95% CI | response | response CI |")?;
        writeln!(out, "|---|---:|---:|---|---:|---|")?;
    } else {
        writeln!(out, "| level | estimate | SE | 95% CI |")?;
        writeln!(out, "|---|---:|---:|---|")?;
    }
    for m in &table.means {
        write!(
            out,
            "| {} | {} | {} | {} to {} |",
            m.level,
            num(m.estimate),
            num(m.std_error),
            num(m.lower),
            num(m.upper)
        )?;
        if back {
            write!(
                out,
                " {} | {} to {} |",
                opt(m.response),
                opt(m.response_lower),
                opt(m.response_upper)
            )?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;

    if !table.contrasts.is_empty() {
        writeln!(out, "| contrast | estimate | SE | t | p (Bonferroni) |")?;
        writeln!(out, "|---|---:|---:|---:|---:|")?;
        for c in &table.contrasts {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                c.contrast,
                num(c.estimate),
                num(c.std_error),
                num(c.t_value),
                p_value(c.p_value)
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_section(out: &mut String, section: &ModelSection) -> std::fmt::Result {
    writeln!(out, "### {}\n", section.name)?;
    writeln!(out, "`{}` ({:?})\n", section.formula, section.kind)?;
    match &section.outcome {
        ModelOutcome::Failed(message) => {
            writeln!(out, "**Fit failed:** {}\n", message)?;
        }
        ModelOutcome::Fitted {
            model,
            cached,
            means,
            plots,
        } => {
            if *cached {
                writeln!(out, "_Loaded from cache._\n")?;
            }
            model_tables(out, model)?;
            for table in means {
                means_tables(out, table)?;
            }
            for plot in plots {
                let name = plot
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                writeln!(out, "![{}](plots/{})\n", name, name)?;
            }
        }
    }
    Ok(())
}

fn write_report(out: &mut String, report: &Report) -> std::fmt::Result {
    let s = report.stats;
    writeln!(out, "# {}\n", report.title)?;
    writeln!(out, "Generated {}\n", s.timestamp.format("%Y-%m-%d %H:%M UTC"))?;

    writeln!(out, "## Data\n")?;
    writeln!(
        out,
        "{} instrument readings, {} weather days, {} sites in the reference table.\n",
        s.raw_readings, s.weather_days, s.sites
    )?;
    writeln!(
        out,
        "| site | days | from | to | mean DO | SD DO | mean chloride | days DO below threshold | days chloride > chronic |"
    )?;
    writeln!(out, "|---|---:|---|---|---:|---:|---:|---:|---:|")?;
    for site in report.sites {
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            site.site,
            site.days,
            site.first,
            site.last,
            opt(site.do_mean),
            opt(site.do_sd),
            opt(site.chloride_mean),
            site.days_do_below,
            site.days_chloride_chronic
        )?;
    }
    writeln!(out)?;

    writeln!(out, "## Cleaning\n")?;
    writeln!(
        out,
        "- out-of-range values removed: {}\n- dewatered readings: {}\n- duplicate readings removed: {}\n- days dropped for too few readings: {}\n- days with chloride estimated from conductance: {}\n- QC touched {:.1}% of readings\n",
        s.out_of_range,
        s.dewatered_readings,
        s.duplicates_removed,
        s.days_below_min_readings,
        s.chloride_estimated,
        s.qc_pct()
    )?;
    if !report.corrections.is_empty() {
        writeln!(out, "| # | stage | site | from | to | action | matched | changed | dropped | note |")?;
        writeln!(out, "|---:|---|---|---|---|---|---:|---:|---:|---|")?;
        for c in report.corrections {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                c.index,
                c.stage,
                c.site,
                c.start,
                c.end,
                c.action,
                c.rows_matched,
                c.values_changed,
                c.rows_dropped,
                c.note
            )?;
        }
        writeln!(out)?;
    }

    writeln!(out, "## Models\n")?;
    for section in report.models {
        write_section(out, section)?;
    }
    Ok(())
}

/// Renders the report as Markdown.
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_report(&mut out, report);
    out
}

/// One model's section on its own, as printed by `fit`.
pub fn render_section(section: &ModelSection) -> String {
    let mut out = String::new();
    let _ = write_section(&mut out, section);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(site: &str, d: u32, do_mg_l: Option<f64>) -> DailyRecord {
        let mut r = DailyRecord::new(site, NaiveDate::from_ymd_opt(2022, 8, d).unwrap());
        r.do_mg_l = do_mg_l;
        r.do_below_threshold = do_mg_l.map(|v| v < 5.0);
        r
    }

    #[test]
    fn test_site_summaries() {
        let rows = vec![
            day("B", 2, Some(6.0)),
            day("A", 1, Some(4.0)),
            day("A", 3, Some(8.0)),
            day("A", 2, None),
        ];
        let s = site_summaries(&rows);
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].site, "A");
        assert_eq!(s[0].days, 3);
        assert_eq!(s[0].first.to_string(), "2022-08-01");
        assert_eq!(s[0].do_mean, Some(6.0));
        assert!((s[0].do_sd.unwrap() - 8f64.sqrt()).abs() < 1e-12);
        assert_eq!(s[0].days_do_below, 1);
        assert_eq!(s[1].do_sd, None);
        assert_eq!(s[1].chloride_mean, None);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(num(1.5), "1.5000");
        assert_eq!(num(0.0), "0.0000");
        assert_eq!(num(f64::NAN), "NA");
        assert_eq!(num(123456.0), "1.235e5");
        assert_eq!(p_value(1e-9), "<0.0001");
        assert_eq!(stars(0.02), "*");
    }

    #[test]
    fn test_render_includes_failures_and_corrections() {
        let stats = RunStats::new("cfg.json");
        let corrections = vec![CorrectionOutcome {
            index: 1,
            site: "A".into(),
            action: "drop_rows".into(),
            rows_dropped: 4,
            ..Default::default()
        }];
        let models = vec![ModelSection {
            name: "broken".into(),
            formula: "y ~ x".into(),
            kind: ModelKind::Gls,
            outcome: ModelOutcome::Failed("unknown column \"x\"".into()),
        }];
        let text = render(&Report {
            title: "Water quality",
            stats: &stats,
            sites: &site_summaries(&[day("A", 1, Some(7.0))]),
            corrections: &corrections,
            models: &models,
        });

        assert!(text.starts_with("# Water quality"));
        assert!(text.contains("| 1 |  | A |"));
        assert!(text.contains("drop_rows"));
        assert!(text.contains("### broken"));
        assert!(text.contains("**Fit failed:** unknown column"));
    }
}
