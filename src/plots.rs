//! PNG charts of marginal means and trend curves.
//!
//! Charts are drawn with [`plotters`] on a 1200x800 bitmap. Log-scale
//! responses are drawn back-transformed.

use anyhow::{Result, anyhow, bail};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::means::{MarginalMean, TrendPoint};

const SIZE: (u32, u32) = (1200, 800);

/// Value range padded by 5% on each side, widened when degenerate.
fn padded_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        return None;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { lo.abs().max(1.0) * 0.1 };
    Some((lo - pad, hi + pad))
}

/// `(estimate, lower, upper)` on the scale the chart shows.
fn display_interval(m: &MarginalMean) -> (f64, f64, f64) {
    match (m.response, m.response_lower, m.response_upper) {
        (Some(e), Some(l), Some(u)) => (e, l, u),
        _ => (m.estimate, m.lower, m.upper),
    }
}

/// Marginal means with 95% interval bars, one column per level.
pub fn means_chart(means: &[MarginalMean], title: &str, y_label: &str, path: &Path) -> Result<()> {
    if means.is_empty() {
        bail!("no marginal means to plot");
    }
    let points: Vec<(f64, f64, f64)> = means.iter().map(display_interval).collect();
    let Some((y_lo, y_hi)) = padded_range(points.iter().flat_map(|(e, l, u)| [*e, *l, *u]))
    else {
        bail!("marginal means are not finite");
    };
    let labels: Vec<String> = means.iter().map(|m| m.level.clone()).collect();

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("drawing area: {}", e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 36))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(85)
        .build_cartesian_2d(-0.5..(labels.len() as f64 - 0.5), y_lo..y_hi)
        .map_err(|e| anyhow!("chart setup: {}", e))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&|x| {
            let idx = x.round();
            if (x - idx).abs() < 1e-6 && idx >= 0.0 {
                labels.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .x_desc(means[0].factor.as_str())
        .y_desc(y_label)
        .label_style(("sans-serif", 22))
        .draw()
        .map_err(|e| anyhow!("mesh: {}", e))?;

    chart
        .draw_series(points.iter().enumerate().map(|(i, (_, lo, hi))| {
            PathElement::new(vec![(i as f64, *lo), (i as f64, *hi)], BLACK.stroke_width(2))
        }))
        .map_err(|e| anyhow!("interval bars: {}", e))?;
    chart
        .draw_series(
            points
                .iter()
                .enumerate()
                .map(|(i, (est, _, _))| Circle::new((i as f64, *est), 6, BLUE.filled())),
        )
        .map_err(|e| anyhow!("points: {}", e))?;

    root.present().map_err(|e| anyhow!("saving {}: {}", path.display(), e))?;
    debug!(path = %path.display(), levels = means.len(), "Means chart written");
    Ok(())
}

/// One line per group, with thin lines marking the 95% interval.
pub fn trend_chart(
    curve: &[TrendPoint],
    log_response: bool,
    title: &str,
    x_label: &str,
    y_label: &str,
    path: &Path,
) -> Result<()> {
    let scale = |v: f64| if log_response { v.exp() } else { v };
    let mut groups: BTreeMap<&str, Vec<(f64, f64, f64, f64)>> = BTreeMap::new();
    for p in curve {
        groups.entry(p.group.as_str()).or_default().push((
            p.x,
            scale(p.estimate),
            scale(p.lower),
            scale(p.upper),
        ));
    }
    let Some((x_lo, x_hi)) = padded_range(curve.iter().map(|p| p.x)) else {
        bail!("no trend points to plot");
    };
    let Some((y_lo, y_hi)) = padded_range(
        groups
            .values()
            .flatten()
            .flat_map(|(_, e, l, u)| [*e, *l, *u]),
    ) else {
        bail!("trend predictions are not finite");
    };

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("drawing area: {}", e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 36))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(85)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(|e| anyhow!("chart setup: {}", e))?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(("sans-serif", 22))
        .draw()
        .map_err(|e| anyhow!("mesh: {}", e))?;

    for (i, (group, pts)) in groups.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(
                pts.iter().map(|(x, e, _, _)| (*x, *e)),
                color.stroke_width(3),
            ))
            .map_err(|e| anyhow!("line {}: {}", group, e))?
            .label(*group)
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3))
            });
        for bound in [2usize, 3] {
            chart
                .draw_series(LineSeries::new(
                    pts.iter().map(move |p| (p.0, if bound == 2 { p.2 } else { p.3 })),
                    color.mix(0.4),
                ))
                .map_err(|e| anyhow!("interval {}: {}", group, e))?;
        }
    }

    if groups.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", 22))
            .draw()
            .map_err(|e| anyhow!("legend: {}", e))?;
    }

    root.present().map_err(|e| anyhow!("saving {}: {}", path.display(), e))?;
    debug!(path = %path.display(), groups = groups.len(), "Trend chart written");
    Ok(())
}
