//! Estimated marginal means, pairwise contrasts and trend curves from a
//! fitted model's reference grid.

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::HashMap;

use crate::models::design::{Block, Part};
use crate::models::formula::Transform;
use crate::models::frame::Cell;
use crate::models::types::{FittedModel, t_p_value, t_quantile};

pub const DEFAULT_LEVEL: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginalMean {
    pub factor: String,
    pub level: String,
    pub estimate: f64,
    pub std_error: f64,
    pub df: f64,
    pub lower: f64,
    pub upper: f64,
    /// Back-transformed estimate and interval for log-scale responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_upper: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contrast {
    pub contrast: String,
    pub estimate: f64,
    pub std_error: f64,
    pub df: f64,
    pub t_value: f64,
    /// Bonferroni-adjusted over all pairs.
    pub p_value: f64,
    /// `exp(estimate)` for log-scale responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub group: String,
    pub x: f64,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Levels of `factor` as the model coded them.
pub fn factor_levels(model: &FittedModel, factor: &str) -> Result<Vec<String>> {
    for block in &model.design.blocks {
        match block {
            Block::Factor { var, levels } if var.name == factor => return Ok(levels.clone()),
            Block::RandomEffect { spec, levels } if spec.var == factor => {
                return Ok(levels.clone());
            }
            Block::Interaction { parts } => {
                for part in parts {
                    if let Part::Factor { var, levels } = part {
                        if var.name == factor {
                            return Ok(levels.clone());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    bail!("{:?} is not a factor in {}", factor, model.formula)
}

fn grid_rows(
    model: &FittedModel,
    factor: &str,
    at: &HashMap<String, Cell>,
) -> Result<Vec<(String, Vec<f64>)>> {
    factor_levels(model, factor)?
        .into_iter()
        .map(|level| {
            let mut fixed = at.clone();
            fixed.insert(factor.to_string(), Cell::Level(level.clone()));
            Ok((level, model.design.grid_row(&fixed)?))
        })
        .collect()
}

/// Marginal mean of each level of `factor`, other factors averaged with
/// equal weights and covariates at their training means.
pub fn marginal_means(model: &FittedModel, factor: &str, level: f64) -> Result<Vec<MarginalMean>> {
    marginal_means_at(model, factor, &HashMap::new(), level)
}

/// Like [`marginal_means`] with some grid variables fixed to given values.
pub fn marginal_means_at(
    model: &FittedModel,
    factor: &str,
    at: &HashMap<String, Cell>,
    level: f64,
) -> Result<Vec<MarginalMean>> {
    let q = t_quantile(level, model.df_residual);
    let log = model.is_log_response();
    Ok(grid_rows(model, factor, at)?
        .into_iter()
        .map(|(name, row)| {
            let pred = model.predict_row(&row);
            let lower = pred.estimate - q * pred.std_error;
            let upper = pred.estimate + q * pred.std_error;
            MarginalMean {
                factor: factor.to_string(),
                level: name,
                estimate: pred.estimate,
                std_error: pred.std_error,
                df: model.df_residual,
                lower,
                upper,
                response: log.then(|| pred.estimate.exp()),
                response_lower: log.then(|| lower.exp()),
                response_upper: log.then(|| upper.exp()),
            }
        })
        .collect())
}

/// Every pairwise difference of marginal means, p-values adjusted by
/// Bonferroni over the number of pairs.
pub fn pairwise_contrasts(model: &FittedModel, factor: &str) -> Result<Vec<Contrast>> {
    let rows = grid_rows(model, factor, &HashMap::new())?;
    let pairs = rows.len() * (rows.len().saturating_sub(1)) / 2;
    let log = model.is_log_response();

    let mut out = Vec::with_capacity(pairs);
    for i in 0..rows.len() {
        for j in (i + 1)..rows.len() {
            let diff: Vec<f64> = rows[i].1.iter().zip(&rows[j].1).map(|(a, b)| a - b).collect();
            let pred = model.predict_row(&diff);
            let t_value = pred.estimate / pred.std_error;
            let p = t_p_value(t_value, model.df_residual);
            out.push(Contrast {
                contrast: format!("{} - {}", rows[i].0, rows[j].0),
                estimate: pred.estimate,
                std_error: pred.std_error,
                df: model.df_residual,
                t_value,
                p_value: (p * pairs as f64).min(1.0),
                ratio: log.then(|| pred.estimate.exp()),
            });
        }
    }
    Ok(out)
}

/// Training range of a covariate on its raw scale.
fn covariate_range(model: &FittedModel, var: &str) -> Result<(f64, f64)> {
    for block in &model.design.blocks {
        match block {
            Block::Numeric { var: v, min, max, .. } if v.name == var => {
                return Ok(match v.transform {
                    Transform::Identity => (*min, *max),
                    Transform::Log => (min.exp(), max.exp()),
                });
            }
            Block::Spline { spec, basis, .. } if spec.var == var => return Ok((basis.lo, basis.hi)),
            _ => {}
        }
    }
    bail!("{:?} is not a main effect or smooth in {}", var, model.formula)
}

/// Predictions over the training range of `var` in `points` steps, one
/// curve per level of `by` (or a single averaged curve).
pub fn trend_curve(
    model: &FittedModel,
    var: &str,
    by: Option<&str>,
    points: usize,
    level: f64,
) -> Result<Vec<TrendPoint>> {
    if points < 2 {
        bail!("a trend curve needs at least two points");
    }
    let (lo, hi) = covariate_range(model, var)?;
    let groups: Vec<Option<String>> = match by {
        Some(factor) => factor_levels(model, factor)?.into_iter().map(Some).collect(),
        None => vec![None],
    };
    let q = t_quantile(level, model.df_residual);

    let mut out = Vec::with_capacity(groups.len() * points);
    for group in groups {
        let mut fixed = HashMap::new();
        if let (Some(factor), Some(g)) = (by, &group) {
            fixed.insert(factor.to_string(), Cell::Level(g.clone()));
        }
        for i in 0..points {
            let x = lo + (hi - lo) * i as f64 / (points - 1) as f64;
            fixed.insert(var.to_string(), Cell::Num(x));
            let pred = model.predict_row(&model.design.grid_row(&fixed)?);
            out.push(TrendPoint {
                group: group.clone().unwrap_or_else(|| "all".to_string()),
                x,
                estimate: pred.estimate,
                lower: pred.estimate - q * pred.std_error,
                upper: pred.estimate + q * pred.std_error,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::formula::Formula;
    use crate::models::gls::fit_gls;
    use crate::models::types::FitOptions;

    fn rows() -> Vec<HashMap<String, Cell>> {
        let mut out = Vec::new();
        for (site, base) in [("A", 2.0), ("B", 4.0), ("C", 7.0)] {
            for i in 0..10 {
                let wiggle = if i % 2 == 0 { 0.5 } else { -0.5 };
                out.push(HashMap::from([
                    ("site".to_string(), Cell::Level(site.to_string())),
                    ("x".to_string(), Cell::Num(i as f64)),
                    ("y".to_string(), Cell::Num(base + wiggle)),
                ]));
            }
        }
        out
    }

    #[test]
    fn test_one_factor_means_are_group_means() {
        let f = Formula::parse("y ~ site").unwrap();
        let m = fit_gls(&f, &rows(), &FitOptions::default()).unwrap();
        let means = marginal_means(&m, "site", DEFAULT_LEVEL).unwrap();

        assert_eq!(means.len(), 3);
        assert_eq!(means[0].level, "A");
        assert!((means[0].estimate - 2.0).abs() < 1e-9);
        assert!((means[1].estimate - 4.0).abs() < 1e-9);
        assert!((means[2].estimate - 7.0).abs() < 1e-9);
        assert!(means[0].lower < 2.0 && means[0].upper > 2.0);
        assert!(means[0].response.is_none());
    }

    #[test]
    fn test_pairwise_contrasts() {
        let f = Formula::parse("y ~ site").unwrap();
        let m = fit_gls(&f, &rows(), &FitOptions::default()).unwrap();
        let c = pairwise_contrasts(&m, "site").unwrap();

        assert_eq!(c.len(), 3);
        assert_eq!(c[0].contrast, "A - B");
        assert!((c[0].estimate + 2.0).abs() < 1e-9);
        assert_eq!(c[2].contrast, "B - C");
        assert!((c[2].estimate + 3.0).abs() < 1e-9);
        assert!(c.iter().all(|x| x.p_value < 0.001 && x.p_value <= 1.0));
    }

    #[test]
    fn test_log_response_back_transforms() {
        let f = Formula::parse("log(y) ~ site").unwrap();
        let m = fit_gls(&f, &rows(), &FitOptions::default()).unwrap();
        let means = marginal_means(&m, "site", DEFAULT_LEVEL).unwrap();
        let r = means[0].response.unwrap();
        assert!((r - means[0].estimate.exp()).abs() < 1e-12);
        assert!(means[0].response_lower.unwrap() < r);
        let c = pairwise_contrasts(&m, "site").unwrap();
        assert!(c[0].ratio.unwrap() < 1.0);
    }

    #[test]
    fn test_trend_curve_per_level() {
        let f = Formula::parse("y ~ site + x").unwrap();
        let m = fit_gls(&f, &rows(), &FitOptions::default()).unwrap();
        let curve = trend_curve(&m, "x", Some("site"), 5, DEFAULT_LEVEL).unwrap();
        assert_eq!(curve.len(), 15);
        assert_eq!(curve[0].x, 0.0);
        assert_eq!(curve[4].x, 9.0);
        assert_eq!(curve[5].group, "B");

        let flat = trend_curve(&m, "x", None, 3, DEFAULT_LEVEL).unwrap();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].group, "all");
    }

    #[test]
    fn test_unknown_factor_or_covariate() {
        let f = Formula::parse("y ~ site + x").unwrap();
        let m = fit_gls(&f, &rows(), &FitOptions::default()).unwrap();
        assert!(marginal_means(&m, "season", DEFAULT_LEVEL).is_err());
        assert!(trend_curve(&m, "site", None, 10, DEFAULT_LEVEL).is_err());
    }
}
