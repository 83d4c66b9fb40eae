//! Generalized least squares with optional AR(1) errors.

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use super::design::{Block, DesignSpec, ModelFrame};
use super::fit::{self, Criterion, Whitened};
use super::formula::Formula;
use super::frame::Observation;
use super::types::{
    FitOptions, FittedModel, Method, ModelKind, TermTest, coefficient_table, wald_block,
};

const PHI_BOUND: f64 = 0.99;

fn criterion(method: Method) -> Criterion {
    match method {
        Method::Reml => Criterion::Reml,
        Method::Ml => Criterion::Ml,
    }
}

/// Fails when the design columns are (numerically) linearly dependent.
pub(crate) fn check_rank(frame: &ModelFrame, names: &[String]) -> Result<()> {
    let svd = frame.x.clone().svd(false, false);
    let values = svd.singular_values;
    let max = values.iter().copied().fold(0.0, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if max == 0.0 || min / max < 1e-10 {
        bail!(
            "design is rank deficient ({} columns: {})",
            names.len(),
            names.join(", ")
        );
    }
    Ok(())
}

/// Wald F test for every parametric term except the intercept.
pub(crate) fn parametric_tests(
    design: &DesignSpec,
    beta: &nalgebra::DVector<f64>,
    cov: &nalgebra::DMatrix<f64>,
    df_residual: f64,
) -> Result<Vec<TermTest>> {
    let mut tests = Vec::new();
    for (block, (start, size)) in design.blocks.iter().zip(design.block_ranges()) {
        if matches!(block, Block::Intercept) || block.is_smooth() {
            continue;
        }
        let (f_value, p_value) = wald_block(beta, cov, start, size, size, df_residual)
            .with_context(|| format!("testing {}", block.label()))?;
        tests.push(TermTest {
            term: block.label(),
            df: size as f64,
            df_residual,
            f_value,
            p_value,
        });
    }
    Ok(tests)
}

/// Adjusted R squared and deviance explained on the raw scale.
pub(crate) fn goodness_of_fit(frame: &ModelFrame, beta: &nalgebra::DVector<f64>, edf: f64) -> (f64, f64) {
    let n = frame.n() as f64;
    let resid = &frame.y - &frame.x * beta;
    let rss = resid.norm_squared();
    let mean = frame.y.mean();
    let tss: f64 = frame.y.iter().map(|v| (v - mean).powi(2)).sum();
    if tss == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let r2_adj = 1.0 - (rss / (n - edf)) / (tss / (n - 1.0));
    (r2_adj, 1.0 - rss / tss)
}

/// Fits `formula` by GLS. With `opts.ar1` the AR(1) coefficient is profiled
/// over `(-0.99, 0.99)` by golden-section search on the likelihood.
#[tracing::instrument(skip_all, fields(formula = %formula))]
pub fn fit_gls<O: Observation>(
    formula: &Formula,
    rows: &[O],
    opts: &FitOptions,
) -> Result<FittedModel> {
    if formula.has_smooths() {
        bail!("{} has smooth terms; fit it as a GAM", formula);
    }
    let (design, frame) = DesignSpec::build(formula, rows, &opts.frame_options())?;
    let (n, p) = (frame.n(), frame.p());
    if n <= p {
        bail!("{} observations are not enough for {} coefficients", n, p);
    }
    check_rank(&frame, &design.column_names)?;

    let crit = criterion(opts.method);
    let phi = if opts.ar1 {
        let (phi, score) = fit::golden_section(
            |phi| fit::score_of(&frame, phi, &[], &[], crit),
            -PHI_BOUND,
            PHI_BOUND,
            1e-5,
        );
        debug!(phi, score, "AR(1) coefficient profiled");
        phi
    } else {
        0.0
    };

    let w = Whitened::new(&frame, phi);
    let sol = fit::solve(&w, &[], &[], crit)
        .context("normal equations are not positive definite")?;

    let df_residual = (n - p) as f64;
    let covariance = sol.chol.inverse() * sol.sigma2;
    let sigma = sol.sigma2.sqrt();
    let log_likelihood = -sol.score;

    let n_params = p + 1 + usize::from(opts.ar1);
    let n_eff = match opts.method {
        Method::Reml => n - p,
        Method::Ml => n,
    } as f64;
    let aic = -2.0 * log_likelihood + 2.0 * n_params as f64;
    let bic = -2.0 * log_likelihood + n_params as f64 * n_eff.ln();

    let normalized: Vec<f64> = (&w.y - &w.x * &sol.beta)
        .iter()
        .map(|r| r / sigma)
        .collect();
    let residual_acf1 = fit::lag1_autocorrelation(&normalized, &frame.group_sizes);

    let all: Vec<usize> = (0..p).collect();
    let coefficients =
        coefficient_table(&design.column_names, &sol.beta, &covariance, &all, df_residual);
    let terms = parametric_tests(&design, &sol.beta, &covariance, df_residual)?;
    let (r_squared_adj, deviance_explained) = goodness_of_fit(&frame, &sol.beta, p as f64);

    info!(
        n,
        p,
        phi,
        sigma,
        log_likelihood,
        "GLS fitted"
    );

    Ok(FittedModel {
        kind: ModelKind::Gls,
        formula: formula.to_string(),
        options: opts.clone(),
        design,
        beta: sol.beta,
        covariance,
        coefficients,
        terms,
        smooths: Vec::new(),
        n,
        n_dropped: frame.n_dropped,
        df_residual,
        sigma,
        phi: opts.ar1.then_some(phi),
        log_likelihood: Some(log_likelihood),
        aic: Some(aic),
        bic: Some(bic),
        reml_score: None,
        r_squared_adj,
        deviance_explained,
        residual_acf1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::Cell;
    use std::collections::HashMap;

    /// Deterministic pseudo-random noise in roughly [-0.5, 0.5].
    fn noise(i: usize) -> f64 {
        let v = ((i as f64 + 1.0) * 12.9898).sin() * 43758.5453;
        v - v.floor() - 0.5
    }

    fn row(site: &str, x: f64, y: f64, t: f64) -> HashMap<String, Cell> {
        HashMap::from([
            ("site".to_string(), Cell::Level(site.to_string())),
            ("x".to_string(), Cell::Num(x)),
            ("y".to_string(), Cell::Num(y)),
            ("time".to_string(), Cell::Num(t)),
        ])
    }

    #[test]
    fn test_recovers_linear_coefficients() {
        let rows: Vec<_> = (0..200)
            .map(|i| {
                let x = i as f64 / 20.0;
                let site = if i % 2 == 0 { "A" } else { "B" };
                let shift = if site == "B" { 3.0 } else { 0.0 };
                row(site, x, 1.0 + 2.0 * x + shift + 0.1 * noise(i), i as f64)
            })
            .collect();
        let f = Formula::parse("y ~ x + site").unwrap();
        let m = fit_gls(&f, &rows, &FitOptions::default()).unwrap();

        assert_eq!(m.coefficients.len(), 3);
        assert!((m.coefficients[0].estimate - 1.0).abs() < 0.05);
        assert!((m.coefficients[1].estimate - 2.0).abs() < 0.01);
        assert!((m.coefficients[2].estimate - 3.0).abs() < 0.05);
        assert!(m.coefficients[2].p_value < 1e-10);
        assert_eq!(m.terms.len(), 2);
        assert!(m.terms[1].p_value < 1e-10);
        assert!(m.r_squared_adj > 0.99);
        assert!(m.phi.is_none());
        assert_eq!(m.df_residual, 197.0);
    }

    #[test]
    fn test_ar1_coefficient_recovered() {
        for true_phi in [0.7, -0.5] {
            let mut rows = Vec::new();
            for site in ["A", "B"] {
                let mut e = 0.0;
                for t in 0..300 {
                    let idx = t + if site == "B" { 1000 } else { 0 };
                    e = true_phi * e + noise(idx);
                    rows.push(row(site, t as f64, 5.0 + e, t as f64));
                }
            }
            let f = Formula::parse("y ~ site").unwrap();
            let opts = FitOptions {
                ar1: true,
                ..FitOptions::default()
            };
            let m = fit_gls(&f, &rows, &opts).unwrap();
            let phi = m.phi.unwrap();
            assert_eq!(phi.signum(), true_phi.signum());
            assert!((phi - true_phi).abs() < 0.2, "phi {} vs {}", phi, true_phi);
            assert!(m.residual_acf1.abs() < 0.2);
        }
    }

    #[test]
    fn test_ml_and_reml_differ_in_sigma() {
        let rows: Vec<_> = (0..30)
            .map(|i| row("A", i as f64, i as f64 + noise(i), i as f64))
            .collect();
        let f = Formula::parse("y ~ x").unwrap();
        let reml = fit_gls(&f, &rows, &FitOptions::default()).unwrap();
        let ml = fit_gls(
            &f,
            &rows,
            &FitOptions {
                method: Method::Ml,
                ..FitOptions::default()
            },
        )
        .unwrap();
        assert!(ml.sigma < reml.sigma);
        assert!((ml.beta[1] - reml.beta[1]).abs() < 1e-10);
        assert!(ml.aic.unwrap().is_finite());
    }

    #[test]
    fn test_rejects_smooths_and_collinear_designs() {
        let rows: Vec<_> = (0..30)
            .map(|i| {
                let mut r = row("A", i as f64, i as f64 + noise(i), i as f64);
                r.insert("x2".into(), Cell::Num(2.0 * i as f64));
                r
            })
            .collect();
        let f = Formula::parse("y ~ s(x)").unwrap();
        assert!(fit_gls(&f, &rows, &FitOptions::default()).is_err());

        let f = Formula::parse("y ~ x + x2").unwrap();
        let err = fit_gls(&f, &rows, &FitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("rank deficient"));
    }
}
