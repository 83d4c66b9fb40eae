//! Additive mixed models: penalized regression splines and random-effect
//! smooths with optional AR(1) errors, smoothing parameters by REML.

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use super::design::DesignSpec;
use super::fit::{self, Criterion, ScaledPenalty, Whitened};
use super::formula::Formula;
use super::frame::Observation;
use super::gls::{goodness_of_fit, parametric_tests};
use super::types::{
    FitOptions, FittedModel, ModelKind, SmoothSummary, coefficient_table, wald_block,
};

const PHI_BOUND: f64 = 0.95;
const RHO_BOUND: f64 = 12.0;
const SWEEPS: usize = 4;

/// Fits `formula` as an additive model. Log smoothing parameters and the
/// AR(1) coefficient are chosen by coordinate-wise golden-section search
/// on the REML criterion.
#[tracing::instrument(skip_all, fields(formula = %formula))]
pub fn fit_gam<O: Observation>(
    formula: &Formula,
    rows: &[O],
    opts: &FitOptions,
) -> Result<FittedModel> {
    let (design, frame) = DesignSpec::build(formula, rows, &opts.frame_options())?;
    let (n, p) = (frame.n(), frame.p());
    if n <= p {
        bail!("{} observations are not enough for {} coefficients", n, p);
    }
    let penalties = ScaledPenalty::from_frame(&frame);
    let m = penalties.len();

    let mut rho = vec![0.0; m];
    let mut phi = 0.0;
    let mut best = fit::score_of(&frame, phi, &penalties, &rho, Criterion::Reml);
    if !best.is_finite() {
        bail!("{} cannot be fitted: penalized system is singular", formula);
    }

    for sweep in 0..SWEEPS {
        let previous = best;
        let w = Whitened::new(&frame, phi);
        for j in 0..m {
            let (r, score) = fit::golden_section(
                |r| {
                    let mut trial = rho.clone();
                    trial[j] = r;
                    fit::solve(&w, &penalties, &trial, Criterion::Reml)
                        .map(|s| s.score)
                        .unwrap_or(f64::INFINITY)
                },
                -RHO_BOUND,
                RHO_BOUND,
                1e-3,
            );
            if score < best {
                rho[j] = r;
                best = score;
            }
        }
        if opts.ar1 {
            let (candidate, score) = fit::golden_section(
                |phi| fit::score_of(&frame, phi, &penalties, &rho, Criterion::Reml),
                -PHI_BOUND,
                PHI_BOUND,
                1e-4,
            );
            if score < best {
                phi = candidate;
                best = score;
            }
        }
        debug!(sweep, score = best, phi, ?rho, "REML sweep");
        if (previous - best).abs() < 1e-6 {
            break;
        }
    }

    let w = Whitened::new(&frame, phi);
    let sol = fit::solve(&w, &penalties, &rho, Criterion::Reml)
        .context("penalized normal equations are not positive definite")?;
    let covariance = sol.chol.inverse() * sol.sigma2;
    let sigma = sol.sigma2.sqrt();

    let influence = fit::influence_diagonal(&w, &sol.chol);
    let edf_total: f64 = influence.sum();
    let df_residual = n as f64 - edf_total;

    let mut smooths = Vec::new();
    for (pen, r) in penalties.iter().zip(&rho) {
        let edf: f64 = influence.rows(pen.start, pen.size).sum();
        let rank = (edf.round() as usize).clamp(1, pen.size);
        let (f_value, p_value) =
            wald_block(&sol.beta, &covariance, pen.start, pen.size, rank, df_residual)
                .with_context(|| format!("testing {}", pen.label))?;
        smooths.push(SmoothSummary {
            term: pen.label.clone(),
            edf,
            ref_df: rank as f64,
            f_value,
            p_value,
            lambda: r.exp(),
        });
    }

    let parametric: Vec<usize> = design
        .blocks
        .iter()
        .zip(design.block_ranges())
        .filter(|(b, _)| !b.is_smooth())
        .flat_map(|(_, (start, size))| start..start + size)
        .collect();
    let coefficients = coefficient_table(
        &design.column_names,
        &sol.beta,
        &covariance,
        &parametric,
        df_residual,
    );
    let terms = parametric_tests(&design, &sol.beta, &covariance, df_residual)?;

    let normalized: Vec<f64> = (&w.y - &w.x * &sol.beta)
        .iter()
        .map(|r| r / sigma)
        .collect();
    let residual_acf1 = fit::lag1_autocorrelation(&normalized, &frame.group_sizes);
    let (r_squared_adj, deviance_explained) = goodness_of_fit(&frame, &sol.beta, edf_total);

    info!(
        n,
        p,
        edf = edf_total,
        phi,
        reml = sol.score,
        smooths = m,
        "GAM fitted"
    );

    Ok(FittedModel {
        kind: ModelKind::Gam,
        formula: formula.to_string(),
        options: opts.clone(),
        design,
        beta: sol.beta,
        covariance,
        coefficients,
        terms,
        smooths,
        n,
        n_dropped: frame.n_dropped,
        df_residual,
        sigma,
        phi: opts.ar1.then_some(phi),
        log_likelihood: None,
        aic: None,
        bic: None,
        reml_score: Some(sol.score),
        r_squared_adj,
        deviance_explained,
        residual_acf1,
    })
}
