//! Penalized least squares with AR(1) errors, shared by GLS and GAM fits.
//!
//! Errors are whitened within each group with the Prais-Winsten transform,
//! after which the model is an ordinary penalized regression. For a given
//! correlation `phi` and log smoothing parameters `rho` the coefficients
//! have a closed form, and the (restricted) likelihood is profiled over
//! the residual variance. `phi` and `rho` are then chosen numerically.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use super::design::{ModelFrame, Penalty};

const GOLDEN: f64 = 0.618_033_988_749_895;

/// Minimizes `f` over `[lo, hi]`, assuming it is unimodal there.
pub fn golden_section<F: FnMut(f64) -> f64>(mut f: F, lo: f64, hi: f64, tol: f64) -> (f64, f64) {
    let (mut a, mut b) = (lo, hi);
    let mut c = b - GOLDEN * (b - a);
    let mut d = a + GOLDEN * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);

    while (b - a).abs() > tol {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - GOLDEN * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + GOLDEN * (b - a);
            fd = f(d);
        }
    }

    if fc < fd { (c, fc) } else { (d, fd) }
}

/// Applies the AR(1) whitening transform to the rows of `m`, restarting at
/// every group boundary.
pub fn ar1_whiten(m: &DMatrix<f64>, group_sizes: &[usize], phi: f64) -> DMatrix<f64> {
    if phi == 0.0 {
        return m.clone();
    }
    let scale = 1.0 / (1.0 - phi * phi).sqrt();
    let mut out = m.clone();
    let mut start = 0;
    for &size in group_sizes {
        for i in (start + 1)..(start + size) {
            for j in 0..m.ncols() {
                out[(i, j)] = (m[(i, j)] - phi * m[(i - 1, j)]) * scale;
            }
        }
        start += size;
    }
    out
}

/// `-log |det|` of the whitening transform, which turns the likelihood of
/// the whitened data into that of the untransformed data.
fn ar1_log_jacobian(group_sizes: &[usize], phi: f64) -> f64 {
    let links: usize = group_sizes.iter().map(|g| g.saturating_sub(1)).sum();
    0.5 * links as f64 * (1.0 - phi * phi).ln()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Reml,
    Ml,
}

/// Cross products of the whitened data for one value of `phi`.
pub struct Whitened {
    pub phi: f64,
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    pub xtx: DMatrix<f64>,
    pub xty: DVector<f64>,
    jacobian: f64,
}

impl Whitened {
    pub fn new(frame: &ModelFrame, phi: f64) -> Self {
        let x = ar1_whiten(&frame.x, &frame.group_sizes, phi);
        let ym = DMatrix::from_column_slice(frame.n(), 1, frame.y.as_slice());
        let y = ar1_whiten(&ym, &frame.group_sizes, phi).column(0).into_owned();
        let xt = x.transpose();
        let xtx = &xt * &x;
        let xty = &xt * &y;
        Whitened {
            phi,
            x,
            y,
            xtx,
            xty,
            jacobian: ar1_log_jacobian(&frame.group_sizes, phi),
        }
    }
}

/// A penalty embedded at its coefficient block, normalized so that
/// `log lambda = 0` puts it on the scale of the data.
pub struct ScaledPenalty {
    pub label: String,
    pub start: usize,
    pub size: usize,
    pub rank: usize,
    matrix: DMatrix<f64>,
}

impl ScaledPenalty {
    pub fn from_frame(frame: &ModelFrame) -> Vec<ScaledPenalty> {
        frame
            .penalties
            .iter()
            .map(|p: &Penalty| {
                let block = frame.x.columns(p.start, p.size);
                let data_norm = (block.transpose() * block).norm();
                let pen_norm = p.matrix.norm();
                let scale = if pen_norm > 0.0 && data_norm > 0.0 {
                    data_norm / pen_norm
                } else {
                    1.0
                };
                ScaledPenalty {
                    label: p.label.clone(),
                    start: p.start,
                    size: p.size,
                    rank: p.rank,
                    matrix: &p.matrix * scale,
                }
            })
            .collect()
    }
}

/// Solution of the penalized problem at fixed `phi` and `rho`.
pub struct Solution {
    pub beta: DVector<f64>,
    pub chol: Cholesky<f64, Dyn>,
    pub rss: f64,
    pub penalty: f64,
    pub sigma2: f64,
    /// Negative (restricted) log-likelihood, profiled over sigma.
    pub score: f64,
}

/// Solves for the coefficients and scores the fit. `None` when the
/// penalized normal equations are not positive definite.
pub fn solve(
    w: &Whitened,
    penalties: &[ScaledPenalty],
    rho: &[f64],
    criterion: Criterion,
) -> Option<Solution> {
    let n = w.y.len();
    let p = w.xtx.ncols();

    let mut s = DMatrix::zeros(p, p);
    for (pen, &r) in penalties.iter().zip(rho) {
        let lambda = r.exp();
        for i in 0..pen.size {
            for j in 0..pen.size {
                s[(pen.start + i, pen.start + j)] += lambda * pen.matrix[(i, j)];
            }
        }
    }

    let a = &w.xtx + &s;
    let chol = a.cholesky()?;
    let beta = chol.solve(&w.xty);
    let resid = &w.y - &w.x * &beta;
    let rss = resid.norm_squared();
    let penalty = (beta.transpose() * &s * &beta)[(0, 0)];

    let two_pi = 2.0 * std::f64::consts::PI;
    let (sigma2, score) = match criterion {
        Criterion::Ml => {
            let sigma2 = rss / n as f64;
            let score = 0.5 * n as f64 * ((two_pi * sigma2).ln() + 1.0);
            (sigma2, score)
        }
        Criterion::Reml => {
            let null_dim = p - penalties.iter().map(|pen| pen.rank).sum::<usize>();
            let dof = n.checked_sub(null_dim).filter(|&d| d > 0)? as f64;
            let sigma2 = (rss + penalty) / dof;
            let log_det_a = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
            let log_det_s: f64 = penalties
                .iter()
                .zip(rho)
                .map(|(pen, r)| pen.rank as f64 * r)
                .sum();
            let score =
                0.5 * dof * ((two_pi * sigma2).ln() + 1.0) + 0.5 * log_det_a - 0.5 * log_det_s;
            (sigma2, score)
        }
    };
    if !sigma2.is_finite() || sigma2 <= 0.0 {
        return None;
    }

    Some(Solution {
        beta,
        chol,
        rss,
        penalty,
        sigma2,
        score: score + w.jacobian,
    })
}

/// Score used by the optimizers; failures count as infinitely bad.
pub fn score_of(
    frame: &ModelFrame,
    phi: f64,
    penalties: &[ScaledPenalty],
    rho: &[f64],
    criterion: Criterion,
) -> f64 {
    let w = Whitened::new(frame, phi);
    solve(&w, penalties, rho, criterion)
        .map(|s| s.score)
        .unwrap_or(f64::INFINITY)
}

/// Per-coefficient influence `diag((X'X + S)^-1 X'X)`, which sums to the
/// effective degrees of freedom.
pub fn influence_diagonal(w: &Whitened, chol: &Cholesky<f64, Dyn>) -> DVector<f64> {
    let f = chol.solve(&w.xtx);
    f.diagonal()
}

/// Lag-1 autocorrelation of residuals, pooled over groups.
pub fn lag1_autocorrelation(resid: &[f64], group_sizes: &[usize]) -> f64 {
    let n = resid.len();
    if n < 2 {
        return 0.0;
    }
    let mean = resid.iter().sum::<f64>() / n as f64;
    let denom: f64 = resid.iter().map(|r| (r - mean).powi(2)).sum();
    if denom == 0.0 {
        return 0.0;
    }
    let mut num = 0.0;
    let mut start = 0;
    for &size in group_sizes {
        for i in (start + 1)..(start + size) {
            num += (resid[i] - mean) * (resid[i - 1] - mean);
        }
        start += size;
    }
    num / denom
}
