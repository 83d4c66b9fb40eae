//! Penalized cubic B-spline bases for smooth terms.
//!
//! Both bases use equally spaced knots over the training range of the
//! covariate and a second-order difference penalty on the coefficients.
//! The cyclic basis wraps around so the smooth and its derivatives match
//! at both ends of the range. A sum-to-zero constraint over the training
//! data is absorbed into the basis, which leaves `k - 1` columns.

use anyhow::{Result, bail};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::formula::BasisKind;

/// Uniform cubic B-spline with support `[0, 4)`.
fn cardinal_cubic(t: f64) -> f64 {
    if !(0.0..4.0).contains(&t) {
        0.0
    } else if t < 1.0 {
        t.powi(3) / 6.0
    } else if t < 2.0 {
        (-3.0 * t.powi(3) + 12.0 * t.powi(2) - 12.0 * t + 4.0) / 6.0
    } else if t < 3.0 {
        (3.0 * t.powi(3) - 24.0 * t.powi(2) + 60.0 * t - 44.0) / 6.0
    } else {
        (4.0 - t).powi(3) / 6.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineBasis {
    pub kind: BasisKind,
    pub k: usize,
    pub lo: f64,
    pub hi: f64,
    /// `k x (k - 1)` map from constrained to raw coefficients.
    pub z: DMatrix<f64>,
}

impl SplineBasis {
    /// Sets up a basis of dimension `k` over the range of `xs` and absorbs
    /// the centering constraint computed from `xs`.
    pub fn new(kind: BasisKind, k: usize, xs: &[f64]) -> Result<Self> {
        if kind == BasisKind::RandomEffect {
            bail!("random effects do not use a spline basis");
        }
        if k < 4 {
            bail!("spline basis needs k >= 4, got {}", k);
        }
        let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(hi > lo) {
            bail!("smooth needs at least two distinct covariate values");
        }

        let mut basis = SplineBasis {
            kind,
            k,
            lo,
            hi,
            z: DMatrix::identity(k, k),
        };

        let mut means = vec![0.0; k];
        for &x in xs {
            for (m, b) in means.iter_mut().zip(basis.raw_row(x)) {
                *m += b / xs.len() as f64;
            }
        }
        basis.z = constraint_null_space(&means);
        Ok(basis)
    }

    /// Number of columns after the constraint.
    pub fn dim(&self) -> usize {
        self.k - 1
    }

    /// Unconstrained basis values at `x`, clamped to the training range.
    pub fn raw_row(&self, x: f64) -> Vec<f64> {
        let x = x.clamp(self.lo, self.hi);
        let k = self.k;
        match self.kind {
            BasisKind::Cyclic => {
                let h = (self.hi - self.lo) / k as f64;
                let u = (x - self.lo) / h;
                (0..k)
                    .map(|j| cardinal_cubic((u - j as f64).rem_euclid(k as f64)))
                    .collect()
            }
            _ => {
                let h = (self.hi - self.lo) / (k - 3) as f64;
                (0..k)
                    .map(|j| {
                        let knot = self.lo + (j as f64 - 3.0) * h;
                        cardinal_cubic((x - knot) / h)
                    })
                    .collect()
            }
        }
    }

    /// Constrained basis values at `x`.
    pub fn row(&self, x: f64) -> Vec<f64> {
        let raw = self.raw_row(x);
        (0..self.dim())
            .map(|c| (0..self.k).map(|r| raw[r] * self.z[(r, c)]).sum())
            .collect()
    }

    /// Penalty on the constrained coefficients and its rank.
    pub fn penalty(&self) -> (DMatrix<f64>, usize) {
        let k = self.k;
        let (d, rank) = match self.kind {
            BasisKind::Cyclic => {
                let mut d = DMatrix::zeros(k, k);
                for i in 0..k {
                    d[(i, i)] += 1.0;
                    d[(i, (i + 1) % k)] += -2.0;
                    d[(i, (i + 2) % k)] += 1.0;
                }
                // constant is the only null direction and the constraint removes it
                (d, k - 1)
            }
            _ => {
                let mut d = DMatrix::zeros(k - 2, k);
                for i in 0..k - 2 {
                    d[(i, i)] = 1.0;
                    d[(i, i + 1)] = -2.0;
                    d[(i, i + 2)] = 1.0;
                }
                // the linear trend stays unpenalized
                (d, k - 2)
            }
        };
        let s = d.transpose() * d;
        let sz = self.z.transpose() * s * &self.z;
        (sz, rank)
    }
}

/// Basis for the null space of the single constraint `c' beta = 0`,
/// solving for the coefficient with the largest weight.
fn constraint_null_space(c: &[f64]) -> DMatrix<f64> {
    let k = c.len();
    let pivot = (0..k)
        .max_by(|&a, &b| c[a].abs().total_cmp(&c[b].abs()))
        .unwrap_or(0);

    let mut z = DMatrix::zeros(k, k - 1);
    for (col, i) in (0..k).filter(|&i| i != pivot).enumerate() {
        z[(i, col)] = 1.0;
        z[(pivot, col)] = -c[i] / c[pivot];
    }
    z
}
