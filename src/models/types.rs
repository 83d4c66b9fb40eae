use anyhow::{Result, bail};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

use super::design::{DesignSpec, FrameOptions};
use super::frame::Observation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Gls,
    Gam,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Reml,
    Ml,
}

fn default_group() -> Option<String> {
    Some("site".to_string())
}

fn default_order() -> String {
    "time".to_string()
}

/// Error structure and estimation method for a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    #[serde(default)]
    pub ar1: bool,
    /// Column defining independent AR(1) series.
    #[serde(default = "default_group")]
    pub group: Option<String>,
    /// Column giving the order of observations within a series.
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default)]
    pub method: Method,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            ar1: false,
            group: default_group(),
            order: default_order(),
            method: Method::Reml,
        }
    }
}

impl FitOptions {
    /// Grouping and ordering only matter for correlated errors.
    pub fn frame_options(&self) -> FrameOptions {
        if self.ar1 {
            FrameOptions {
                group_by: self.group.clone(),
                order_by: Some(self.order.clone()),
            }
        } else {
            FrameOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
}

/// Wald F test that every coefficient of a term is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermTest {
    pub term: String,
    pub df: f64,
    pub df_residual: f64,
    pub f_value: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothSummary {
    pub term: String,
    pub edf: f64,
    pub ref_df: f64,
    pub f_value: f64,
    pub p_value: f64,
    pub lambda: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub estimate: f64,
    pub std_error: f64,
}

/// A fitted model with everything needed to summarize it and to predict
/// from it after a round trip through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub kind: ModelKind,
    pub formula: String,
    pub options: FitOptions,
    pub design: DesignSpec,
    pub beta: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub coefficients: Vec<Coefficient>,
    pub terms: Vec<TermTest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smooths: Vec<SmoothSummary>,
    pub n: usize,
    pub n_dropped: usize,
    pub df_residual: f64,
    pub sigma: f64,
    pub phi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_likelihood: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reml_score: Option<f64>,
    pub r_squared_adj: f64,
    pub deviance_explained: f64,
    /// Lag-1 autocorrelation of the normalized residuals.
    pub residual_acf1: f64,
}

impl FittedModel {
    pub fn is_log_response(&self) -> bool {
        self.design.formula.response.is_log_scale()
    }

    /// Linear predictor and its standard error for one design row.
    pub fn predict_row(&self, row: &[f64]) -> Prediction {
        let x = DVector::from_column_slice(row);
        let estimate = x.dot(&self.beta);
        let var = (x.transpose() * &self.covariance * &x)[(0, 0)];
        Prediction {
            estimate,
            std_error: var.max(0.0).sqrt(),
        }
    }

    /// Prediction on the response scale of the formula, `None` when the
    /// observation is missing a variable.
    pub fn predict<O: Observation + ?Sized>(&self, obs: &O) -> Result<Option<Prediction>> {
        Ok(self.design.row(obs)?.map(|row| self.predict_row(&row)))
    }
}

/// Two-sided p-value of a t statistic.
pub fn t_p_value(t: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df.max(1.0)) {
        Ok(dist) if t.is_finite() => 2.0 * dist.sf(t.abs()),
        _ => f64::NAN,
    }
}

/// Two-sided critical value of the t distribution.
pub fn t_quantile(level: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df.max(1.0)) {
        Ok(dist) => dist.inverse_cdf(0.5 + level / 2.0),
        Err(_) => f64::NAN,
    }
}

pub fn f_p_value(f: f64, df1: f64, df2: f64) -> f64 {
    match FisherSnedecor::new(df1.max(1e-3), df2.max(1.0)) {
        Ok(dist) if f.is_finite() && f >= 0.0 => dist.sf(f),
        _ => f64::NAN,
    }
}

pub(crate) fn coefficient_table(
    names: &[String],
    beta: &DVector<f64>,
    cov: &DMatrix<f64>,
    columns: &[usize],
    df: f64,
) -> Vec<Coefficient> {
    columns
        .iter()
        .map(|&i| {
            let std_error = cov[(i, i)].max(0.0).sqrt();
            let t_value = beta[i] / std_error;
            Coefficient {
                term: names[i].clone(),
                estimate: beta[i],
                std_error,
                t_value,
                p_value: t_p_value(t_value, df),
            }
        })
        .collect()
}

/// Symmetric pseudo-inverse keeping the `rank` largest eigenvalues.
fn pseudo_inverse(m: &DMatrix<f64>, rank: usize) -> DMatrix<f64> {
    let eig = m.clone().symmetric_eigen();
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let n = m.nrows();
    let mut out = DMatrix::zeros(n, n);
    for &k in order.iter().take(rank) {
        let value = eig.eigenvalues[k];
        if value <= 0.0 {
            continue;
        }
        let v = eig.eigenvectors.column(k);
        out += (v * v.transpose()) / value;
    }
    out
}

/// Wald statistic `b' V^- b / r` for a coefficient block and its p-value.
pub(crate) fn wald_block(
    beta: &DVector<f64>,
    cov: &DMatrix<f64>,
    start: usize,
    size: usize,
    rank: usize,
    df_residual: f64,
) -> Result<(f64, f64)> {
    let b = beta.rows(start, size).into_owned();
    let v = cov.view((start, start), (size, size)).into_owned();
    let rank = rank.clamp(1, size);
    let v_inv = if rank == size {
        match v.clone().cholesky() {
            Some(chol) => chol.inverse(),
            None => pseudo_inverse(&v, rank),
        }
    } else {
        pseudo_inverse(&v, rank)
    };
    let stat = (b.transpose() * v_inv * &b)[(0, 0)] / rank as f64;
    if !stat.is_finite() {
        bail!("Wald statistic is not finite");
    }
    Ok((stat, f_p_value(stat, rank as f64, df_residual)))
}
