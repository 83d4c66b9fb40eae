//! Formula-driven regression models: GLS with AR(1) errors and additive
//! mixed models with penalized smooths.

pub mod basis;
pub mod design;
pub mod fit;
pub mod formula;
pub mod frame;
pub mod gam;
pub mod gls;
pub mod types;

pub use design::{DesignSpec, FrameOptions};
pub use formula::Formula;
pub use frame::{Cell, Observation, parse_cell};
pub use gam::fit_gam;
pub use gls::fit_gls;
pub use types::{FitOptions, FittedModel, Method, ModelKind};

use anyhow::Result;

/// Fits `formula` with the estimator for `kind`.
pub fn fit_model<O: Observation>(
    kind: ModelKind,
    formula: &Formula,
    rows: &[O],
    opts: &FitOptions,
) -> Result<FittedModel> {
    match kind {
        ModelKind::Gls => fit_gls(formula, rows, opts),
        ModelKind::Gam => fit_gam(formula, rows, opts),
    }
}
