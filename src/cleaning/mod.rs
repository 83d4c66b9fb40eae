//! Rule-based corrections and automatic plausibility checks.
//!
//! Corrections are expert rules keyed by site, inclusive date range and
//! metric. They run strictly in list order, so a later rule sees the
//! effect of every earlier one. QC runs after the raw-stage corrections.

pub mod qc;
pub mod rules;

pub use qc::{QcConfig, QcReport, apply_qc, dedupe};
pub use rules::{
    Action, Correctable, Correction, CorrectionOutcome, Stage, apply_corrections,
    load_corrections,
};
