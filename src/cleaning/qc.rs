use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::model::{Metric, RawReading};

/// Plausible-value bounds and the dewatering threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    pub depth_m: (f64, f64),
    pub do_mg_l: (f64, f64),
    pub do_sat_pct: (f64, f64),
    pub temp_c: (f64, f64),
    pub chloride_mg_l: (f64, f64),
    pub spcond_us_cm: (f64, f64),
    /// Readings shallower than this are from a probe out of the water.
    pub min_depth_m: Option<f64>,
}

impl Default for QcConfig {
    fn default() -> Self {
        QcConfig {
            depth_m: (0.0, 10.0),
            do_mg_l: (0.0, 20.0),
            do_sat_pct: (0.0, 250.0),
            temp_c: (-1.0, 40.0),
            chloride_mg_l: (0.0, 20_000.0),
            spcond_us_cm: (0.0, 60_000.0),
            min_depth_m: Some(0.05),
        }
    }
}

impl QcConfig {
    pub fn bounds(&self, metric: Metric) -> (f64, f64) {
        match metric {
            Metric::Depth => self.depth_m,
            Metric::DissolvedOxygen => self.do_mg_l,
            Metric::Saturation => self.do_sat_pct,
            Metric::Temperature => self.temp_c,
            Metric::Chloride => self.chloride_mg_l,
            Metric::Conductance => self.spcond_us_cm,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QcReport {
    pub out_of_range: usize,
    pub dewatered_readings: usize,
    pub duplicates_removed: usize,
}

/// Blanks out-of-range values, then blanks the water-column metrics of
/// dewatered readings.
pub fn apply_qc(readings: &mut [RawReading], qc: &QcConfig, report: &mut QcReport) {
    for r in readings.iter_mut() {
        for metric in Metric::ALL {
            let (lo, hi) = qc.bounds(metric);
            if let Some(v) = r.metric(metric) {
                if v < lo || v > hi {
                    r.set_metric(metric, None);
                    report.out_of_range += 1;
                }
            }
        }

        let Some(min_depth) = qc.min_depth_m else {
            continue;
        };
        if r.depth_m.is_some_and(|d| d < min_depth) {
            for metric in Metric::ALL.into_iter().filter(|m| *m != Metric::Depth) {
                r.set_metric(metric, None);
            }
            report.dewatered_readings += 1;
        }
    }

    info!(
        out_of_range = report.out_of_range,
        dewatered = report.dewatered_readings,
        "QC complete"
    );
}

/// Keeps the first reading for each (site, datetime).
pub fn dedupe(readings: &mut Vec<RawReading>, report: &mut QcReport) {
    let mut seen = HashSet::new();
    let before = readings.len();
    readings.retain(|r| seen.insert((r.site.clone(), r.datetime)));
    report.duplicates_removed += before - readings.len();
}
