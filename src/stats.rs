use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::AggregateReport;
use crate::cleaning::{CorrectionOutcome, QcReport};

/// One row of `runs.csv`: what a pipeline run read, cleaned and fitted.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub timestamp: DateTime<Utc>,
    pub config: String,

    // ingest
    pub raw_readings: usize,
    pub weather_days: usize,
    pub sites: usize,

    // cleaning
    pub corrections_applied: usize,
    pub rows_dropped_by_corrections: usize,
    pub values_changed_by_corrections: usize,
    pub out_of_range: usize,
    pub dewatered_readings: usize,
    pub duplicates_removed: usize,

    // aggregation
    pub site_days: usize,
    pub days_below_min_readings: usize,
    pub chloride_estimated: usize,

    // models
    pub models_fitted: usize,
    pub models_cached: usize,
    pub models_failed: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunStats {
    pub fn new(config: &str) -> Self {
        RunStats {
            timestamp: Utc::now(),
            config: config.to_string(),
            ..Default::default()
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of raw readings that lost at least one value to QC.
    pub fn qc_pct(&self) -> f64 {
        Self::pct(self.out_of_range + self.dewatered_readings, self.raw_readings)
    }

    pub fn record_corrections(&mut self, outcomes: &[CorrectionOutcome]) {
        self.corrections_applied += outcomes.len();
        for o in outcomes {
            self.rows_dropped_by_corrections += o.rows_dropped;
            self.values_changed_by_corrections += o.values_changed;
        }
    }

    pub fn record_qc(&mut self, qc: &QcReport) {
        self.out_of_range = qc.out_of_range;
        self.dewatered_readings = qc.dewatered_readings;
        self.duplicates_removed = qc.duplicates_removed;
    }

    pub fn record_aggregation(&mut self, agg: &AggregateReport) {
        self.site_days = agg.site_days;
        self.days_below_min_readings = agg.days_below_min_readings;
        self.chloride_estimated = agg.chloride_estimated;
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(config: &str, error_type: &str, error_message: &str) -> Self {
        RunStats {
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..RunStats::new(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_with_zero_total() {
        assert_eq!(RunStats::pct(10, 0), 0.0);
    }

    #[test]
    fn test_pct_normal_values() {
        assert_eq!(RunStats::pct(50, 100), 50.0);
        assert_eq!(RunStats::pct(1, 4), 25.0);
    }

    #[test]
    fn test_record_corrections_sums_outcomes() {
        let mut stats = RunStats::new("cfg.json");
        let outcomes = vec![
            CorrectionOutcome {
                rows_dropped: 3,
                ..Default::default()
            },
            CorrectionOutcome {
                values_changed: 5,
                ..Default::default()
            },
        ];
        stats.record_corrections(&outcomes);

        assert_eq!(stats.corrections_applied, 2);
        assert_eq!(stats.rows_dropped_by_corrections, 3);
        assert_eq!(stats.values_changed_by_corrections, 5);
    }

    #[test]
    fn test_qc_pct() {
        let mut stats = RunStats::new("cfg.json");
        stats.raw_readings = 200;
        stats.record_qc(&QcReport {
            out_of_range: 10,
            dewatered_readings: 10,
            duplicates_removed: 4,
        });
        assert_eq!(stats.qc_pct(), 10.0);
    }

    #[test]
    fn test_from_error() {
        let stats = RunStats::from_error("cfg.json", "ingest", "bad line");
        assert_eq!(stats.error_type.as_deref(), Some("ingest"));
        assert_eq!(stats.config, "cfg.json");
    }
}
