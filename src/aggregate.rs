//! Daily aggregation of instrument readings.
//!
//! Produces exactly one [`DailyRecord`] per (site, date), ordered by site
//! then date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::model::{DailyRecord, RawReading};
use crate::utility::mean_present;

/// Linear conductance-to-chloride relation, `Cl = slope * SpC + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChlorideEstimate {
    pub slope: f64,
    pub intercept: f64,
}

impl ChlorideEstimate {
    pub fn estimate(&self, spcond_us_cm: f64) -> f64 {
        (self.slope * spcond_us_cm + self.intercept).max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateReport {
    pub site_days: usize,
    pub days_below_min_readings: usize,
    pub chloride_estimated: usize,
}

fn min_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.min(v)))
    })
}

fn max_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.max(v)))
    })
}

/// Aggregates readings to daily rows.
///
/// Days with fewer than `min_readings` readings are dropped. When a day
/// has conductance but no chloride, chloride is estimated from
/// conductance if a relation is given.
#[tracing::instrument(skip(readings, chloride), fields(readings = readings.len()))]
pub fn daily(
    readings: &[RawReading],
    min_readings: u32,
    chloride: Option<&ChlorideEstimate>,
) -> (Vec<DailyRecord>, AggregateReport) {
    let mut groups: BTreeMap<(&str, NaiveDate), Vec<&RawReading>> = BTreeMap::new();
    for r in readings {
        groups.entry((r.site.as_str(), r.date())).or_default().push(r);
    }

    let mut report = AggregateReport::default();
    let mut rows = Vec::with_capacity(groups.len());

    for ((site, date), day) in groups {
        if (day.len() as u32) < min_readings {
            report.days_below_min_readings += 1;
            debug!(site, %date, n = day.len(), "Day below minimum reading count");
            continue;
        }

        let mut rec = DailyRecord::new(site, date);
        rec.n_readings = day.len() as u32;
        rec.depth_m = mean_present(day.iter().map(|r| r.depth_m));
        rec.do_mg_l = mean_present(day.iter().map(|r| r.do_mg_l));
        rec.do_min_mg_l = min_present(day.iter().map(|r| r.do_mg_l));
        rec.do_sat_pct = mean_present(day.iter().map(|r| r.do_sat_pct));
        rec.temp_c = mean_present(day.iter().map(|r| r.temp_c));
        rec.temp_max_c = max_present(day.iter().map(|r| r.temp_c));
        rec.chloride_mg_l = mean_present(day.iter().map(|r| r.chloride_mg_l));
        rec.spcond_us_cm = mean_present(day.iter().map(|r| r.spcond_us_cm));

        if rec.chloride_mg_l.is_none() {
            if let (Some(est), Some(spc)) = (chloride, rec.spcond_us_cm) {
                rec.chloride_mg_l = Some(est.estimate(spc));
                report.chloride_estimated += 1;
            }
        }

        rows.push(rec);
    }

    report.site_days = rows.len();
    info!(
        site_days = report.site_days,
        dropped = report.days_below_min_readings,
        "Daily aggregation complete"
    );
    (rows, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn reading(site: &str, ts: &str, do_mg_l: Option<f64>, temp: f64, spc: Option<f64>) -> RawReading {
        RawReading {
            datetime: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            site: site.to_string(),
            depth_m: Some(0.5),
            do_mg_l,
            do_sat_pct: None,
            temp_c: Some(temp),
            chloride_mg_l: None,
            spcond_us_cm: spc,
        }
    }

    fn sample() -> Vec<RawReading> {
        vec![
            reading("B", "2019-06-01 00:00", Some(7.0), 18.0, None),
            reading("A", "2019-06-01 00:00", Some(8.0), 16.0, Some(1000.0)),
            reading("A", "2019-06-01 12:00", Some(6.0), 20.0, Some(1000.0)),
            reading("A", "2019-06-01 23:45", None, 18.0, None),
            reading("A", "2019-06-02 00:00", Some(9.0), 15.0, None),
        ]
    }

    #[test]
    fn test_one_row_per_site_date_sorted() {
        let (rows, report) = daily(&sample(), 1, None);
        let keys: Vec<_> = rows.iter().map(|r| (r.site.as_str(), r.date.to_string())).collect();
        assert_eq!(
            keys,
            vec![
                ("A", "2019-06-01".to_string()),
                ("A", "2019-06-02".to_string()),
                ("B", "2019-06-01".to_string()),
            ]
        );
        assert_eq!(report.site_days, 3);
    }

    #[test]
    fn test_daily_statistics() {
        let (rows, _) = daily(&sample(), 1, None);
        let a = &rows[0];
        assert_eq!(a.n_readings, 3);
        assert_eq!(a.do_mg_l, Some(7.0));
        assert_eq!(a.do_min_mg_l, Some(6.0));
        assert_eq!(a.temp_c, Some(18.0));
        assert_eq!(a.temp_max_c, Some(20.0));
        assert_eq!(a.chloride_mg_l, None);
    }

    #[test]
    fn test_min_readings_drops_sparse_days() {
        let (rows, report) = daily(&sample(), 2, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(report.days_below_min_readings, 2);
    }

    #[test]
    fn test_chloride_estimated_from_conductance() {
        let est = ChlorideEstimate {
            slope: 0.25,
            intercept: -10.0,
        };
        let (rows, report) = daily(&sample(), 1, Some(&est));
        assert_eq!(rows[0].chloride_mg_l, Some(240.0));
        assert_eq!(rows[1].chloride_mg_l, None);
        assert_eq!(report.chloride_estimated, 1);
        assert_eq!(est.estimate(10.0), 0.0);
    }
}
