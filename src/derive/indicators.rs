//! Water-quality criterion exceedances.

use super::DeriveConfig;
use crate::model::DailyRecord;

/// Chloride relative to the chronic and acute aquatic-life criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChlorideLevel {
    Below,
    Chronic,
    Acute,
}

impl ChlorideLevel {
    pub fn classify(chloride_mg_l: f64, chronic: f64, acute: f64) -> Self {
        match chloride_mg_l {
            c if c > acute => ChlorideLevel::Acute,
            c if c > chronic => ChlorideLevel::Chronic,
            _ => ChlorideLevel::Below,
        }
    }
}

pub fn attach_indicators(rows: &mut [DailyRecord], cfg: &DeriveConfig) {
    for row in rows.iter_mut() {
        row.do_below_threshold = row
            .do_min_mg_l
            .or(row.do_mg_l)
            .map(|d| d < cfg.do_threshold_mg_l);

        let level = row
            .chloride_mg_l
            .map(|c| ChlorideLevel::classify(c, cfg.chloride_chronic_mg_l, cfg.chloride_acute_mg_l));
        row.chloride_chronic = level.map(|l| l >= ChlorideLevel::Chronic);
        row.chloride_acute = level.map(|l| l == ChlorideLevel::Acute);
    }
}
