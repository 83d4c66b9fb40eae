//! Derived covariates for the daily table: joins, log transforms, the
//! cross-site flow index, antecedent precipitation, exceedance indicators
//! and calendar terms.

pub mod calendar;
pub mod flow;
pub mod indicators;
pub mod precip;

pub use indicators::ChlorideLevel;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::model::{DailyRecord, SiteInfo, WeatherDay};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeriveConfig {
    /// Site whose log depth serves as the watershed-wide flow index.
    pub reference_site: Option<String>,
    /// Added to depth before taking logs so zero stage stays finite.
    pub depth_offset_m: f64,
    pub antecedent_days: usize,
    pub antecedent_decay: f64,
    pub do_threshold_mg_l: f64,
    pub chloride_chronic_mg_l: f64,
    pub chloride_acute_mg_l: f64,
}

impl Default for DeriveConfig {
    fn default() -> Self {
        DeriveConfig {
            reference_site: None,
            depth_offset_m: 0.01,
            antecedent_days: 7,
            antecedent_decay: 0.5,
            do_threshold_mg_l: 5.0,
            chloride_chronic_mg_l: 230.0,
            chloride_acute_mg_l: 860.0,
        }
    }
}

/// Attaches weather to each row by date.
pub fn join_weather(rows: &mut [DailyRecord], weather: &[WeatherDay]) {
    let by_date: HashMap<_, _> = weather.iter().map(|w| (w.date, w)).collect();
    let mut unmatched = 0usize;
    for row in rows.iter_mut() {
        match by_date.get(&row.date) {
            Some(w) => {
                row.precip_mm = w.precip_mm;
                row.air_temp_max_c = w.air_temp_max_c;
            }
            None => unmatched += 1,
        }
    }
    if unmatched > 0 {
        warn!(unmatched, "Daily rows without a weather record");
    }
}

/// Attaches impervious cover to each row by site.
pub fn join_sites(rows: &mut [DailyRecord], sites: &[SiteInfo]) {
    let by_site: HashMap<_, _> = sites.iter().map(|s| (s.site.as_str(), s)).collect();
    for row in rows.iter_mut() {
        row.impervious_pct = by_site.get(row.site.as_str()).and_then(|s| s.impervious_pct);
    }
}

/// Log transforms of chloride and depth.
pub fn log_transforms(rows: &mut [DailyRecord], depth_offset_m: f64) {
    for row in rows.iter_mut() {
        row.log_chloride = row.chloride_mg_l.filter(|c| *c > 0.0).map(f64::ln);
        row.log_depth = row
            .depth_m
            .map(|d| d + depth_offset_m)
            .filter(|d| *d > 0.0)
            .map(f64::ln);
    }
}

/// Runs every derivation step over the daily table, in dependency order.
#[tracing::instrument(skip_all, fields(rows = rows.len()))]
pub fn derive_all(
    rows: &mut [DailyRecord],
    weather: &[WeatherDay],
    sites: &[SiteInfo],
    cfg: &DeriveConfig,
) {
    join_weather(rows, weather);
    join_sites(rows, sites);
    log_transforms(rows, cfg.depth_offset_m);

    match &cfg.reference_site {
        Some(site) => flow::attach_flow_index(rows, site),
        None => warn!("No reference site configured, flow index left empty"),
    }

    precip::attach_precip_windows(rows, weather, cfg.antecedent_days, cfg.antecedent_decay);
    indicators::attach_indicators(rows, cfg);
    calendar::attach_calendar(rows);

    info!("Derived covariates attached");
}
