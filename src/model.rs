//! Core data types shared by the ingest, cleaning and derivation stages.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::frame::{Cell, Observation};

/// A measured water-column quantity that corrections and QC can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "depth_m")]
    Depth,
    #[serde(rename = "do_mg_l")]
    DissolvedOxygen,
    #[serde(rename = "do_sat_pct")]
    Saturation,
    #[serde(rename = "temp_c")]
    Temperature,
    #[serde(rename = "chloride_mg_l")]
    Chloride,
    #[serde(rename = "spcond_us_cm")]
    Conductance,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Depth,
        Metric::DissolvedOxygen,
        Metric::Saturation,
        Metric::Temperature,
        Metric::Chloride,
        Metric::Conductance,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Metric::Depth => "depth_m",
            Metric::DissolvedOxygen => "do_mg_l",
            Metric::Saturation => "do_sat_pct",
            Metric::Temperature => "temp_c",
            Metric::Chloride => "chloride_mg_l",
            Metric::Conductance => "spcond_us_cm",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// One 15-minute reading from a site instrument export.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub datetime: NaiveDateTime,
    pub site: String,
    pub depth_m: Option<f64>,
    pub do_mg_l: Option<f64>,
    pub do_sat_pct: Option<f64>,
    pub temp_c: Option<f64>,
    pub chloride_mg_l: Option<f64>,
    pub spcond_us_cm: Option<f64>,
}

impl RawReading {
    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Depth => self.depth_m,
            Metric::DissolvedOxygen => self.do_mg_l,
            Metric::Saturation => self.do_sat_pct,
            Metric::Temperature => self.temp_c,
            Metric::Chloride => self.chloride_mg_l,
            Metric::Conductance => self.spcond_us_cm,
        }
    }

    pub fn set_metric(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::Depth => &mut self.depth_m,
            Metric::DissolvedOxygen => &mut self.do_mg_l,
            Metric::Saturation => &mut self.do_sat_pct,
            Metric::Temperature => &mut self.temp_c,
            Metric::Chloride => &mut self.chloride_mg_l,
            Metric::Conductance => &mut self.spcond_us_cm,
        };
        *slot = value;
    }
}

/// One day of weather-station observations, in metric units.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherDay {
    pub date: NaiveDate,
    pub precip_mm: Option<f64>,
    pub air_temp_max_c: Option<f64>,
    pub air_temp_min_c: Option<f64>,
}

/// Reference metadata for a monitoring site.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SiteInfo {
    pub site: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub impervious_pct: Option<f64>,
    #[serde(default)]
    pub drainage_area_km2: Option<f64>,
}

/// Meteorological season of a calendar month (northern hemisphere).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }
}

/// One row per site per date: daily aggregates plus joined and derived
/// covariates. This is the table exported as `daily.csv` and consumed by
/// the model layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub site: String,
    pub n_readings: u32,

    // daily aggregates
    pub depth_m: Option<f64>,
    pub do_mg_l: Option<f64>,
    pub do_min_mg_l: Option<f64>,
    pub do_sat_pct: Option<f64>,
    pub temp_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub chloride_mg_l: Option<f64>,
    pub spcond_us_cm: Option<f64>,

    // joined
    pub precip_mm: Option<f64>,
    pub air_temp_max_c: Option<f64>,
    pub impervious_pct: Option<f64>,

    // derived
    pub log_chloride: Option<f64>,
    pub log_depth: Option<f64>,
    pub flow_index: Option<f64>,
    pub precip_lag1_mm: Option<f64>,
    pub precip_3day_mm: Option<f64>,
    pub precip_weighted_mm: Option<f64>,
    pub do_below_threshold: Option<bool>,
    pub chloride_chronic: Option<bool>,
    pub chloride_acute: Option<bool>,
    pub doy: u32,
    pub month: u32,
    pub year: i32,
    pub time: f64,
    pub season: String,
}

impl DailyRecord {
    pub fn new(site: &str, date: NaiveDate) -> Self {
        DailyRecord {
            date,
            site: site.to_string(),
            ..Default::default()
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Depth => self.depth_m,
            Metric::DissolvedOxygen => self.do_mg_l,
            Metric::Saturation => self.do_sat_pct,
            Metric::Temperature => self.temp_c,
            Metric::Chloride => self.chloride_mg_l,
            Metric::Conductance => self.spcond_us_cm,
        }
    }

    /// Sets the daily mean of a metric. Companion extremes are left alone.
    pub fn set_metric(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::Depth => &mut self.depth_m,
            Metric::DissolvedOxygen => &mut self.do_mg_l,
            Metric::Saturation => &mut self.do_sat_pct,
            Metric::Temperature => &mut self.temp_c,
            Metric::Chloride => &mut self.chloride_mg_l,
            Metric::Conductance => &mut self.spcond_us_cm,
        };
        *slot = value;
    }

    /// The daily extreme carried next to a metric's mean: minimum DO and
    /// maximum temperature.
    pub fn extreme_mut(&mut self, metric: Metric) -> Option<&mut Option<f64>> {
        match metric {
            Metric::DissolvedOxygen => Some(&mut self.do_min_mg_l),
            Metric::Temperature => Some(&mut self.temp_max_c),
            _ => None,
        }
    }
}

fn flag(value: Option<bool>) -> Option<Cell> {
    value.map(|b| Cell::Num(if b { 1.0 } else { 0.0 }))
}

impl Observation for DailyRecord {
    fn cell(&self, name: &str) -> Option<Cell> {
        let num = |v: Option<f64>| v.map(Cell::Num);
        match name {
            "site" => Some(Cell::Level(self.site.clone())),
            "season" if !self.season.is_empty() => Some(Cell::Level(self.season.clone())),
            "n_readings" => Some(Cell::Num(self.n_readings as f64)),
            "depth_m" => num(self.depth_m),
            "do_mg_l" => num(self.do_mg_l),
            "do_min_mg_l" => num(self.do_min_mg_l),
            "do_sat_pct" => num(self.do_sat_pct),
            "temp_c" => num(self.temp_c),
            "temp_max_c" => num(self.temp_max_c),
            "chloride_mg_l" => num(self.chloride_mg_l),
            "spcond_us_cm" => num(self.spcond_us_cm),
            "precip_mm" => num(self.precip_mm),
            "air_temp_max_c" => num(self.air_temp_max_c),
            "impervious_pct" => num(self.impervious_pct),
            "log_chloride" => num(self.log_chloride),
            "log_depth" => num(self.log_depth),
            "flow_index" => num(self.flow_index),
            "precip_lag1_mm" => num(self.precip_lag1_mm),
            "precip_3day_mm" => num(self.precip_3day_mm),
            "precip_weighted_mm" => num(self.precip_weighted_mm),
            "do_below_threshold" => flag(self.do_below_threshold),
            "chloride_chronic" => flag(self.chloride_chronic),
            "chloride_acute" => flag(self.chloride_acute),
            "doy" => Some(Cell::Num(self.doy as f64)),
            "month" => Some(Cell::Num(self.month as f64)),
            "year" => Some(Cell::Num(self.year as f64)),
            "time" => Some(Cell::Num(self.time)),
            _ => None,
        }
    }

    fn has_column(&self, name: &str) -> bool {
        DAILY_COLUMNS.contains(&name)
    }
}

/// Every column a [`DailyRecord`] exposes to formulas.
pub const DAILY_COLUMNS: &[&str] = &[
    "site",
    "season",
    "n_readings",
    "depth_m",
    "do_mg_l",
    "do_min_mg_l",
    "do_sat_pct",
    "temp_c",
    "temp_max_c",
    "chloride_mg_l",
    "spcond_us_cm",
    "precip_mm",
    "air_temp_max_c",
    "impervious_pct",
    "log_chloride",
    "log_depth",
    "flow_index",
    "precip_lag1_mm",
    "precip_3day_mm",
    "precip_weighted_mm",
    "do_below_threshold",
    "chloride_chronic",
    "chloride_acute",
    "doy",
    "month",
    "year",
    "time",
];
