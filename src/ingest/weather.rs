//! Daily weather-station exports (GHCN-Daily CSV layout).

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{csv_reader, parse_value};
use crate::model::WeatherDay;

const MM_PER_INCH: f64 = 25.4;

/// Unit system of a weather export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherUnits {
    /// millimetres and degrees Celsius
    #[default]
    Metric,
    /// inches and degrees Fahrenheit
    Standard,
}

#[derive(Debug, Deserialize)]
struct WeatherRow {
    #[serde(rename = "DATE")]
    date: String,
    #[serde(rename = "PRCP", default)]
    prcp: Option<String>,
    #[serde(rename = "TMAX", default)]
    tmax: Option<String>,
    #[serde(rename = "TMIN", default)]
    tmin: Option<String>,
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// Parses a weather export into one entry per date, sorted by date and
/// converted to metric units. A repeated date keeps the later row.
pub fn parse_weather(bytes: &[u8], units: WeatherUnits) -> Result<Vec<WeatherDay>> {
    let mut rdr = csv_reader(bytes);
    let mut days: BTreeMap<NaiveDate, WeatherDay> = BTreeMap::new();

    for (i, result) in rdr.deserialize::<WeatherRow>().enumerate() {
        let line = i + 2;
        let row = result.with_context(|| format!("weather export line {}", line))?;

        let date = match NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&row.date, "%m/%d/%Y"))
        {
            Ok(d) => d,
            Err(_) => bail!("line {}: unrecognized date {:?}", line, row.date),
        };

        let mut precip = parse_value(row.prcp.as_deref(), "PRCP", line)?;
        let mut tmax = parse_value(row.tmax.as_deref(), "TMAX", line)?;
        let mut tmin = parse_value(row.tmin.as_deref(), "TMIN", line)?;

        if units == WeatherUnits::Standard {
            precip = precip.map(|p| p * MM_PER_INCH);
            tmax = tmax.map(fahrenheit_to_celsius);
            tmin = tmin.map(fahrenheit_to_celsius);
        }

        let day = WeatherDay {
            date,
            precip_mm: precip,
            air_temp_max_c: tmax,
            air_temp_min_c: tmin,
        };

        if days.insert(date, day).is_some() {
            warn!(%date, line, "Duplicate weather date, keeping later row");
        }
    }

    debug!(days = days.len(), "Weather export parsed");
    Ok(days.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weather_metric() {
        let csv = "\
STATION,NAME,DATE,PRCP,TMAX,TMIN
US1,Airport,2019-06-02,0.0,25.0,14.0
US1,Airport,2019-06-01,12.7,22.0,
";
        let days = parse_weather(csv.as_bytes(), WeatherUnits::Metric).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2019, 6, 1).unwrap());
        assert_eq!(days[0].precip_mm, Some(12.7));
        assert_eq!(days[0].air_temp_min_c, None);
    }

    #[test]
    fn test_parse_weather_standard_units_converted() {
        let csv = "DATE,PRCP,TMAX,TMIN\n2019-06-01,0.5,212,32\n";
        let days = parse_weather(csv.as_bytes(), WeatherUnits::Standard).unwrap();
        assert!((days[0].precip_mm.unwrap() - 12.7).abs() < 1e-9);
        assert!((days[0].air_temp_max_c.unwrap() - 100.0).abs() < 1e-9);
        assert!(days[0].air_temp_min_c.unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_parse_weather_duplicate_date_keeps_later() {
        let csv = "DATE,PRCP\n2019-06-01,1.0\n2019-06-01,3.0\n";
        let days = parse_weather(csv.as_bytes(), WeatherUnits::Metric).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].precip_mm, Some(3.0));
    }
}
