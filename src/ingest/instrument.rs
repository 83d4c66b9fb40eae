//! Site instrument exports (15-minute sonde readings).

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use super::{csv_reader, parse_value};
use crate::model::RawReading;

/// Datetime layouts seen in logger exports, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    // two-digit years first: `%Y` would read "19" as year 19
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Deserialize)]
struct InstrumentRow {
    datetime: String,
    site: String,
    #[serde(default)]
    depth_m: Option<String>,
    #[serde(default)]
    do_mg_l: Option<String>,
    #[serde(default)]
    do_sat_pct: Option<String>,
    #[serde(default)]
    temp_c: Option<String>,
    #[serde(default)]
    chloride_mg_l: Option<String>,
    #[serde(default)]
    spcond_us_cm: Option<String>,
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Parses an instrument export into readings, in file order.
///
/// # Errors
///
/// Fails on malformed CSV, an unparseable datetime, an empty site code or
/// a non-numeric measurement, naming the offending line.
pub fn parse_instrument(bytes: &[u8]) -> Result<Vec<RawReading>> {
    let mut rdr = csv_reader(bytes);
    let mut readings = Vec::new();

    for (i, result) in rdr.deserialize::<InstrumentRow>().enumerate() {
        let line = i + 2;
        let row = result.with_context(|| format!("instrument export line {}", line))?;

        let Some(datetime) = parse_datetime(&row.datetime) else {
            bail!("line {}: unrecognized datetime {:?}", line, row.datetime);
        };
        if row.site.is_empty() {
            bail!("line {}: empty site code", line);
        }

        readings.push(RawReading {
            datetime,
            site: row.site,
            depth_m: parse_value(row.depth_m.as_deref(), "depth_m", line)?,
            do_mg_l: parse_value(row.do_mg_l.as_deref(), "do_mg_l", line)?,
            do_sat_pct: parse_value(row.do_sat_pct.as_deref(), "do_sat_pct", line)?,
            temp_c: parse_value(row.temp_c.as_deref(), "temp_c", line)?,
            chloride_mg_l: parse_value(row.chloride_mg_l.as_deref(), "chloride_mg_l", line)?,
            spcond_us_cm: parse_value(row.spcond_us_cm.as_deref(), "spcond_us_cm", line)?,
        });
    }

    debug!(readings = readings.len(), "Instrument export parsed");
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const EXPORT: &str = "\
datetime,site,depth_m,do_mg_l,do_sat_pct,temp_c,chloride_mg_l,spcond_us_cm
2019-06-01 00:00:00,A,0.42,8.1,92.5,18.2,120,650
2019-06-01 00:15,A,0.41,NA,,18.1,,-999999
06/01/2019 00:30,B ,0.30,7.5,85,19.0,210,900
";

    #[test]
    fn test_parse_instrument_rows() {
        let readings = parse_instrument(EXPORT.as_bytes()).unwrap();
        assert_eq!(readings.len(), 3);

        assert_eq!(readings[0].site, "A");
        assert_eq!(readings[0].do_mg_l, Some(8.1));
        assert_eq!(readings[0].spcond_us_cm, Some(650.0));

        assert_eq!(readings[1].do_mg_l, None);
        assert_eq!(readings[1].do_sat_pct, None);
        assert_eq!(readings[1].spcond_us_cm, None);

        assert_eq!(readings[2].site, "B");
        assert_eq!(
            readings[2].datetime,
            NaiveDate::from_ymd_opt(2019, 6, 1)
                .unwrap()
                .and_hms_opt(0, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_parse_instrument_optional_columns_absent() {
        let csv = "datetime,site,depth_m,do_mg_l,do_sat_pct,temp_c\n2020-01-02 10:00,C,1.0,11.0,90,2.5\n";
        let readings = parse_instrument(csv.as_bytes()).unwrap();
        assert_eq!(readings[0].chloride_mg_l, None);
        assert_eq!(readings[0].temp_c, Some(2.5));
    }

    #[test]
    fn test_parse_instrument_bad_datetime_names_line() {
        let csv = "datetime,site,depth_m\n2020-01-02 10:00,C,1.0\nyesterday,C,1.0\n";
        let err = parse_instrument(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2019-06-01T12:30:00").is_some());
        let short = parse_datetime("6/1/19 12:30").unwrap();
        assert_eq!(short.date(), NaiveDate::from_ymd_opt(2019, 6, 1).unwrap());
        assert!(parse_datetime("06/01/2019 12:30:15").is_some());
        assert!(parse_datetime("2019-06-01").is_none());
    }
}
