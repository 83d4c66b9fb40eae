//! Parsers for the fixed-layout CSV inputs: instrument exports, weather
//! station exports and the site reference table.

pub mod instrument;
pub mod sites;
pub mod weather;

pub use instrument::parse_instrument;
pub use sites::parse_sites;
pub use weather::{WeatherUnits, parse_weather};

use anyhow::{Result, bail};

/// Instruments write this when a probe has no value.
const SENTINEL: f64 = -999999.0;

/// Parses an optional numeric cell. Empty cells, `NA`, `NaN` and the
/// instrument sentinel all read as missing.
pub(crate) fn parse_value(raw: Option<&str>, column: &str, line: usize) -> Result<Option<f64>> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(v) if v == SENTINEL || !v.is_finite() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(_) => bail!("line {}: column {} has non-numeric value {:?}", line, column, raw),
    }
}

pub(crate) fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes)
}
