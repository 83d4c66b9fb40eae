use chrono::{Datelike, NaiveDate};

use crate::model::{DailyRecord, Season};

/// Decimal year, e.g. 2020-07-02 is 2020.5.
pub fn decimal_year(date: NaiveDate) -> f64 {
    let year = date.year();
    let days_in_year = if date.leap_year() { 366.0 } else { 365.0 };
    year as f64 + (date.ordinal0() as f64) / days_in_year
}

pub fn attach_calendar(rows: &mut [DailyRecord]) {
    for row in rows.iter_mut() {
        row.doy = row.date.ordinal();
        row.month = row.date.month();
        row.year = row.date.year();
        row.time = decimal_year(row.date);
        row.season = Season::from_month(row.month).as_str().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_year() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(decimal_year(d), 2020.0);
        let mid = NaiveDate::from_ymd_opt(2020, 7, 2).unwrap();
        assert!((decimal_year(mid) - 2020.5).abs() < 1e-12);
    }

    #[test]
    fn test_attach_calendar() {
        let mut rows = vec![DailyRecord::new("A", NaiveDate::from_ymd_opt(2019, 12, 31).unwrap())];
        attach_calendar(&mut rows);
        assert_eq!(rows[0].doy, 365);
        assert_eq!(rows[0].month, 12);
        assert_eq!(rows[0].year, 2019);
        assert_eq!(rows[0].season, "winter");
    }
}
