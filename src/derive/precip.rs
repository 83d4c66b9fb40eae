//! Lagged, rolling and exponentially weighted antecedent precipitation.

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

use crate::model::{DailyRecord, WeatherDay};

/// Sum of `decay^k * precip(date - k)` for `k` in `0..days`. Missing when
/// any day in the window is missing.
pub fn weighted_window(
    precip: &HashMap<NaiveDate, f64>,
    date: NaiveDate,
    days: usize,
    decay: f64,
) -> Option<f64> {
    let mut total = 0.0;
    let mut weight = 1.0;
    for k in 0..days {
        let d = date - Duration::days(k as i64);
        total += weight * precip.get(&d)?;
        weight *= decay;
    }
    Some(total)
}

pub fn attach_precip_windows(
    rows: &mut [DailyRecord],
    weather: &[WeatherDay],
    antecedent_days: usize,
    antecedent_decay: f64,
) {
    let precip: HashMap<NaiveDate, f64> = weather
        .iter()
        .filter_map(|w| w.precip_mm.map(|p| (w.date, p)))
        .collect();

    for row in rows.iter_mut() {
        row.precip_lag1_mm = precip.get(&(row.date - Duration::days(1))).copied();
        row.precip_3day_mm = weighted_window(&precip, row.date, 3, 1.0);
        row.precip_weighted_mm =
            weighted_window(&precip, row.date, antecedent_days, antecedent_decay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 6, d).unwrap()
    }

    fn weather(values: &[(u32, Option<f64>)]) -> Vec<WeatherDay> {
        values
            .iter()
            .map(|(d, p)| WeatherDay {
                date: day(*d),
                precip_mm: *p,
                air_temp_max_c: None,
                air_temp_min_c: None,
            })
            .collect()
    }

    #[test]
    fn test_lag_and_rolling_sums() {
        let w = weather(&[(1, Some(10.0)), (2, Some(0.0)), (3, Some(4.0)), (4, Some(2.0))]);
        let mut rows = vec![DailyRecord::new("A", day(4)), DailyRecord::new("A", day(2))];
        attach_precip_windows(&mut rows, &w, 3, 0.5);

        assert_eq!(rows[0].precip_lag1_mm, Some(4.0));
        assert_eq!(rows[0].precip_3day_mm, Some(6.0));
        // 2 + 0.5 * 4 + 0.25 * 0
        assert_eq!(rows[0].precip_weighted_mm, Some(4.0));

        assert_eq!(rows[1].precip_lag1_mm, Some(10.0));
        // window reaches back to May 31, which is missing
        assert_eq!(rows[1].precip_3day_mm, None);
    }

    #[test]
    fn test_gap_in_window_is_missing() {
        let w = weather(&[(1, Some(1.0)), (2, None), (3, Some(1.0))]);
        let mut rows = vec![DailyRecord::new("A", day(3))];
        attach_precip_windows(&mut rows, &w, 2, 0.5);

        assert_eq!(rows[0].precip_lag1_mm, None);
        assert_eq!(rows[0].precip_weighted_mm, None);
        assert_eq!(rows[0].precip_3day_mm, None);
    }

    #[test]
    fn test_weighted_window_decay() {
        let precip: HashMap<_, _> = [(day(1), 8.0), (day(2), 8.0), (day(3), 8.0)].into_iter().collect();
        let v = weighted_window(&precip, day(3), 3, 0.5).unwrap();
        assert_eq!(v, 8.0 + 4.0 + 2.0);
        assert_eq!(weighted_window(&precip, day(3), 0, 0.5), Some(0.0));
    }
}
