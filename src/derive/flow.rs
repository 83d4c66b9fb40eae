use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::model::DailyRecord;

/// Sets `flow_index` on every row to the reference site's `log_depth` on
/// the same date. Requires `log_depth` to be computed first.
pub fn attach_flow_index(rows: &mut [DailyRecord], reference_site: &str) {
    let reference: HashMap<NaiveDate, f64> = rows
        .iter()
        .filter(|r| r.site == reference_site)
        .filter_map(|r| r.log_depth.map(|v| (r.date, v)))
        .collect();

    if reference.is_empty() {
        warn!(reference_site, "Reference site has no depth, flow index empty");
    }

    let mut missing = 0usize;
    for row in rows.iter_mut() {
        row.flow_index = reference.get(&row.date).copied();
        if row.flow_index.is_none() {
            missing += 1;
        }
    }
    debug!(reference_days = reference.len(), missing, "Flow index attached");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(site: &str, d: u32, log_depth: Option<f64>) -> DailyRecord {
        let mut r = DailyRecord::new(site, NaiveDate::from_ymd_opt(2019, 6, d).unwrap());
        r.log_depth = log_depth;
        r
    }

    #[test]
    fn test_flow_index_follows_reference_by_date() {
        let mut rows = vec![
            row("A", 1, Some(-1.0)),
            row("A", 2, None),
            row("B", 1, Some(-3.0)),
            row("B", 2, Some(-2.5)),
            row("B", 3, Some(-2.0)),
        ];
        attach_flow_index(&mut rows, "A");

        assert_eq!(rows[0].flow_index, Some(-1.0));
        assert_eq!(rows[1].flow_index, None);
        assert_eq!(rows[2].flow_index, Some(-1.0));
        assert_eq!(rows[3].flow_index, None);
        assert_eq!(rows[4].flow_index, None);
    }

    #[test]
    fn test_unknown_reference_site_leaves_index_empty() {
        let mut rows = vec![row("A", 1, Some(-1.0))];
        attach_flow_index(&mut rows, "Z");
        assert_eq!(rows[0].flow_index, None);
    }
}
