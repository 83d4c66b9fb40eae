use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{DailyRecord, Metric, RawReading};

/// A record that correction rules can match and edit.
pub trait Correctable {
    fn site(&self) -> &str;
    fn date(&self) -> NaiveDate;
    fn metric(&self, metric: Metric) -> Option<f64>;
    fn set_metric(&mut self, metric: Metric, value: Option<f64>);
    /// A second value edited alongside `metric`, such as a daily extreme.
    fn companion_mut(&mut self, _metric: Metric) -> Option<&mut Option<f64>> {
        None
    }
}

impl Correctable for RawReading {
    fn site(&self) -> &str {
        &self.site
    }
    fn date(&self) -> NaiveDate {
        RawReading::date(self)
    }
    fn metric(&self, metric: Metric) -> Option<f64> {
        RawReading::metric(self, metric)
    }
    fn set_metric(&mut self, metric: Metric, value: Option<f64>) {
        RawReading::set_metric(self, metric, value)
    }
}

impl Correctable for DailyRecord {
    fn site(&self) -> &str {
        &self.site
    }
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn metric(&self, metric: Metric) -> Option<f64> {
        DailyRecord::metric(self, metric)
    }
    fn set_metric(&mut self, metric: Metric, value: Option<f64>) {
        DailyRecord::set_metric(self, metric, value)
    }
    fn companion_mut(&mut self, metric: Metric) -> Option<&mut Option<f64>> {
        self.extreme_mut(metric)
    }
}

/// Which table a rule applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 15-minute readings, before daily aggregation
    #[default]
    Raw,
    /// daily rows, after aggregation
    Daily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Remove matching rows entirely.
    DropRows,
    /// Blank the listed metrics.
    SetMissing,
    /// Overwrite the listed metrics with a constant.
    Replace { value: f64 },
    /// Add a constant (sensor drift / datum shift).
    Offset { delta: f64 },
    /// Multiply by a constant (calibration factor).
    Scale { factor: f64 },
    /// Blank values above `max`.
    CapAbove { max: f64 },
    /// Blank values below `min`.
    CapBelow { min: f64 },
}

/// One correction rule. `site` may be `*` to match every site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub site: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    pub action: Action,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub note: Option<String>,
}

impl Correction {
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            bail!(
                "correction for site {} starts {} after it ends {}",
                self.site,
                self.start,
                self.end
            );
        }
        if self.metrics.is_empty() && self.action != Action::DropRows {
            bail!(
                "correction for site {} ({} to {}) names no metrics",
                self.site,
                self.start,
                self.end
            );
        }
        Ok(())
    }

    pub fn matches<R: Correctable>(&self, record: &R) -> bool {
        (self.site == "*" || self.site == record.site())
            && record.date() >= self.start
            && record.date() <= self.end
    }

    fn edit(&self, value: Option<f64>) -> Option<f64> {
        match self.action {
            Action::DropRows => value,
            Action::SetMissing => None,
            Action::Replace { value: v } => Some(v),
            Action::Offset { delta } => value.map(|x| x + delta),
            Action::Scale { factor } => value.map(|x| x * factor),
            Action::CapAbove { max } => value.filter(|x| *x <= max),
            Action::CapBelow { min } => value.filter(|x| *x >= min),
        }
    }

    pub fn label(&self) -> String {
        self.note.clone().unwrap_or_else(|| {
            format!("{} {}..{}", self.site, self.start, self.end)
        })
    }
}

/// What a single rule did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionOutcome {
    pub index: usize,
    pub stage: String,
    pub site: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub action: String,
    pub note: String,
    pub rows_matched: usize,
    pub values_changed: usize,
    pub rows_dropped: usize,
}

fn action_name(action: &Action) -> &'static str {
    match action {
        Action::DropRows => "drop_rows",
        Action::SetMissing => "set_missing",
        Action::Replace { .. } => "replace",
        Action::Offset { .. } => "offset",
        Action::Scale { .. } => "scale",
        Action::CapAbove { .. } => "cap_above",
        Action::CapBelow { .. } => "cap_below",
    }
}

/// Applies every rule of `stage`, in order, to `records`.
///
/// Returns one outcome per applied rule. Rules for the other stage are
/// skipped silently.
pub fn apply_corrections<R: Correctable>(
    records: &mut Vec<R>,
    rules: &[Correction],
    stage: Stage,
) -> Result<Vec<CorrectionOutcome>> {
    let mut outcomes = Vec::new();

    for (index, rule) in rules.iter().enumerate() {
        if rule.stage != stage {
            continue;
        }
        rule.validate().with_context(|| format!("correction #{}", index + 1))?;

        let mut outcome = CorrectionOutcome {
            index: index + 1,
            stage: format!("{:?}", stage).to_lowercase(),
            site: rule.site.clone(),
            start: rule.start,
            end: rule.end,
            action: action_name(&rule.action).to_string(),
            note: rule.note.clone().unwrap_or_default(),
            ..Default::default()
        };

        if rule.action == Action::DropRows {
            let before = records.len();
            records.retain(|r| !rule.matches(r));
            outcome.rows_dropped = before - records.len();
            outcome.rows_matched = outcome.rows_dropped;
        } else {
            for record in records.iter_mut().filter(|r| rule.matches(&**r)) {
                outcome.rows_matched += 1;
                for &metric in &rule.metrics {
                    let old = record.metric(metric);
                    let new = rule.edit(old);
                    if new != old {
                        record.set_metric(metric, new);
                        outcome.values_changed += 1;
                    }
                    if let Some(extreme) = record.companion_mut(metric) {
                        *extreme = rule.edit(*extreme);
                    }
                }
            }
        }

        debug!(
            rule = %rule.label(),
            matched = outcome.rows_matched,
            changed = outcome.values_changed,
            dropped = outcome.rows_dropped,
            "Correction applied"
        );
        outcomes.push(outcome);
    }

    if !outcomes.is_empty() {
        info!(?stage, rules = outcomes.len(), "Corrections applied");
    }
    Ok(outcomes)
}

/// Reads a JSON array of [`Correction`]s and validates each one.
pub fn load_corrections(path: &str) -> Result<Vec<Correction>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading corrections {}", path))?;
    let rules: Vec<Correction> =
        serde_json::from_str(&content).with_context(|| format!("parsing corrections {}", path))?;
    for (i, rule) in rules.iter().enumerate() {
        rule.validate()
            .with_context(|| format!("{}: correction #{}", path, i + 1))?;
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn reading(site: &str, ts: &str, do_mg_l: f64) -> RawReading {
        RawReading {
            datetime: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            site: site.to_string(),
            depth_m: Some(0.5),
            do_mg_l: Some(do_mg_l),
            do_sat_pct: Some(90.0),
            temp_c: Some(15.0),
            chloride_mg_l: None,
            spcond_us_cm: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rule(site: &str, start: &str, end: &str, metrics: Vec<Metric>, action: Action) -> Correction {
        Correction {
            site: site.to_string(),
            start: date(start),
            end: date(end),
            metrics,
            action,
            stage: Stage::Raw,
            note: None,
        }
    }

    fn sample() -> Vec<RawReading> {
        vec![
            reading("A", "2019-06-01 00:00", 8.0),
            reading("A", "2019-06-02 00:00", 8.5),
            reading("A", "2019-06-03 23:45", 9.0),
            reading("B", "2019-06-02 12:00", 7.0),
        ]
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let mut records = sample();
        let rules = vec![rule(
            "A",
            "2019-06-02",
            "2019-06-03",
            vec![Metric::DissolvedOxygen],
            Action::SetMissing,
        )];
        let outcomes = apply_corrections(&mut records, &rules, Stage::Raw).unwrap();

        assert_eq!(outcomes[0].rows_matched, 2);
        assert_eq!(records[0].do_mg_l, Some(8.0));
        assert_eq!(records[1].do_mg_l, None);
        assert_eq!(records[2].do_mg_l, None);
        assert_eq!(records[3].do_mg_l, Some(7.0));
    }

    #[test]
    fn test_wildcard_site_and_drop_rows() {
        let mut records = sample();
        let rules = vec![rule("*", "2019-06-02", "2019-06-02", vec![], Action::DropRows)];
        let outcomes = apply_corrections(&mut records, &rules, Stage::Raw).unwrap();

        assert_eq!(outcomes[0].rows_dropped, 2);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.date() != date("2019-06-02")));
    }

    #[test]
    fn test_numeric_actions() {
        let mut records = sample();
        let rules = vec![
            rule("A", "2019-06-01", "2019-06-01", vec![Metric::DissolvedOxygen], Action::Offset { delta: -0.5 }),
            rule("A", "2019-06-02", "2019-06-02", vec![Metric::DissolvedOxygen], Action::Scale { factor: 2.0 }),
            rule("B", "2019-06-02", "2019-06-02", vec![Metric::Temperature], Action::Replace { value: 14.0 }),
            rule("A", "2019-06-03", "2019-06-03", vec![Metric::DissolvedOxygen], Action::CapAbove { max: 8.9 }),
        ];
        apply_corrections(&mut records, &rules, Stage::Raw).unwrap();

        assert_eq!(records[0].do_mg_l, Some(7.5));
        assert_eq!(records[1].do_mg_l, Some(17.0));
        assert_eq!(records[2].do_mg_l, None);
        assert_eq!(records[3].temp_c, Some(14.0));
    }

    #[test]
    fn test_rules_apply_in_order() {
        let mut records = sample();
        let rules = vec![
            rule("A", "2019-06-01", "2019-06-01", vec![Metric::DissolvedOxygen], Action::Scale { factor: 2.0 }),
            rule("A", "2019-06-01", "2019-06-01", vec![Metric::DissolvedOxygen], Action::CapAbove { max: 10.0 }),
        ];
        apply_corrections(&mut records, &rules, Stage::Raw).unwrap();
        assert_eq!(records[0].do_mg_l, None);
    }

    #[test]
    fn test_other_stage_is_skipped() {
        let mut records = sample();
        let mut r = rule("A", "2019-06-01", "2019-06-03", vec![Metric::DissolvedOxygen], Action::SetMissing);
        r.stage = Stage::Daily;
        let outcomes = apply_corrections(&mut records, &[r], Stage::Raw).unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(records[0].do_mg_l, Some(8.0));
    }

    #[test]
    fn test_unchanged_values_not_counted() {
        let mut records = sample();
        let rules = vec![rule("B", "2019-06-02", "2019-06-02", vec![Metric::Chloride], Action::SetMissing)];
        let outcomes = apply_corrections(&mut records, &rules, Stage::Raw).unwrap();
        assert_eq!(outcomes[0].rows_matched, 1);
        assert_eq!(outcomes[0].values_changed, 0);
    }

    #[test]
    fn test_daily_edits_apply_to_extremes_separately() {
        let day = date("2019-06-01");
        let mut rec = DailyRecord::new("A", day);
        rec.do_mg_l = Some(8.0);
        rec.do_min_mg_l = Some(4.0);
        rec.temp_c = Some(15.0);
        rec.temp_max_c = Some(22.0);
        let mut records = vec![rec];

        let daily = |metrics: Vec<Metric>, action: Action| Correction {
            stage: Stage::Daily,
            ..rule("A", "2019-06-01", "2019-06-01", metrics, action)
        };
        let both = vec![Metric::DissolvedOxygen, Metric::Temperature];
        let rules = vec![
            daily(both.clone(), Action::Offset { delta: 0.5 }),
            daily(both, Action::Scale { factor: 2.0 }),
        ];
        let outcomes = apply_corrections(&mut records, &rules, Stage::Daily).unwrap();
        assert_eq!(outcomes[0].values_changed, 2);
        assert_eq!(records[0].do_mg_l, Some(17.0));
        assert_eq!(records[0].do_min_mg_l, Some(9.0));
        assert_eq!(records[0].temp_c, Some(31.0));
        assert_eq!(records[0].temp_max_c, Some(45.0));

        let caps = vec![daily(vec![Metric::Temperature], Action::CapAbove { max: 40.0 })];
        apply_corrections(&mut records, &caps, Stage::Daily).unwrap();
        assert_eq!(records[0].temp_c, Some(31.0));
        assert_eq!(records[0].temp_max_c, None);

        let blank = vec![daily(vec![Metric::DissolvedOxygen], Action::SetMissing)];
        apply_corrections(&mut records, &blank, Stage::Daily).unwrap();
        assert_eq!(records[0].do_mg_l, None);
        assert_eq!(records[0].do_min_mg_l, None);
    }

    #[test]
    fn test_validation_errors() {
        let backwards = rule("A", "2019-06-03", "2019-06-01", vec![Metric::Depth], Action::SetMissing);
        assert!(backwards.validate().is_err());

        let no_metrics = rule("A", "2019-06-01", "2019-06-03", vec![], Action::SetMissing);
        assert!(no_metrics.validate().is_err());

        let mut records = sample();
        assert!(apply_corrections(&mut records, &[no_metrics], Stage::Raw).is_err());
    }

    #[test]
    fn test_correction_json_shape() {
        let json = r#"[
            {"site": "A", "start": "2019-06-01", "end": "2019-06-14",
             "metrics": ["do_mg_l", "do_sat_pct"],
             "action": {"type": "offset", "delta": 0.3},
             "note": "calibration drift"},
            {"site": "*", "start": "2020-01-01", "end": "2020-01-01",
             "action": {"type": "drop_rows"}, "stage": "daily"}
        ]"#;
        let rules: Vec<Correction> = serde_json::from_str(json).unwrap();
        assert_eq!(rules[0].action, Action::Offset { delta: 0.3 });
        assert_eq!(rules[0].stage, Stage::Raw);
        assert_eq!(rules[1].stage, Stage::Daily);
        assert!(rules[1].metrics.is_empty());
    }

    #[test]
    fn test_load_corrections_validates() {
        let path = std::env::temp_dir().join("wq_trends_bad_rules.json");
        std::fs::write(
            &path,
            r#"[{"site": "A", "start": "2019-06-05", "end": "2019-06-01", "metrics": ["temp_c"], "action": {"type": "set_missing"}}]"#,
        )
        .unwrap();
        let err = load_corrections(path.to_str().unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("correction #1"));
        std::fs::remove_file(&path).unwrap();
    }
}
