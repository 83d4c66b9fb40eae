//! Row access for the model layer.

use std::collections::HashMap;

/// A single value read from an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Num(f64),
    Level(String),
}

impl Cell {
    /// The value as a factor level. Whole numbers print without decimals
    /// so `factor(year)` yields levels like `2019`.
    pub fn as_level(&self) -> String {
        match self {
            Cell::Level(s) => s.clone(),
            Cell::Num(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
            Cell::Num(v) => format!("{}", v),
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Cell::Num(v) => Some(*v),
            Cell::Level(s) => s.trim().parse().ok(),
        }
    }
}

/// Anything a formula can be evaluated against.
pub trait Observation {
    /// The value of column `name`, `None` when missing or unknown.
    fn cell(&self, name: &str) -> Option<Cell>;

    /// Whether `name` is a column at all, as opposed to a missing value.
    fn has_column(&self, name: &str) -> bool;
}

impl Observation for HashMap<String, Cell> {
    fn cell(&self, name: &str) -> Option<Cell> {
        self.get(name).cloned()
    }

    fn has_column(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl<O: Observation + ?Sized> Observation for &O {
    fn cell(&self, name: &str) -> Option<Cell> {
        (**self).cell(name)
    }

    fn has_column(&self, name: &str) -> bool {
        (**self).has_column(name)
    }
}

/// Rows read from an arbitrary CSV, where a present-but-empty field is a
/// missing value rather than an unknown column.
impl Observation for HashMap<String, Option<Cell>> {
    fn cell(&self, name: &str) -> Option<Cell> {
        self.get(name).cloned().flatten()
    }

    fn has_column(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

/// Interprets a CSV field: numbers and `true`/`false` become numeric,
/// empty and `NA` fields are missing, anything else is a factor level.
pub fn parse_cell(raw: &str) -> Option<Cell> {
    let raw = raw.trim();
    match raw {
        "" | "NA" | "NaN" => None,
        "true" | "TRUE" => Some(Cell::Num(1.0)),
        "false" | "FALSE" => Some(Cell::Num(0.0)),
        _ => Some(
            raw.parse::<f64>()
                .map(Cell::Num)
                .unwrap_or_else(|_| Cell::Level(raw.to_string())),
        ),
    }
}
