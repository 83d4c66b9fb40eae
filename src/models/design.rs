//! Turning a formula and a set of observations into a design matrix.
//!
//! The [`DesignSpec`] records everything learned from the training rows
//! (factor levels, covariate means and ranges, spline bases) so the same
//! columns can be rebuilt later for prediction and marginal means, after
//! the model has been cached to disk.

use anyhow::{Result, bail};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::basis::SplineBasis;
use super::formula::{BasisKind, Formula, SmoothSpec, Term, Transform, Variable};
use super::frame::{Cell, Observation};

/// One factor of an interaction column group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Numeric { var: Variable, mean: f64 },
    Factor { var: Variable, levels: Vec<String> },
}

/// A group of adjacent design columns produced by one formula term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Intercept,
    Numeric {
        var: Variable,
        mean: f64,
        min: f64,
        max: f64,
    },
    /// Treatment contrasts: one column per non-reference level.
    Factor { var: Variable, levels: Vec<String> },
    Interaction { parts: Vec<Part> },
    Spline {
        spec: SmoothSpec,
        basis: SplineBasis,
        mean: f64,
    },
    /// One ridge-penalized indicator column per level.
    RandomEffect { spec: SmoothSpec, levels: Vec<String> },
}

impl Block {
    pub fn width(&self) -> usize {
        match self {
            Block::Intercept | Block::Numeric { .. } => 1,
            Block::Factor { levels, .. } => levels.len() - 1,
            Block::Interaction { parts } => parts.iter().map(part_width).product(),
            Block::Spline { basis, .. } => basis.dim(),
            Block::RandomEffect { levels, .. } => levels.len(),
        }
    }

    /// Term label as it appears in summaries.
    pub fn label(&self) -> String {
        match self {
            Block::Intercept => "(Intercept)".to_string(),
            Block::Numeric { var, .. } | Block::Factor { var, .. } => var.to_string(),
            Block::Interaction { parts } => parts
                .iter()
                .map(|p| match p {
                    Part::Numeric { var, .. } | Part::Factor { var, .. } => var.to_string(),
                })
                .collect::<Vec<_>>()
                .join(":"),
            Block::Spline { spec, .. } | Block::RandomEffect { spec, .. } => {
                format!("s({})", spec.var)
            }
        }
    }

    pub fn is_smooth(&self) -> bool {
        matches!(self, Block::Spline { .. } | Block::RandomEffect { .. })
    }

    fn column_names(&self) -> Vec<String> {
        match self {
            Block::Intercept => vec!["(Intercept)".to_string()],
            Block::Numeric { var, .. } => vec![var.to_string()],
            Block::Factor { var, levels } => levels[1..]
                .iter()
                .map(|l| format!("{}{}", var, l))
                .collect(),
            Block::Interaction { parts } => {
                let mut names = vec![String::new()];
                for part in parts {
                    let piece: Vec<String> = match part {
                        Part::Numeric { var, .. } => vec![var.to_string()],
                        Part::Factor { var, levels } => levels[1..]
                            .iter()
                            .map(|l| format!("{}{}", var, l))
                            .collect(),
                    };
                    names = names
                        .iter()
                        .flat_map(|prefix| {
                            piece.iter().map(move |p| {
                                if prefix.is_empty() {
                                    p.clone()
                                } else {
                                    format!("{}:{}", prefix, p)
                                }
                            })
                        })
                        .collect();
                }
                names
            }
            Block::Spline { spec, basis, .. } => (1..=basis.dim())
                .map(|i| format!("s({}).{}", spec.var, i))
                .collect(),
            Block::RandomEffect { spec, levels } => levels
                .iter()
                .map(|l| format!("s({}).{}", spec.var, l))
                .collect(),
        }
    }
}

fn part_width(part: &Part) -> usize {
    match part {
        Part::Numeric { .. } => 1,
        Part::Factor { levels, .. } => levels.len() - 1,
    }
}

/// How a variable is set when a design row is evaluated.
pub(crate) enum LevelSetting {
    Level(String),
    /// Equal-weight average over every level.
    Average,
    Missing,
}

/// Source of variable values for one design row.
pub(crate) trait Resolver {
    /// Numeric value on the transformed scale. `mean` is the training
    /// mean, used by reference grids.
    fn numeric(&self, var: &Variable, mean: f64) -> Option<f64>;
    fn level(&self, var: &Variable) -> LevelSetting;
}

fn transformed(var: &Variable, raw: f64) -> Option<f64> {
    match var.transform {
        Transform::Identity => Some(raw),
        Transform::Log if raw > 0.0 => Some(raw.ln()),
        Transform::Log => None,
    }
}

/// Reads values straight from an observation.
pub(crate) struct ObservationResolver<'a, O: Observation + ?Sized>(pub &'a O);

impl<O: Observation + ?Sized> Resolver for ObservationResolver<'_, O> {
    fn numeric(&self, var: &Variable, _mean: f64) -> Option<f64> {
        let raw = self.0.cell(&var.name)?.as_num()?;
        transformed(var, raw)
    }

    fn level(&self, var: &Variable) -> LevelSetting {
        match self.0.cell(&var.name) {
            Some(cell) => LevelSetting::Level(cell.as_level()),
            None => LevelSetting::Missing,
        }
    }
}

/// Reference-grid values: fixed settings where given, otherwise training
/// means for covariates and equal-weight averages for factors.
pub(crate) struct GridResolver<'a> {
    pub fixed: &'a HashMap<String, Cell>,
}

impl Resolver for GridResolver<'_> {
    fn numeric(&self, var: &Variable, mean: f64) -> Option<f64> {
        match self.fixed.get(&var.name) {
            Some(cell) => transformed(var, cell.as_num()?),
            None => Some(mean),
        }
    }

    fn level(&self, var: &Variable) -> LevelSetting {
        match self.fixed.get(&var.name) {
            Some(cell) => LevelSetting::Level(cell.as_level()),
            None => LevelSetting::Average,
        }
    }
}

/// Contrast-coded values of a factor. `full` gives one column per level
/// instead of dropping the reference.
fn factor_values(
    var: &Variable,
    levels: &[String],
    setting: LevelSetting,
    full: bool,
) -> Result<Option<Vec<f64>>> {
    let skip = if full { 0 } else { 1 };
    let n = levels.len();
    match setting {
        LevelSetting::Missing => Ok(None),
        LevelSetting::Average => Ok(Some(vec![1.0 / n as f64; n - skip])),
        LevelSetting::Level(level) => {
            let Some(idx) = levels.iter().position(|l| *l == level) else {
                bail!("level {:?} of {} was not seen when fitting", level, var);
            };
            Ok(Some(
                (skip..n).map(|j| if j == idx { 1.0 } else { 0.0 }).collect(),
            ))
        }
    }
}

/// Appends the block's values to `out`. `Ok(false)` means a value was
/// missing and the row cannot be used.
pub(crate) fn fill_block(block: &Block, r: &dyn Resolver, out: &mut Vec<f64>) -> Result<bool> {
    match block {
        Block::Intercept => out.push(1.0),
        Block::Numeric { var, mean, .. } => match r.numeric(var, *mean) {
            Some(v) => out.push(v),
            None => return Ok(false),
        },
        Block::Factor { var, levels } => match factor_values(var, levels, r.level(var), false)? {
            Some(v) => out.extend(v),
            None => return Ok(false),
        },
        Block::Interaction { parts } => {
            let mut acc = vec![1.0];
            for part in parts {
                let piece = match part {
                    Part::Numeric { var, mean } => r.numeric(var, *mean).map(|v| vec![v]),
                    Part::Factor { var, levels } => {
                        factor_values(var, levels, r.level(var), false)?
                    }
                };
                let Some(piece) = piece else {
                    return Ok(false);
                };
                acc = acc
                    .iter()
                    .flat_map(|a| piece.iter().map(move |p| a * p))
                    .collect();
            }
            out.extend(acc);
        }
        Block::Spline { spec, basis, mean } => {
            match r.numeric(&Variable::plain(&spec.var), *mean) {
                Some(x) => out.extend(basis.row(x)),
                None => return Ok(false),
            }
        }
        Block::RandomEffect { spec, levels } => {
            let var = Variable::plain(&spec.var);
            match factor_values(&var, levels, r.level(&var), true)? {
                Some(v) => out.extend(v),
                None => return Ok(false),
            }
        }
    }
    Ok(true)
}

/// Error-correlation grouping for the model frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameOptions {
    /// Observations are correlated only within a group (e.g. `site`).
    pub group_by: Option<String>,
    /// Within a group, observations are ordered by this column (e.g. `time`).
    pub order_by: Option<String>,
}

/// A smoothing penalty acting on a contiguous block of coefficients.
#[derive(Debug, Clone)]
pub struct Penalty {
    pub label: String,
    pub start: usize,
    pub size: usize,
    pub matrix: DMatrix<f64>,
    pub rank: usize,
}

/// The numeric model frame: response, design matrix and group layout,
/// rows sorted by group then order column.
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub y: DVector<f64>,
    pub x: DMatrix<f64>,
    /// Lengths of consecutive runs of rows that share a group.
    pub group_sizes: Vec<usize>,
    pub penalties: Vec<Penalty>,
    pub n_dropped: usize,
}

impl ModelFrame {
    pub fn n(&self) -> usize {
        self.y.len()
    }

    pub fn p(&self) -> usize {
        self.x.ncols()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    pub formula: Formula,
    pub blocks: Vec<Block>,
    pub column_names: Vec<String>,
}

enum Kind {
    Numeric,
    Factor,
}

fn variable_kind<O: Observation>(var: &Variable, rows: &[O]) -> Kind {
    if var.as_factor {
        return Kind::Factor;
    }
    let is_level = rows
        .iter()
        .filter_map(|r| r.cell(&var.name))
        .any(|c| matches!(c, Cell::Level(_)));
    if is_level { Kind::Factor } else { Kind::Numeric }
}

/// Training-time summaries gathered over complete rows.
fn numeric_stats(var: &Variable, rows: &[&dyn Observation]) -> (f64, f64, f64) {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|r| ObservationResolver(*r).numeric(var, 0.0))
        .collect();
    let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (mean, min, max)
}

/// Distinct levels, numeric-looking levels in numeric order.
fn levels_of(var: &Variable, rows: &[&dyn Observation]) -> Vec<String> {
    let mut levels: Vec<String> = rows
        .iter()
        .filter_map(|r| r.cell(&var.name).map(|c| c.as_level()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    levels.sort_by(|a, b| match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    levels
}

fn is_present(var: &Variable, kind: &Kind, row: &dyn Observation) -> bool {
    match kind {
        Kind::Factor => row.cell(&var.name).is_some(),
        Kind::Numeric => ObservationResolver(row).numeric(var, 0.0).is_some(),
    }
}

impl DesignSpec {
    /// Learns the design from training rows and builds the model frame.
    ///
    /// Rows missing the response, any term variable, or the grouping and
    /// ordering columns are dropped.
    pub fn build<O: Observation>(
        formula: &Formula,
        rows: &[O],
        opts: &FrameOptions,
    ) -> Result<(DesignSpec, ModelFrame)> {
        let Some(first) = rows.first() else {
            bail!("no observations to fit {}", formula);
        };
        let mut needed: Vec<&str> = formula.columns();
        needed.extend(opts.group_by.as_deref());
        needed.extend(opts.order_by.as_deref());
        for col in &needed {
            if !first.has_column(col) {
                bail!("unknown column {:?} in {}", col, formula);
            }
        }

        // every variable the formula touches, with its coding
        let mut vars: Vec<(Variable, Kind)> = vec![(formula.response.clone(), Kind::Numeric)];
        for term in &formula.terms {
            match term {
                Term::Main(v) => vars.push((v.clone(), variable_kind(v, rows))),
                Term::Interaction(vs) => {
                    vars.extend(vs.iter().map(|v| (v.clone(), variable_kind(v, rows))))
                }
                Term::Smooth(s) => {
                    let kind = match s.basis {
                        BasisKind::RandomEffect => Kind::Factor,
                        _ => Kind::Numeric,
                    };
                    vars.push((Variable::plain(&s.var), kind));
                }
            }
        }
        if let Some(g) = &opts.group_by {
            vars.push((Variable::plain(g), Kind::Factor));
        }
        if let Some(o) = &opts.order_by {
            vars.push((Variable::plain(o), Kind::Numeric));
        }

        let complete: Vec<&dyn Observation> = rows
            .iter()
            .filter(|r| vars.iter().all(|(v, k)| is_present(v, k, *r)))
            .map(|r| r as &dyn Observation)
            .collect();
        let n_dropped = rows.len() - complete.len();
        if complete.is_empty() {
            bail!("no complete observations for {}", formula);
        }

        let mut blocks = vec![Block::Intercept];
        for term in &formula.terms {
            blocks.push(Self::learn_block(term, rows, &complete)?);
        }
        let column_names = blocks.iter().flat_map(|b| b.column_names()).collect();
        let spec = DesignSpec {
            formula: formula.clone(),
            blocks,
            column_names,
        };

        let frame = spec.frame(&complete, opts, n_dropped)?;
        debug!(
            formula = %formula,
            n = frame.n(),
            p = frame.p(),
            dropped = n_dropped,
            "Model frame built"
        );
        Ok((spec, frame))
    }

    fn learn_block<O: Observation>(
        term: &Term,
        rows: &[O],
        complete: &[&dyn Observation],
    ) -> Result<Block> {
        let factor_levels = |var: &Variable| -> Result<Vec<String>> {
            let levels = levels_of(var, complete);
            if levels.len() < 2 {
                bail!("factor {} needs at least two levels, found {:?}", var, levels);
            }
            Ok(levels)
        };

        Ok(match term {
            Term::Main(var) => match variable_kind(var, rows) {
                Kind::Factor => Block::Factor {
                    var: var.clone(),
                    levels: factor_levels(var)?,
                },
                Kind::Numeric => {
                    let (mean, min, max) = numeric_stats(var, complete);
                    Block::Numeric {
                        var: var.clone(),
                        mean,
                        min,
                        max,
                    }
                }
            },
            Term::Interaction(vs) => {
                let mut parts = Vec::new();
                for var in vs {
                    parts.push(match variable_kind(var, rows) {
                        Kind::Factor => Part::Factor {
                            var: var.clone(),
                            levels: factor_levels(var)?,
                        },
                        Kind::Numeric => Part::Numeric {
                            var: var.clone(),
                            mean: numeric_stats(var, complete).0,
                        },
                    });
                }
                Block::Interaction { parts }
            }
            Term::Smooth(spec) => {
                let var = Variable::plain(&spec.var);
                match spec.basis {
                    BasisKind::RandomEffect => Block::RandomEffect {
                        spec: spec.clone(),
                        levels: factor_levels(&var)?,
                    },
                    kind => {
                        let xs: Vec<f64> = complete
                            .iter()
                            .filter_map(|r| ObservationResolver(*r).numeric(&var, 0.0))
                            .collect();
                        let basis = SplineBasis::new(kind, spec.k, &xs)
                            .map_err(|e| anyhow::anyhow!("{}: {}", spec, e))?;
                        Block::Spline {
                            spec: spec.clone(),
                            basis,
                            mean: numeric_stats(&var, complete).0,
                        }
                    }
                }
            }
        })
    }

    pub fn width(&self) -> usize {
        self.column_names.len()
    }

    /// Column range `(start, len)` of every block, in order.
    pub fn block_ranges(&self) -> Vec<(usize, usize)> {
        let mut start = 0;
        self.blocks
            .iter()
            .map(|b| {
                let range = (start, b.width());
                start += b.width();
                range
            })
            .collect()
    }

    pub(crate) fn row_with(&self, r: &dyn Resolver) -> Result<Option<Vec<f64>>> {
        let mut out = Vec::with_capacity(self.width());
        for block in &self.blocks {
            if !fill_block(block, r, &mut out)? {
                return Ok(None);
            }
        }
        Ok(Some(out))
    }

    /// Design row for a new observation; `None` if a value is missing.
    pub fn row<O: Observation + ?Sized>(&self, obs: &O) -> Result<Option<Vec<f64>>> {
        self.row_with(&ObservationResolver(obs))
    }

    /// Reference-grid row with the given settings fixed.
    pub fn grid_row(&self, fixed: &HashMap<String, Cell>) -> Result<Vec<f64>> {
        match self.row_with(&GridResolver { fixed })? {
            Some(row) => Ok(row),
            None => bail!("reference grid has a value outside the model's domain"),
        }
    }

    fn frame(
        &self,
        complete: &[&dyn Observation],
        opts: &FrameOptions,
        n_dropped: usize,
    ) -> Result<ModelFrame> {
        struct Keyed {
            group: String,
            order: f64,
            y: f64,
            x: Vec<f64>,
        }

        let mut keyed = Vec::with_capacity(complete.len());
        for (i, obs) in complete.iter().enumerate() {
            let resolver = ObservationResolver(*obs);
            let Some(y) = resolver.numeric(&self.formula.response, 0.0) else {
                continue;
            };
            let Some(x) = self.row_with(&resolver)? else {
                continue;
            };
            let group = opts
                .group_by
                .as_ref()
                .and_then(|g| obs.cell(g))
                .map(|c| c.as_level())
                .unwrap_or_default();
            let order = opts
                .order_by
                .as_ref()
                .and_then(|o| obs.cell(o))
                .and_then(|c| c.as_num())
                .unwrap_or(i as f64);
            keyed.push(Keyed { group, order, y, x });
        }

        keyed.sort_by(|a, b| {
            a.group
                .cmp(&b.group)
                .then(a.order.partial_cmp(&b.order).unwrap_or(Ordering::Equal))
        });

        let mut group_sizes: Vec<usize> = Vec::new();
        for (i, row) in keyed.iter().enumerate() {
            if i > 0 && keyed[i - 1].group == row.group {
                if let Some(last) = group_sizes.last_mut() {
                    *last += 1;
                }
            } else {
                group_sizes.push(1);
            }
        }

        let n = keyed.len();
        let p = self.width();
        let y = DVector::from_iterator(n, keyed.iter().map(|k| k.y));
        let x = DMatrix::from_fn(n, p, |i, j| keyed[i].x[j]);

        let mut penalties = Vec::new();
        for (block, (start, size)) in self.blocks.iter().zip(self.block_ranges()) {
            match block {
                Block::Spline { basis, .. } => {
                    let (matrix, rank) = basis.penalty();
                    penalties.push(Penalty {
                        label: block.label(),
                        start,
                        size,
                        matrix,
                        rank,
                    });
                }
                Block::RandomEffect { .. } => penalties.push(Penalty {
                    label: block.label(),
                    start,
                    size,
                    matrix: DMatrix::identity(size, size),
                    rank: size,
                }),
                _ => {}
            }
        }

        Ok(ModelFrame {
            y,
            x,
            group_sizes,
            penalties,
            n_dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(site: &str, x: Option<f64>, y: f64, t: f64) -> HashMap<String, Cell> {
        let mut m = HashMap::new();
        m.insert("site".to_string(), Cell::Level(site.to_string()));
        if let Some(x) = x {
            m.insert("x".to_string(), Cell::Num(x));
        }
        m.insert("y".to_string(), Cell::Num(y));
        m.insert("time".to_string(), Cell::Num(t));
        m
    }

    fn rows() -> Vec<HashMap<String, Cell>> {
        vec![
            obs("B", Some(1.0), 3.0, 2.0),
            obs("A", Some(2.0), 5.0, 2.0),
            obs("A", None, 7.0, 3.0),
            obs("C", Some(3.0), 9.0, 1.0),
            obs("A", Some(4.0), 4.0, 1.0),
        ]
    }

    #[test]
    fn test_columns_and_dropped_rows() {
        let f = Formula::parse("y ~ site + x + site:x").unwrap();
        let (spec, frame) = DesignSpec::build(&f, &rows(), &FrameOptions::default()).unwrap();

        assert_eq!(
            spec.column_names,
            vec!["(Intercept)", "siteB", "siteC", "x", "siteB:x", "siteC:x"]
        );
        assert_eq!(frame.n(), 4);
        assert_eq!(frame.n_dropped, 1);
        assert_eq!(frame.group_sizes, vec![4]);
    }

    #[test]
    fn test_rows_sorted_by_group_then_order() {
        let f = Formula::parse("y ~ x").unwrap();
        let opts = FrameOptions {
            group_by: Some("site".into()),
            order_by: Some("time".into()),
        };
        let (_, frame) = DesignSpec::build(&f, &rows(), &opts).unwrap();

        // A@t1 (y=4), A@t2 (y=5), B (y=3), C (y=9)
        assert_eq!(frame.y.as_slice(), &[4.0, 5.0, 3.0, 9.0]);
        assert_eq!(frame.group_sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_log_transform_drops_nonpositive() {
        let mut data = rows();
        data[0].insert("y".into(), Cell::Num(0.0));
        let f = Formula::parse("log(y) ~ x").unwrap();
        let (_, frame) = DesignSpec::build(&f, &data, &FrameOptions::default()).unwrap();
        assert_eq!(frame.n(), 3);
        assert!((frame.y[0] - 5.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_grid_row_averages_factor() {
        let f = Formula::parse("y ~ site + x").unwrap();
        let (spec, _) = DesignSpec::build(&f, &rows(), &FrameOptions::default()).unwrap();

        let avg = spec.grid_row(&HashMap::new()).unwrap();
        assert_eq!(avg.len(), 4);
        assert!((avg[1] - 1.0 / 3.0).abs() < 1e-12);
        assert!((avg[3] - 2.5).abs() < 1e-12);

        let mut fixed = HashMap::new();
        fixed.insert("site".to_string(), Cell::Level("C".into()));
        let c = spec.grid_row(&fixed).unwrap();
        assert_eq!(&c[..3], &[1.0, 0.0, 1.0]);

        fixed.insert("site".to_string(), Cell::Level("Z".into()));
        assert!(spec.grid_row(&fixed).is_err());
    }

    #[test]
    fn test_smooth_penalties() {
        let data: Vec<_> = (0..30)
            .map(|i| obs(if i % 2 == 0 { "A" } else { "B" }, Some(i as f64), i as f64, i as f64))
            .collect();
        let f = Formula::parse("y ~ s(x, k=6) + s(site, bs=re)").unwrap();
        let (spec, frame) = DesignSpec::build(&f, &data, &FrameOptions::default()).unwrap();

        assert_eq!(spec.width(), 1 + 5 + 2);
        assert_eq!(frame.penalties.len(), 2);
        assert_eq!(frame.penalties[0].start, 1);
        assert_eq!(frame.penalties[0].rank, 4);
        assert_eq!(frame.penalties[1].start, 6);
        assert_eq!(frame.penalties[1].size, 2);
    }

    #[test]
    fn test_unknown_column_and_single_level() {
        let f = Formula::parse("y ~ depth").unwrap();
        assert!(DesignSpec::build(&f, &rows(), &FrameOptions::default()).is_err());

        let one_site: Vec<_> = rows().into_iter().filter(|r| r["site"] == Cell::Level("A".into())).collect();
        let f = Formula::parse("y ~ site").unwrap();
        let err = DesignSpec::build(&f, &one_site, &FrameOptions::default()).unwrap_err();
        assert!(err.to_string().contains("two levels"));
    }

    #[test]
    fn test_factor_of_numeric_column() {
        let f = Formula::parse("y ~ factor(time)").unwrap();
        let (spec, _) = DesignSpec::build(&f, &rows(), &FrameOptions::default()).unwrap();
        assert_eq!(spec.column_names, vec!["(Intercept)", "factor(time)2", "factor(time)3"]);
    }
}
