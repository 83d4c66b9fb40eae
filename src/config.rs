//! Pipeline configuration, stored as a JSON file on disk:
//!
//! ```json
//! {
//!   "inputs": {
//!     "instruments": ["data/site_a.csv", "https://example.org/site_b.csv"],
//!     "weather": "data/ghcn.csv",
//!     "weather_units": "standard",
//!     "sites": "data/sites.csv"
//!   },
//!   "corrections": "data/corrections.json",
//!   "derive": { "reference_site": "A" },
//!   "models": [
//!     { "name": "do_trend", "formula": "do_mg_l ~ site * time + flow_index",
//!       "ar1": true, "means": ["site"] }
//!   ],
//!   "output": { "dir": "output", "gzip": true }
//! }
//! ```
//!
//! Every section except `inputs` may be omitted. Relative paths are
//! resolved against the directory of the config file.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregate::ChlorideEstimate;
use crate::cleaning::{Correction, QcConfig, load_corrections};
use crate::derive::DeriveConfig;
use crate::ingest::WeatherUnits;
use crate::models::{FitOptions, Formula, ModelKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputsConfig {
    /// Instrument exports; one or more files or URLs.
    pub instruments: Vec<String>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub weather_units: WeatherUnits,
    #[serde(default)]
    pub sites: Option<String>,
}

/// Corrections are either listed inline or kept in a separate JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectionsSource {
    Inline(Vec<Correction>),
    File(String),
}

impl Default for CorrectionsSource {
    fn default() -> Self {
        CorrectionsSource::Inline(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Days with fewer readings than this are dropped.
    pub min_readings: u32,
    /// Chloride estimated from conductance on days without a chloride value.
    pub chloride_from_spcond: Option<ChlorideEstimate>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            min_readings: 1,
            chloride_from_spcond: None,
        }
    }
}

fn default_points() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    pub var: String,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default = "default_points")]
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub formula: String,
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(flatten)]
    pub options: FitOptions,
    /// Restrict the fit to these sites; empty means all.
    #[serde(default)]
    pub sites: Vec<String>,
    /// Factors to report marginal means and contrasts for.
    #[serde(default)]
    pub means: Vec<String>,
    #[serde(default)]
    pub trend: Option<TrendConfig>,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<Formula> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("model name {:?} must be non-empty and file-name safe", self.name);
        }
        let formula = Formula::parse(&self.formula)
            .with_context(|| format!("model {}", self.name))?;
        if self.kind == ModelKind::Gls && formula.has_smooths() {
            bail!("model {}: smooth terms need kind \"gam\"", self.name);
        }
        Ok(formula)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub gzip: bool,
    pub plots: bool,
    /// Defaults to `<dir>/cache`; `WQ_CACHE_DIR` overrides both.
    pub cache_dir: Option<PathBuf>,
    /// Run statistics are appended here; relative to `dir`.
    pub runs_csv: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("output"),
            gzip: false,
            plots: true,
            cache_dir: None,
            runs_csv: "runs.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub inputs: InputsConfig,
    #[serde(default)]
    pub corrections: CorrectionsSource,
    #[serde(default)]
    pub qc: QcConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub derive: DeriveConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub output: OutputConfig,

    /// Directory of the config file, for relative paths.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

impl PipelineConfig {
    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.instruments.is_empty() {
            bail!("inputs.instruments lists no files");
        }
        let mut names = std::collections::HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !names.insert(model.name.as_str()) {
                bail!("model name {:?} is used twice", model.name);
            }
        }
        if let CorrectionsSource::Inline(rules) = &self.corrections {
            for (i, rule) in rules.iter().enumerate() {
                rule.validate()
                    .with_context(|| format!("correction #{}", i + 1))?;
            }
        }
        Ok(())
    }

    /// Resolves a file path or URL from the config.
    pub fn source(&self, source: &str) -> String {
        if is_url(source) || Path::new(source).is_absolute() {
            source.to_string()
        } else {
            self.base_dir.join(source).to_string_lossy().into_owned()
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base_dir.join(&self.output.dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.output.cache_dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.output_dir().join("cache"),
        }
    }

    /// The correction rules, reading the rules file if one is configured.
    pub fn corrections(&self) -> Result<Vec<Correction>> {
        match &self.corrections {
            CorrectionsSource::Inline(rules) => Ok(rules.clone()),
            CorrectionsSource::File(path) => load_corrections(&self.source(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::Stage;
    use std::fs;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("wq_trends_test_config");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let path = write_temp("minimal.json", r#"{"inputs": {"instruments": ["a.csv"]}}"#);
        let cfg = PipelineConfig::load(&path).unwrap();

        assert_eq!(cfg.aggregation.min_readings, 1);
        assert_eq!(cfg.derive.antecedent_days, 7);
        assert_eq!(cfg.output.dir, PathBuf::from("output"));
        assert!(cfg.corrections().unwrap().is_empty());
        assert_eq!(cfg.source("a.csv"), path.parent().unwrap().join("a.csv").to_string_lossy());
        assert_eq!(cfg.source("https://x.org/a.csv"), "https://x.org/a.csv");
        assert_eq!(cfg.cache_dir(), path.parent().unwrap().join("output").join("cache"));
    }

    #[test]
    fn test_models_and_inline_corrections() {
        let path = write_temp(
            "full.json",
            r#"{
                "inputs": {"instruments": ["a.csv"], "weather_units": "standard"},
                "corrections": [
                    {"site": "A", "start": "2020-01-01", "end": "2020-01-31",
                     "metrics": ["do_mg_l"], "action": {"type": "set_missing"}, "stage": "daily"}
                ],
                "models": [
                    {"name": "do", "formula": "do_mg_l ~ site", "ar1": true, "means": ["site"]},
                    {"name": "season", "formula": "do_mg_l ~ s(doy, bs=cc)", "kind": "gam",
                     "trend": {"var": "doy"}}
                ]
            }"#,
        );
        let cfg = PipelineConfig::load(&path).unwrap();

        assert_eq!(cfg.inputs.weather_units, WeatherUnits::Standard);
        assert_eq!(cfg.corrections().unwrap()[0].stage, Stage::Daily);
        assert!(cfg.models[0].options.ar1);
        assert_eq!(cfg.models[0].options.group.as_deref(), Some("site"));
        assert_eq!(cfg.models[1].kind, ModelKind::Gam);
        assert_eq!(cfg.models[1].trend.as_ref().unwrap().points, 50);
    }

    #[test]
    fn test_invalid_configs() {
        let gls_smooth = write_temp(
            "bad_kind.json",
            r#"{"inputs": {"instruments": ["a.csv"]},
                "models": [{"name": "x", "formula": "y ~ s(doy)"}]}"#,
        );
        assert!(PipelineConfig::load(&gls_smooth).is_err());

        let dup = write_temp(
            "dup.json",
            r#"{"inputs": {"instruments": ["a.csv"]},
                "models": [{"name": "x", "formula": "y ~ a"}, {"name": "x", "formula": "y ~ b"}]}"#,
        );
        assert!(PipelineConfig::load(&dup).is_err());

        let no_inputs = write_temp("empty.json", r#"{"inputs": {"instruments": []}}"#);
        assert!(PipelineConfig::load(&no_inputs).is_err());

        let bad_name = write_temp(
            "bad_name.json",
            r#"{"inputs": {"instruments": ["a.csv"]},
                "models": [{"name": "../x", "formula": "y ~ a"}]}"#,
        );
        assert!(PipelineConfig::load(&bad_name).is_err());
    }
}
