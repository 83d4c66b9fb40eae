//! On-disk cache of fitted models.
//!
//! Each model is stored as `<name>.json` next to a fingerprint of what it
//! was fitted from. A cached model is reused only when the fingerprint of
//! the current formula, options and data matches.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::models::{FitOptions, FittedModel, ModelKind, Observation};

pub const CACHE_DIR_ENV: &str = "WQ_CACHE_DIR";

#[derive(Serialize, Deserialize)]
struct Entry {
    fingerprint: String,
    model: FittedModel,
}

pub struct ModelCache {
    dir: PathBuf,
}

fn write_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Fingerprint of a model's inputs: kind, formula, options and every value
/// of the columns the formula reads. XXH3 keeps it stable across builds.
pub fn fingerprint<O: Observation>(
    kind: ModelKind,
    formula: &str,
    columns: &[&str],
    opts: &FitOptions,
    rows: &[O],
) -> Result<String> {
    let mut hasher = Xxh3::new();
    write_str(&mut hasher, &serde_json::to_string(&kind)?);
    write_str(&mut hasher, formula);
    write_str(&mut hasher, &serde_json::to_string(opts)?);
    hasher.update(&(rows.len() as u64).to_le_bytes());
    for row in rows {
        for col in columns {
            match row.cell(col) {
                Some(cell) => match cell.as_num() {
                    Some(v) => {
                        hasher.update(&[0]);
                        hasher.update(&v.to_bits().to_le_bytes());
                    }
                    None => {
                        hasher.update(&[1]);
                        write_str(&mut hasher, &cell.as_level());
                    }
                },
                None => hasher.update(&[0xff]),
            }
        }
    }
    Ok(format!("{:016x}", hasher.digest()))
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ModelCache { dir: dir.into() }
    }

    /// Cache directory from `WQ_CACHE_DIR`, falling back to `default`.
    pub fn from_env(default: &Path) -> Self {
        match std::env::var(CACHE_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => ModelCache::new(dir),
            _ => ModelCache::new(default),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// The cached model for `name` if its fingerprint matches. Unreadable
    /// entries count as misses.
    pub fn load(&self, name: &str, fingerprint: &str) -> Option<FittedModel> {
        let path = self.path(name);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Entry>(&content) {
            Ok(entry) if entry.fingerprint == fingerprint => {
                info!(model = name, "Model loaded from cache");
                Some(entry.model)
            }
            Ok(_) => {
                debug!(model = name, "Cached model is stale");
                None
            }
            Err(e) => {
                warn!(model = name, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    pub fn store(&self, name: &str, fingerprint: &str, model: &FittedModel) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cache dir {}", self.dir.display()))?;
        let entry = Entry {
            fingerprint: fingerprint.to_string(),
            model: model.clone(),
        };
        let path = self.path(name);
        fs::write(&path, serde_json::to_string(&entry)?)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(model = name, path = %path.display(), "Model cached");
        Ok(())
    }
}
