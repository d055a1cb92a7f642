//! Table registry: model discovery and random table selection.
//!
//! Tables are registered explicitly, either inline in configuration or in
//! TOML model manifests listed in `MODELS_PATH_LIST`. Every tick rebuilds the
//! registry so manifest edits are picked up without a restart.

use crate::config::Config;
use crate::error::{ConfigError, DiscoveryError, Error};
use figment::Figment;
use figment::providers::{Format, Toml};
use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, trace, warn};

/// Module name given to tables registered inline in configuration.
pub const INLINE_MODULE: &str = "config";

/// Plain or schema-qualified SQL identifier. Table names are interpolated
/// into the poke query, so anything else is rejected.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
        .expect("identifier pattern is valid")
});

/// A table on one bind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct TableDescriptor {
    pub bind: String,
    pub name: String,
}

impl TableDescriptor {
    pub fn new(bind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            name: name.into(),
        }
    }

    pub fn has_valid_name(&self) -> bool {
        IDENTIFIER.is_match(&self.name)
    }
}

/// A named group of table descriptors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelModule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

impl ModelModule {
    /// Read a manifest file. The module name defaults to the file stem.
    pub fn from_manifest(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let mut module: ModelModule = Figment::from(Toml::string(&contents)).extract()?;
        if module.name.is_empty() {
            module.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
        }
        Ok(module)
    }
}

/// Resolve every configured model source.
///
/// Manifests that cannot be read or parsed are logged and skipped. Fails if
/// nothing is configured, or if nothing could be resolved at all.
pub fn discover(config: &Config) -> Result<Vec<ModelModule>, Error> {
    if !config.has_model_sources() {
        return Err(ConfigError::MissingModels.into());
    }

    let mut modules = Vec::with_capacity(config.models_path_list.len() + 1);
    if !config.tables.is_empty() {
        modules.push(ModelModule {
            name: INLINE_MODULE.to_string(),
            tables: config.tables.clone(),
        });
    }

    for path in &config.models_path_list {
        match ModelModule::from_manifest(path) {
            Ok(module) => {
                trace!(module = %module.name, tables = module.tables.len(), "Loaded model manifest");
                modules.push(module);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load model manifest, skipping");
            }
        }
    }

    if modules.is_empty() {
        return Err(DiscoveryError::Unresolvable {
            attempted: config.models_path_list.len(),
        }
        .into());
    }

    Ok(modules)
}

/// Group the tables of `modules` by bind, keeping only binds listed in `binds`.
///
/// Binds without any candidate table are absent from the result.
pub fn tables_by_bind<'a>(
    binds: impl IntoIterator<Item = &'a str>,
    modules: &[ModelModule],
) -> BTreeMap<String, Vec<TableDescriptor>> {
    let binds: BTreeSet<&str> = binds.into_iter().collect();
    let mut grouped: BTreeMap<String, Vec<TableDescriptor>> = BTreeMap::new();

    for module in modules {
        for table in &module.tables {
            if !binds.contains(table.bind.as_str()) {
                debug!(module = %module.name, bind = %table.bind, table = %table.name, "Ignoring table on unconfigured bind");
                continue;
            }
            if !table.has_valid_name() {
                warn!(module = %module.name, bind = %table.bind, table = %table.name, "Ignoring table with invalid identifier");
                continue;
            }
            grouped
                .entry(table.bind.clone())
                .or_default()
                .push(table.clone());
        }
    }

    grouped
}

/// Pick one table per bind, uniformly at random.
pub fn pick_tables<R: Rng + ?Sized>(
    grouped: &BTreeMap<String, Vec<TableDescriptor>>,
    rng: &mut R,
) -> Result<BTreeMap<String, TableDescriptor>, DiscoveryError> {
    let picked: BTreeMap<String, TableDescriptor> = grouped
        .iter()
        .filter_map(|(bind, tables)| {
            tables
                .choose(rng)
                .map(|table| (bind.clone(), table.clone()))
        })
        .collect();

    if picked.is_empty() {
        return Err(DiscoveryError::NoTables);
    }
    Ok(picked)
}

/// Discover, group and pick in one step, using the thread RNG.
pub fn random_tables(config: &Config) -> Result<BTreeMap<String, TableDescriptor>, Error> {
    let modules = discover(config)?;
    let grouped = tables_by_bind(config.bind_names(), &modules);
    Ok(pick_tables(&grouped, &mut rand::rng())?)
}
