//! Configuration Loading
//!
//! Resolution order, later sources winning:
//! 1. Built-in defaults
//! 2. YAML config file (`--config`, `$METIS_CONFIG`, or `~/.metis/config.yaml`)
//! 3. Plugins file (`plugins_file`, or `~/.metis/plugins.yaml`)
//! 4. Environment: every leaf `a.b.c` is overridden by `METIS_A_B_C`
//!
//! Staging parameters are free-form, so they are gathered from every
//! `METIS_METEL_STAGING_PARAMETERS_<KEY>` variable instead.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{MetisError, Result};

use super::{Config, PluginConfig};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "METIS";

/// Prefix of staging parameter variables.
const STAGING_PARAMETERS_PREFIX: &str = "METIS_METEL_STAGING_PARAMETERS_";

/// Layout of a standalone plugins file.
#[derive(Deserialize, Debug, Default)]
struct PluginsFile {
    #[serde(default)]
    plugins: Vec<PluginConfig>,
}

/// Loads the configuration from files and the process environment.
pub fn load(explicit_path: Option<&Path>) -> Result<Config> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    load_from(explicit_path, &vars)
}

/// Loads the configuration using the given environment variables.
pub fn load_from(explicit_path: Option<&Path>, vars: &HashMap<String, String>) -> Result<Config> {
    let home = vars.get("HOME").map(PathBuf::from);

    let mut config = match config_file_path(explicit_path, vars, home.as_deref())? {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            let content = fs::read_to_string(&path)?;
            serde_yaml::from_str::<Config>(&content)?
        }
        None => {
            debug!("No configuration file found, using defaults");
            Config::default()
        }
    };

    if let Some(raw) = vars.get("METIS_PLUGINS_FILE") {
        config.plugins_file = raw.clone();
    }
    if let Some(path) = plugins_file_path(&config, home.as_deref()) {
        info!("Loading plugins from {}", path.display());
        let content = fs::read_to_string(&path)?;
        let file: PluginsFile = serde_yaml::from_str(&content)?;
        config.plugins.extend(file.plugins);
    }

    let mut tree = serde_json::to_value(&config)?;
    apply_env_overrides(&mut tree, ENV_PREFIX, vars)?;
    let mut config: Config = serde_json::from_value(tree)?;

    let parameters = staging_parameters(vars);
    if !parameters.is_empty() {
        config.metel.staging.parameters = parameters;
    }

    Ok(config)
}

/// Picks the configuration file, if any.
fn config_file_path(
    explicit_path: Option<&Path>,
    vars: &HashMap<String, String>,
    home: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let requested = explicit_path
        .map(Path::to_path_buf)
        .or_else(|| vars.get("METIS_CONFIG").map(PathBuf::from));

    if let Some(path) = requested {
        if !path.is_file() {
            return Err(MetisError::Config(format!(
                "configuration file does not exist: {}",
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    Ok(home
        .map(|h| h.join(".metis").join("config.yaml"))
        .filter(|p| p.is_file()))
}

fn plugins_file_path(config: &Config, home: Option<&Path>) -> Option<PathBuf> {
    if !config.plugins_file.is_empty() {
        return Some(PathBuf::from(&config.plugins_file)).filter(|p| p.is_file());
    }
    home.map(|h| h.join(".metis").join("plugins.yaml"))
        .filter(|p| p.is_file())
}

/// Overrides scalar leaves of `value` from `{prefix}_{KEY}` variables.
///
/// Lists and the free-form staging parameters are left alone.
fn apply_env_overrides(
    value: &mut Value,
    prefix: &str,
    vars: &HashMap<String, String>,
) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let name = format!("{}_{}", prefix, key.to_uppercase());
                if name == "METIS_METEL_STAGING_PARAMETERS" {
                    continue;
                }
                apply_env_overrides(child, &name, vars)?;
            }
            Ok(())
        }
        Value::Array(_) => Ok(()),
        leaf => {
            if let Some(raw) = vars.get(prefix) {
                debug!("Configuration override from {}", prefix);
                *leaf = parse_like(leaf, raw).ok_or_else(|| {
                    MetisError::Config(format!("invalid value for {}: {}", prefix, raw))
                })?;
            }
            Ok(())
        }
    }
}

/// Parses `raw` into the JSON type of `current`.
fn parse_like(current: &Value, raw: &str) -> Option<Value> {
    match current {
        Value::Bool(_) => raw.trim().to_ascii_lowercase().parse::<bool>().ok().map(Value::Bool),
        Value::Number(n) if n.is_f64() => raw.trim().parse::<f64>().ok().map(Value::from),
        Value::Number(_) => raw.trim().parse::<i64>().ok().map(Value::from),
        _ => Some(Value::String(raw.to_string())),
    }
}

fn staging_parameters(vars: &HashMap<String, String>) -> BTreeMap<String, String> {
    vars.iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(STAGING_PARAMETERS_PREFIX)
                .filter(|k| !k.is_empty())
                .map(|k| (k.to_string(), value.clone()))
        })
        .collect()
}
