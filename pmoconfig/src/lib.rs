//! # PMOPodcast configuration
//!
//! YAML backed configuration shared by every crate of the workspace:
//! - an embedded default document (`pmopodcast.yaml`)
//! - an optional `config.yaml` in the configuration directory, merged on top
//! - `PMOPODCAST_CONFIG__SECTION__KEY=value` environment overrides
//! - typed getters/setters, each write is persisted immediately
//!
//! Crates add their own typed accessors through extension traits
//! (see `pmopodcast::PodcastConfigExt`).
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let level = config.get_log_min_level()?;
//! println!("log level: {}", level);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info};

const DEFAULT_CONFIG: &str = include_str!("pmopodcast.yaml");

/// Directory override
pub const ENV_CONFIG_DIR: &str = "PMOPODCAST_CONFIG";
/// Prefix of per-key overrides, path segments separated by `__`
pub const ENV_PREFIX: &str = "PMOPODCAST_CONFIG__";

const CONFIG_DIR_NAME: &str = ".pmopodcast";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOPodcast configuration"));
}

/// Configuration document plus the file it is persisted to.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Loads the configuration rooted at `directory`.
    ///
    /// An empty `directory` is resolved, in order, from `PMOPODCAST_CONFIG`,
    /// `./.pmopodcast` and `~/.pmopodcast`. The directory is created when
    /// missing and the merged document is written back to `config.yaml`.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::locate_dir(directory);
        Self::ensure_usable_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);

        let mut document = lowercase_keys(serde_yaml::from_str(DEFAULT_CONFIG)?);
        match fs::read_to_string(&path) {
            Ok(text) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_str(&text)
                    .with_context(|| format!("invalid YAML in {}", path.display()))?;
                // an empty file parses as null
                if !external.is_null() {
                    merge_yaml(&mut document, &lowercase_keys(external));
                }
            }
            Err(_) => {
                info!(config_file = %path.display(), "No config file, using embedded defaults");
            }
        }

        apply_env_overrides(&mut document, env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(document),
        };
        config.save()?;
        Ok(config)
    }

    fn locate_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory taken from env");
            return PathBuf::from(from_env);
        }

        let local = PathBuf::from(CONFIG_DIR_NAME);
        if local.exists() {
            return local;
        }

        if let Some(home) = dirs::home_dir() {
            let in_home = home.join(CONFIG_DIR_NAME);
            if in_home.exists() {
                return in_home;
            }
        }

        local
    }

    fn ensure_usable_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
        }
        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }
        Ok(())
    }

    /// Directory holding `config.yaml`; relative managed directories resolve against it.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("configuration lock poisoned"))
    }

    /// Writes the whole document to `config.yaml`.
    pub fn save(&self) -> Result<()> {
        let yaml = {
            let data = self.lock()?;
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml)
            .with_context(|| format!("cannot write {}", self.path.display()))?;
        Ok(())
    }

    /// Returns the value at `path` (keys are case-insensitive).
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock()?;
        lookup(&data, path).cloned()
    }

    /// Deserializes the value at `path` into `T`.
    pub fn get_typed<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let value = self.get_value(path)?;
        serde_yaml::from_value(value)
            .with_context(|| format!("unexpected type at {}", path.join(".")))
    }

    /// Sets the value at `path`, creating intermediate mappings, and persists.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock()?;
            insert(&mut data, path, value)?;
        }
        debug!(path = %path.join("."), "Configuration updated");
        self.save()
    }

    /// Non-empty string at `path`, if any.
    pub fn get_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    /// Unsigned integer at `path`; strings holding a number are accepted.
    pub fn get_u64(&self, path: &[&str]) -> Option<u64> {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64(),
            Ok(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_u64(&self, path: &[&str], value: u64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    pub fn set_string(&self, path: &[&str], value: impl Into<String>) -> Result<()> {
        self.set_value(path, Value::String(value.into()))
    }

    /// Directory configured at `path` (absolute, or relative to the config
    /// directory). `default` is stored when nothing is configured. The
    /// directory is created if needed.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let configured = match self.get_string(path) {
            Some(dir) => dir,
            None => {
                self.set_string(path, default)?;
                default.to_string()
            }
        };

        let dir = Path::new(&configured);
        let resolved = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.config_dir.join(dir)
        };

        if !resolved.exists() {
            fs::create_dir_all(&resolved)
                .with_context(|| format!("cannot create {}", resolved.display()))?;
            info!(directory = %resolved.display(), "Created managed directory");
        }
        Ok(resolved)
    }

    /// Minimum log level used when `RUST_LOG` is not set.
    pub fn get_log_min_level(&self) -> Result<String> {
        Ok(self
            .get_string(&["host", "logger", "min_level"])
            .unwrap_or_else(|| DEFAULT_LOG_MIN_LEVEL.to_string()))
    }

    pub fn set_log_min_level(&self, level: impl Into<String>) -> Result<()> {
        self.set_string(&["host", "logger", "min_level"], level)
    }

    pub fn get_log_enable_console(&self) -> Result<bool> {
        match self.get_value(&["host", "logger", "enable_console"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => Ok(DEFAULT_LOG_ENABLE_CONSOLE),
        }
    }
}

/// Process-wide configuration, loaded lazily on first access.
///
/// # Panics
///
/// Panics if the configuration directory cannot be created or the YAML is invalid.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn lookup<'a>(data: &'a Value, path: &[&str]) -> Result<&'a Value> {
    let mut node = data;
    for (depth, key) in path.iter().enumerate() {
        let Value::Mapping(map) = node else {
            return Err(anyhow!("{} is not a mapping", path[..depth].join(".")));
        };
        node = map
            .get(&Value::String(key.to_lowercase()))
            .ok_or_else(|| anyhow!("{} does not exist", path[..=depth].join(".")))?;
    }
    Ok(node)
}

fn insert(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        *data = value;
        return Ok(());
    };

    let Value::Mapping(map) = data else {
        return Err(anyhow!("cannot set {}: parent is not a mapping", first));
    };

    let key = Value::String(first.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        return Ok(());
    }

    let child = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !child.is_mapping() {
        *child = Value::Mapping(Mapping::new());
    }
    insert(child, rest, value)
}

fn apply_env_overrides(document: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (name, raw) in vars {
        let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = suffix.split("__").filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            continue;
        }
        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw.clone()));
        if let Err(e) = insert(document, &path, value) {
            tracing::warn!(variable = %name, "Ignoring config override: {}", e);
        }
    }
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lowercase_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Recursively merges `external` into `default`; mappings merge key by key,
/// anything else is replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (k, v) in overlay {
                match base.get_mut(k) {
                    Some(slot) => merge_yaml(slot, v),
                    None => {
                        base.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}
