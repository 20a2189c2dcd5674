//! Settings store for stackctl.
//!
//! Settings are a YAML document of sections, each a map of scalar values:
//!
//! ```yaml
//! global:
//!   stopdaemonsonquit: true
//! paths:
//!   nginx: ./bin/nginx
//!   logs: ${STACK_ROOT}/logs
//! autostart:
//!   nginx: true
//! ```
//!
//! Lookups use `section/key` names (`paths/nginx`, `autostart/mariadb`, ...).
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::{OnceLock, RwLock},
};
use tracing::debug;

use crate::error::SettingsError;

/// Read-only key-value view over the settings consumed by the supervisor.
///
/// Implementations are queried on every operation, so a store that can be reloaded
/// makes configuration changes visible on the next `start`.
pub trait ConfigStore: Send + Sync {
    /// Returns the raw value stored under `section/key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Directory relative paths are resolved against.
    fn base_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Returns the value under `key` parsed as a boolean, `None` when absent or unparsable.
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|value| parse_bool(&value))
    }

    /// Boolean lookup where an absent key reads as `false`.
    fn flag(&self, key: &str) -> bool {
        self.get_bool(key).unwrap_or(false)
    }

    /// Returns the value under `key` as a path, resolved against [`ConfigStore::base_dir`]
    /// when relative.
    fn path(&self, key: &str) -> Option<PathBuf> {
        let raw = self.get(key)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let path = PathBuf::from(trimmed);
        if path.is_absolute() {
            return Some(path);
        }

        Some(match self.base_dir() {
            Some(base) => base.join(path),
            None => path,
        })
    }
}

/// Parses the boolean spellings accepted in settings files.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// In-memory settings, flattened to `section/key` entries.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    entries: BTreeMap<String, String>,
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct RawSettings(BTreeMap<String, Option<BTreeMap<String, serde_yaml::Value>>>);

impl Settings {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful for embedding and tests.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets the directory relative paths resolve against.
    pub fn with_base_dir(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base.into());
        self
    }

    /// Inserts or replaces a single entry.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a YAML settings document, expanding `${VAR}` references from the
    /// environment.
    pub fn from_yaml(content: &str) -> Result<Self, SettingsError> {
        let raw: RawSettings = serde_yaml::from_str(content)?;
        let mut settings = Settings::new();

        for (section, keys) in raw.0 {
            let Some(keys) = keys else {
                continue;
            };

            for (key, value) in keys {
                let name = format!("{section}/{key}");
                let scalar = match value {
                    serde_yaml::Value::Null => continue,
                    serde_yaml::Value::Bool(flag) => flag.to_string(),
                    serde_yaml::Value::Number(number) => number.to_string(),
                    serde_yaml::Value::String(text) => expand_env_vars(&text)?,
                    _ => return Err(SettingsError::InvalidLayout(name)),
                };
                settings.entries.insert(name, scalar);
            }
        }

        Ok(settings)
    }
}

impl ConfigStore for Settings {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn base_dir(&self) -> Option<PathBuf> {
        self.base_dir.clone()
    }
}

/// Expands environment variables within a string.
fn expand_env_vars(input: &str) -> Result<String, SettingsError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static pattern compiles")
    });

    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let var_name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let value = env::var(var_name)
            .map_err(|_| SettingsError::UnknownVariable(var_name.to_string()))?;
        output.push_str(&input[last..whole.start()]);
        output.push_str(&value);
        last = whole.end();
    }
    output.push_str(&input[last..]);

    Ok(output)
}

/// Settings backed by a file on disk, re-readable at runtime.
#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsFile {
    /// Loads the settings file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = load_settings(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the backing file. The previous contents stay active when loading fails.
    pub fn reload(&self) -> Result<(), SettingsError> {
        let settings = load_settings(&self.path)?;
        *self.current.write()? = settings;
        debug!("Reloaded settings from {}", self.path.display());
        Ok(())
    }
}

impl ConfigStore for SettingsFile {
    fn get(&self, key: &str) -> Option<String> {
        match self.current.read() {
            Ok(guard) => guard.get(key),
            Err(poisoned) => poisoned.into_inner().get(key),
        }
    }

    fn base_dir(&self) -> Option<PathBuf> {
        match self.current.read() {
            Ok(guard) => guard.base_dir(),
            Err(poisoned) => poisoned.into_inner().base_dir(),
        }
    }
}

/// Loads and parses a settings file; relative paths inside it resolve against the file's
/// directory.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|e| {
        SettingsError::ReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let base_path = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let settings = Settings::from_yaml(&content)?.with_base_dir(base_path);
    debug!(
        "Loaded {} setting(s) from {}",
        settings.len(),
        path.display()
    );
    Ok(settings)
}
