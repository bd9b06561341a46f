//! Settings: a YAML file under the base directory, overridable through plain
//! key/value lookups (environment variables or in-memory maps).
//!
//! Every field has a default, so a missing `folio.yaml` yields a working
//! configuration rooted at the base directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{invalid, ConfigError};
use crate::paths;
use crate::types::Audience;

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Source of plain string settings keyed by dotted names such as
/// `releases.retention`.
pub trait ConfigLookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigLookup for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// Environment-variable lookup: `releases.retention` → `FOLIO_RELEASES__RETENTION`.
#[derive(Debug, Clone)]
pub struct EnvLookup {
    prefix: String,
}

impl EnvLookup {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.replace('.', "__").to_ascii_uppercase())
    }
}

impl Default for EnvLookup {
    fn default() -> Self {
        Self::new("FOLIO")
    }
}

impl ConfigLookup for EnvLookup {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Age after which an unfinished (`.pending`) entry is abandoned.
    pub insertion_timeout_secs: u64,
    /// Sleep between polls while the head of the queue is still pending.
    pub poll_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            insertion_timeout_secs: 20,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueSettings {
    pub fn insertion_timeout(&self) -> Duration {
        Duration::from_secs(self.insertion_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Bounded wait for the output-directory lock.
    pub output_wait_secs: u64,
    pub output_lease_secs: u64,
    /// Lease of the build lock; renewed on every build iteration.
    pub build_lease_secs: u64,
    pub retry_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            output_wait_secs: 60,
            output_lease_secs: 300,
            build_lease_secs: 3600,
            retry_interval_ms: 250,
        }
    }
}

impl LockSettings {
    pub fn output_wait(&self) -> Duration {
        Duration::from_secs(self.output_wait_secs)
    }

    pub fn output_lease(&self) -> Duration {
        Duration::from_secs(self.output_lease_secs)
    }

    pub fn build_lease(&self) -> Duration {
        Duration::from_secs(self.build_lease_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// Releases kept by pruning, newest first.
    pub retention: usize,
    /// Task that must be `done` before a release may be published.
    pub task: String,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            retention: 5,
            task: "build".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Registered builder id (`command`, `noop`).
    pub builder: String,
    /// argv of the external build command.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Regular expressions; when non-empty, a build only runs if a changed
    /// path matches one of them.
    pub trigger_patterns: Vec<String>,
    pub audience: Audience,
    /// Upper bound on build iterations per run.
    pub max_iterations: u32,
    /// Daemon interval between runs.
    pub interval_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            builder: "command".to_string(),
            command: Vec::new(),
            env: BTreeMap::new(),
            trigger_patterns: Vec::new(),
            audience: Audience::Live,
            max_iterations: 10,
            interval_secs: 300,
        }
    }
}

impl BuildSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root holding `releases/`, `current` and `folio.yaml`. Not read from
    /// the file; always the directory the file was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Exporters' output directory. Defaults to `<base>/data`.
    pub data_dir: Option<PathBuf>,
    /// Internal working directory. Defaults to `<data>/.folio`.
    pub work_dir: Option<PathBuf>,
    pub queue: QueueSettings,
    pub locks: LockSettings,
    pub releases: ReleaseSettings,
    pub build: BuildSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            data_dir: None,
            work_dir: None,
            queue: QueueSettings::default(),
            locks: LockSettings::default(),
            releases: ReleaseSettings::default(),
            build: BuildSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults rooted at `base`.
    pub fn for_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base.into(),
            ..Self::default()
        }
    }

    /// Load `<base>/folio.yaml`, falling back to defaults if it is absent.
    pub fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = paths::settings_path(base);
        if !path.exists() {
            return Ok(Self::for_base(base));
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut settings: Settings = if contents.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path, source })?
        };
        settings.base_dir = base.to_path_buf();
        settings.validate()?;
        Ok(settings)
    }

    /// Load from disk, then apply `FOLIO_*` environment overrides.
    pub fn load_with_env(base: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::load(base)?;
        settings.apply_overrides(&EnvLookup::default())?;
        Ok(settings)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|dir| self.resolve(dir))
            .unwrap_or_else(|| self.base_dir.join("data"))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .as_ref()
            .map(|dir| self.resolve(dir))
            .unwrap_or_else(|| self.data_dir().join(".folio"))
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        }
    }

    /// Apply every key `lookup` knows about over the current values.
    pub fn apply_overrides(&mut self, lookup: &dyn ConfigLookup) -> Result<(), ConfigError> {
        if let Some(v) = lookup.get("data_dir") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup.get("work_dir") {
            self.work_dir = Some(PathBuf::from(v));
        }
        override_parsed(lookup, "queue.insertion_timeout_secs", &mut self.queue.insertion_timeout_secs)?;
        override_parsed(lookup, "queue.poll_interval_ms", &mut self.queue.poll_interval_ms)?;
        override_parsed(lookup, "locks.output_wait_secs", &mut self.locks.output_wait_secs)?;
        override_parsed(lookup, "locks.output_lease_secs", &mut self.locks.output_lease_secs)?;
        override_parsed(lookup, "locks.build_lease_secs", &mut self.locks.build_lease_secs)?;
        override_parsed(lookup, "locks.retry_interval_ms", &mut self.locks.retry_interval_ms)?;
        override_parsed(lookup, "releases.retention", &mut self.releases.retention)?;
        if let Some(v) = lookup.get("releases.task") {
            self.releases.task = v;
        }
        if let Some(v) = lookup.get("build.builder") {
            self.build.builder = v;
        }
        if let Some(v) = lookup.get("build.command") {
            self.build.command = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = lookup.get("build.trigger_patterns") {
            self.build.trigger_patterns = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup.get("build.audience") {
            self.build.audience =
                Audience::from_str(&v).map_err(|msg| invalid("build.audience", msg))?;
        }
        override_parsed(lookup, "build.max_iterations", &mut self.build.max_iterations)?;
        override_parsed(lookup, "build.interval_secs", &mut self.build.interval_secs)?;
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.releases.retention == 0 {
            return Err(invalid("releases.retention", "must keep at least one release"));
        }
        if self.releases.task.trim().is_empty() {
            return Err(invalid("releases.task", "must not be empty"));
        }
        if self.build.max_iterations == 0 {
            return Err(invalid("build.max_iterations", "must be at least 1"));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(invalid("queue.poll_interval_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

fn override_parsed<T>(lookup: &dyn ConfigLookup, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup.get(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|err: T::Err| invalid(key, format!("'{raw}': {err}")))?;
    }
    Ok(())
}
