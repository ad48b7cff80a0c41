//! Site configuration management.
//!
//! `config.yaml` is a free-form mapping of site-wide template variables. The
//! optional `build` key of the same file also carries [`BuildSettings`].

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CoreError, Result},
    variables::Variables,
};

/// Default configuration file name, relative to the project root.
pub const CONFIG_FILE: &str = "config.yaml";

/// Variable holding the URL prefix for subpath deployments.
pub const SITE_PREFIX_KEY: &str = "site_prefix";

/// Immutable site-wide configuration, loaded once per build.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    variables: Variables,
    settings: BuildSettings,
}

/// Build settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Extension of content documents, without the dot.
    #[serde(default = "default_content_extension")]
    pub content_extension: String,

    /// Template root; every subdirectory is an output target.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Destination root for all output targets.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Optimized asset cache, shared across runs.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Name of static asset directories.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Maximum number of concurrent optimizer invocations.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Timeout for a single optimizer invocation.
    #[serde(default = "default_optimizer_timeout_secs")]
    pub optimizer_timeout_secs: u64,

    /// Images wider than this are scaled down before optimization.
    #[serde(default = "default_max_image_width")]
    pub max_image_width: u32,

    /// Smart punctuation settings.
    #[serde(default)]
    pub typography: TypographySettings,

    /// Per-extension optimizer command overrides. An empty command disables
    /// the external step for that extension.
    #[serde(default)]
    pub optimizers: BTreeMap<String, String>,
}

/// Smart punctuation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypographySettings {
    /// Whether to apply smart punctuation at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the raw `content` variable is transformed too.
    #[serde(default)]
    pub raw_content: bool,
}

fn default_content_extension() -> String {
    "txt".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".chop-cache")
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

fn default_optimizer_timeout_secs() -> u64 {
    30
}

fn default_max_image_width() -> u32 {
    1920
}

fn default_true() -> bool {
    true
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            content_extension: default_content_extension(),
            templates_dir: default_templates_dir(),
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            static_dir: default_static_dir(),
            jobs: default_jobs(),
            optimizer_timeout_secs: default_optimizer_timeout_secs(),
            max_image_width: default_max_image_width(),
            typography: TypographySettings::default(),
            optimizers: BTreeMap::new(),
        }
    }
}

impl Default for TypographySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            raw_content: false,
        }
    }
}

impl BuildSettings {
    /// Optimizer timeout as a `Duration`.
    #[must_use]
    pub fn optimizer_timeout(&self) -> Duration {
        Duration::from_secs(self.optimizer_timeout_secs.max(1))
    }

    /// Concurrency limit, never zero.
    #[must_use]
    pub fn effective_jobs(&self) -> usize {
        self.jobs.max(1)
    }

    /// Directory names skipped during content discovery.
    pub fn excluded_dir_names(&self) -> impl Iterator<Item = &std::ffi::OsStr> {
        [
            self.templates_dir.file_name(),
            self.output_dir.file_name(),
            self.cache_dir.file_name(),
            Some(std::ffi::OsStr::new(self.static_dir.as_str())),
        ]
        .into_iter()
        .flatten()
    }
}

impl GlobalConfig {
    /// Build a config from already-parsed variables.
    ///
    /// An unusable `build` section falls back to default settings.
    #[must_use]
    pub fn from_variables(variables: Variables) -> Self {
        let settings = match variables.get("build") {
            None => BuildSettings::default(),
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring invalid `build` section in config");
                BuildSettings::default()
            }),
        };

        Self {
            variables,
            settings,
        }
    }

    /// Strictly load a config file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn try_load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let variables =
            Variables::from_yaml(&content).map_err(|e| CoreError::config(path, e.to_string()))?;

        Ok(Some(Self::from_variables(variables)))
    }

    /// Load a config file, degrading to an empty config when it is absent or
    /// cannot be parsed.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(config)) => {
                tracing::debug!(path = %path.display(), keys = config.variables.len(), "loaded config");
                config
            }
            Ok(None) => {
                tracing::debug!(path = %path.display(), "no config file, using empty config");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "falling back to empty config");
                Self::default()
            }
        }
    }

    /// Site-wide variables.
    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Build settings.
    #[must_use]
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Mutable build settings, for CLI overrides before the build starts.
    pub fn settings_mut(&mut self) -> &mut BuildSettings {
        &mut self.settings
    }

    /// URL prefix for the site, empty when unset.
    #[must_use]
    pub fn site_prefix(&self) -> &str {
        self.variables.get_str(SITE_PREFIX_KEY).unwrap_or_default()
    }
}
