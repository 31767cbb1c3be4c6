//! Configuration for Kestrel's analysis caches.
//!
//! Configuration is read from TOML (`kestrel.toml` or `.kestrel.toml` in the workspace root,
//! or the file named by `KESTREL_CONFIG`). Every section is optional; missing keys take their
//! defaults and unknown keys are rejected.

mod logging;

pub use logging::init_tracing;

use kestrel_cache::CacheLocation;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const KESTREL_CONFIG_ENV_VAR: &str = "KESTREL_CONFIG";

/// Environment variable toggling the disk tier (`on|off|true|false|1|0`).
pub const SOURCE_CACHE_ENV_VAR: &str = "KESTREL_SOURCE_CACHE";

/// Environment variable overriding the global cache root.
pub const CACHE_DIR_ENV_VAR: &str = "KESTREL_CACHE_DIR";

/// Default idle expiry of in-memory caches.
pub const DEFAULT_EXPIRE_AFTER_ACCESS: std::time::Duration = std::time::Duration::from_secs(600);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KestrelConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Persist evicted sources to disk and reuse them while their checksum is unchanged.
    #[serde(default = "CacheSettings::default_use_source_cache")]
    pub use_source_cache: bool,

    /// Maximum number of in-memory sources per project.
    #[serde(default = "CacheSettings::default_source_cache_size")]
    pub source_cache_size: usize,

    /// Global cache directory; defaults to `~/.kestrel/cache`.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
}

impl CacheSettings {
    fn default_use_source_cache() -> bool {
        true
    }

    fn default_source_cache_size() -> usize {
        1000
    }

    /// Apply `KESTREL_SOURCE_CACHE` and `KESTREL_CACHE_DIR` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| std::env::var_os(name));
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<OsString>) {
        if let Some(value) = lookup(SOURCE_CACHE_ENV_VAR) {
            let value = value.to_string_lossy();
            match parse_switch(&value) {
                Some(enabled) => self.use_source_cache = enabled,
                None => tracing::warn!(
                    target: "kestrel.config",
                    var = SOURCE_CACHE_ENV_VAR,
                    "ignoring unrecognized value; expected on/off"
                ),
            }
        }

        if let Some(dir) = lookup(CACHE_DIR_ENV_VAR).filter(|dir| !dir.is_empty()) {
            self.cache_root = Some(PathBuf::from(dir));
        }
    }

    pub fn cache_location(&self) -> CacheLocation {
        CacheLocation::new(self.cache_root.clone())
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            use_source_cache: Self::default_use_source_cache(),
            source_cache_size: Self::default_source_cache_size(),
            cache_root: None,
        }
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file. If it cannot be opened, file logging is skipped.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: `level` merged with `RUST_LOG` when that is set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` for `toml::de::Error` quotes the offending source line; keep only the
        // message so config values never end up in logs.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    static UNKNOWN_NAME_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let mut out = message.to_owned();
    if let Some(re) =
        QUOTED_STRING_RE.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok())
    {
        out = re.replace_all(&out, r#""<redacted>""#).into_owned();
    }
    // `unknown field `x`` and `unknown variant `x`` name user-controlled keys.
    if let Some(re) = UNKNOWN_NAME_RE
        .get_or_init(|| regex::Regex::new(r"(unknown (?:field|variant)) `[^`]*`").ok())
    {
        out = re.replace_all(&out, "$1 `<redacted>`").into_owned();
    }
    out
}

impl KestrelConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding Kestrel's config environment lock.
///
/// Tests that set [`KESTREL_CONFIG_ENV_VAR`] wrap the mutation and the discovery call in this
/// helper so concurrent discovery elsewhere in the process does not observe the override.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Locate the config file for `workspace_root`.
///
/// Search order:
/// 1) `KESTREL_CONFIG` (absolute or relative to `workspace_root`)
/// 2) `kestrel.toml` in `workspace_root`
/// 3) `.kestrel.toml` in `workspace_root`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(KESTREL_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        };
        return Some(canonicalize_or_keep(path));
    }

    ["kestrel.toml", ".kestrel.toml"]
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(canonicalize_or_keep)
}

fn canonicalize_or_keep(path: PathBuf) -> PathBuf {
    path.canonicalize().unwrap_or(path)
}

/// Load the configuration for a workspace root and apply environment overrides.
///
/// If no config file is present, returns [`KestrelConfig::default`] and `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(KestrelConfig, Option<PathBuf>), ConfigError> {
    let (mut config, path) = match discover_config_path(workspace_root) {
        Some(path) => (KestrelConfig::load_from_path(&path)?, Some(path)),
        None => (KestrelConfig::default(), None),
    };
    config.cache.apply_env_overrides();

    tracing::debug!(
        target: "kestrel.config",
        path = ?path,
        use_source_cache = config.cache.use_source_cache,
        source_cache_size = config.cache.source_cache_size,
        "loaded configuration"
    );
    Ok((config, path))
}
