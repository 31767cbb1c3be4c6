use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Mutex;

use kestrel_config::{
    discover_config_path, load_for_workspace, ConfigError, KestrelConfig,
    CACHE_DIR_ENV_VAR, KESTREL_CONFIG_ENV_VAR, SOURCE_CACHE_ENV_VAR,
};
use tempfile::tempdir;

static ENV_LOCK: Mutex<()> = Mutex::new(());

struct EnvVarGuard {
    key: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: impl Into<OsString>) -> Self {
        let prev = std::env::var_os(key);
        std::env::set_var(key, value.into());
        Self { key, prev }
    }

    fn unset(key: &'static str) -> Self {
        let prev = std::env::var_os(key);
        std::env::remove_var(key);
        Self { key, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

fn clean_env() -> [EnvVarGuard; 3] {
    [
        EnvVarGuard::unset(KESTREL_CONFIG_ENV_VAR),
        EnvVarGuard::unset(SOURCE_CACHE_ENV_VAR),
        EnvVarGuard::unset(CACHE_DIR_ENV_VAR),
    ]
}

#[test]
fn discovers_kestrel_toml_in_workspace_root() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _env = clean_env();

    let dir = tempdir().unwrap();
    assert_eq!(discover_config_path(dir.path()), None);

    let hidden = dir.path().join(".kestrel.toml");
    std::fs::write(&hidden, "[cache]\nsource_cache_size = 7\n").unwrap();
    assert_eq!(
        discover_config_path(dir.path()),
        Some(hidden.canonicalize().unwrap())
    );

    let visible = dir.path().join("kestrel.toml");
    std::fs::write(&visible, "[cache]\nsource_cache_size = 9\n").unwrap();
    assert_eq!(
        discover_config_path(dir.path()),
        Some(visible.canonicalize().unwrap()),
        "kestrel.toml wins over .kestrel.toml"
    );
}

#[test]
fn env_config_path_wins_over_workspace_file() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _env = clean_env();

    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("kestrel.toml"), "[cache]\nsource_cache_size = 9\n").unwrap();
    std::fs::write(
        dir.path().join("override.toml"),
        "[cache]\nsource_cache_size = 3\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let _config = EnvVarGuard::set(KESTREL_CONFIG_ENV_VAR, "override.toml");
    let (config, path) = load_for_workspace(dir.path()).unwrap();
    assert_eq!(config.cache.source_cache_size, 3);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        path,
        Some(dir.path().join("override.toml").canonicalize().unwrap())
    );
}

#[test]
fn missing_config_yields_defaults_with_env_overrides() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _env = clean_env();

    let dir = tempdir().unwrap();
    let _off = EnvVarGuard::set(SOURCE_CACHE_ENV_VAR, "off");
    let _root = EnvVarGuard::set(CACHE_DIR_ENV_VAR, dir.path().join("cache"));

    let (config, path) = load_for_workspace(dir.path()).unwrap();
    assert_eq!(path, None);
    assert!(!config.cache.use_source_cache);
    assert_eq!(config.cache.cache_root, Some(dir.path().join("cache")));
    assert_eq!(config.cache.source_cache_size, 1000);
}

#[test]
fn full_config_round_trips_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kestrel.toml");
    std::fs::write(
        &path,
        r#"
[cache]
use_source_cache = false
source_cache_size = 64
cache_root = "/var/cache/kestrel"

[logging]
level = "warn"
json = true
stderr = false
file = "/tmp/kestrel.log"
"#,
    )
    .unwrap();

    let config = KestrelConfig::load_from_path(&path).unwrap();
    assert!(!config.cache.use_source_cache);
    assert_eq!(config.cache.source_cache_size, 64);
    assert_eq!(
        config.cache.cache_root,
        Some(PathBuf::from("/var/cache/kestrel"))
    );
    assert!(config.logging.json);
    assert!(!config.logging.stderr);
    assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/kestrel.log")));
}

#[test]
fn unreadable_and_unknown_configs_are_errors() {
    let dir = tempdir().unwrap();
    let err = KestrelConfig::load_from_path(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{err:?}");

    let path = dir.path().join("kestrel.toml");
    std::fs::write(&path, "[cache]\nmax_sources = 5\n").unwrap();
    let err = KestrelConfig::load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
}
