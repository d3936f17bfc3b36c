use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracebaseError};

/// How a store is opened: connection target, pool bounds, and the three
/// read-side feature toggles. Defaults are overridden first by the TOML
/// config file, then by `TRACEBASE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Optional database schema to create and use; tables land in it.
    pub schema: Option<String>,
    pub pool_size: usize,
    /// How long an operation may wait for a pooled connection before the
    /// call fails. Blocking here is the backpressure mechanism.
    pub acquire_timeout: Duration,
    /// When false, traces sharing low 64 bits of their ids are treated as
    /// one trace, easing 64-bit to 128-bit id migrations.
    pub strict_trace_id: bool,
    /// When false, search operations return empty without touching the
    /// database; lookup by trace id and dependency queries still work.
    pub search_enabled: bool,
    /// Tag keys whose values are served by autocompletion. Keys not listed
    /// here return no values.
    pub autocomplete_keys: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("tracebase/tracebase.duckdb"),
            schema: None,
            pool_size: 10,
            acquire_timeout: Duration::from_secs(10),
            strict_trace_id: true,
            search_enabled: true,
            autocomplete_keys: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides();
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides();
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn in_memory() -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    schema: Option<String>,
    pool_size: Option<String>,
    acquire_timeout: Option<String>,
    strict_trace_id: Option<String>,
    search_enabled: Option<String>,
    autocomplete_keys: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACEBASE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracebase/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TracebaseError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TracebaseError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> ConfigOverrides {
    ConfigOverrides {
        db_path: env::var("TRACEBASE_DB_PATH").ok().map(PathBuf::from),
        schema: env::var("TRACEBASE_SCHEMA").ok(),
        pool_size: env::var("TRACEBASE_POOL_SIZE").ok(),
        acquire_timeout: env::var("TRACEBASE_ACQUIRE_TIMEOUT").ok(),
        strict_trace_id: env::var("TRACEBASE_STRICT_TRACE_ID").ok(),
        search_enabled: env::var("TRACEBASE_SEARCH_ENABLED").ok(),
        autocomplete_keys: env::var("TRACEBASE_AUTOCOMPLETE_KEYS").ok(),
    }
}

fn apply_overrides(
    cfg: &mut StorageConfig,
    overrides: ConfigOverrides,
    source: &str,
) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.schema {
        cfg.schema = Some(v);
    }
    if let Some(v) = overrides.pool_size {
        cfg.pool_size = v.parse::<usize>().map_err(|e| {
            TracebaseError::Config(format!("bad pool_size in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.acquire_timeout {
        cfg.acquire_timeout = humantime::parse_duration(&v).map_err(|e| {
            TracebaseError::Config(format!("bad acquire_timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.strict_trace_id {
        cfg.strict_trace_id = parse_bool(&v)
            .map_err(|e| TracebaseError::Config(format!("bad strict_trace_id in {source}: {e}")))?;
    }
    if let Some(v) = overrides.search_enabled {
        cfg.search_enabled = parse_bool(&v)
            .map_err(|e| TracebaseError::Config(format!("bad search_enabled in {source}: {e}")))?;
    }
    if let Some(v) = overrides.autocomplete_keys {
        cfg.autocomplete_keys = parse_key_list(&v);
    }
    Ok(())
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected true or false, got {other}")),
    }
}

fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_toggles() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(10));
        assert!(cfg.strict_trace_id);
        assert!(cfg.search_enabled);
        assert!(cfg.autocomplete_keys.is_empty());
    }

    #[test]
    fn parse_key_list_trims_and_drops_empties() {
        assert_eq!(
            parse_key_list("environment, http.method,,region "),
            vec!["environment", "http.method", "region"]
        );
        assert!(parse_key_list("").is_empty());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn apply_overrides_updates_toggles() {
        let mut cfg = StorageConfig::default();
        let file = ConfigOverrides {
            db_path: Some(PathBuf::from("/var/lib/tracebase/db.duckdb")),
            schema: Some("tracing".to_string()),
            pool_size: Some("4".to_string()),
            acquire_timeout: Some("3s".to_string()),
            strict_trace_id: Some("false".to_string()),
            search_enabled: Some("false".to_string()),
            autocomplete_keys: Some("environment,http.method".to_string()),
        };

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/tracebase/db.duckdb"));
        assert_eq!(cfg.schema.as_deref(), Some("tracing"));
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(3));
        assert!(!cfg.strict_trace_id);
        assert!(!cfg.search_enabled);
        assert_eq!(cfg.autocomplete_keys, vec!["environment", "http.method"]);
    }

    #[test]
    fn apply_overrides_rejects_bad_values() {
        let mut cfg = StorageConfig::default();
        let bad = ConfigOverrides {
            pool_size: Some("many".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad, "environment").is_err());

        let bad = ConfigOverrides {
            acquire_timeout: Some("soon".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad, "environment").is_err());
    }
}
