//! Environment-driven configuration for Vecwarden.
//!
//! This module loads and validates settings once at startup (via `Settings::from_env`) and
//! hands the result to whichever surfaces need it. Unlike a process-global cache, settings are
//! owned by each manager instance so tests can run several isolated managers side by side.
//! The configuration covers:
//!
//! - Offload storage (`VECWARDEN_OFFLOAD_DIR`).
//! - Scheduling limits (`VECWARDEN_MAX_INSTANCES`, `VECWARDEN_INACTIVITY_TIMEOUT_MS`,
//!   `VECWARDEN_ACTIVITY_MONITORING`).
//! - Tenancy (`VECWARDEN_ALLOWED_NAMESPACES`, comma-separated).
//! - Embedding defaults (`VECWARDEN_EMBEDDING_MODEL`, `VECWARDEN_EMBEDDING_PROVIDER`).
//! - RPC deadlines (`VECWARDEN_QUERY_TIMEOUT_MS`, `VECWARDEN_INGEST_TIMEOUT_MS`).
//! - HTTP server port (`VECWARDEN_SERVER_PORT?`).
//!
//! Most fields are optional with sensible defaults; invalid combinations are flagged early with
//! descriptive errors so misconfiguration is easy to diagnose.
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime settings for a Vecwarden manager instance.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory that receives the cold form of offloaded indices.
    pub offload_dir: PathBuf,
    /// Maximum number of simultaneously live indices.
    pub max_instances: usize,
    /// Inactivity deadline applied to indices that do not override it. Zero disables eviction.
    pub default_inactivity_timeout: Duration,
    /// Whether inactivity monitoring starts enabled.
    pub activity_monitoring: bool,
    /// Optional namespace allow-list; when set, creation outside it is rejected.
    pub allowed_namespaces: Option<Vec<String>>,
    /// Default embedding model name; the sentinel `mock-model` selects the deterministic mock.
    pub default_embedding_model: Option<String>,
    /// Name of a registry provider used when an index names none of its own.
    pub default_provider_name: Option<String>,
    /// Outer deadline for sandbox queries and initialization.
    pub query_timeout: Duration,
    /// Outer deadline for document ingest round-trips.
    pub ingest_timeout: Duration,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            offload_dir: PathBuf::from("./offload"),
            max_instances: 50,
            default_inactivity_timeout: Duration::from_millis(1_800_000),
            activity_monitoring: true,
            allowed_namespaces: None,
            default_embedding_model: None,
            default_provider_name: None,
            query_timeout: Duration::from_secs(30),
            ingest_timeout: Duration::from_secs(60),
            server_port: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_instances = load_usize_with_default("VECWARDEN_MAX_INSTANCES", 50)?;
        if max_instances == 0 {
            return Err(ConfigError::InvalidValue(
                "VECWARDEN_MAX_INSTANCES must be at least 1".into(),
            ));
        }

        let default_inactivity_timeout = Duration::from_millis(load_u64_with_default(
            "VECWARDEN_INACTIVITY_TIMEOUT_MS",
            defaults.default_inactivity_timeout.as_millis() as u64,
        )?);
        let query_timeout = Duration::from_millis(load_u64_with_default(
            "VECWARDEN_QUERY_TIMEOUT_MS",
            defaults.query_timeout.as_millis() as u64,
        )?);
        let ingest_timeout = Duration::from_millis(load_u64_with_default(
            "VECWARDEN_INGEST_TIMEOUT_MS",
            defaults.ingest_timeout.as_millis() as u64,
        )?);
        if query_timeout.is_zero() || ingest_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RPC deadlines must be greater than zero".into(),
            ));
        }

        Ok(Self {
            offload_dir: load_env_optional("VECWARDEN_OFFLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.offload_dir),
            max_instances,
            default_inactivity_timeout,
            activity_monitoring: load_bool_with_default("VECWARDEN_ACTIVITY_MONITORING", true)?,
            allowed_namespaces: load_env_optional("VECWARDEN_ALLOWED_NAMESPACES")
                .map(|raw| parse_namespace_list(&raw)),
            default_embedding_model: load_env_optional("VECWARDEN_EMBEDDING_MODEL"),
            default_provider_name: load_env_optional("VECWARDEN_EMBEDDING_PROVIDER"),
            query_timeout,
            ingest_timeout,
            server_port: load_env_optional("VECWARDEN_SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("VECWARDEN_SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn parse_namespace_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_bool_with_default(key: &str, default: bool) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        None => Ok(default),
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.max_instances, 50);
        assert!(settings.activity_monitoring);
        assert_eq!(settings.query_timeout, Duration::from_secs(30));
        assert_eq!(settings.ingest_timeout, Duration::from_secs(60));
        assert!(settings.allowed_namespaces.is_none());
    }

    #[test]
    fn namespace_list_parsing_trims_and_drops_empties() {
        let parsed = parse_namespace_list(" ws , , tenant-a,");
        assert_eq!(parsed, vec!["ws".to_string(), "tenant-a".to_string()]);
    }
}
