//! Roster configuration loading
//!
//! Loads configuration from `~/.config/roster/roster.toml` (or the path in
//! `ROSTER_CONFIG`). A missing file yields defaults.

use crate::errors::{Result, RosterError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration for the roster store and service
#[derive(Debug, Deserialize, Clone)]
pub struct RosterConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Unix socket the service listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

/// Authorization gate settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthorizationConfig {
    /// Actors allowed to mutate pages. Empty means every actor is allowed.
    #[serde(default)]
    pub allowed_actors: Vec<String>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("roster"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_db_path() -> String {
    data_dir().join("roster.db").to_string_lossy().into_owned()
}

fn default_socket_path() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir)
            .join("roster.sock")
            .to_string_lossy()
            .into_owned();
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/roster-{user}.sock")
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            socket_path: default_socket_path(),
            log_filter: default_log_filter(),
            authorization: AuthorizationConfig::default(),
        }
    }
}

impl RosterConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "ROSTER_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "roster.toml";

    /// Load configuration from the resolved path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Roster config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RosterError::storage_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: RosterConfig = toml::from_str(contents)
            .map_err(|e| RosterError::validation(format!("failed to parse config: {e}")))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("roster")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(RosterError::validation("db_path must not be empty"));
        }
        if self.socket_path.trim().is_empty() {
            return Err(RosterError::validation("socket_path must not be empty"));
        }
        if self
            .authorization
            .allowed_actors
            .iter()
            .any(|actor| actor.trim().is_empty())
        {
            return Err(RosterError::validation(
                "authorization.allowed_actors must not contain blank names",
            ));
        }
        Ok(())
    }

    /// Expand a leading `~/` in the database path
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    pub fn resolved_socket_path(&self) -> PathBuf {
        expand_home(&self.socket_path)
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = RosterConfig::parse("").expect("parse");
        assert_eq!(cfg.log_filter, "info");
        assert!(cfg.db_path.ends_with("roster.db"));
        assert!(cfg.authorization.allowed_actors.is_empty());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = RosterConfig::parse(
            r#"
            db_path = "/var/lib/roster/roster.db"
            socket_path = "/run/roster.sock"
            log_filter = "roster_core=debug"

            [authorization]
            allowed_actors = ["ops-admin", "editor"]
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.resolved_db_path(), PathBuf::from("/var/lib/roster/roster.db"));
        assert_eq!(cfg.resolved_socket_path(), PathBuf::from("/run/roster.sock"));
        assert_eq!(cfg.log_filter, "roster_core=debug");
        assert_eq!(cfg.authorization.allowed_actors, vec!["ops-admin", "editor"]);
    }

    #[test]
    fn blank_paths_are_rejected() {
        assert!(RosterConfig::parse(r#"db_path = "  ""#).is_err());
        assert!(RosterConfig::parse(r#"socket_path = """#).is_err());
        assert!(
            RosterConfig::parse(
                r#"
                [authorization]
                allowed_actors = [" "]
                "#
            )
            .is_err()
        );
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, "log_filter = \"warn\"\n").expect("write");
        let cfg = RosterConfig::load_from_path(&path).expect("load");
        assert_eq!(cfg.log_filter, "warn");
    }

    #[test]
    fn malformed_toml_is_a_validation_error() {
        let err = RosterConfig::parse("db_path = [").expect_err("must fail");
        assert_eq!(err.category(), crate::errors::ErrorCategory::Validation);
    }
}
