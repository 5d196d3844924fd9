use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sso_ticket::TicketConfig;
use sso_ticket_postgres::PostgresConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub tickets: TicketConfig,
    pub registry: RegistryConfig,
    pub postgres: PostgresConfig,
    pub replication: ReplicationConfig,
    pub logging: LoggingConfig,
    pub admin: AdminConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.tickets
            .validate()
            .map_err(|e| format!("tickets: {e}"))?;

        // Registry validations
        if self.registry.operation_timeout.is_zero() {
            return Err("registry.operation_timeout must be > 0".into());
        }
        if self.registry.backend == RegistryBackend::Postgres {
            if self.postgres.url.is_empty() {
                return Err("registry.backend=postgres requires postgres.url".into());
            }
            if self.postgres.max_connections == 0 {
                return Err("postgres.max_connections must be > 0".into());
            }
        }
        // Replication validations
        if self.replication.enabled {
            if self.replication.redis_url.is_empty() {
                return Err("replication.enabled=true requires replication.redis_url".into());
            }
            if self.replication.channel.is_empty() {
                return Err("replication.channel must not be empty".into());
            }
        }
        // Logging validation
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        for (key, value) in [
            ("logging.level", &self.logging.level),
            ("logging.backend_level", &self.logging.backend_level),
        ] {
            if !valid_levels.contains(&value.to_ascii_lowercase().as_str()) {
                return Err(format!("{key} must be one of {valid_levels:?}"));
            }
        }
        // Admin validation
        if self.admin.enabled && self.admin.bind.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "admin.bind '{}' is not a valid socket address",
                self.admin.bind
            ));
        }
        Ok(())
    }

    /// Identity of this node in replication commands and cleaner locks.
    ///
    /// Falls back to the ticket id suffix, then to the machine hostname.
    pub fn node_id(&self) -> String {
        self.replication
            .node_id
            .clone()
            .or_else(|| self.tickets.host.name.clone())
            .unwrap_or_else(sso_ticket::id::local_hostname)
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        if !self.admin.enabled {
            return None;
        }
        self.admin.bind.parse().ok()
    }

    /// Effective configuration as TOML, secrets masked.
    pub fn to_toml(&self) -> Result<String, String> {
        let mut masked = self.clone();
        if masked.tickets.crypto.key.is_some() {
            masked.tickets.crypto.key = Some("****".into());
        }
        masked.postgres.url = sso_ticket_postgres::pool::mask_password(&masked.postgres.url);
        toml::to_string_pretty(&masked).map_err(|e| format!("config serialize error: {e}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// Upper bound for a single backend round trip.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Publish registry mutations to Redis and apply the other nodes' ones.
    /// Default: false (single-node deployments)
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub redis_url: String,

    /// Pub/Sub channel shared by the cluster
    pub channel: String,

    /// Node identity; see [`AppConfig::node_id`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://localhost:6379".to_string(),
            channel: "sso:tickets".to_string(),
            node_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the ticketing crates and everything not listed below.
    pub level: String,

    /// Level for the storage and transport clients (sqlx, deadpool, redis,
    /// notify). Default: "warn"
    pub backend_level: String,
}

/// Log targets governed by [`LoggingConfig::backend_level`].
const BACKEND_TARGETS: &[&str] = &["sqlx", "deadpool", "deadpool_redis", "redis", "notify"];

impl LoggingConfig {
    /// `EnvFilter` directives for this configuration.
    pub fn directives(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        let backend = self.backend_level.to_ascii_lowercase();
        BACKEND_TARGETS
            .iter()
            .fold(level, |acc, target| format!("{acc},{target}={backend}"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            backend_level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:8089".to_string(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "sso-ticket.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            tracing::warn!(path = %pathbuf.display(), "Config file not found, using defaults");
        }
        // Environment variable overrides, e.g., SSO_TICKET__REGISTRY__BACKEND=postgres
        builder = builder.add_source(
            Environment::with_prefix("SSO_TICKET")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.registry.backend, RegistryBackend::Memory);
        assert!(!cfg.replication.enabled);
        assert_eq!(cfg.admin_addr(), Some("127.0.0.1:8089".parse().unwrap()));
    }

    #[test]
    fn test_invalid_logging_level() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));
    }

    #[test]
    fn test_logging_directives_cap_backends() {
        let mut logging = LoggingConfig::default();
        assert_eq!(
            logging.directives(),
            "info,sqlx=warn,deadpool=warn,deadpool_redis=warn,redis=warn,notify=warn"
        );

        logging.level = "DEBUG".into();
        logging.backend_level = "error".into();
        assert!(logging.directives().starts_with("debug,sqlx=error,"));

        let mut cfg = AppConfig::default();
        cfg.logging.backend_level = "noisy".into();
        assert!(cfg.validate().unwrap_err().contains("logging.backend_level"));
    }

    #[test]
    fn test_invalid_admin_bind() {
        let mut cfg = AppConfig::default();
        cfg.admin.bind = "localhost".into();
        assert!(cfg.validate().is_err());

        cfg.admin.enabled = false;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.admin_addr(), None);
    }

    #[test]
    fn test_ticket_errors_are_prefixed() {
        let mut cfg = AppConfig::default();
        cfg.tickets.st.number_of_uses = 0;
        assert!(cfg.validate().unwrap_err().starts_with("tickets:"));
    }

    #[test]
    fn test_replication_requires_redis_url() {
        let mut cfg = AppConfig::default();
        cfg.replication.enabled = true;
        cfg.replication.redis_url.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_node_id_fallbacks() {
        let mut cfg = AppConfig::default();
        cfg.tickets.host.name = Some("cas-node-1".into());
        assert_eq!(cfg.node_id(), "cas-node-1");

        cfg.replication.node_id = Some("replica-a".into());
        assert_eq!(cfg.node_id(), "replica-a");
    }

    #[test]
    fn test_to_toml_masks_secrets() {
        let mut cfg = AppConfig::default();
        cfg.tickets.crypto.key = Some("00".repeat(32));
        cfg.postgres.url = "postgres://cas:secret@db/sso".into();

        let rendered = cfg.to_toml().unwrap();
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains(&"00".repeat(32)));
        assert!(rendered.contains("[tickets.st]"));
    }
}
