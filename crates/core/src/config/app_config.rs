use crate::config::validation::{ConfigValidator, NonEmpty, NonZero};
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use url::Url;

/// The migration lock pins one pooled connection while the version store needs another
pub const MIN_DATABASE_CONNECTIONS: u32 = 2;

/// Application configuration loaded from `config.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target relational database
    pub database: DatabaseConfig,
    /// Auxiliary cache store; only its connectivity is checked
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Migration engine settings
    #[serde(default)]
    pub migrations: MigrationSettings,
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub dbname: String,
    /// libpq-style ssl mode (disable, prefer, require, ...)
    #[serde(default = "default_ssl_mode")]
    pub sslmode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    /// Logical database index
    #[serde(default)]
    pub db: i64,
}

/// Settings consumed by the migration engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Table holding the applied version record
    #[serde(default = "default_migrations_table")]
    pub table: String,
    /// Seconds to wait for the migration lock; 0 fails fast
    #[serde(default)]
    pub lock_timeout_secs: u64,
}

fn default_database_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_redis_port() -> u16 {
    6379
}

fn default_migrations_table() -> String {
    "schema_migrations".to_string()
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            table: default_migrations_table(),
            lock_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Load, override from the environment and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        config.apply_env_overrides()?;
        config.validate()?;

        tracing::debug!(
            target: "ydo::config",
            path = %path.display(),
            host = %config.database.host,
            dbname = %config.database.dbname,
            redis = config.redis.is_some(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse a configuration from YAML text without touching the environment
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: "<inline>".into(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `YDO_DATABASE_*` environment overrides
    ///
    /// Lets deployments keep credentials out of the YAML file.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("YDO_DATABASE_HOST") {
            self.database.host = host;
        }

        if let Ok(port_str) = env::var("YDO_DATABASE_PORT") {
            self.database.port = port_str.parse().map_err(|_| {
                ConfigError::invalid_value("database.port", &port_str, "valid port number (1-65535)")
            })?;
        }

        if let Ok(user) = env::var("YDO_DATABASE_USER") {
            self.database.user = user;
        }

        if let Ok(password) = env::var("YDO_DATABASE_PASSWORD") {
            self.database.password = password;
        }

        if let Ok(dbname) = env::var("YDO_DATABASE_NAME") {
            self.database.dbname = dbname;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;

        if let Some(redis) = &self.redis {
            NonEmpty("redis.host").validate(&redis.host)?;
            NonZero("redis.port").validate(&redis.port)?;
            if redis.db < 0 {
                return Err(ConfigError::invalid_value(
                    "redis.db",
                    redis.db.to_string(),
                    "a non-negative database index",
                ));
            }
            redis.url()?;
        }

        NonEmpty("migrations.table").validate(&self.migrations.table)?;
        Ok(())
    }
}

impl DatabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        NonEmpty("database.host").validate(&self.host)?;
        NonZero("database.port").validate(&self.port)?;
        NonEmpty("database.user").validate(&self.user)?;
        NonEmpty("database.dbname").validate(&self.dbname)?;
        if self.max_connections < MIN_DATABASE_CONNECTIONS {
            return Err(ConfigError::invalid_value(
                "database.max_connections",
                self.max_connections.to_string(),
                format!(
                    "at least {}: the migration lock holds one connection for the whole run",
                    MIN_DATABASE_CONNECTIONS
                ),
            ));
        }

        let valid_modes = ["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];
        if !valid_modes.contains(&self.sslmode.as_str()) {
            return Err(ConfigError::invalid_value(
                "database.sslmode",
                &self.sslmode,
                format!("one of: {}", valid_modes.join(", ")),
            ));
        }

        Ok(())
    }
}

impl RedisConfig {
    /// Connection URL in the form accepted by the redis client
    ///
    /// The password is percent-encoded, so any character may appear in it.
    pub fn url(&self) -> Result<String, ConfigError> {
        let invalid_host = || {
            ConfigError::invalid_value("redis.host", &self.host, "a host name or IP address")
        };

        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|_| invalid_host())?;
        let routed_as_configured = url.has_host()
            && url.username().is_empty()
            && url.password().is_none()
            && url.port() == Some(self.port)
            && url.path() == format!("/{}", self.db);
        if !routed_as_configured {
            return Err(invalid_host());
        }

        if !self.password.is_empty() {
            url.set_password(Some(&self.password)).map_err(|_| invalid_host())?;
        }

        Ok(url.into())
    }
}
