use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::time::Duration;
use url::Url;
use ydo_core::{DatabaseConfig, RedisConfig};

const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect a PostgreSQL pool from the `database` config section
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let ssl_mode: PgSslMode = config
        .sslmode
        .parse()
        .with_context(|| format!("invalid sslmode '{}'", config.sslmode))?;

    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.dbname)
        .ssl_mode(ssl_mode);

    tracing::debug!(target: "ydo::database", url = %display_url(config), "Connecting to PostgreSQL");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to {}", display_url(config)))?;

    Ok(pool)
}

/// Check that the configured Redis instance answers PING
pub async fn ping_redis(config: &RedisConfig) -> Result<()> {
    let address = config.url().context("invalid Redis configuration")?;
    let masked = mask_database_url(&address);
    let client = redis::Client::open(address.as_str())
        .with_context(|| format!("invalid Redis address {}", masked))?;

    let mut conn = tokio::time::timeout(REDIS_TIMEOUT, client.get_async_connection())
        .await
        .with_context(|| format!("timed out connecting to Redis at {}", masked))?
        .with_context(|| format!("failed to connect to Redis at {}", masked))?;

    let reply: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .context("Redis PING failed")?;

    tracing::debug!(target: "ydo::database", url = %masked, reply = %reply, "Redis reachable");
    Ok(())
}

/// Connection URL for display, with the password masked
pub fn display_url(config: &DatabaseConfig) -> String {
    let mut url = match Url::parse(&format!("postgres://{}:{}", config.host, config.port)) {
        Ok(url) => url,
        Err(_) => return format!("postgres://{}:{}/{}", config.host, config.port, config.dbname),
    };

    let _ = url.set_username(&config.user);
    if !config.password.is_empty() {
        let _ = url.set_password(Some(&config.password));
    }
    url.set_path(&config.dbname);
    url.set_query(Some(&format!("sslmode={}", config.sslmode)));

    mask_database_url(url.as_str())
}

/// Replace the password of a connection URL with `****`
pub fn mask_database_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}
