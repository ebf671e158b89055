//! PostgreSQL connection pools
//!
//! One pool is built per (server, database) pair. Source pools open every session with
//! `default_transaction_read_only=on` when the source is configured read-only, and every
//! session carries the configured statement timeout.

use crate::config::schema::DatabaseConfig;
use crate::domain::{DbmaskError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_native_tls::MakeTlsConnector;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::config::SslMode;

const APPLICATION_NAME: &str = "dbmask";

/// A pool of connections to one database
pub struct PostgresClient {
    pool: Pool,
    host: String,
    port: u16,
    database: String,
}

impl PostgresClient {
    /// Build a pool for `database` on the server described by `config`
    ///
    /// Connections are opened lazily; use [`test_connection`](Self::test_connection) to
    /// fail fast.
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Configuration`] for an unknown `ssl_mode` or a TLS setup
    /// failure, and [`DbmaskError::Connection`] if the pool cannot be built.
    pub fn new(config: &DatabaseConfig, database: &str) -> Result<Self> {
        let pg_config = build_pg_config(config, database)?;
        let tls = build_tls(config)?;

        let manager = Manager::from_config(
            pg_config,
            tls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Some(Duration::from_secs(config.connection_timeout_seconds));
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(timeout)
            .create_timeout(timeout)
            .recycle_timeout(timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                DbmaskError::Connection(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self {
            pool,
            host: config.host.clone(),
            port: config.port,
            database: database.to_string(),
        })
    }

    /// Run `SELECT 1` on a pooled connection
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Connection`] if the server cannot be reached or rejects the
    /// login.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| {
                DbmaskError::Connection(format!("Connection test failed: {}", format_pg_error(&e)))
            })?;

        tracing::info!(destination = %self.describe(), "PostgreSQL connection test successful");
        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Connection`] if no connection can be obtained.
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            DbmaskError::Connection(format!(
                "Failed to connect to {}: {}",
                self.describe(),
                e
            ))
        })
    }

    /// `host:port/database`, without credentials
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

}

fn parse_ssl_mode(mode: &str) -> Result<SslMode> {
    match mode {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        other => Err(DbmaskError::Configuration(format!(
            "Unsupported ssl_mode '{other}'"
        ))),
    }
}

fn build_pg_config(config: &DatabaseConfig, database: &str) -> Result<tokio_postgres::Config> {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .user(&config.username)
        .dbname(database)
        .application_name(APPLICATION_NAME)
        .connect_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .ssl_mode(parse_ssl_mode(&config.ssl_mode)?)
        .options(&session_options(config));

    let password = config.password.expose_secret();
    if !password.is_empty() {
        pg_config.password(password.as_ref());
    }

    Ok(pg_config)
}

fn session_options(config: &DatabaseConfig) -> String {
    let mut options = format!(
        "-c statement_timeout={}",
        config.statement_timeout_seconds.saturating_mul(1000)
    );
    if config.read_only {
        options.push_str(" -c default_transaction_read_only=on");
    }
    options
}

fn build_tls(config: &DatabaseConfig) -> Result<MakeTlsConnector> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(!config.verify_server_certificate)
        .danger_accept_invalid_hostnames(!config.verify_server_certificate)
        .build()
        .map_err(|e| DbmaskError::Configuration(format!("Failed to initialise TLS: {e}")))?;
    Ok(MakeTlsConnector::new(connector))
}

/// Render a PostgreSQL error as `message [SQLSTATE] detail`
///
/// The result may still contain row values; sanitize it before it is logged or reported.
pub fn format_pg_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => {
            let mut out = format!("{} [{}]", db.message(), db.code().code());
            if let Some(detail) = db.detail() {
                out.push_str(" DETAIL: ");
                out.push_str(detail);
            }
            out
        }
        None => err.to_string(),
    }
}
