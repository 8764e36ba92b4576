use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PgBackendError;

/// Seconds the client waits for the server to accept a connection.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection parameters for a single PostgreSQL connection.
///
/// Loadable from a config file through serde, or flattened into a caller's clap parser:
/// ```rust
/// use clap::Parser;
/// use sql_backend_postgres::prelude::*;
///
/// #[derive(Parser)]
/// struct Cli {
///     #[command(flatten)]
///     db: PgConfig,
/// }
///
/// let cli = Cli::parse_from(["app", "--dbname", "app_db", "--schema", "staging"]);
/// assert_eq!(cli.db.port, 5432);
/// assert_eq!(cli.db.schema.as_deref(), Some("staging"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, clap::Args)]
pub struct PgConfig {
    /// Server host name or address
    #[arg(long = "host", env = "PGHOST", default_value = "localhost")]
    pub host: String,
    /// Server port
    #[arg(long = "port", env = "PGPORT", default_value_t = 5432)]
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    #[arg(long = "dbname", env = "PGDATABASE")]
    pub database: String,
    /// Schema to put first on the search path
    #[arg(long = "schema", env = "PGSCHEMA")]
    #[serde(default)]
    pub schema: Option<String>,
    #[arg(long = "user", env = "PGUSER")]
    #[serde(default)]
    pub user: Option<String>,
    #[arg(long = "password", env = "PGPASSWORD")]
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    5432
}

impl PgConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        PgConfig {
            host: host.into(),
            port,
            database: database.into(),
            schema: None,
            user: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Check that the fields needed to connect are present.
    ///
    /// # Errors
    /// Returns `PgBackendError::ConfigError` if the host or database name is empty.
    pub fn validate(&self) -> Result<(), PgBackendError> {
        if self.host.trim().is_empty() {
            return Err(PgBackendError::ConfigError("host is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(PgBackendError::ConfigError("dbname is required".to_string()));
        }
        if self.schema.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(PgBackendError::ConfigError(
                "schema must not be empty when given".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the libpq-style `key=value` connection string.
    ///
    /// Absent user or password are left out entirely. The schema is not part of the string; it
    /// is applied as a session setting once connected.
    #[must_use]
    pub fn connection_string(&self) -> String {
        self.render(self.password.as_deref())
    }

    /// Same as [`PgConfig::connection_string`] with the password masked, for logs.
    #[must_use]
    pub fn redacted_connection_string(&self) -> String {
        self.render(self.password.as_ref().map(|_| "********"))
    }

    fn render(&self, password: Option<&str>) -> String {
        let mut parts = vec![
            format!("host={}", quote_value(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", quote_value(&self.database)),
        ];
        if let Some(user) = &self.user {
            parts.push(format!("user={}", quote_value(user)));
        }
        if let Some(password) = password {
            parts.push(format!("password={}", quote_value(password)));
        }
        parts.push(format!("connect_timeout={CONNECT_TIMEOUT_SECS}"));
        parts.push("client_encoding=UTF8".to_string());
        parts.join(" ")
    }

    /// Driver configuration equivalent to [`PgConfig::connection_string`].
    ///
    /// tokio-postgres always negotiates UTF-8 client encoding, so that key is implied.
    #[must_use]
    pub fn to_driver_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));
        if let Some(user) = &self.user {
            cfg.user(user);
        }
        if let Some(password) = &self.password {
            cfg.password(password);
        }
        cfg
    }
}

/// Quote a connection-string value when it is empty or contains spaces, quotes or
/// backslashes.
fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
