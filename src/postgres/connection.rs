use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Statement};
use tracing::{debug, info, warn};

use super::config::PgConfig;
use super::ddl::quote_ident;
use super::executor::StatementId;
use crate::error::PgBackendError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One open connection to a PostgreSQL server.
///
/// The wire protocol is strictly request/response, so every operation takes `&mut self`: one
/// handle runs one command at a time. Call [`PgConnection::close`] to shut it down; dropping an
/// unclosed handle aborts the background protocol task instead.
pub struct PgConnection {
    pub(crate) id: u64,
    pub(crate) client: Client,
    pub(crate) statements: HashMap<StatementId, Statement>,
    pub(crate) fk_cycle_open: bool,
    driver: Option<JoinHandle<()>>,
}

impl PgConnection {
    /// Connect and apply the session settings.
    ///
    /// Sets `client_min_messages` to `WARNING` and, when the config names a schema, puts it on
    /// the search path.
    ///
    /// # Errors
    /// Returns `PgBackendError::ConfigError` for an invalid config and
    /// `PgBackendError::ConnectionError` if the server cannot be reached, rejects the login, or
    /// refuses the session settings.
    pub async fn open(config: &PgConfig) -> Result<Self, PgBackendError> {
        config.validate()?;
        debug!(conn = %config.redacted_connection_string(), "connecting to postgres");

        let (client, connection) = config
            .to_driver_config()
            .connect(NoTls)
            .await
            .map_err(|e| {
                PgBackendError::connection(
                    format!("failed to connect to {}:{}", config.host, config.port),
                    &e,
                )
            })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection terminated with error");
            }
        });

        let mut conn = PgConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client,
            statements: HashMap::new(),
            fk_cycle_open: false,
            driver: Some(driver),
        };

        if let Err(e) = conn.apply_session_settings(config).await {
            // Drop aborts the driver task, releasing the half-configured session.
            drop(conn);
            return Err(e);
        }

        info!(
            conn_id = conn.id,
            host = %config.host,
            port = config.port,
            dbname = %config.database,
            "postgres connection established"
        );
        Ok(conn)
    }

    async fn apply_session_settings(&mut self, config: &PgConfig) -> Result<(), PgBackendError> {
        let mut settings = String::from("SET client_min_messages TO WARNING;");
        if let Some(schema) = &config.schema {
            settings.push_str(&format!(" SET search_path TO {};", quote_ident(schema)));
        }
        self.client
            .batch_execute(&settings)
            .await
            .map_err(|e| PgBackendError::connection("failed to apply session settings", &e))
    }

    /// Identifier of this connection, unique within the process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the server side of the connection has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Whether a foreign-key disable cycle is open on this connection.
    #[must_use]
    pub fn foreign_keys_disabled(&self) -> bool {
        self.fk_cycle_open
    }

    /// Terminate the connection and wait for the protocol task to finish.
    ///
    /// Consumes the handle, so it can run at most once.
    ///
    /// # Errors
    /// Returns `PgBackendError::ConnectionError` if the protocol task panicked.
    pub async fn close(mut self) -> Result<(), PgBackendError> {
        let conn_id = self.id;
        if self.fk_cycle_open {
            warn!(conn_id, "closing connection with foreign keys still disabled; the cycle rolls back");
        }
        let driver = self.driver.take();
        // dropping the client sends Terminate and ends the driver future
        drop(self);
        if let Some(driver) = driver {
            driver.await.map_err(|e| PgBackendError::ConnectionError {
                message: "postgres connection task failed during close".to_string(),
                detail: Some(e.to_string()),
            })?;
        }
        info!(conn_id, "postgres connection closed");
        Ok(())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            debug!(conn_id = self.id, "aborting unclosed postgres connection");
            driver.abort();
        }
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("id", &self.id)
            .field("prepared", &self.statements.len())
            .field("fk_cycle_open", &self.fk_cycle_open)
            .finish_non_exhaustive()
    }
}

/// Future returned by the body passed to [`with_connection`].
pub type ConnectionFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, PgBackendError>> + Send + 'c>>;

/// Open a connection, run `body` with it, and close it on every exit path.
///
/// ```rust,no_run
/// use sql_backend_postgres::prelude::*;
///
/// # async fn demo() -> Result<(), PgBackendError> {
/// let cfg = PgConfig::new("localhost", 5432, "app");
/// let count = with_connection(&cfg, |conn| {
///     Box::pin(async move {
///         let (_, rows) = conn.run_direct("SELECT count(*) FROM t", &[], false).await?;
///         Ok(rows.results[0].get_by_index(0).and_then(SqlValue::as_int))
///     })
/// })
/// .await?;
/// # let _ = count;
/// # Ok(()) }
/// ```
///
/// # Errors
/// Returns the error from opening, from `body`, or from closing, in that order of precedence.
pub async fn with_connection<T, F>(config: &PgConfig, body: F) -> Result<T, PgBackendError>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> ConnectionFuture<'c, T>,
{
    let mut conn = PgConnection::open(config).await?;
    let outcome = body(&mut conn).await;
    let closed = conn.close().await;
    match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "close failed after body error");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(value), closed) => closed.map(|()| value),
    }
}
