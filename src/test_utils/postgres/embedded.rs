use postgresql_embedded::PostgreSQL;
use tracing::info;

use super::super::SHARED_RUNTIME;
use crate::postgres::config::PgConfig;
use crate::postgres::connection::PgConnection;

/// A running embedded `PostgreSQL` instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    /// Config that reaches the test database with the instance's credentials
    pub config: PgConfig,
}

/// Start an embedded `PostgreSQL` instance and create `database` in it.
///
/// # Errors
/// Returns an error if the server cannot be set up or started, the database cannot be created,
/// or the post-start connectivity check fails.
pub fn setup_postgres_embedded(
    database: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();

        // bundled binaries, nothing to download
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let config = PgConfig::new(settings.host.clone(), port, database)
            .with_credentials(settings.username.clone(), settings.password.clone());

        postgresql.create_database(database).await?;
        info!(port, database, "embedded postgres started");

        // Quick connection test
        let mut conn = PgConnection::open(&config).await?;
        conn.run_direct("SELECT 1", &[], false).await?;
        conn.close().await?;

        Ok(EmbeddedPostgres {
            postgresql,
            port,
            config,
        })
    })
}

/// Stop a previously started embedded `PostgreSQL` instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}
