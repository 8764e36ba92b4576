//! Temporarily dropping every foreign key in the current schema, for bulk loads that insert rows
//! out of dependency order.
//!
//! [`PgConnection::disable_foreign_keys`] opens a transaction, records the `ADD CONSTRAINT`
//! statement for each foreign key in a recovery table and drops the constraint.
//! [`PgConnection::restore_foreign_keys`] replays the records in order and commits. The whole
//! cycle is one transaction on one connection.

use tracing::{debug, info, warn};

use super::connection::PgConnection;
use crate::error::PgBackendError;
use crate::types::SqlValue;

/// Table holding the statements that recreate the dropped constraints.
pub const RECOVERY_TABLE: &str = "__dropped_foreign_keys";

const CREATE_RECOVERY_TABLE: &str = "CREATE TABLE IF NOT EXISTS __dropped_foreign_keys (\
    seq BIGSERIAL PRIMARY KEY, \
    fix TEXT NOT NULL)";

/// Records then drops each foreign key of the current schema. The `FOR` query's snapshot is taken
/// once, so constraints dropped inside the loop are not rescanned.
const DROP_FOREIGN_KEYS: &str = r"
DO $$
DECLARE
    r record;
BEGIN
    FOR r IN
        SELECT n.nspname AS schema_name,
               c.relname AS table_name,
               con.conname AS constraint_name,
               pg_get_constraintdef(con.oid) AS definition
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE con.contype = 'f'
          AND n.nspname = current_schema()
        ORDER BY c.relname, con.conname
    LOOP
        INSERT INTO __dropped_foreign_keys (fix)
        VALUES (format('ALTER TABLE %I.%I ADD CONSTRAINT %I %s',
                       r.schema_name, r.table_name, r.constraint_name, r.definition));
        EXECUTE format('ALTER TABLE %I.%I DROP CONSTRAINT %I',
                       r.schema_name, r.table_name, r.constraint_name);
    END LOOP;
END
$$;
";

const SELECT_RECORDS: &str = "SELECT seq, fix FROM __dropped_foreign_keys ORDER BY seq";
const DELETE_RECORD: &str = "DELETE FROM __dropped_foreign_keys WHERE seq = $1";
const DROP_RECOVERY_TABLE: &str = "DROP TABLE __dropped_foreign_keys";

const SAVEPOINT: &str = "SAVEPOINT restore_foreign_key";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT restore_foreign_key";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT restore_foreign_key";

impl PgConnection {
    /// Begin a transaction and drop every foreign-key constraint in the current schema, keeping
    /// the statements that recreate them in [`RECOVERY_TABLE`].
    ///
    /// The transaction stays open until [`restore_foreign_keys`](Self::restore_foreign_keys) or
    /// [`abort_foreign_key_cycle`](Self::abort_foreign_key_cycle).
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if a cycle is already open on this connection, or if
    /// any step fails; the transaction is rolled back in that case and nothing is kept.
    pub async fn disable_foreign_keys(&mut self) -> Result<(), PgBackendError> {
        if self.fk_cycle_open {
            return Err(PgBackendError::rejected(
                "foreign keys are already disabled; restore or abort the open cycle first",
                DROP_FOREIGN_KEYS,
            ));
        }
        debug!(conn_id = self.id, "disabling foreign keys");

        self.execute_batch("BEGIN").await?;
        let dropped = async {
            self.execute_batch(CREATE_RECOVERY_TABLE).await?;
            self.execute_batch(DROP_FOREIGN_KEYS).await?;
            self.recovery_record_count().await
        }
        .await;

        match dropped {
            Ok(count) => {
                self.fk_cycle_open = true;
                info!(conn_id = self.id, dropped = count, "foreign keys disabled");
                Ok(())
            }
            Err(e) => {
                self.rollback("disable_foreign_keys failed").await;
                Err(e)
            }
        }
    }

    /// Recreate the dropped constraints in the order they were dropped, remove the recovery
    /// table and commit.
    ///
    /// Each record is deleted only after its statement succeeded. When one fails, the error is
    /// returned and the cycle stays open holding just the records not yet restored, so the caller
    /// can repair the data and call this again, or abort.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if the recovery table cannot be read, a constraint
    /// cannot be recreated, or the commit fails.
    pub async fn restore_foreign_keys(&mut self) -> Result<(), PgBackendError> {
        debug!(conn_id = self.id, "restoring foreign keys");
        if !self.fk_cycle_open {
            // a recovery table left behind by an earlier session
            self.execute_batch("BEGIN").await?;
            self.fk_cycle_open = true;
        }

        let records = match self.recovery_records().await {
            Ok(records) => records,
            Err(e) => {
                self.rollback("restore_foreign_keys could not read the recovery table").await;
                return Err(e);
            }
        };

        for (seq, fix) in &records {
            self.execute_batch(SAVEPOINT).await?;
            let applied = async {
                self.execute_batch(fix).await?;
                self.run_direct(DELETE_RECORD, &[SqlValue::Int(*seq)], false)
                    .await
                    .map(|_| ())
            }
            .await;
            if let Err(e) = applied {
                warn!(conn_id = self.id, seq, fix = %fix, "foreign key restore failed; cycle left open");
                self.execute_batch(ROLLBACK_TO_SAVEPOINT).await?;
                return Err(e);
            }
            self.execute_batch(RELEASE_SAVEPOINT).await?;
        }

        self.execute_batch(DROP_RECOVERY_TABLE).await?;
        self.execute_batch("COMMIT").await?;
        self.fk_cycle_open = false;
        info!(conn_id = self.id, restored = records.len(), "foreign keys restored");
        Ok(())
    }

    /// Roll back an open cycle: the constraints come back as they were and the recovery table
    /// disappears, together with everything else done in the transaction.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if no cycle is open or the rollback fails.
    pub async fn abort_foreign_key_cycle(&mut self) -> Result<(), PgBackendError> {
        if !self.fk_cycle_open {
            return Err(PgBackendError::rejected(
                "no foreign-key cycle is open on this connection",
                "ROLLBACK",
            ));
        }
        self.execute_batch("ROLLBACK").await?;
        self.fk_cycle_open = false;
        warn!(conn_id = self.id, "foreign-key cycle aborted");
        Ok(())
    }

    async fn recovery_records(&mut self) -> Result<Vec<(i64, String)>, PgBackendError> {
        let (_, rows) = self.run_direct(SELECT_RECORDS, &[], false).await?;
        rows.results
            .iter()
            .map(|row| match (row.get_by_index(0), row.get_by_index(1)) {
                (Some(SqlValue::Int(seq)), Some(SqlValue::Text(fix))) => Ok((*seq, fix.clone())),
                other => Err(PgBackendError::SchemaError(format!(
                    "unexpected row in {RECOVERY_TABLE}: {other:?}"
                ))),
            })
            .collect()
    }

    async fn recovery_record_count(&mut self) -> Result<usize, PgBackendError> {
        let (_, rows) = self
            .run_direct("SELECT count(*) FROM __dropped_foreign_keys", &[], false)
            .await?;
        Ok(rows
            .results
            .first()
            .and_then(|row| row.get_by_index(0))
            .and_then(SqlValue::as_int)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0))
    }

    async fn rollback(&mut self, reason: &str) {
        warn!(conn_id = self.id, reason, "rolling back foreign-key cycle");
        if let Err(e) = self.execute_batch("ROLLBACK").await {
            warn!(conn_id = self.id, error = %e, "rollback failed");
        }
        self.fk_cycle_open = false;
    }
}
