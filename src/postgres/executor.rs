use futures_util::{TryStreamExt, pin_mut};
use tokio_postgres::Statement;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, warn};

use super::connection::PgConnection;
use super::params::{Params, param_type, wire_type};
use super::query::build_result_set;
use crate::error::PgBackendError;
use crate::results::ResultSet;
use crate::types::{SqlType, SqlValue};

/// Caller-chosen identifier for a prepared statement on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

impl From<u64> for StatementId {
    fn from(value: u64) -> Self {
        StatementId(value)
    }
}

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// Handle to a statement compiled on the server by [`PgConnection::prepare`].
///
/// Only valid on the connection that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub id: StatementId,
    pub param_types: Vec<SqlType>,
    conn_id: u64,
    sql: String,
}

impl PreparedStatement {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Rewrite `sql` so that it also returns the most recently generated sequence value.
#[must_use]
pub fn with_returning_last_id(sql: &str) -> String {
    let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{trimmed} RETURNING LASTVAL()")
}

impl PgConnection {
    /// Run an ad-hoc statement with parameters.
    ///
    /// With `want_last_id` the statement gets a `RETURNING LASTVAL()` clause and the first slot
    /// of the result is the generated identifier (0 when nothing was inserted); otherwise it is
    /// the affected-row count from the command tag.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` with the SQL and the server's text if the statement
    /// cannot be prepared or executed, or a decode error for unreadable result cells.
    pub async fn run_direct(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        want_last_id: bool,
    ) -> Result<(i64, ResultSet), PgBackendError> {
        let sql = if want_last_id {
            with_returning_last_id(sql)
        } else {
            sql.to_string()
        };
        debug!(conn_id = self.id, sql = %sql, params = params.len(), "run_direct");

        let types: Vec<Type> = params.iter().map(wire_type).collect();
        let stmt = self
            .client
            .prepare_typed(&sql, &types)
            .await
            .map_err(|e| failed("run_direct: prepare failed", &sql, &e))?;
        let (affected, rows) = self.execute_statement(&stmt, params, &sql, "run_direct").await?;

        if want_last_id {
            let id = rows
                .results
                .first()
                .and_then(|row| row.get_by_index(0))
                .and_then(SqlValue::as_int)
                .unwrap_or(0);
            return Ok((id, rows));
        }
        Ok((count_to_i64(affected, &sql)?, rows))
    }

    /// Compile `sql` on the server under the caller's `id`.
    ///
    /// Preparing an id that is already registered replaces the earlier statement.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if the server rejects the statement.
    pub async fn prepare(
        &mut self,
        id: impl Into<StatementId>,
        param_types: &[SqlType],
        sql: &str,
    ) -> Result<PreparedStatement, PgBackendError> {
        let id = id.into();
        debug!(conn_id = self.id, %id, sql, "prepare");
        let types: Vec<Type> = param_types.iter().copied().map(param_type).collect();
        let stmt = self
            .client
            .prepare_typed(sql, &types)
            .await
            .map_err(|e| failed(format!("prepare {id} failed"), sql, &e))?;
        self.statements.insert(id, stmt);

        Ok(PreparedStatement {
            id,
            param_types: param_types.to_vec(),
            conn_id: self.id,
            sql: sql.to_string(),
        })
    }

    /// Re-run a prepared statement with fresh parameter values and return the affected-row count
    /// with the rows.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if the handle belongs to another connection, the
    /// parameter count is wrong, the connection is closed, or the server rejects the execution.
    pub async fn run_prepared(
        &mut self,
        handle: &PreparedStatement,
        params: &[SqlValue],
    ) -> Result<(u64, ResultSet), PgBackendError> {
        if handle.conn_id != self.id {
            return Err(PgBackendError::rejected(
                format!(
                    "{} was prepared on connection {} and cannot run on connection {}",
                    handle.id, handle.conn_id, self.id
                ),
                &handle.sql,
            ));
        }
        if params.len() != handle.param_types.len() {
            return Err(PgBackendError::rejected(
                format!(
                    "{} expects {} parameters, got {}",
                    handle.id,
                    handle.param_types.len(),
                    params.len()
                ),
                &handle.sql,
            ));
        }
        let stmt = self.statements.get(&handle.id).cloned().ok_or_else(|| {
            PgBackendError::rejected(format!("{} is not prepared", handle.id), &handle.sql)
        })?;
        debug!(conn_id = self.id, id = %handle.id, params = params.len(), "run_prepared");
        self.execute_statement(&stmt, params, &handle.sql, "run_prepared")
            .await
    }

    /// Forget a prepared statement; the server releases it once no handle references it.
    pub fn deallocate(&mut self, handle: &PreparedStatement) -> bool {
        handle.conn_id == self.id && self.statements.remove(&handle.id).is_some()
    }

    /// Run one or more parameterless statements over the simple query protocol.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if any statement fails.
    pub async fn execute_batch(&mut self, sql: &str) -> Result<(), PgBackendError> {
        debug!(conn_id = self.id, sql, "execute_batch");
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| failed("execute_batch failed", sql, &e))
    }

    async fn execute_statement(
        &self,
        stmt: &Statement,
        params: &[SqlValue],
        sql: &str,
        context: &str,
    ) -> Result<(u64, ResultSet), PgBackendError> {
        let converted = Params::convert(params);
        let stream = self
            .client
            .query_raw(stmt, converted.as_refs().iter().map(|p| *p as &dyn ToSql))
            .await
            .map_err(|e| failed(format!("{context}: execution failed"), sql, &e))?;
        pin_mut!(stream);

        let mut rows = Vec::new();
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| failed(format!("{context}: reading rows failed"), sql, &e))?
        {
            rows.push(row);
        }
        // no command tag means nothing to count
        let affected = stream.rows_affected().unwrap_or(0);

        let result_set = build_result_set(stmt.columns(), &rows)?;
        Ok((affected, result_set))
    }
}

fn failed(context: impl Into<String>, sql: &str, err: &tokio_postgres::Error) -> PgBackendError {
    let err = PgBackendError::query(context, sql, err);
    warn!(error = %err, "statement failed");
    err
}

fn count_to_i64(affected: u64, sql: &str) -> Result<i64, PgBackendError> {
    i64::try_from(affected).map_err(|e| {
        PgBackendError::rejected(format!("invalid affected row count {affected}: {e}"), sql)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returning_clause_is_appended() {
        assert_eq!(
            with_returning_last_id("INSERT INTO t (name) VALUES ($1)"),
            "INSERT INTO t (name) VALUES ($1) RETURNING LASTVAL()"
        );
    }

    #[test]
    fn trailing_semicolons_are_dropped_before_returning() {
        assert_eq!(
            with_returning_last_id("INSERT INTO t DEFAULT VALUES ;  \n"),
            "INSERT INTO t DEFAULT VALUES RETURNING LASTVAL()"
        );
    }

    #[test]
    fn statement_id_display() {
        assert_eq!(StatementId::from(3).to_string(), "stmt#3");
    }
}
