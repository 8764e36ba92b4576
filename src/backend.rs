use async_trait::async_trait;

use crate::error::PgBackendError;
use crate::postgres::connection::PgConnection;
use crate::postgres::ddl::{self, ColumnAttr, IndexMethod};
use crate::postgres::executor::{PreparedStatement, StatementId};
use crate::postgres::schema::TableInfo;
use crate::results::ResultSet;
use crate::types::{SqlType, SqlValue};

/// The operations a query/table layer needs from a SQL backend.
///
/// The trait is object safe, so the calling layer can hold a `Box<dyn SqlBackend>` handed to it
/// explicitly instead of looking one up in a process-wide registry.
#[async_trait]
pub trait SqlBackend: Send {
    /// Runs parameterless statements, possibly several separated by `;`.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), PgBackendError>;

    /// Runs one statement; the first slot is the last inserted id when `want_last_id` is set and
    /// the affected-row count otherwise.
    async fn run_direct(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        want_last_id: bool,
    ) -> Result<(i64, ResultSet), PgBackendError>;

    async fn prepare(
        &mut self,
        id: StatementId,
        param_types: &[SqlType],
        sql: &str,
    ) -> Result<PreparedStatement, PgBackendError>;

    async fn run_prepared(
        &mut self,
        handle: &PreparedStatement,
        params: &[SqlValue],
    ) -> Result<(u64, ResultSet), PgBackendError>;

    async fn describe_table(&mut self, table: &str) -> Result<TableInfo, PgBackendError>;

    async fn disable_foreign_keys(&mut self) -> Result<(), PgBackendError>;

    async fn restore_foreign_keys(&mut self) -> Result<(), PgBackendError>;

    fn is_closed(&self) -> bool;

    /// Column type for `ty` in this dialect.
    fn column_type_sql(&self, ty: SqlType, is_primary: bool) -> &'static str;

    fn column_attr_sql(&self, attr: ColumnAttr) -> &'static str;

    fn index_method_sql(&self, method: IndexMethod) -> &'static str;
}

#[async_trait]
impl SqlBackend for PgConnection {
    async fn execute_batch(&mut self, sql: &str) -> Result<(), PgBackendError> {
        PgConnection::execute_batch(self, sql).await
    }

    async fn run_direct(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        want_last_id: bool,
    ) -> Result<(i64, ResultSet), PgBackendError> {
        PgConnection::run_direct(self, sql, params, want_last_id).await
    }

    async fn prepare(
        &mut self,
        id: StatementId,
        param_types: &[SqlType],
        sql: &str,
    ) -> Result<PreparedStatement, PgBackendError> {
        PgConnection::prepare(self, id, param_types, sql).await
    }

    async fn run_prepared(
        &mut self,
        handle: &PreparedStatement,
        params: &[SqlValue],
    ) -> Result<(u64, ResultSet), PgBackendError> {
        PgConnection::run_prepared(self, handle, params).await
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableInfo, PgBackendError> {
        PgConnection::describe_table(self, table).await
    }

    async fn disable_foreign_keys(&mut self) -> Result<(), PgBackendError> {
        PgConnection::disable_foreign_keys(self).await
    }

    async fn restore_foreign_keys(&mut self) -> Result<(), PgBackendError> {
        PgConnection::restore_foreign_keys(self).await
    }

    fn is_closed(&self) -> bool {
        PgConnection::is_closed(self)
    }

    fn column_type_sql(&self, ty: SqlType, is_primary: bool) -> &'static str {
        ddl::column_type_sql(ty, is_primary)
    }

    fn column_attr_sql(&self, attr: ColumnAttr) -> &'static str {
        ddl::column_attr_sql(attr)
    }

    fn index_method_sql(&self, method: IndexMethod) -> &'static str {
        ddl::index_method_sql(method)
    }
}
