//! Live table introspection against `information_schema` and `pg_catalog`.
//!
//! Everything here is read-only and scoped to `current_schema()`, which follows the search path
//! set when the connection was opened.

use std::collections::HashSet;

use tracing::debug;

use super::connection::PgConnection;
use crate::error::PgBackendError;
use crate::results::{DbRow, ResultSet};
use crate::types::{SqlType, SqlValue};

/// Columns of a table in declaration order.
pub const COLUMNS_QUERY: &str = r"
SELECT
    c.column_name::text AS column_name,
    c.data_type::text AS data_type,
    c.is_nullable = 'YES' AS is_nullable
FROM information_schema.columns c
WHERE c.table_schema = current_schema()
  AND c.table_name = $1
ORDER BY c.ordinal_position
";

/// Columns covered by the table's primary key.
pub const PRIMARY_KEY_QUERY: &str = r"
SELECT a.attname::text AS column_name
FROM pg_index i
JOIN pg_class t ON t.oid = i.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(i.indkey)
WHERE t.relname = $1
  AND n.nspname = current_schema()
  AND i.indisprimary
ORDER BY a.attnum
";

/// Members of each unique index, the primary key's included, one row per member in key order.
pub const UNIQUE_MEMBERS_QUERY: &str = r"
SELECT ic.relname::text AS index_name, a.attname::text AS column_name
FROM pg_index i
JOIN pg_class t ON t.oid = i.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_class ic ON ic.oid = i.indexrelid
JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) ON true
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE t.relname = $1
  AND n.nspname = current_schema()
  AND i.indisunique
ORDER BY ic.relname, k.ord
";

/// (local column, referenced table, referenced column) for every foreign key declared on the
/// table, matched pairwise through `conkey`/`confkey` in key order.
pub const FOREIGN_KEYS_QUERY: &str = r"
SELECT
    la.attname::text AS column_name,
    ft.relname::text AS foreign_table,
    fa.attname::text AS foreign_column
FROM pg_constraint con
JOIN pg_class t ON t.oid = con.conrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_class ft ON ft.oid = con.confrelid
JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(local_attnum, foreign_attnum, ord)
    ON true
JOIN pg_attribute la ON la.attrelid = con.conrelid AND la.attnum = k.local_attnum
JOIN pg_attribute fa ON fa.attrelid = con.confrelid AND fa.attnum = k.foreign_attnum
WHERE con.contype = 'f'
  AND t.relname = $1
  AND n.nspname = current_schema()
ORDER BY con.conname, k.ord
";

/// Columns covered by any index on an ordinary table.
pub const INDEXED_COLUMNS_QUERY: &str = r"
SELECT DISTINCT a.attname::text AS column_name
FROM pg_class t
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_index ix ON t.oid = ix.indrelid
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
WHERE t.relkind = 'r'
  AND t.relname = $1
  AND n.nspname = current_schema()
ORDER BY 1
";

const TABLES_QUERY: &str = r"
SELECT table_name::text AS table_name
FROM information_schema.tables
WHERE table_schema = current_schema()
  AND table_type = 'BASE TABLE'
ORDER BY table_name
";

/// What the database says about one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Resolved semantic type, or the raw declared type when it has no mapping.
    pub col_type: Result<SqlType, String>,
    pub is_primary: bool,
    pub is_auto_increment: bool,
    pub is_unique: bool,
    pub is_nullable: bool,
    pub has_index: bool,
    /// `(referenced table, referenced column)` pairs.
    pub foreign_keys: Vec<(String, String)>,
}

/// What the database says about one table. No columns means the table does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    /// Column sets of multi-column unique indexes, a composite primary key included;
    /// single-column ones show up as [`ColumnInfo::is_unique`] instead.
    pub unique_groups: Vec<Vec<String>>,
}

impl TableInfo {
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl PgConnection {
    /// Reconstruct a table's definition from the live catalog.
    ///
    /// A table that does not exist yields an empty [`TableInfo`] after a single query.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if a catalog query fails and
    /// `PgBackendError::SchemaError` if it returns rows of an unexpected shape.
    pub async fn describe_table(&mut self, table: &str) -> Result<TableInfo, PgBackendError> {
        debug!(conn_id = self.id, table, "describe_table");
        let table_param = [SqlValue::Text(table.to_string())];

        let columns = self.catalog(COLUMNS_QUERY, &table_param).await?;
        if columns.is_empty() {
            return Ok(TableInfo::default());
        }

        let primary: HashSet<String> = self
            .catalog(PRIMARY_KEY_QUERY, &table_param)
            .await?
            .results
            .iter()
            .map(|row| text_at(row, 0, "primary key"))
            .collect::<Result<_, _>>()?;

        let unique_members = self
            .catalog(UNIQUE_MEMBERS_QUERY, &table_param)
            .await?
            .results
            .iter()
            .map(|row| Ok((text_at(row, 0, "unique index")?, text_at(row, 1, "unique index")?)))
            .collect::<Result<Vec<_>, PgBackendError>>()?;

        let foreign_keys = self
            .catalog(FOREIGN_KEYS_QUERY, &table_param)
            .await?
            .results
            .iter()
            .map(|row| {
                Ok((
                    text_at(row, 0, "foreign key")?,
                    text_at(row, 1, "foreign key")?,
                    text_at(row, 2, "foreign key")?,
                ))
            })
            .collect::<Result<Vec<_>, PgBackendError>>()?;

        let indexed: HashSet<String> = self
            .catalog(INDEXED_COLUMNS_QUERY, &table_param)
            .await?
            .results
            .iter()
            .map(|row| text_at(row, 0, "index"))
            .collect::<Result<_, _>>()?;

        let (unique_groups, unique_singles) = fold_unique_groups(unique_members);

        let mut infos = Vec::with_capacity(columns.len());
        for row in &columns.results {
            let name = text_at(row, 0, "column")?;
            let declared = text_at(row, 1, "column")?;
            let is_nullable = bool_at(row, 2, "column")?;
            let is_primary = primary.contains(&name);
            infos.push(ColumnInfo {
                col_type: SqlType::from_declared(&declared, is_primary),
                is_primary,
                is_auto_increment: SqlType::is_auto_increment_spelling(&declared),
                is_unique: unique_singles.contains(&name),
                is_nullable,
                has_index: indexed.contains(&name),
                foreign_keys: foreign_keys
                    .iter()
                    .filter(|(col, _, _)| *col == name)
                    .map(|(_, table, column)| (table.clone(), column.clone()))
                    .collect(),
                name,
            });
        }

        Ok(TableInfo {
            columns: infos,
            unique_groups,
        })
    }

    /// Whether a table of that name exists in the current schema.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if the catalog query fails.
    pub async fn table_exists(&mut self, table: &str) -> Result<bool, PgBackendError> {
        let rows = self
            .catalog(COLUMNS_QUERY, &[SqlValue::Text(table.to_string())])
            .await?;
        Ok(!rows.is_empty())
    }

    /// Names of the ordinary tables in the current schema, sorted.
    ///
    /// # Errors
    /// Returns `PgBackendError::QueryError` if the catalog query fails and
    /// `PgBackendError::SchemaError` for rows of an unexpected shape.
    pub async fn list_tables(&mut self) -> Result<Vec<String>, PgBackendError> {
        self.catalog(TABLES_QUERY, &[])
            .await?
            .results
            .iter()
            .map(|row| text_at(row, 0, "table list"))
            .collect()
    }

    async fn catalog(&mut self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, PgBackendError> {
        let (_, rows) = self.run_direct(sql, params, false).await?;
        Ok(rows)
    }
}

/// Split unique-index membership rows, in key order, into multi-column groups and the set of
/// columns that are unique on their own.
pub(crate) fn fold_unique_groups(
    members: Vec<(String, String)>,
) -> (Vec<Vec<String>>, HashSet<String>) {
    let mut indexes: Vec<(String, Vec<String>)> = Vec::new();
    for (index, column) in members {
        match indexes.last_mut() {
            Some((current, cols)) if *current == index => cols.push(column),
            _ => indexes.push((index, vec![column])),
        }
    }

    let mut groups = Vec::new();
    let mut singles = HashSet::new();
    for (_, mut cols) in indexes {
        if cols.len() >= 2 {
            groups.push(cols);
        } else if let Some(col) = cols.pop() {
            singles.insert(col);
        }
    }
    (groups, singles)
}

fn text_at(row: &DbRow, idx: usize, what: &str) -> Result<String, PgBackendError> {
    match row.get_by_index(idx) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        other => Err(unexpected_shape(what, idx, "text", other)),
    }
}

fn bool_at(row: &DbRow, idx: usize, what: &str) -> Result<bool, PgBackendError> {
    match row.get_by_index(idx) {
        Some(SqlValue::Bool(b)) => Ok(*b),
        other => Err(unexpected_shape(what, idx, "boolean", other)),
    }
}

fn unexpected_shape(what: &str, idx: usize, expected: &str, got: Option<&SqlValue>) -> PgBackendError {
    PgBackendError::SchemaError(format!(
        "{what} catalog row: expected {expected} in column {idx}, got {got:?}"
    ))
}
