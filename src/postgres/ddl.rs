//! Postgres-specific pieces of DDL generation: column type names, column attributes and index
//! methods. The generic table compiler lives in the calling layer and asks these hooks for the
//! dialect-specific fragments.

use crate::types::SqlType;

/// Column attributes the calling layer may attach to a column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnAttr {
    Primary,
    AutoIncrement,
    Required,
    Optional,
    Unique,
    Indexed,
}

/// Index access methods that can be requested for an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMethod {
    BTree,
    Hash,
}

/// PostgreSQL column type for a semantic type.
///
/// Row identifiers become `BIGSERIAL` in primary-key position so the server generates them.
#[must_use]
pub fn column_type_sql(ty: SqlType, is_primary: bool) -> &'static str {
    match ty {
        SqlType::RowId if is_primary => "BIGSERIAL",
        SqlType::RowId => "BIGINT",
        SqlType::Int => "INT8",
        SqlType::Float => "FLOAT8",
        SqlType::Text => "TEXT",
        SqlType::Bool => "BOOLEAN",
        SqlType::Date => "DATE",
        SqlType::Time => "TIME",
        SqlType::DateTime => "TIMESTAMP",
        SqlType::Blob => "BYTEA",
    }
}

/// SQL fragment for one column attribute. Auto-increment and indexing render as nothing: the
/// former is expressed through the column type, the latter through a separate `CREATE INDEX`.
#[must_use]
pub fn column_attr_sql(attr: ColumnAttr) -> &'static str {
    match attr {
        ColumnAttr::Primary => "PRIMARY KEY",
        ColumnAttr::AutoIncrement | ColumnAttr::Indexed => "",
        ColumnAttr::Required => "NOT NULL",
        ColumnAttr::Optional => "NULL",
        ColumnAttr::Unique => "UNIQUE",
    }
}

/// `USING ...` clause for an index method, with its leading space.
#[must_use]
pub fn index_method_sql(method: IndexMethod) -> &'static str {
    match method {
        IndexMethod::BTree => " USING btree",
        IndexMethod::Hash => " USING hash",
    }
}

/// Quote an identifier the way PostgreSQL expects, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Full column definition: quoted name, type and the non-empty attribute fragments.
#[must_use]
pub fn column_definition(name: &str, ty: SqlType, attrs: &[ColumnAttr]) -> String {
    let is_primary = attrs.contains(&ColumnAttr::Primary);
    let mut parts = vec![quote_ident(name), column_type_sql(ty, is_primary).to_string()];
    parts.extend(
        attrs
            .iter()
            .map(|a| column_attr_sql(*a))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    parts.join(" ")
}

/// `CREATE INDEX` statement for the given columns, named after the table and columns.
#[must_use]
pub fn create_index_sql(table: &str, columns: &[&str], method: Option<IndexMethod>) -> String {
    let name = format!("ix_{table}_{}", columns.join("_"));
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE INDEX {} ON {}{} ({cols})",
        quote_ident(&name),
        quote_ident(table),
        method.map_or("", index_method_sql)
    )
}
