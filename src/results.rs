use std::collections::HashMap;
use std::sync::Arc;

use crate::types::SqlValue;

/// A row from a database query result
///
/// Column names and the name-to-index lookup table are shared by every row of the same
/// [`ResultSet`].
#[derive(Debug, Clone)]
pub struct DbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<SqlValue>,
    column_index: Arc<HashMap<String, usize>>,
}

impl DbRow {
    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(column_name).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }
}

/// Rows returned by a statement, in server order.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<DbRow>,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Create an empty result set for the given columns with room for `capacity` rows.
    #[must_use]
    pub fn with_columns(column_names: Vec<String>, capacity: usize) -> ResultSet {
        // first occurrence wins for duplicate names, matching positional lookup
        let mut column_index = HashMap::with_capacity(column_names.len());
        for (i, name) in column_names.iter().enumerate() {
            column_index.entry(name.clone()).or_insert(i);
        }
        ResultSet {
            results: Vec::with_capacity(capacity),
            column_names: Arc::new(column_names),
            column_index: Arc::new(column_index),
        }
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Add a row to the result set
    pub fn add_row_values(&mut self, values: Vec<SqlValue>) {
        self.results.push(DbRow {
            column_names: Arc::clone(&self.column_names),
            values,
            column_index: Arc::clone(&self.column_index),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Consume the set, keeping only the raw values of each row.
    #[must_use]
    pub fn into_values(self) -> Vec<Vec<SqlValue>> {
        self.results.into_iter().map(|row| row.values).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index() {
        let mut rs = ResultSet::with_columns(vec!["id".into(), "name".into()], 1);
        rs.add_row_values(vec![SqlValue::Int(1), SqlValue::Text("alice".into())]);

        assert_eq!(rs.len(), 1);
        let row = &rs.results[0];
        assert_eq!(row.get("name").and_then(SqlValue::as_text), Some("alice"));
        assert_eq!(row.get_by_index(0), Some(&SqlValue::Int(1)));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn duplicate_column_names_resolve_to_first() {
        let mut rs = ResultSet::with_columns(vec!["a".into(), "a".into()], 1);
        rs.add_row_values(vec![SqlValue::Int(1), SqlValue::Int(2)]);
        assert_eq!(rs.results[0].get("a"), Some(&SqlValue::Int(1)));
        assert_eq!(rs.into_values(), vec![vec![SqlValue::Int(1), SqlValue::Int(2)]]);
    }
}
