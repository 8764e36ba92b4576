use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Values that can be sent as query parameters or read back from result cells.
///
/// Every value crossing the wire is exactly one of these variants:
/// ```rust
/// use sql_backend_postgres::prelude::*;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Bool(true),
///     SqlValue::Null,
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// Binary data
    Blob(Vec<u8>),
    /// Server-generated row identifier; travels on the wire exactly like `Int`
    RowId(i64),
    /// NULL value
    Null,
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload of an `Int` or `RowId`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(value) | SqlValue::RowId(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if let SqlValue::Bool(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let SqlValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let SqlValue::Timestamp(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let SqlValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// The semantic type of this value, or `None` for NULL.
    #[must_use]
    pub fn sql_type(&self) -> Option<SqlType> {
        Some(match self {
            SqlValue::Int(_) => SqlType::Int,
            SqlValue::Float(_) => SqlType::Float,
            SqlValue::Text(_) => SqlType::Text,
            SqlValue::Bool(_) => SqlType::Bool,
            SqlValue::Date(_) => SqlType::Date,
            SqlValue::Time(_) => SqlType::Time,
            SqlValue::Timestamp(_) => SqlType::DateTime,
            SqlValue::Blob(_) => SqlType::Blob,
            SqlValue::RowId(_) => SqlType::RowId,
            SqlValue::Null => return None,
        })
    }
}

/// Semantic column types the calling query layer reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// Auto-incrementing or otherwise server-generated integer primary key
    RowId,
    Int,
    Float,
    Text,
    Bool,
    Date,
    Time,
    DateTime,
    Blob,
}

impl SqlType {
    /// Resolve a declared column type, as reported by `information_schema.columns`, to a
    /// semantic type.
    ///
    /// 64-bit integers in primary-key position resolve to [`SqlType::RowId`] so that
    /// auto-incrementing keys round-trip. Anything unrecognised comes back as `Err` carrying the
    /// raw declared type.
    ///
    /// # Errors
    /// Returns the original type string when it has no mapping.
    pub fn from_declared(declared: &str, is_primary: bool) -> Result<SqlType, String> {
        let lowered = declared.trim().to_lowercase();
        match (lowered.as_str(), is_primary) {
            ("bigint" | "int8" | "bigserial", true) => Ok(SqlType::RowId),
            ("bigint" | "int8", false) => Ok(SqlType::Int),
            ("float8" | "double precision", _) => Ok(SqlType::Float),
            ("timestamp" | "timestamp without time zone", _) => Ok(SqlType::DateTime),
            ("bytea", _) => Ok(SqlType::Blob),
            ("text", _) => Ok(SqlType::Text),
            ("boolean", _) => Ok(SqlType::Bool),
            ("date", _) => Ok(SqlType::Date),
            ("time" | "time without time zone", _) => Ok(SqlType::Time),
            _ => Err(declared.to_string()),
        }
    }

    /// Whether a declared type is the server's auto-increment integer spelling.
    #[must_use]
    pub fn is_auto_increment_spelling(declared: &str) -> bool {
        declared.trim().eq_ignore_ascii_case("bigserial")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_primary_key_is_row_id() {
        assert_eq!(SqlType::from_declared("bigint", true), Ok(SqlType::RowId));
        assert_eq!(SqlType::from_declared("BIGINT", false), Ok(SqlType::Int));
        assert_eq!(SqlType::from_declared("int8", true), Ok(SqlType::RowId));
        assert_eq!(SqlType::from_declared("bigserial", true), Ok(SqlType::RowId));
    }

    #[test]
    fn declared_types_map_regardless_of_key_position() {
        for pk in [true, false] {
            assert_eq!(SqlType::from_declared("double precision", pk), Ok(SqlType::Float));
            assert_eq!(
                SqlType::from_declared("timestamp without time zone", pk),
                Ok(SqlType::DateTime)
            );
            assert_eq!(SqlType::from_declared("bytea", pk), Ok(SqlType::Blob));
            assert_eq!(SqlType::from_declared("text", pk), Ok(SqlType::Text));
            assert_eq!(SqlType::from_declared("boolean", pk), Ok(SqlType::Bool));
            assert_eq!(SqlType::from_declared("date", pk), Ok(SqlType::Date));
            assert_eq!(SqlType::from_declared("time without time zone", pk), Ok(SqlType::Time));
        }
    }

    #[test]
    fn unknown_declared_type_keeps_raw_spelling() {
        assert_eq!(
            SqlType::from_declared("character varying", false),
            Err("character varying".to_string())
        );
        assert_eq!(SqlType::from_declared("bigserial", false), Err("bigserial".to_string()));
    }

    #[test]
    fn row_id_exposes_integer_payload() {
        assert_eq!(SqlValue::RowId(7).as_int(), Some(7));
        assert_eq!(SqlValue::Null.sql_type(), None);
        assert_eq!(SqlValue::RowId(7).sql_type(), Some(SqlType::RowId));
    }
}
