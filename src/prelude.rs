//! Convenient imports for common functionality.

pub use crate::backend::SqlBackend;
pub use crate::error::{FailureKind, PgBackendError};
pub use crate::postgres::connection::{ConnectionFuture, PgConnection, with_connection};
pub use crate::postgres::config::PgConfig;
pub use crate::postgres::ddl::{ColumnAttr, IndexMethod};
pub use crate::postgres::executor::{PreparedStatement, StatementId};
pub use crate::postgres::schema::{ColumnInfo, TableInfo};
pub use crate::results::{DbRow, ResultSet};
pub use crate::types::{SqlType, SqlValue};
