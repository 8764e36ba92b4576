//! PostgreSQL backend adapter for a SQL query/table layer.
//!
//! Marshals [`SqlValue`]s to and from the wire, runs ad-hoc and prepared statements, reads table
//! definitions back from the live catalog, and drops/restores foreign keys around bulk loads.

pub mod backend;
pub mod error;
pub mod postgres;
pub mod prelude;
pub mod results;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use backend::SqlBackend;
pub use error::{FailureKind, PgBackendError};
pub use postgres::{PgConfig, PgConnection, PreparedStatement, StatementId, with_connection};
pub use results::{DbRow, ResultSet};
pub use types::{SqlType, SqlValue};
