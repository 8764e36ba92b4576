// PostgreSQL backend
//
// - config: connection parameters and the wire connection string
// - connection: open/close and scoped use of one connection
// - params: value codec between SqlValue and the wire
// - query: result extraction
// - executor: direct and prepared execution
// - schema: live table introspection
// - foreign_keys: disable/restore cycle for bulk loads
// - ddl: Postgres-specific DDL fragments

pub mod config;
pub mod connection;
pub mod ddl;
pub mod executor;
pub mod foreign_keys;
pub mod params;
pub mod query;
pub mod schema;

pub use config::PgConfig;
pub use connection::{ConnectionFuture, PgConnection, with_connection};
pub use executor::{PreparedStatement, StatementId};
pub use params::{Params, WireParam, decode, encode};
pub use query::build_result_set;
pub use schema::{ColumnInfo, TableInfo};
