use std::sync::LazyLock;
use tokio::runtime::Runtime;

/// Shared tokio runtime for starting and stopping embedded servers
pub(crate) static SHARED_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("Failed to create tokio runtime for test utilities"));

/// Embedded `PostgreSQL` for integration tests
pub mod postgres;

pub use postgres::*;
