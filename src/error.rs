use std::fmt;

use thiserror::Error;

/// How a statement failed on its way to or from the server.
///
/// A statement that succeeded is simply the `Ok` arm of the surrounding `Result`; only the
/// failure states are represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server answered with something the protocol layer could not interpret.
    BadResponse,
    /// The server reported an error that terminated the session (`FATAL`/`PANIC`).
    FatalError,
    /// The server rejected the statement but the session is still usable (`ERROR`).
    NonFatalError,
    /// No answer arrived: the connection was closed or the socket failed.
    NoResponse,
}

impl FailureKind {
    /// Classify a driver error.
    #[must_use]
    pub fn of(err: &tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return match db.severity() {
                "FATAL" | "PANIC" => FailureKind::FatalError,
                _ => FailureKind::NonFatalError,
            };
        }
        if err.is_closed() || std::error::Error::source(err).is_some_and(|s| s.is::<std::io::Error>())
        {
            FailureKind::NoResponse
        } else {
            FailureKind::BadResponse
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::BadResponse => "bad response",
            FailureKind::FatalError => "fatal error",
            FailureKind::NonFatalError => "non-fatal error",
            FailureKind::NoResponse => "no response",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PgBackendError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {message}{}", detail_suffix(.detail))]
    ConnectionError {
        message: String,
        detail: Option<String>,
    },

    #[error("Query error ({kind}): {context}{}; sql: {sql}", detail_suffix(.detail))]
    QueryError {
        kind: FailureKind,
        context: String,
        detail: Option<String>,
        sql: String,
    },

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Unsupported column type '{type_name}' (oid {oid})")]
    UnsupportedType { type_name: String, oid: u32 },

    #[error("Cannot decode {type_name} value: {message}")]
    DecodeError { type_name: String, message: String },
}

impl PgBackendError {
    /// Wrap a driver error raised while running `sql`.
    pub(crate) fn query(context: impl Into<String>, sql: &str, err: &tokio_postgres::Error) -> Self {
        PgBackendError::QueryError {
            kind: FailureKind::of(err),
            context: context.into(),
            detail: Some(server_text(err)),
            sql: sql.to_string(),
        }
    }

    /// A client-side rejection of `sql` that never reached the server.
    pub(crate) fn rejected(context: impl Into<String>, sql: &str) -> Self {
        PgBackendError::QueryError {
            kind: FailureKind::BadResponse,
            context: context.into(),
            detail: None,
            sql: sql.to_string(),
        }
    }

    pub(crate) fn connection(message: impl Into<String>, err: &tokio_postgres::Error) -> Self {
        PgBackendError::ConnectionError {
            message: message.into(),
            detail: Some(server_text(err)),
        }
    }

    /// The server's own diagnostic text, when the error carries one.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            PgBackendError::ConnectionError { detail, .. }
            | PgBackendError::QueryError { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Render the most useful text a driver error carries: the server message with its detail and
/// hint when the server answered, otherwise the driver's own description.
fn server_text(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => {
            let mut text = format!("{}: {}", db.severity(), db.message());
            if let Some(detail) = db.detail() {
                text.push_str(&format!(" ({detail})"));
            }
            if let Some(hint) = db.hint() {
                text.push_str(&format!(" hint: {hint}"));
            }
            text
        }
        None => err.to_string(),
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map_or_else(String::new, |d| format!(": {d}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_mentions_sql_and_server_text() {
        let err = PgBackendError::QueryError {
            kind: FailureKind::NonFatalError,
            context: "run_direct".into(),
            detail: Some("ERROR: syntax error at or near \"SELEC\"".into()),
            sql: "SELEC 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SELEC 1"));
        assert!(msg.contains("syntax error"));
        assert!(msg.contains("non-fatal error"));
        assert_eq!(err.detail(), Some("ERROR: syntax error at or near \"SELEC\""));
    }

    #[test]
    fn connection_error_without_detail() {
        let err = PgBackendError::ConnectionError {
            message: "failed to connect to db".into(),
            detail: None,
        };
        assert_eq!(err.to_string(), "Connection error: failed to connect to db");
        assert!(err.detail().is_none());
    }
}
