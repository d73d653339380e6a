//! Fault taxonomy for the submission pipeline: policy rejections are
//! user-correctable, provisioning faults are system faults, execution faults
//! are classified per SQLSTATE. Nothing here is allowed to crash the process.

use serde::Serialize;
use thiserror::Error;

/// Why the statement guard refused a query. Expected, frequent events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("SQL query must be at least 5 characters long")]
    TooShort,
    #[error("SQL query must not exceed 2000 characters")]
    TooLong,
    #[error("Query contains forbidden operations ({0}). Only SELECT statements are allowed.")]
    Forbidden(&'static str),
    #[error("Only SELECT queries are allowed")]
    NotSelect,
    #[error("Query contains potentially unsafe patterns")]
    Unsafe,
}

/// Backend failure while materializing sample tables. Always rolled back as a
/// unit; surfaced to operators, never as a coding mistake to the user.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("sandbox transaction failed: {0}")]
    Transaction(#[from] tokio_postgres::Error),
    #[error("sandbox DDL failed for table {table}: {source}")]
    Ddl {
        table: String,
        source: tokio_postgres::Error,
    },
    #[error("sample row insert failed for table {table}: {source}")]
    Insert {
        table: String,
        source: tokio_postgres::Error,
    },
}

/// System faults a submission can hit before the user's query even runs.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to acquire a database connection: {0}")]
    Acquire(#[from] deadpool_postgres::PoolError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("sandbox introspection failed: {0}")]
    Introspect(tokio_postgres::Error),
}

/// Classified execution faults, keyed off the backend SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Syntax,
    UnknownColumn,
    UnknownTable,
    UnknownFunction,
    NotNullViolation,
    ForeignKeyViolation,
    UniqueViolation,
    TransactionAborted,
    Timeout,
    Backend,
}
