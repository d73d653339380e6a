//! Bounded execution of admitted queries.
//!
//! Queries run inside a read-only transaction with a statement timeout and
//! the search path pinned to the request's sandbox schema. Backend errors are
//! classified into a fixed, user-facing taxonomy; anything unrecognized is
//! redacted before it leaves this module.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio_postgres::Client;

use crate::config::Limits;
use crate::error::FailureKind;
use crate::guard::ValidatedQuery;
use crate::sandbox::quote_ident;
use crate::value::SqlValue;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub type_id: u32,
}

#[derive(Debug)]
pub struct QueryOutput {
    pub columns: Vec<Field>,
    pub rows: Vec<Vec<SqlValue>>,
    pub row_count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct QueryFailure {
    pub kind: FailureKind,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Execute an admitted query against the sandbox schema. Elapsed wall time is
/// recorded on both halves of the result.
pub async fn run(
    client: &mut Client,
    schema: &str,
    query: &ValidatedQuery,
    limits: &Limits,
) -> Result<QueryOutput, QueryFailure> {
    let started = Instant::now();
    let limited = apply_row_cap(query.text(), limits.max_rows);

    let attempt = execute(client, schema, &limited, limits).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match attempt {
        Ok((columns, rows)) => Ok(QueryOutput {
            row_count: rows.len(),
            columns,
            rows,
            elapsed_ms,
        }),
        Err(err) => Err(classify(&err, elapsed_ms)),
    }
}

async fn execute(
    client: &mut Client,
    schema: &str,
    sql: &str,
    limits: &Limits,
) -> Result<(Vec<Field>, Vec<Vec<SqlValue>>), tokio_postgres::Error> {
    let tx = client.build_transaction().read_only(true).start().await?;
    tx.batch_execute(&format!(
        "SET LOCAL statement_timeout = {}",
        limits.statement_timeout_ms
    ))
    .await?;
    tx.batch_execute(&format!("SET LOCAL search_path TO {}", quote_ident(schema)))
        .await?;

    let stmt = tx.prepare(sql).await?;
    let columns: Vec<Field> = stmt
        .columns()
        .iter()
        .map(|c| Field {
            name: c.name().to_string(),
            type_id: c.type_().oid(),
        })
        .collect();
    let rows = tx.query(&stmt, &[]).await?;
    let decoded: Vec<Vec<SqlValue>> = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| SqlValue::from_row(row, i)).collect())
        .collect();
    tx.rollback().await?;

    Ok((columns, decoded))
}

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").expect("limit pattern must compile"));

/// Append the row cap when the query has no LIMIT clause of its own. A
/// user-specified limit is never touched.
pub fn apply_row_cap(query: &str, max_rows: usize) -> String {
    if LIMIT_RE.is_match(query) {
        return query.to_string();
    }
    let bare = query.trim().trim_end_matches(';').trim_end();
    format!("{bare} LIMIT {max_rows}")
}

fn classify(err: &tokio_postgres::Error, elapsed_ms: u64) -> QueryFailure {
    if let Some(state) = err.code() {
        if let Some((kind, message)) = lookup_sqlstate(state.code()) {
            return QueryFailure {
                kind,
                message: message.to_string(),
                elapsed_ms,
            };
        }
    }

    let raw = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    // Development diagnostic channel; redacted like everything else.
    tracing::debug!(error = %redact(&raw), "unclassified backend error");
    QueryFailure {
        kind: FailureKind::Backend,
        message: redact(&raw),
        elapsed_ms,
    }
}

fn lookup_sqlstate(code: &str) -> Option<(FailureKind, &'static str)> {
    Some(match code {
        "42601" => (
            FailureKind::Syntax,
            "Syntax error in SQL query. Please check your SQL syntax.",
        ),
        "42703" => (
            FailureKind::UnknownColumn,
            "Column does not exist. Please check column names.",
        ),
        "42P01" => (
            FailureKind::UnknownTable,
            "Table does not exist. Please check table names.",
        ),
        "42883" => (
            FailureKind::UnknownFunction,
            "Function does not exist. Please check function names.",
        ),
        "23502" => (
            FailureKind::NotNullViolation,
            "Not null violation. A required field is missing.",
        ),
        "23503" => (
            FailureKind::ForeignKeyViolation,
            "Foreign key violation. Referenced record does not exist.",
        ),
        "23505" => (
            FailureKind::UniqueViolation,
            "Unique constraint violation. Duplicate value found.",
        ),
        "25P02" => (
            FailureKind::TransactionAborted,
            "Transaction is aborted. Please check your query.",
        ),
        "57014" => (
            FailureKind::Timeout,
            "Query timeout. Your query took too long to execute.",
        ),
        _ => return None,
    })
}

static CREDENTIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|pwd|secret|key|token)\b").expect("credential pattern must compile")
});
static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("ip pattern must compile")
});

fn redact(message: &str) -> String {
    let scrubbed = CREDENTIAL_RE.replace_all(message, "[REDACTED]");
    IP_RE.replace_all(&scrubbed, "[IP_ADDRESS]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_limit_when_absent() {
        assert_eq!(
            apply_row_cap("SELECT * FROM employees", 1000),
            "SELECT * FROM employees LIMIT 1000"
        );
    }

    #[test]
    fn strips_trailing_semicolons_before_appending() {
        assert_eq!(
            apply_row_cap("SELECT * FROM employees; ", 1000),
            "SELECT * FROM employees LIMIT 1000"
        );
    }

    #[test]
    fn never_touches_a_user_limit() {
        assert_eq!(
            apply_row_cap("SELECT * FROM employees LIMIT 5", 1000),
            "SELECT * FROM employees LIMIT 5"
        );
        assert_eq!(
            apply_row_cap("select * from employees limit 20", 1000),
            "select * from employees limit 20"
        );
    }

    #[test]
    fn sqlstate_lookup_covers_the_taxonomy() {
        assert_eq!(lookup_sqlstate("42601").unwrap().0, FailureKind::Syntax);
        assert_eq!(lookup_sqlstate("42P01").unwrap().0, FailureKind::UnknownTable);
        assert_eq!(lookup_sqlstate("57014").unwrap().0, FailureKind::Timeout);
        assert!(lookup_sqlstate("08006").is_none());
    }

    #[test]
    fn redaction_scrubs_credentials_and_addresses() {
        let raw = "password authentication failed for host 10.0.0.12";
        let clean = redact(raw);
        assert_eq!(
            clean,
            "[REDACTED] authentication failed for host [IP_ADDRESS]"
        );
    }

    #[test]
    fn redaction_leaves_ordinary_messages_alone() {
        assert_eq!(redact("relation \"emp\" is gone"), "relation \"emp\" is gone");
    }
}
