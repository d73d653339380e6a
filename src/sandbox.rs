//! Per-request sandbox provisioning.
//!
//! Every evaluation gets its own `sandbox_<uuid>` schema so concurrent
//! submissions declaring same-named tables cannot collide. Provisioning is a
//! single transaction: schema, tables and rows appear together or not at all.

use serde::Serialize;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Transaction};
use uuid::Uuid;

use crate::assignment::SampleTable;
use crate::error::ProvisionError;
use crate::value::SqlValue;

pub struct Sandbox {
    schema: String,
}

impl Sandbox {
    /// Materialize the assignment's sample tables in a fresh schema.
    /// Rolls back as a unit on any failure, schema included.
    pub async fn provision(
        client: &mut Client,
        tables: &[SampleTable],
    ) -> Result<Sandbox, ProvisionError> {
        let schema = format!("sandbox_{}", Uuid::new_v4().simple());
        let tx = client.transaction().await?;

        tx.batch_execute(&format!("CREATE SCHEMA {}", quote_ident(&schema)))
            .await?;
        tx.batch_execute(&format!("SET LOCAL search_path TO {}", quote_ident(&schema)))
            .await?;

        for table in tables {
            create_table(&tx, table).await?;
            insert_rows(&tx, table).await?;
        }

        tx.commit().await?;
        Ok(Sandbox { schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Drop the sandbox schema. Runs on every exit path; failures are logged
    /// and swallowed so they cannot mask the submission's real outcome.
    pub async fn teardown(self, client: &Client) {
        let sql = format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_ident(&self.schema)
        );
        if let Err(err) = client.batch_execute(&sql).await {
            tracing::warn!(schema = %self.schema, error = %err, "sandbox teardown failed");
        }
    }
}

async fn create_table(tx: &Transaction<'_>, table: &SampleTable) -> Result<(), ProvisionError> {
    let ddl_err = |source| ProvisionError::Ddl {
        table: table.table_name.clone(),
        source,
    };

    tx.batch_execute(&format!(
        "DROP TABLE IF EXISTS {} CASCADE",
        quote_ident(&table.table_name)
    ))
    .await
    .map_err(ddl_err)?;

    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.column_name), map_data_type(&c.data_type)))
        .collect();
    tx.batch_execute(&format!(
        "CREATE TABLE {} ({})",
        quote_ident(&table.table_name),
        columns.join(", ")
    ))
    .await
    .map_err(ddl_err)?;

    Ok(())
}

async fn insert_rows(tx: &Transaction<'_>, table: &SampleTable) -> Result<(), ProvisionError> {
    if table.rows.is_empty() || table.columns.is_empty() {
        return Ok(());
    }
    let insert_err = |source| ProvisionError::Insert {
        table: table.table_name.clone(),
        source,
    };

    let sql = insert_statement(table);
    let types = vec![Type::TEXT; table.columns.len()];
    let stmt = tx.prepare_typed(&sql, &types).await.map_err(insert_err)?;

    for row in &table.rows {
        let values: Vec<Option<String>> = table
            .columns
            .iter()
            .map(|col| row_literal(row, &col.column_name))
            .collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        tx.execute(&stmt, &params).await.map_err(insert_err)?;
    }

    Ok(())
}

/// All parameters travel as TEXT and are cast server-side, so author-declared
/// column types never fight the wire protocol.
fn insert_statement(table: &SampleTable) -> String {
    let names: Vec<String> = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.column_name))
        .collect();
    let casts: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("CAST(${} AS {})", i + 1, cast_type(&c.data_type)))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.table_name),
        names.join(", "),
        casts.join(", ")
    )
}

/// Row keys are matched case-insensitively; a missing key inserts NULL.
fn row_literal(row: &serde_json::Map<String, serde_json::Value>, column: &str) -> Option<String> {
    row.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(column))
        .and_then(|(_, value)| SqlValue::from_json(value).to_insert_literal())
}

/// Fixed alias table for author-declared column types. Unrecognized types
/// stay permissive and fall back to TEXT.
fn map_data_type(raw: &str) -> &'static str {
    match raw.to_uppercase().as_str() {
        "INTEGER" | "INT" => "INTEGER",
        "VARCHAR(50)" => "VARCHAR(50)",
        "VARCHAR(100)" => "VARCHAR(100)",
        "VARCHAR(200)" => "VARCHAR(200)",
        "TEXT" => "TEXT",
        "DECIMAL(10,2)" | "DECIMAL" => "DECIMAL(10,2)",
        "DATE" => "DATE",
        "TIMESTAMP" => "TIMESTAMP",
        "BOOLEAN" => "BOOLEAN",
        "SERIAL" => "SERIAL",
        _ => "TEXT",
    }
}

/// SERIAL is a column default, not a real type; casts go through INTEGER.
fn cast_type(raw: &str) -> &'static str {
    match map_data_type(raw) {
        "SERIAL" => "INTEGER",
        mapped => mapped,
    }
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePreview {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Column metadata plus the first rows of a provisioned table, for the
/// sample-data preview surface.
pub async fn inspect_table(
    client: &Client,
    schema: &str,
    table: &str,
    row_limit: usize,
) -> Result<TablePreview, tokio_postgres::Error> {
    let columns = describe_table(client, schema, table).await?;
    let rows = sample_rows(client, schema, table, row_limit).await?;
    Ok(TablePreview {
        table: table.to_string(),
        columns,
        rows,
    })
}

pub async fn table_names(
    client: &Client,
    schema: &str,
) -> Result<Vec<String>, tokio_postgres::Error> {
    let rows = client
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[&schema],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get(0)).collect())
}

pub async fn describe_table(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>, tokio_postgres::Error> {
    let rows = client
        .query(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| ColumnInfo {
            name: r.get(0),
            data_type: r.get(1),
            nullable: r.get::<_, String>(2) == "YES",
        })
        .collect())
}

async fn sample_rows(
    client: &Client,
    schema: &str,
    table: &str,
    row_limit: usize,
) -> Result<Vec<Vec<SqlValue>>, tokio_postgres::Error> {
    let sql = format!(
        "SELECT * FROM {}.{} LIMIT {}",
        quote_ident(schema),
        quote_ident(table),
        row_limit
    );
    let rows = client.query(&sql, &[]).await?;
    Ok(rows
        .iter()
        .map(|row| (0..row.len()).map(|i| SqlValue::from_row(row, i)).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::ColumnSpec;

    fn employees() -> SampleTable {
        SampleTable {
            table_name: "employees".into(),
            columns: vec![
                ColumnSpec {
                    column_name: "id".into(),
                    data_type: "SERIAL".into(),
                },
                ColumnSpec {
                    column_name: "name".into(),
                    data_type: "VARCHAR(100)".into(),
                },
                ColumnSpec {
                    column_name: "salary".into(),
                    data_type: "decimal".into(),
                },
                ColumnSpec {
                    column_name: "notes".into(),
                    data_type: "JSONB".into(),
                },
            ],
            rows: Vec::new(),
        }
    }

    #[test]
    fn unknown_types_fall_back_to_text() {
        assert_eq!(map_data_type("JSONB"), "TEXT");
        assert_eq!(map_data_type("geography"), "TEXT");
        assert_eq!(map_data_type("int"), "INTEGER");
        assert_eq!(map_data_type("decimal"), "DECIMAL(10,2)");
    }

    #[test]
    fn insert_statement_casts_every_column() {
        let sql = insert_statement(&employees());
        assert_eq!(
            sql,
            "INSERT INTO \"employees\" (\"id\", \"name\", \"salary\", \"notes\") \
             VALUES (CAST($1 AS INTEGER), CAST($2 AS VARCHAR(100)), \
             CAST($3 AS DECIMAL(10,2)), CAST($4 AS TEXT))"
        );
    }

    #[test]
    fn identifiers_are_quote_escaped() {
        assert_eq!(quote_ident("employees"), "\"employees\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn row_lookup_is_case_insensitive_and_null_for_missing() {
        let mut row = serde_json::Map::new();
        row.insert("Name".to_string(), serde_json::json!("Ada"));
        row.insert("salary".to_string(), serde_json::json!(75000.5));
        assert_eq!(row_literal(&row, "name"), Some("Ada".into()));
        assert_eq!(row_literal(&row, "SALARY"), Some("75000.5".into()));
        assert_eq!(row_literal(&row, "missing"), None);
    }
}
