//! Cell values and the normalization rules used for verdict comparisons.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};
use tokio_postgres::Row;

/// Absolute tolerance for numeric comparisons, absorbing integer vs
/// floating-point representational drift.
pub const NUMERIC_TOLERANCE: f64 = 1e-4;

/// A single cell as it travels between the sandbox, the runner and the
/// evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn from_json(value: &serde_json::Value) -> SqlValue {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            // Nested values have no relational shape; keep their JSON text.
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Decode one cell of a result row based on the column's declared type.
    /// Types outside the taxonomy decode as text when the backend allows it,
    /// otherwise they become NULL.
    pub fn from_row(row: &Row, idx: usize) -> SqlValue {
        let ty = row.columns()[idx].type_();
        match ty.name() {
            "bool" => cell::<bool>(row, idx).map(SqlValue::Bool),
            "int2" => cell::<i16>(row, idx).map(|v| SqlValue::Int(v.into())),
            "int4" => cell::<i32>(row, idx).map(|v| SqlValue::Int(v.into())),
            "int8" => cell::<i64>(row, idx).map(SqlValue::Int),
            "float4" => cell::<f32>(row, idx).map(|v| SqlValue::Float(v.into())),
            "float8" => cell::<f64>(row, idx).map(SqlValue::Float),
            "numeric" => cell::<Decimal>(row, idx)
                .and_then(|d| d.to_f64())
                .map(SqlValue::Float),
            "date" => cell::<NaiveDate>(row, idx)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(SqlValue::Timestamp),
            "timestamp" => cell::<NaiveDateTime>(row, idx).map(SqlValue::Timestamp),
            "timestamptz" => {
                cell::<DateTime<Utc>>(row, idx).map(|t| SqlValue::Timestamp(t.naive_utc()))
            }
            "time" => cell::<NaiveTime>(row, idx).map(|t| SqlValue::Text(t.to_string())),
            _ => cell::<String>(row, idx).map(SqlValue::Text),
        }
        .unwrap_or(SqlValue::Null)
    }

    /// Text rendering used for parameterized sample-row inserts. `None` is a
    /// SQL NULL.
    pub fn to_insert_literal(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Timestamp(ts) => Some(canonical_timestamp(ts)),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(i) => serializer.serialize_i64(*i),
            SqlValue::Float(f) => serializer.serialize_f64(*f),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Timestamp(ts) => serializer.serialize_str(&canonical_timestamp(ts)),
        }
    }
}

fn cell<'a, T>(row: &'a Row, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Comparison domain after normalization. Timestamps have already collapsed
/// into their canonical text rendering at this point.
#[derive(Debug, Clone, PartialEq)]
pub enum Norm {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

pub fn normalize(value: &SqlValue) -> Norm {
    match value {
        SqlValue::Null => Norm::Null,
        SqlValue::Bool(b) => Norm::Bool(*b),
        SqlValue::Int(i) => Norm::Number(*i as f64),
        SqlValue::Float(f) => Norm::Number(*f),
        SqlValue::Text(s) => normalize_text(s),
        SqlValue::Timestamp(ts) => Norm::Text(canonical_timestamp(ts)),
    }
}

pub fn normalize_json(value: &serde_json::Value) -> Norm {
    match value {
        serde_json::Value::Null => Norm::Null,
        serde_json::Value::Bool(b) => Norm::Bool(*b),
        serde_json::Value::Number(n) => n.as_f64().map(Norm::Number).unwrap_or(Norm::Null),
        serde_json::Value::String(s) => normalize_text(s),
        other => Norm::Text(other.to_string()),
    }
}

/// Strings are trimmed and compared case-sensitively; strings that parse as a
/// date or timestamp collapse to the same canonical rendering as temporal
/// columns so `"2024-01-15"` matches a DATE cell.
fn normalize_text(s: &str) -> Norm {
    let trimmed = s.trim();
    match parse_temporal(trimmed) {
        Some(ts) => Norm::Text(canonical_timestamp(&ts)),
        None => Norm::Text(trimmed.to_string()),
    }
}

pub fn values_equal(a: &Norm, b: &Norm) -> bool {
    match (a, b) {
        (Norm::Null, Norm::Null) => true,
        (Norm::Bool(x), Norm::Bool(y)) => x == y,
        (Norm::Number(x), Norm::Number(y)) => (x - y).abs() < NUMERIC_TOLERANCE,
        (Norm::Text(x), Norm::Text(y)) => x == y,
        _ => false,
    }
}

/// Total order over normalized values, used for multiset comparisons.
pub fn cmp_norm(a: &Norm, b: &Norm) -> Ordering {
    fn rank(v: &Norm) -> u8 {
        match v {
            Norm::Null => 0,
            Norm::Bool(_) => 1,
            Norm::Number(_) => 2,
            Norm::Text(_) => 3,
        }
    }
    match (a, b) {
        (Norm::Bool(x), Norm::Bool(y)) => x.cmp(y),
        (Norm::Number(x), Norm::Number(y)) => x.total_cmp(y),
        (Norm::Text(x), Norm::Text(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

pub fn canonical_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn parse_temporal(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_numbers_keep_integer_identity() {
        assert_eq!(SqlValue::from_json(&serde_json::json!(42)), SqlValue::Int(42));
        assert_eq!(
            SqlValue::from_json(&serde_json::json!(62500.5)),
            SqlValue::Float(62500.5)
        );
        assert_eq!(SqlValue::from_json(&serde_json::Value::Null), SqlValue::Null);
    }

    #[test]
    fn integer_and_float_compare_within_tolerance() {
        let int = normalize(&SqlValue::Int(75000));
        let float = normalize(&SqlValue::Float(75000.00005));
        assert!(values_equal(&int, &float));
    }

    #[test]
    fn tolerance_boundary_is_exclusive() {
        let expected = normalize(&SqlValue::Float(75000.0));
        let off_by_tolerance = normalize(&SqlValue::Float(74999.9999));
        assert!(!values_equal(&expected, &off_by_tolerance));
    }

    #[test]
    fn strings_are_trimmed_but_case_sensitive() {
        let a = normalize(&SqlValue::Text("  Engineering ".into()));
        let b = normalize(&SqlValue::Text("Engineering".into()));
        let c = normalize(&SqlValue::Text("engineering".into()));
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &c));
    }

    #[test]
    fn date_strings_collapse_to_canonical_timestamps() {
        let from_text = normalize(&SqlValue::Text("2024-01-15".into()));
        let from_column = normalize(&SqlValue::Timestamp(
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        ));
        assert!(values_equal(&from_text, &from_column));
        assert_eq!(from_text, Norm::Text("2024-01-15T00:00:00.000Z".into()));
    }

    #[test]
    fn plain_numbers_are_not_mistaken_for_dates() {
        assert_eq!(normalize_text("75000"), Norm::Text("75000".into()));
    }

    #[test]
    fn insert_literals_render_nulls_as_none() {
        assert_eq!(SqlValue::Null.to_insert_literal(), None);
        assert_eq!(SqlValue::Int(7).to_insert_literal(), Some("7".into()));
        assert_eq!(SqlValue::Bool(true).to_insert_literal(), Some("true".into()));
    }

    #[test]
    fn null_never_equals_a_value() {
        assert!(values_equal(&Norm::Null, &Norm::Null));
        assert!(!values_equal(&Norm::Null, &Norm::Number(0.0)));
        assert!(!values_equal(&Norm::Text("null".into()), &Norm::Null));
    }
}
