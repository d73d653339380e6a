//! Verdict derivation: a pure, deterministic function of the expected-output
//! descriptor and the runner's rows. Malformed descriptors resolve to an
//! incorrect verdict with a reason; nothing escapes as an error.

use std::collections::HashMap;

use serde::Serialize;

use crate::assignment::ExpectedOutput;
use crate::runner::QueryOutput;
use crate::value::{self, Norm};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    fn correct() -> Verdict {
        Verdict {
            is_correct: true,
            reason: None,
        }
    }

    fn incorrect(reason: impl Into<String>) -> Verdict {
        Verdict {
            is_correct: false,
            reason: Some(reason.into()),
        }
    }
}

pub fn evaluate(expected: &ExpectedOutput, actual: &QueryOutput) -> Verdict {
    match expected.kind.as_str() {
        "table" => evaluate_table(&expected.value, actual),
        "single_value" => evaluate_single_value(&expected.value, actual),
        "column" => evaluate_column(&expected.value, actual),
        "count" => evaluate_count(&expected.value, actual),
        "" => Verdict::incorrect("Expected output configuration is missing"),
        other => Verdict::incorrect(format!("Unknown expected output type: {other}")),
    }
}

/// Order-insensitive multiset match over whole rows, keyed by the sorted
/// column-name signature so only rows with identical shapes are compared.
fn evaluate_table(expected_value: &serde_json::Value, actual: &QueryOutput) -> Verdict {
    let Some(expected_rows) = expected_value.as_array() else {
        return Verdict::incorrect("Expected output must be an array of rows");
    };
    if actual.row_count != expected_rows.len() {
        return Verdict::incorrect(format!(
            "Expected {} row(s), but got {}",
            expected_rows.len(),
            actual.row_count
        ));
    }
    if expected_rows.is_empty() {
        return Verdict::correct();
    }

    let expected_norm: Vec<Vec<(String, Norm)>> =
        expected_rows.iter().map(normalize_json_row).collect();
    let actual_norm = normalize_output_rows(actual);

    let mut by_signature: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, row) in expected_norm.iter().enumerate() {
        by_signature.entry(signature(row)).or_default().push(idx);
    }

    let mut matched = vec![false; expected_norm.len()];
    let mut extra = 0usize;
    for row in &actual_norm {
        let mut found = false;
        if let Some(candidates) = by_signature.get(&signature(row)) {
            for &idx in candidates {
                if !matched[idx] && rows_equal(row, &expected_norm[idx]) {
                    matched[idx] = true;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            extra += 1;
        }
    }
    let missing = matched.iter().filter(|hit| !**hit).count();

    if missing > 0 || extra > 0 {
        let mut reason = String::new();
        if missing > 0 {
            reason.push_str(&format!("Missing {missing} expected row(s). "));
        }
        if extra > 0 {
            reason.push_str(&format!("Found {extra} unexpected row(s)."));
        }
        return Verdict::incorrect(reason.trim_end().to_string());
    }
    Verdict::correct()
}

fn evaluate_single_value(expected_value: &serde_json::Value, actual: &QueryOutput) -> Verdict {
    if actual.row_count != 1 {
        return Verdict::incorrect(format!(
            "Expected exactly 1 row, but got {}",
            actual.row_count
        ));
    }
    let user = first_column_value(actual, 0);
    if value::values_equal(&value::normalize_json(expected_value), &user) {
        Verdict::correct()
    } else {
        Verdict::incorrect("Expected value does not match the result")
    }
}

/// Multiset comparison of a single projected column: both sides are sorted
/// independently, then compared element-wise.
fn evaluate_column(expected_value: &serde_json::Value, actual: &QueryOutput) -> Verdict {
    let Some(expected_list) = expected_value.as_array() else {
        return Verdict::incorrect("Expected output must be an array for column type");
    };
    if actual.row_count != expected_list.len() {
        return Verdict::incorrect(format!(
            "Expected {} value(s), but got {}",
            expected_list.len(),
            actual.row_count
        ));
    }

    let mut expected_norm: Vec<Norm> = expected_list.iter().map(value::normalize_json).collect();
    let mut actual_norm: Vec<Norm> = (0..actual.rows.len())
        .map(|idx| first_column_value(actual, idx))
        .collect();
    expected_norm.sort_by(value::cmp_norm);
    actual_norm.sort_by(value::cmp_norm);

    let all_match = expected_norm
        .iter()
        .zip(&actual_norm)
        .all(|(exp, act)| value::values_equal(exp, act));
    if all_match {
        Verdict::correct()
    } else {
        Verdict::incorrect("Column values do not match")
    }
}

/// The count lives in the first column of the first row, whatever that column
/// is called; numeric strings are parsed.
fn evaluate_count(expected_value: &serde_json::Value, actual: &QueryOutput) -> Verdict {
    let Some(expected_count) = expected_value.as_f64() else {
        return Verdict::incorrect("Count comparison requires numeric values");
    };
    let user_count = extract_count(actual);
    if expected_count == user_count {
        Verdict::correct()
    } else {
        Verdict::incorrect(format!(
            "Expected count {expected_count}, but got {user_count}"
        ))
    }
}

fn extract_count(actual: &QueryOutput) -> f64 {
    match first_column_value(actual, 0) {
        Norm::Number(n) => n,
        Norm::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn first_column_value(actual: &QueryOutput, row_idx: usize) -> Norm {
    actual
        .rows
        .get(row_idx)
        .and_then(|row| row.first())
        .map(value::normalize)
        .unwrap_or(Norm::Null)
}

fn normalize_json_row(row: &serde_json::Value) -> Vec<(String, Norm)> {
    let mut cells: Vec<(String, Norm)> = row
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, val)| (key.to_lowercase(), value::normalize_json(val)))
                .collect()
        })
        .unwrap_or_default();
    cells.sort_by(|a, b| a.0.cmp(&b.0));
    cells
}

fn normalize_output_rows(actual: &QueryOutput) -> Vec<Vec<(String, Norm)>> {
    actual
        .rows
        .iter()
        .map(|row| {
            let mut cells: Vec<(String, Norm)> = actual
                .columns
                .iter()
                .zip(row)
                .map(|(col, val)| (col.name.to_lowercase(), value::normalize(val)))
                .collect();
            cells.sort_by(|a, b| a.0.cmp(&b.0));
            cells
        })
        .collect()
}

fn signature(row: &[(String, Norm)]) -> String {
    row.iter()
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn rows_equal(a: &[(String, Norm)], b: &[(String, Norm)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && value::values_equal(va, vb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Field;
    use crate::value::SqlValue;

    fn output(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> QueryOutput {
        QueryOutput {
            columns: columns
                .iter()
                .map(|name| Field {
                    name: name.to_string(),
                    type_id: 0,
                })
                .collect(),
            row_count: rows.len(),
            rows,
            elapsed_ms: 1,
        }
    }

    fn expected(kind: &str, value: serde_json::Value) -> ExpectedOutput {
        ExpectedOutput {
            kind: kind.to_string(),
            value,
        }
    }

    #[test]
    fn table_match_ignores_row_order() {
        let exp = expected(
            "table",
            serde_json::json!([
                {"department": "Engineering", "avg_salary": 75000.0},
                {"department": "Marketing", "avg_salary": 62500.0}
            ]),
        );
        let out = output(
            &["department", "avg_salary"],
            vec![
                vec![SqlValue::Text("Marketing".into()), SqlValue::Float(62500.0)],
                vec![SqlValue::Text("Engineering".into()), SqlValue::Float(75000.0)],
            ],
        );
        assert!(evaluate(&exp, &out).is_correct);
    }

    #[test]
    fn table_match_flips_on_a_single_cell() {
        let exp = expected(
            "table",
            serde_json::json!([
                {"department": "Engineering", "avg_salary": 75000.0},
                {"department": "Marketing", "avg_salary": 62500.0}
            ]),
        );
        let out = output(
            &["department", "avg_salary"],
            vec![
                vec![SqlValue::Text("Marketing".into()), SqlValue::Float(62500.0)],
                vec![SqlValue::Text("Engineering".into()), SqlValue::Float(75001.0)],
            ],
        );
        let verdict = evaluate(&exp, &out);
        assert!(!verdict.is_correct);
        assert_eq!(
            verdict.reason.as_deref(),
            Some("Missing 1 expected row(s). Found 1 unexpected row(s).")
        );
    }

    #[test]
    fn table_match_ignores_column_name_case() {
        let exp = expected("table", serde_json::json!([{"Department": "Sales"}]));
        let out = output(
            &["department"],
            vec![vec![SqlValue::Text("Sales".into())]],
        );
        assert!(evaluate(&exp, &out).is_correct);
    }

    #[test]
    fn table_row_count_mismatch_reports_both_counts() {
        let exp = expected("table", serde_json::json!([{"a": 1}, {"a": 2}]));
        let out = output(&["a"], vec![vec![SqlValue::Int(1)]]);
        let verdict = evaluate(&exp, &out);
        assert!(!verdict.is_correct);
        assert_eq!(
            verdict.reason.as_deref(),
            Some("Expected 2 row(s), but got 1")
        );
    }

    #[test]
    fn empty_table_matches_empty_result() {
        let exp = expected("table", serde_json::json!([]));
        let out = output(&["a"], Vec::new());
        assert!(evaluate(&exp, &out).is_correct);
    }

    #[test]
    fn duplicate_expected_rows_need_duplicate_actuals() {
        let exp = expected("table", serde_json::json!([{"a": 1}, {"a": 1}]));
        let duplicated = output(
            &["a"],
            vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(1)]],
        );
        assert!(evaluate(&exp, &duplicated).is_correct);

        let mixed = output(&["a"], vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]]);
        assert!(!evaluate(&exp, &mixed).is_correct);
    }

    #[test]
    fn single_value_requires_exactly_one_row() {
        let exp = expected("single_value", serde_json::json!(42));
        let none = output(&["n"], Vec::new());
        assert!(!evaluate(&exp, &none).is_correct);

        let one = output(&["n"], vec![vec![SqlValue::Int(42)]]);
        assert!(evaluate(&exp, &one).is_correct);
    }

    #[test]
    fn column_match_is_multiset() {
        let exp = expected("column", serde_json::json!(["b", "a", "c"]));
        let out = output(
            &["letter"],
            vec![
                vec![SqlValue::Text("c".into())],
                vec![SqlValue::Text("a".into())],
                vec![SqlValue::Text("b".into())],
            ],
        );
        assert!(evaluate(&exp, &out).is_correct);

        let short = output(&["letter"], vec![vec![SqlValue::Text("a".into())]]);
        assert!(!evaluate(&exp, &short).is_correct);
    }

    #[test]
    fn count_coerces_numeric_strings() {
        let exp = expected("count", serde_json::json!(3));
        let out = output(&["count"], vec![vec![SqlValue::Text("3".into())]]);
        assert!(evaluate(&exp, &out).is_correct);
    }

    #[test]
    fn count_ignores_the_column_name() {
        let exp = expected("count", serde_json::json!(3));
        let out = output(&["total_orders"], vec![vec![SqlValue::Int(3)]]);
        assert!(evaluate(&exp, &out).is_correct);
    }

    #[test]
    fn count_mismatch_reports_both_numbers() {
        let exp = expected("count", serde_json::json!(3));
        let out = output(&["count"], vec![vec![SqlValue::Int(4)]]);
        let verdict = evaluate(&exp, &out);
        assert_eq!(
            verdict.reason.as_deref(),
            Some("Expected count 3, but got 4")
        );
    }

    #[test]
    fn malformed_descriptors_fail_safe() {
        let out = output(&["a"], vec![vec![SqlValue::Int(1)]]);

        let missing = evaluate(&expected("", serde_json::Value::Null), &out);
        assert!(!missing.is_correct);

        let unknown = evaluate(&expected("graph", serde_json::Value::Null), &out);
        assert_eq!(
            unknown.reason.as_deref(),
            Some("Unknown expected output type: graph")
        );

        let wrong_shape = evaluate(&expected("table", serde_json::json!(7)), &out);
        assert_eq!(
            wrong_shape.reason.as_deref(),
            Some("Expected output must be an array of rows")
        );

        let bad_count = evaluate(&expected("count", serde_json::json!("three")), &out);
        assert_eq!(
            bad_count.reason.as_deref(),
            Some("Count comparison requires numeric values")
        );
    }

    #[test]
    fn numeric_tolerance_applies_inside_table_rows() {
        let exp = expected("table", serde_json::json!([{"avg": 75000.0}]));
        let close = output(&["avg"], vec![vec![SqlValue::Float(75000.00005)]]);
        assert!(evaluate(&exp, &close).is_correct);

        let off = output(&["avg"], vec![vec![SqlValue::Float(74999.9999)]]);
        assert!(!evaluate(&exp, &off).is_correct);
    }
}
