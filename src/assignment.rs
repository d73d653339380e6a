use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Declarative sample table owned by an assignment. Materialized transiently
/// per evaluation; never persisted in the relational backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleTable {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
    /// Row keys are a case-insensitive subset of the declared columns;
    /// missing keys insert NULL.
    #[serde(default)]
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub column_name: String,
    pub data_type: String,
}

/// What a correct result looks like. Kept loosely typed on purpose: a
/// misconfigured assignment must reach the evaluator's fail-safe path instead
/// of blowing up deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectedOutput {
    /// One of "table", "single_value", "column", "count".
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default)]
    pub sample_tables: Vec<SampleTable>,
    /// The solution descriptor never leaves the server: skipped on serialize.
    #[serde(default, skip_serializing)]
    pub expected_output: ExpectedOutput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    pub id: String,
    pub title: String,
    pub difficulty: String,
    pub description: String,
}

/// In-memory stand-in for the external assignment provider.
#[derive(Clone, Default)]
pub struct AssignmentStore {
    inner: Arc<HashMap<String, Assignment>>,
}

impl AssignmentStore {
    pub fn from_assignments(items: Vec<Assignment>) -> Self {
        let inner = items.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read assignments from {}", path.display()))?;
        let items: Vec<Assignment> = serde_json::from_str(&data)
            .with_context(|| format!("invalid assignment JSON in {}", path.display()))?;
        Ok(Self::from_assignments(items))
    }

    pub fn get(&self, id: &str) -> Option<&Assignment> {
        self.inner.get(id)
    }

    pub fn summaries(&self) -> Vec<AssignmentSummary> {
        let mut list: Vec<AssignmentSummary> = self
            .inner
            .values()
            .map(|a| AssignmentSummary {
                id: a.id.clone(),
                title: a.title.clone(),
                difficulty: a.difficulty.clone(),
                description: a.description.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_output_tolerates_missing_fields() {
        let assignment: Assignment = serde_json::from_str(
            r#"{"id": "a1", "title": "Totals", "expectedOutput": {"value": 3}}"#,
        )
        .unwrap();
        assert_eq!(assignment.expected_output.kind, "");
        assert_eq!(assignment.expected_output.value, serde_json::json!(3));
    }

    #[test]
    fn serialized_assignment_hides_the_expected_output() {
        let assignment = Assignment {
            id: "a1".into(),
            title: "Totals".into(),
            description: String::new(),
            difficulty: "Easy".into(),
            problem_statement: String::new(),
            sample_tables: Vec::new(),
            expected_output: ExpectedOutput {
                kind: "count".into(),
                value: serde_json::json!(3),
            },
        };
        let rendered = serde_json::to_value(&assignment).unwrap();
        assert!(rendered.get("expectedOutput").is_none());
        assert!(rendered.get("expected_output").is_none());
    }
}
