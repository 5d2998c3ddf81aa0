//! Edit operations and versioned batches.
//!
//! Operations are opaque to Cutlog: a `type` string plus JSON parameters
//! that only the transcoding engine interprets. Batches are immutable once
//! written; the ordered concatenation of every batch up to version N is the
//! edit-decision list (EDL) for that version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cutlog_common::error::{CutlogError, CutlogResult};

use crate::collection::Record;

/// One opaque edit instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOperation {
    /// Operation type, meaningful to the transcoder (e.g., "trim", "crop").
    #[serde(rename = "type")]
    pub op_type: String,

    /// Operation parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl EditOperation {
    pub fn new(op_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            op_type: op_type.into(),
            parameters,
        }
    }

    /// Reject operations the transcoder could not possibly interpret.
    pub fn validate(&self) -> CutlogResult<()> {
        if self.op_type.trim().is_empty() {
            return Err(CutlogError::validation("operation type must not be empty"));
        }
        if !(self.parameters.is_object() || self.parameters.is_null()) {
            return Err(CutlogError::validation(format!(
                "parameters of '{}' must be a JSON object",
                self.op_type
            )));
        }
        Ok(())
    }
}

/// Validate a whole batch before it is appended.
pub fn validate_operations(ops: &[EditOperation]) -> CutlogResult<()> {
    if ops.is_empty() {
        return Err(CutlogError::validation(
            "an edit batch needs at least one operation",
        ));
    }
    for (index, op) in ops.iter().enumerate() {
        op.validate()
            .map_err(|e| CutlogError::validation(format!("operation {index}: {e}")))?;
    }
    Ok(())
}

/// One successful append (`editOperations/<projectId>-v<version>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOperationBatch {
    pub id: String,
    pub project_id: String,
    /// The value `currentVersion` took right after this batch.
    pub version: u64,
    pub operations: Vec<EditOperation>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Record for EditOperationBatch {
    const KIND: &'static str = "edit batch";

    fn key(&self) -> &str {
        &self.id
    }
}

impl EditOperationBatch {
    /// Batch identifier for a project version. Deriving it from the version
    /// makes "claim version N" a create-if-absent on this key.
    pub fn id_for(project_id: &str, version: u64) -> String {
        format!("{project_id}-v{version}")
    }

    pub fn new(
        project_id: impl Into<String>,
        version: u64,
        operations: Vec<EditOperation>,
        user_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let project_id = project_id.into();
        Self {
            id: Self::id_for(&project_id, version),
            project_id,
            version,
            operations,
            user_id: user_id.into(),
            created_at: now,
        }
    }
}

/// Flatten batches (already in ascending version order) into one EDL.
pub fn flatten_operations(batches: &[EditOperationBatch]) -> Vec<EditOperation> {
    batches
        .iter()
        .flat_map(|batch| batch.operations.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_wire_format_uses_type_key() {
        let op = EditOperation::new("trim", json!({"start": 1.5, "end": 9.0}));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "trim");
        assert_eq!(value["parameters"]["end"], 9.0);
    }

    #[test]
    fn test_operation_without_parameters_parses() {
        let op: EditOperation = serde_json::from_str(r#"{"type": "mute"}"#).unwrap();
        assert!(op.parameters.is_null());
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_and_malformed() {
        assert!(validate_operations(&[]).is_err());
        assert!(validate_operations(&[EditOperation::new(" ", json!({}))]).is_err());
        assert!(validate_operations(&[EditOperation::new("crop", json!([1, 2]))]).is_err());
        assert!(validate_operations(&[EditOperation::new("crop", json!({"w": 2}))]).is_ok());
    }

    #[test]
    fn test_flatten_preserves_batch_then_operation_order() {
        let now = Utc::now();
        let batches = vec![
            EditOperationBatch::new("p", 1, vec![EditOperation::new("a", json!(null))], "u1", now),
            EditOperationBatch::new(
                "p",
                2,
                vec![
                    EditOperation::new("b", json!(null)),
                    EditOperation::new("c", json!(null)),
                ],
                "u1",
                now,
            ),
        ];
        let types: Vec<_> = flatten_operations(&batches)
            .into_iter()
            .map(|op| op.op_type)
            .collect();
        assert_eq!(types, vec!["a", "b", "c"]);
        assert_eq!(batches[1].id, "p-v2");
    }
}
