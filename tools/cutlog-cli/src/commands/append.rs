//! Commit a batch of edit operations.

use std::io::Read;

use cutlog_common::error::CutlogError;
use cutlog_project_model::edit::EditOperation;

use crate::context::Context;

pub fn run(ctx: &Context, project_id: &str, operations: &str, user: &str) -> anyhow::Result<()> {
    let raw = match operations {
        "-" => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        other => match other.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)?,
            None => other.to_string(),
        },
    };
    let ops = parse_operations(&raw)?;
    let count = ops.len();

    let receipt = ctx.services.edit_log.append(project_id, user, ops)?;
    println!(
        "Committed {count} operation(s) to {project_id} as version {}",
        receipt.version
    );
    Ok(())
}

/// Accept a JSON array of operations, or a single operation object.
fn parse_operations(raw: &str) -> Result<Vec<EditOperation>, CutlogError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| CutlogError::validation(format!("operations are not valid JSON: {e}")))?;
    let value = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(_) => serde_json::Value::Array(vec![value]),
        _ => {
            return Err(CutlogError::validation(
                "operations must be a JSON array of objects",
            ))
        }
    };
    serde_json::from_value(value)
        .map_err(|e| CutlogError::validation(format!("malformed operation: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array_and_single_object() {
        let ops = parse_operations(r#"[{"type":"trim","parameters":{"in":1}},{"type":"fade"}]"#)
            .unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].op_type, "fade");

        let single = parse_operations(r#"{"type":"cut"}"#).unwrap();
        assert_eq!(single[0].op_type, "cut");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for raw in ["not json", "42", r#"[{"parameters":{}}]"#] {
            assert!(matches!(
                parse_operations(raw),
                Err(CutlogError::Validation { .. })
            ));
        }
    }
}
