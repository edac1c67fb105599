use anyhow::Result;
use reactor::{ReactorError, Row};
use serde_json::Value;
use tracing::debug;

/// Turn the outcome of an idempotent operation into a bool.
///
/// `AlreadyExists`, `NotExists` and `AlreadyInState` mean the operation had
/// nothing to do and become `false`; every other error propagates.
pub fn toggled(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if ReactorError::is_expected(&e) => {
            debug!(error = %e, "operation was a no-op");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Column changes for an entity update, from a JSON object literal.
pub fn changes(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        _ => Row::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expected_errors_become_false() {
        assert!(toggled(Ok(())).unwrap());
        assert!(!toggled(Err(ReactorError::already_exists("group g1").into())).unwrap());
        assert!(!toggled(Err(ReactorError::already_in_state("server s1", "running").into())).unwrap());
        assert!(toggled(Err(ReactorError::access_denied("create_group").into())).is_err());
        assert!(toggled(Err(anyhow::anyhow!("boom"))).is_err());
    }

    #[test]
    fn test_changes_from_object() {
        let row = changes(json!({"state": "running"}));
        assert_eq!(row.get("state"), Some(&json!("running")));
        assert!(changes(json!(3)).is_empty());
    }
}
