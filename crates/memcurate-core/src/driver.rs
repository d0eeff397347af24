//! JSON adapter between a tool-calling driver and a [`RefinementSession`].
//!
//! Recoverable errors come back as `{"ok": false, "error": {...}}` so the
//! driver can correct itself and continue. Fatal errors are returned as
//! `Err` for the operator.

use serde_json::{json, Map, Value};

use crate::error::{CurationError, Result};
use crate::session::{Action, RefinementSession};

/// Invoke one tagged tool call, e.g. `{"action": "delete", "id": "..."}`.
pub async fn invoke(session: &mut RefinementSession, call: Value) -> Result<Value> {
    let action: Action = match serde_json::from_value(call) {
        Ok(action) => action,
        Err(e) => {
            return Ok(error_result(&CurationError::Validation(format!(
                "malformed action: {e}"
            ))))
        }
    };

    match session.dispatch(action).await {
        Ok(outcome) => Ok(json!({ "ok": true, "result": outcome })),
        Err(e) if !e.is_fatal() => Ok(error_result(&e)),
        Err(e) => Err(e),
    }
}

/// Invoke a call delivered as a tool name plus keyword parameters.
pub async fn invoke_named(
    session: &mut RefinementSession,
    name: &str,
    params: Value,
) -> Result<Value> {
    let mut call = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Ok(error_result(&CurationError::Validation(format!(
                "parameters for {name} must be an object, got {other}"
            ))))
        }
    };
    call.insert("action".to_string(), Value::String(name.to_string()));
    invoke(session, Value::Object(call)).await
}

fn error_result(err: &CurationError) -> Value {
    json!({
        "ok": false,
        "error": { "kind": err.kind(), "message": err.to_string() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_result_shape() {
        let v = error_result(&CurationError::NotFound {
            memory_id: "m1".into(),
        });
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "not_found");
        assert_eq!(v["error"]["message"], "memory not found: m1");
    }
}
