//! Closed action vocabulary and result types for refinement sessions.

use memcurate_state::{Memory, MemoryId, MemoryKind};
use serde::{Deserialize, Serialize};

use super::SessionOutcome;

/// One driver-invoked session action.
///
/// Deserializes from a tagged tool call such as
/// `{"action": "consolidate", "ids": ["a", "b"], "content": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Search { query: String },
    Update { id: MemoryId, content: String },
    Delete { id: MemoryId },
    Consolidate { ids: Vec<MemoryId>, content: String },
    Protect { id: MemoryId },
    Unprotect { id: MemoryId },
    Complete { summary: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Search { .. } => "search",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::Consolidate { .. } => "consolidate",
            Action::Protect { .. } => "protect",
            Action::Unprotect { .. } => "unprotect",
            Action::Complete { .. } => "complete",
        }
    }

    /// Whether a successful call writes an audit entry.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::Search { .. } | Action::Complete { .. })
    }
}

/// A memory as shown to the driver by `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: MemoryId,
    pub content: String,
    pub kind: MemoryKind,
    pub constitutional: bool,
}

impl From<Memory> for SearchHit {
    fn from(m: Memory) -> Self {
        SearchHit {
            id: m.memory_id,
            content: m.content,
            kind: m.kind,
            constitutional: m.constitutional,
        }
    }
}

/// Small JSON-serializable result returned for a successful action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Found { hits: Vec<SearchHit> },
    Updated { id: MemoryId },
    Deleted { id: MemoryId },
    Consolidated { id: MemoryId, merged: Vec<MemoryId> },
    Protected { id: MemoryId },
    Unprotected { id: MemoryId },
    Completed(SessionOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_tool_calls() {
        let action: Action =
            serde_json::from_value(json!({"action": "consolidate", "ids": ["a", "b"], "content": "ab"}))
                .unwrap();
        assert_eq!(
            action,
            Action::Consolidate {
                ids: vec![MemoryId::from("a"), MemoryId::from("b")],
                content: "ab".into()
            }
        );
        assert!(action.is_mutating());
    }

    #[test]
    fn complete_requires_summary() {
        let err = serde_json::from_value::<Action>(json!({"action": "complete"})).unwrap_err();
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_value::<Action>(json!({"action": "purge"})).is_err());
    }

    #[test]
    fn outcome_is_tagged() {
        let out = ActionOutcome::Deleted {
            id: MemoryId::from("m1"),
        };
        assert_eq!(
            serde_json::to_value(out).unwrap(),
            json!({"outcome": "deleted", "id": "m1"})
        );
    }
}
