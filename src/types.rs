//! Shared wire-ish types threaded between the router tiers, the LLM agent,
//! the orchestrator and the backend client: a resolved tool call and its
//! execution outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A concrete invocation produced by any routing tier: `{name, arguments}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Which cascade tier produced a resolved call list, carried through for
/// tracing/the "cached" marker in end-to-end observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    SemanticCache,
    InputCache,
    RegexTemplate,
    IntentRouter,
    LlmStageA,
    LlmStageB,
}

/// Outcome of executing one tool call against a backend.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CallResult {
    Success { success: bool, payload: Value },
    Failure(crate::errors::ErrorPayload),
}

impl CallResult {
    pub fn success(payload: Value) -> Self {
        Self::Success {
            success: true,
            payload,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Render back to a single JSON value the way the formatters and the
    /// semantic-cache output-serialization expect (a flat object, not a
    /// wrapper discriminated by a Rust enum tag).
    pub fn into_value(self) -> Value {
        match self {
            Self::Success { payload, .. } => {
                let mut v = payload;
                if let Value::Object(ref mut map) = v {
                    map.insert("success".to_string(), Value::Bool(true));
                }
                v
            }
            Self::Failure(err) => serde_json::to_value(err).unwrap_or(Value::Null),
        }
    }
}
