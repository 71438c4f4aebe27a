//! Two-stage LLM reasoner (spec §4.8). Stage A is a fast zero-shot JSON
//! producer; Stage B is a chain-of-thought fallback that retries with the
//! prior validation error folded back into the prompt as a hint. Grounded
//! on `dspy_client.py`'s fast/smart model split, generalized from DSPy
//! modules to plain prompt strings sent through [`LlmBackend::complete`].

use std::sync::Arc;

use serde_json::Value;

use super::client::LlmBackend;
use super::parse::{ParseOutcome, parse_llm_output};
use crate::registry::ToolRegistry;
use crate::types::ToolCall;

/// Result of running the two-stage cascade. `validated` is the
/// `_validated_calls` marker from spec §4.8: Stage B's final prediction is
/// returned even when still invalid, and callers must check this flag
/// rather than assume success from a non-empty call list.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub calls: Vec<ToolCall>,
    pub validated: bool,
    pub source: crate::types::ResolutionSource,
}

pub struct LlmAgent {
    llm: Arc<dyn LlmBackend>,
    max_retries: u32,
}

impl LlmAgent {
    pub fn new(llm: Arc<dyn LlmBackend>, max_retries: u32) -> Self {
        Self { llm, max_retries }
    }

    pub async fn resolve(
        &self,
        registry: &ToolRegistry,
        history: &[String],
        available_tools: &[crate::registry::ToolEntry],
        query: &str,
    ) -> AgentResult {
        let stage_a_prompt = zero_shot_prompt(history, available_tools, query);
        if let Ok(raw) = self.llm.complete(&stage_a_prompt, true).await {
            if let ParseOutcome::Parsed(calls) = parse_llm_output(&raw) {
                if let Ok(()) = validate_calls(&calls, registry) {
                    return AgentResult {
                        calls,
                        validated: true,
                        source: crate::types::ResolutionSource::LlmStageA,
                    };
                }
            }
        }

        self.stage_b(registry, history, available_tools, query).await
    }

    async fn stage_b(
        &self,
        registry: &ToolRegistry,
        history: &[String],
        available_tools: &[crate::registry::ToolEntry],
        query: &str,
    ) -> AgentResult {
        let mut hint: Option<String> = None;
        let mut last_calls = Vec::new();

        for _attempt in 0..=self.max_retries {
            let prompt = chain_of_thought_prompt(history, available_tools, query, hint.as_deref());
            let raw = match self.llm.complete(&prompt, false).await {
                Ok(raw) => raw,
                Err(e) => {
                    hint = Some(format!("previous attempt errored: {e}"));
                    continue;
                }
            };

            match parse_llm_output(&raw) {
                ParseOutcome::Parsed(calls) => match validate_calls(&calls, registry) {
                    Ok(()) => {
                        return AgentResult {
                            calls,
                            validated: true,
                            source: crate::types::ResolutionSource::LlmStageB,
                        };
                    }
                    Err(validation_error) => {
                        last_calls = calls;
                        hint = Some(validation_error);
                    }
                },
                ParseOutcome::ParseFailed(reason) => {
                    hint = Some(reason);
                }
            }
        }

        // Final prediction, even though it never validated — callers must
        // check `validated` before trusting `calls`.
        AgentResult {
            calls: last_calls,
            validated: false,
            source: crate::types::ResolutionSource::LlmStageB,
        }
    }
}

/// Semantic validation (spec §4.8 step 5): every call name must exist in
/// the registry, and every key in the descriptor's `required` array must be
/// present in the call's arguments.
pub fn validate_calls(calls: &[ToolCall], registry: &ToolRegistry) -> Result<(), String> {
    if calls.is_empty() {
        return Err("empty call list".to_string());
    }
    for call in calls {
        if call.name == "chat" {
            continue;
        }
        let entry = registry
            .get_by_name(&call.name)
            .ok_or_else(|| format!("unknown tool '{}'", call.name))?;

        let required = entry
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for param in required {
            let Some(param) = param.as_str() else { continue };
            let present = call
                .arguments
                .get(param)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                return Err(format!(
                    "missing required argument '{param}' for tool '{}'",
                    call.name
                ));
            }
        }
    }
    Ok(())
}

fn tool_catalog_text(tools: &[crate::registry::ToolEntry]) -> String {
    tools
        .iter()
        .map(|t| format!("- {}: {}\n  schema: {}", t.name, t.description, t.input_schema))
        .collect::<Vec<_>>()
        .join("\n")
}

fn zero_shot_prompt(
    history: &[String],
    tools: &[crate::registry::ToolEntry],
    query: &str,
) -> String {
    format!(
        "You are a tool-call planner. Given the conversation history and the \
         available tools below, respond with ONLY a JSON list of \
         {{\"name\": ..., \"arguments\": {{...}}}} objects — no prose. \
         If the query needs more than one tool (e.g. \"list pods and nodes\"), \
         return one entry per intent. For small talk with no matching tool, \
         use the sentinel tool named \"chat\".\n\n\
         Available tools:\n{tools}\n\n\
         History:\n{history}\n\n\
         Query: {query}",
        tools = tool_catalog_text(tools),
        history = history.join("\n"),
        query = query,
    )
}

fn chain_of_thought_prompt(
    history: &[String],
    tools: &[crate::registry::ToolEntry],
    query: &str,
    hint: Option<&str>,
) -> String {
    let hint_block = hint
        .map(|h| format!("\n\nThe previous attempt failed validation: {h}\nFix the tool call(s) accordingly."))
        .unwrap_or_default();

    format!(
        "Think step by step about which tool(s) satisfy the query, then \
         respond with ONLY a JSON list of {{\"name\": ..., \"arguments\": {{...}}}} \
         objects as your final answer — no prose outside the list.\n\n\
         Available tools:\n{tools}\n\n\
         History:\n{history}\n\n\
         Query: {query}{hint_block}",
        tools = tool_catalog_text(tools),
        history = history.join("\n"),
        query = query,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::test_support::FakeLlmBackend;
    use crate::registry::ToolEntry;
    use serde_json::json;

    fn registry_with_list_pods() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register_backend_tools(
            "k8s_local",
            vec![ToolEntry {
                name: "local_k8s_list_pods".to_string(),
                original_name: "local_k8s_list_pods".to_string(),
                description: "List pods in a namespace".to_string(),
                backend_name: "k8s_local".to_string(),
                input_schema: json!({"type": "object", "properties": {"namespace": {"type": "string"}}, "required": ["namespace"]}),
                tags: vec![],
            }],
        );
        registry
    }

    #[tokio::test]
    async fn test_stage_a_success_short_circuits_stage_b() {
        let registry = registry_with_list_pods();
        let backend = FakeLlmBackend::new().with_completion(
            r#"[{"name": "local_k8s_list_pods", "arguments": {"namespace": "kube-system"}}]"#,
        );
        let agent = LlmAgent::new(Arc::new(backend), 2);
        let tools = registry.get_all();
        let result = agent
            .resolve(&registry, &[], &tools, "list pods in kube-system")
            .await;
        assert!(result.validated);
        assert_eq!(result.calls.len(), 1);
        assert_eq!(
            result.source,
            crate::types::ResolutionSource::LlmStageA
        );
    }

    #[tokio::test]
    async fn test_stage_a_invalid_falls_back_to_stage_b_and_retries() {
        let registry = registry_with_list_pods();
        // Stage A: missing required namespace -> invalid.
        // Stage B attempt 1: still missing namespace -> invalid.
        // Stage B attempt 2: includes namespace -> valid.
        let backend = FakeLlmBackend::new()
            .with_completion(r#"[{"name": "local_k8s_list_pods", "arguments": {}}]"#)
            .with_completion(r#"[{"name": "local_k8s_list_pods", "arguments": {}}]"#)
            .with_completion(
                r#"[{"name": "local_k8s_list_pods", "arguments": {"namespace": "default"}}]"#,
            );
        let agent = LlmAgent::new(Arc::new(backend), 2);
        let tools = registry.get_all();
        let result = agent.resolve(&registry, &[], &tools, "list pods").await;
        assert!(result.validated);
        assert_eq!(result.source, crate::types::ResolutionSource::LlmStageB);
    }

    #[tokio::test]
    async fn test_exhausted_retries_returns_unvalidated_final_prediction() {
        let registry = registry_with_list_pods();
        let backend = FakeLlmBackend::new()
            .with_completion(r#"[{"name": "local_k8s_list_pods", "arguments": {}}]"#)
            .with_completion(r#"[{"name": "local_k8s_list_pods", "arguments": {}}]"#)
            .with_completion(r#"[{"name": "local_k8s_list_pods", "arguments": {}}]"#);
        let agent = LlmAgent::new(Arc::new(backend), 2);
        let tools = registry.get_all();
        let result = agent.resolve(&registry, &[], &tools, "list pods").await;
        assert!(!result.validated);
        assert_eq!(result.calls.len(), 1);
    }

    #[test]
    fn test_validate_unknown_tool_rejected() {
        let registry = ToolRegistry::new();
        let err = validate_calls(&[ToolCall::new("nonexistent", json!({}))], &registry)
            .unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[test]
    fn test_validate_chat_sentinel_always_passes() {
        let registry = ToolRegistry::new();
        assert!(validate_calls(&[ToolCall::new("chat", json!({}))], &registry).is_ok());
    }

    #[test]
    fn test_validate_missing_required_arg() {
        let registry = registry_with_list_pods();
        let err = validate_calls(
            &[ToolCall::new("local_k8s_list_pods", json!({}))],
            &registry,
        )
        .unwrap_err();
        assert!(err.contains("namespace"));
    }
}
