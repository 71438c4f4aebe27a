//! LLM output parse pipeline (spec §4.8, steps 1-5): trim and strip fences,
//! extract a balanced JSON value from surrounding prose, repair through a
//! permissive re-parse, normalize call shapes, then hand back to the caller
//! for semantic (registry/schema) validation. Exceptions-as-control-flow in
//! the original Python is replaced by an explicit [`ParseOutcome`] enum —
//! every failure mode is a variant, not a caught panic.

use serde_json::Value;

use crate::types::ToolCall;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Vec<ToolCall>),
    ParseFailed(String),
}

/// Run steps 1-4 of the Stage A/B pipeline: strip fences, locate a balanced
/// JSON value, repair-parse it, then normalize into a `Vec<ToolCall>`.
/// Step 5 (registry/schema validation) is the caller's job — this function
/// knows nothing about which tools exist.
pub fn parse_llm_output(raw: &str) -> ParseOutcome {
    let trimmed = strip_fences(raw.trim());
    if trimmed.is_empty() {
        return ParseOutcome::ParseFailed("empty output".to_string());
    }

    let candidate = match extract_balanced_json(trimmed) {
        Some(c) => c,
        None => return ParseOutcome::ParseFailed("no JSON value found in output".to_string()),
    };

    let value: Value = match serde_json::from_str(&candidate) {
        Ok(v) => v,
        Err(e) => return ParseOutcome::ParseFailed(format!("JSON repair failed: {e}")),
    };

    normalize(value)
}

/// Strip a ```json ... ``` or ``` ... ``` fence if the whole output is
/// wrapped in one.
fn strip_fences(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    s
}

/// Locate the first `[` or `{` and extract up to its balanced closer,
/// tolerating surrounding prose ("Sure, here are the calls: [...]").
/// Bracket counting respects string literals so a `{` inside a quoted
/// argument value doesn't throw off the balance.
fn extract_balanced_json(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let start = bytes.iter().position(|&b| b == b'[' || b == b'{')?;
    let open = bytes[start];
    let close = if open == b'[' { b']' } else { b'}' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(s[start..end].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Normalize a parsed JSON value into a list of [`ToolCall`]s per the
/// accepted shapes in spec §4.8 step 4:
/// - a bare array of call objects
/// - a single call object
/// - `[name, args]` shorthand for one call
/// - `[name]` or a bare string, shorthand for `{name, arguments: {}}`
fn normalize(value: Value) -> ParseOutcome {
    match value {
        Value::Array(items) => {
            // `[name, args]` shorthand: a 2-element array whose first
            // element is a string and second is an object is ONE call, not
            // two. Distinguish from a genuine list-of-calls by checking the
            // second element's shape.
            if items.len() == 2 {
                if let (Some(name), Value::Object(_)) = (items[0].as_str(), &items[1]) {
                    return ParseOutcome::Parsed(vec![ToolCall::new(name, items[1].clone())]);
                }
            }
            if items.len() == 1 {
                if let Some(call) = normalize_one(&items[0]) {
                    return ParseOutcome::Parsed(vec![call]);
                }
            }

            let mut calls = Vec::with_capacity(items.len());
            for item in &items {
                match normalize_one(item) {
                    Some(call) => calls.push(call),
                    None => {
                        return ParseOutcome::ParseFailed(format!(
                            "could not normalize call entry: {item}"
                        ));
                    }
                }
            }
            ParseOutcome::Parsed(calls)
        }
        other => match normalize_one(&other) {
            Some(call) => ParseOutcome::Parsed(vec![call]),
            None => ParseOutcome::ParseFailed(format!("could not normalize output: {other}")),
        },
    }
}

fn normalize_one(value: &Value) -> Option<ToolCall> {
    match value {
        Value::String(s) => Some(ToolCall::new(s.clone(), Value::Object(Default::default()))),
        Value::Object(map) => {
            let name = map
                .get("name")
                .or_else(|| map.get("tool_name"))
                .or_else(|| map.get("tool"))
                .and_then(Value::as_str)?;
            let arguments = map
                .get("arguments")
                .or_else(|| map.get("parameters"))
                .or_else(|| map.get("input"))
                .cloned()
                .unwrap_or(Value::Object(Default::default()));
            Some(ToolCall::new(name, arguments))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(outcome: ParseOutcome) -> Vec<ToolCall> {
        match outcome {
            ParseOutcome::Parsed(calls) => calls,
            ParseOutcome::ParseFailed(msg) => panic!("expected Parsed, got ParseFailed: {msg}"),
        }
    }

    #[test]
    fn test_bare_array() {
        let calls = parsed(parse_llm_output(
            r#"[{"name": "docker_list_containers", "arguments": {}}]"#,
        ));
        assert_eq!(calls, vec![ToolCall::new("docker_list_containers", json!({}))]);
    }

    #[test]
    fn test_fenced_code_block() {
        let raw = "```json\n[{\"name\": \"docker_list_containers\", \"arguments\": {}}]\n```";
        let calls = parsed(parse_llm_output(raw));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "docker_list_containers");
    }

    #[test]
    fn test_prose_with_embedded_array() {
        let raw = r#"Sure, here are the calls: [{"name": "docker_list_containers", "arguments": {}}] hope that helps!"#;
        let calls = parsed(parse_llm_output(raw));
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_single_object() {
        let calls = parsed(parse_llm_output(r#"{"name": "chat", "arguments": {}}"#));
        assert_eq!(calls[0].name, "chat");
    }

    #[test]
    fn test_name_args_shorthand() {
        let calls = parsed(parse_llm_output(
            r#"["local_k8s_list_pods", {"namespace": "kube-system"}]"#,
        ));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "local_k8s_list_pods");
        assert_eq!(calls[0].arguments, json!({"namespace": "kube-system"}));
    }

    #[test]
    fn test_name_only_shorthand() {
        let calls = parsed(parse_llm_output(r#"["docker_list_containers"]"#));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "docker_list_containers");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn test_alternate_field_names() {
        let calls = parsed(parse_llm_output(
            r#"[{"tool_name": "docker_list_containers", "parameters": {"a": 1}}]"#,
        ));
        assert_eq!(calls[0].name, "docker_list_containers");
        assert_eq!(calls[0].arguments, json!({"a": 1}));
    }

    #[test]
    fn test_duplicate_intent_yields_multiple_calls() {
        let raw = r#"[{"name": "local_k8s_list_pods", "arguments": {}}, {"name": "local_k8s_list_nodes", "arguments": {}}]"#;
        let calls = parsed(parse_llm_output(raw));
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn test_empty_string_rejected() {
        assert!(matches!(parse_llm_output(""), ParseOutcome::ParseFailed(_)));
        assert!(matches!(parse_llm_output("   "), ParseOutcome::ParseFailed(_)));
    }

    #[test]
    fn test_non_json_garbage_rejected() {
        assert!(matches!(
            parse_llm_output("this is not json at all"),
            ParseOutcome::ParseFailed(_)
        ));
    }

    #[test]
    fn test_balanced_braces_inside_string_values_dont_confuse_counting() {
        let raw = r#"[{"name": "remote_k8s_exec", "arguments": {"command": "echo '{unbalanced'"}}]"#;
        let calls = parsed(parse_llm_output(raw));
        assert_eq!(calls[0].name, "remote_k8s_exec");
    }
}
