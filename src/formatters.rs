//! Per-backend result formatters (spec §4.9 "Formatting" transition) plus
//! the diagnostics formatter invoked on backend failure. Grounded directly
//! on `formatters/docker.py`, `formatters/k8s.py`, `formatters/base.py`
//! (the shared `_to_markdown_table` helper) and `formatters/diagnostics.py`
//! (LLM-explained raw error), collapsed from the source's
//! `BaseFormatter`/`FormatterRegistry` class hierarchy into plain
//! functions dispatched by tool-name prefix, per spec.md §9's "dynamic
//! class hierarchies → flat record + function" re-architecture note.

use serde_json::Value;
use std::sync::Arc;

use crate::llm::client::LlmBackend;

fn to_markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() || rows.is_empty() {
        return String::new();
    }
    let header_line = format!("| {} |", headers.join(" | "));
    let sep_line = format!("| {} |", vec!["---"; headers.len()].join(" | "));
    let row_lines: Vec<String> = rows.iter().map(|r| format!("| {} |", r.join(" | "))).collect();
    std::iter::once(header_line)
        .chain(std::iter::once(sep_line))
        .chain(row_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

fn str_field(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

/// Render a successful `docker_*` tool result.
fn format_docker(tool_name: &str, result: &Value) -> String {
    match tool_name {
        "docker_list_containers" => {
            let containers = result.get("containers").and_then(Value::as_array).cloned().unwrap_or_default();
            let count = result.get("count").and_then(Value::as_u64).unwrap_or(containers.len() as u64);
            if containers.is_empty() {
                return "✅ Success! No containers found.".to_string();
            }
            let rows: Vec<Vec<String>> = containers
                .iter()
                .map(|c| {
                    let status = str_field(c, "status", "");
                    let emoji = if status.contains("Up") { "🟢" } else { "🔴" };
                    vec![
                        emoji.to_string(),
                        str_field(c, "name", "unknown"),
                        str_field(c, "id", "unknown").chars().take(12).collect(),
                        str_field(c, "image", "unknown"),
                        status,
                    ]
                })
                .collect();
            format!(
                "✅ **Found {count} container(s):**\n\n{}",
                to_markdown_table(&["Status", "Name", "ID", "Image", "State"], &rows)
            )
        }
        "docker_run_container" => {
            let msg = str_field(result, "message", "Container started.");
            let id = str_field(result, "container_id", "");
            let name = str_field(result, "name", "");
            format!("✅ **{msg}**\n\n| ID | Name |\n|---|---|\n| `{id}` | **{name}** |")
        }
        "docker_stop_container" => {
            let msg = str_field(result, "message", "Container stopped.");
            let id = str_field(result, "container_id", "");
            let name = str_field(result, "name", "");
            format!("✅ **{msg}**\n\n| ID | Name |\n|---|---|\n| `{id}` | **{name}** |")
        }
        other => format!("✅ Tool '{other}' executed successfully."),
    }
}

/// Render a successful `*k8s_*` tool result (local or remote).
fn format_k8s(tool_name: &str, result: &Value) -> String {
    if tool_name.contains("list_pods") {
        let pods = result.get("pods").and_then(Value::as_array).cloned().unwrap_or_default();
        let namespace = str_field(result, "namespace", "unknown");
        let scope = if tool_name.contains("remote") { "REMOTE" } else { "LOCAL" };
        if pods.is_empty() {
            return format!("✅ Success! No pods in '{namespace}' ({scope}).");
        }

        let mut status_counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
        for p in &pods {
            *status_counts.entry(str_field(p, "phase", "Unknown")).or_insert(0) += 1;
        }
        let summary = status_counts
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ");

        let rows: Vec<Vec<String>> = pods
            .iter()
            .map(|p| {
                let status = str_field(p, "phase", "Unknown");
                let emoji = match status.as_str() {
                    "Running" => "🟢",
                    "Pending" => "🟡",
                    _ => "🔴",
                };
                vec![
                    format!("{emoji} {status}"),
                    str_field(p, "name", "?"),
                    p.get("restarts").map(|v| v.to_string()).unwrap_or_else(|| "0".to_string()),
                    str_field(p, "age", "?"),
                    str_field(p, "node", "?"),
                ]
            })
            .collect();

        format!(
            "✅ **Kubernetes Pods in '{namespace}' ({scope})**\n*Summary: {summary}*\n\n{}",
            to_markdown_table(&["Status", "Name", "Restarts", "Age", "Node"], &rows)
        )
    } else if tool_name.contains("describe_pod") || tool_name.contains("describe_deployment") {
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| result.to_string());
        if data.contains("Name:") {
            format!("📋 **Detailed Description**:\n```yaml\n{data}\n```")
        } else {
            format!("✅ **Resource Details**:\n{data}")
        }
    } else {
        format!("✅ K8s Tool '{tool_name}' executed successfully.")
    }
}

/// Render the docker endpoint's reply to the `chat` sentinel: plain
/// conversational text, no status emoji or table — this isn't an
/// infrastructure operation.
fn format_chat(result: &Value) -> String {
    result
        .get("message")
        .or_else(|| result.get("reply"))
        .or_else(|| result.get("response"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match result.as_str() {
            Some(s) => s.to_string(),
            None => result.to_string(),
        })
}

/// Dispatch a successful result to the right per-backend formatter by tool
/// name prefix (`docker_*` vs `*k8s_*` vs the `chat` sentinel).
pub fn format_success(tool_name: &str, result: &Value) -> String {
    if tool_name == "chat" {
        format_chat(result)
    } else if tool_name.starts_with("docker_") {
        format_docker(tool_name, result)
    } else if tool_name.contains("k8s_") {
        format_k8s(tool_name, result)
    } else {
        format!("✅ Tool '{tool_name}' executed successfully.")
    }
}

/// Render a failed result, invoking the LLM once to explain the raw error
/// when one is present. Grounded on `formatters/diagnostics.py`'s
/// `DiagnosticFormatter`.
pub async fn format_failure(tool_name: &str, error: &str, raw_error: Option<&str>, llm: &Arc<dyn LlmBackend>) -> String {
    let Some(raw_error) = raw_error else {
        return format!("❌ Operation failed: {error}");
    };

    let prompt = format!(
        "You are diagnosing an infrastructure API failure.\n\
         Action: {tool_name}\n\
         Error summary: {error}\n\
         Raw error payload:\n{raw_error}\n\n\
         In one or two sentences, explain the likely cause and a concrete next step."
    );
    let explanation = llm
        .complete(&prompt, true)
        .await
        .unwrap_or_else(|_| "No further diagnostic available.".to_string());

    format!(
        "❌ **Operation Failed**: {error}\n\n\
         🐛 **Raw API Error**:\n```json\n{raw_error}\n```\n\n\
         🤖 **AI Diagnostic**:\n{explanation}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::test_support::FakeLlmBackend;
    use serde_json::json;

    #[test]
    fn test_docker_list_containers_empty() {
        let out = format_success("docker_list_containers", &json!({"containers": [], "count": 0}));
        assert_eq!(out, "✅ Success! No containers found.");
    }

    #[test]
    fn test_docker_list_containers_renders_table_row() {
        let out = format_success(
            "docker_list_containers",
            &json!({"containers": [{"id": "abcdef0123456789", "name": "web", "image": "nginx", "status": "Up 2 hours"}], "count": 1}),
        );
        assert!(out.starts_with("✅ **Found 1 container(s):**"));
        assert!(out.contains("🟢"));
        assert!(out.contains("web"));
        assert!(out.contains("abcdef012345"));
        assert!(!out.contains("abcdef0123456789"));
    }

    #[test]
    fn test_k8s_list_pods_summarizes_status_counts() {
        let out = format_success(
            "local_k8s_list_pods",
            &json!({"namespace": "kube-system", "pods": [{"name": "a", "phase": "Running"}, {"name": "b", "phase": "Pending"}]}),
        );
        assert!(out.contains("LOCAL"));
        assert!(out.contains("kube-system"));
        assert!(out.contains("Running: 1"));
        assert!(out.contains("Pending: 1"));
    }

    #[test]
    fn test_k8s_remote_scope_label() {
        let out = format_success(
            "remote_k8s_list_pods",
            &json!({"namespace": "default", "pods": []}),
        );
        assert!(out.contains("REMOTE"));
    }

    #[test]
    fn test_chat_renders_message_field_verbatim() {
        let out = format_success("chat", &json!({"message": "Hi, I'm the devops dispatcher."}));
        assert_eq!(out, "Hi, I'm the devops dispatcher.");
    }

    #[test]
    fn test_chat_falls_back_to_plain_string_result() {
        let out = format_success("chat", &json!("hello there"));
        assert_eq!(out, "hello there");
    }

    #[tokio::test]
    async fn test_failure_without_raw_error_is_plain() {
        let llm: Arc<dyn LlmBackend> = Arc::new(FakeLlmBackend::new());
        let out = format_failure("docker_stop_container", "timeout", None, &llm).await;
        assert_eq!(out, "❌ Operation failed: timeout");
    }

    #[tokio::test]
    async fn test_failure_with_raw_error_invokes_llm() {
        let llm: Arc<dyn LlmBackend> =
            Arc::new(FakeLlmBackend::new().with_completion("container not found, likely already removed"));
        let out = format_failure(
            "docker_stop_container",
            "not found",
            Some("{\"code\":404}"),
            &llm,
        )
        .await;
        assert!(out.contains("🐛 **Raw API Error**"));
        assert!(out.contains("🤖 **AI Diagnostic**"));
        assert!(out.contains("already removed"));
    }
}
