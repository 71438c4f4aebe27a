use serde::Serialize;
use serde_json::Value;

/// Tool-name prefixes that always require confirmation before execution.
/// Three separate delete-family prefixes rather than one wildcard, matching
/// the per-backend tool naming (`k8s_delete`, `local_k8s_delete`,
/// `remote_k8s_delete` are distinct tools, not variants of one name).
const DANGEROUS_PREFIXES: &[&str] = &[
    "docker_stop",
    "docker_rm",
    "docker_prune",
    "k8s_delete",
    "local_k8s_delete",
    "remote_k8s_delete",
    "remote_k8s_promote",
    "remote_k8s_exec",
];

const DANGEROUS_EXACT: &[&str] = &["docker_run_container"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of a safety check on a single proposed tool call.
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub dangerous: bool,
    pub level: RiskLevel,
    pub reason: String,
    pub impacts: Vec<String>,
}

impl RiskReport {
    fn safe() -> Self {
        Self {
            dangerous: false,
            level: RiskLevel::Low,
            reason: "routine, non-destructive operation".to_string(),
            impacts: Vec::new(),
        }
    }
}

/// Whether `tool_name` belongs to the dangerous set: an exact match, or a
/// prefix from [`DANGEROUS_PREFIXES`].
pub fn is_dangerous(tool_name: &str) -> bool {
    DANGEROUS_EXACT.contains(&tool_name)
        || DANGEROUS_PREFIXES
            .iter()
            .any(|prefix| tool_name.starts_with(prefix))
}

fn arg_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

/// Assess the risk of executing `tool_name` with `arguments`. Pure function:
/// no I/O, no backend state, safe to call speculatively before dispatch.
pub fn analyze_risk(tool_name: &str, arguments: &Value) -> RiskReport {
    if !is_dangerous(tool_name) {
        return RiskReport::safe();
    }

    let mut report = RiskReport {
        dangerous: true,
        level: RiskLevel::High,
        reason: format!("'{tool_name}' performs a destructive or irreversible operation"),
        impacts: Vec::new(),
    };

    if tool_name == "docker_stop_container" {
        let cid = arg_str(arguments, "container_id").unwrap_or("unknown");
        report.impacts = vec![
            format!("Stops container '{cid}' immediately."),
            "Service interruption for any traffic routed to this container.".to_string(),
            "Potential data loss in ephemeral volumes.".to_string(),
        ];
    } else if tool_name == "docker_run_container" {
        let image = arg_str(arguments, "image").unwrap_or("unknown");
        report.impacts = vec![
            format!("Starts a new container from '{image}'."),
            "Consumes system resources (CPU/RAM).".to_string(),
            "Binds network ports.".to_string(),
        ];
    } else if tool_name.contains("delete") {
        report.impacts = vec![
            "PERMANENTLY removes the target resource.".to_string(),
            "Cannot be undone.".to_string(),
            "Service interruption for any workload depending on this resource.".to_string(),
        ];
    } else if tool_name.contains("exec") {
        let command = arg_str(arguments, "command")
            .or_else(|| arg_str(arguments, "cmd"))
            .unwrap_or("unknown");
        report.impacts = vec![
            format!("Executes arbitrary command: '{command}'"),
            "Full shell access inside the target risks further compromise.".to_string(),
            "Potential system modification.".to_string(),
        ];
    } else if tool_name.contains("promote") {
        let name = arg_str(arguments, "name").unwrap_or("unknown");
        let resource_type = arg_str(arguments, "resource_type").unwrap_or("resource");
        report.impacts = vec![
            format!("Copies {resource_type} '{name}' to the remote cluster."),
            "Modifies remote cluster state.".to_string(),
            "Potential for configuration drift if source and target versions mismatch."
                .to_string(),
        ];
    } else if tool_name.starts_with("docker_prune") {
        report.impacts = vec![
            "Removes all unused resources matching the prune target.".to_string(),
            "Cannot be undone.".to_string(),
            "May free resources still referenced by stopped containers.".to_string(),
        ];
    } else if tool_name.starts_with("docker_rm") {
        let cid = arg_str(arguments, "container_id").unwrap_or("unknown");
        report.impacts = vec![
            format!("Removes container '{cid}'."),
            "Cannot be undone.".to_string(),
            "Any non-persisted state inside the container is lost.".to_string(),
        ];
    } else {
        report.impacts = vec!["Operation could not be further classified.".to_string()];
        report.level = RiskLevel::Medium;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_tool_is_not_dangerous() {
        let report = analyze_risk("docker_list_containers", &json!({}));
        assert!(!report.dangerous);
        assert_eq!(report.level, RiskLevel::Low);
        assert!(report.impacts.is_empty());
    }

    #[test]
    fn test_docker_run_container_is_dangerous_exact() {
        assert!(is_dangerous("docker_run_container"));
        let report = analyze_risk("docker_run_container", &json!({"image": "nginx:latest"}));
        assert!(report.dangerous);
        assert!(report.impacts[0].contains("nginx:latest"));
    }

    #[test]
    fn test_docker_stop_container_impact_mentions_container_id() {
        let report = analyze_risk(
            "docker_stop_container",
            &json!({"container_id": "abc123"}),
        );
        assert!(report.dangerous);
        assert!(report.impacts[0].contains("abc123"));
    }

    #[test]
    fn test_three_distinct_delete_prefixes_are_dangerous() {
        assert!(is_dangerous("k8s_delete_pod"));
        assert!(is_dangerous("local_k8s_delete_deployment"));
        assert!(is_dangerous("remote_k8s_delete_namespace"));
        assert!(!is_dangerous("k8s_get_pod"));
    }

    #[test]
    fn test_delete_impact_is_generic_and_irreversible() {
        let report = analyze_risk("remote_k8s_delete_namespace", &json!({"name": "prod"}));
        assert!(report.impacts.iter().any(|i| i.contains("PERMANENTLY")));
        assert!(report.impacts.iter().any(|i| i.contains("Cannot be undone")));
    }

    #[test]
    fn test_exec_impact_mentions_command() {
        let report = analyze_risk(
            "remote_k8s_exec",
            &json!({"command": "rm -rf /data"}),
        );
        assert!(report.dangerous);
        assert!(report.impacts[0].contains("rm -rf /data"));
    }

    #[test]
    fn test_promote_impact_mentions_resource() {
        let report = analyze_risk(
            "remote_k8s_promote",
            &json!({"name": "web", "resource_type": "deployment"}),
        );
        assert!(report
            .impacts
            .iter()
            .any(|i| i.contains("deployment") && i.contains("web")));
    }

    #[test]
    fn test_docker_prune_is_dangerous() {
        assert!(is_dangerous("docker_prune_images"));
        let report = analyze_risk("docker_prune_images", &json!({}));
        assert!(report.dangerous);
    }

    #[test]
    fn test_non_dangerous_prefix_substring_is_not_flagged() {
        // "docker_stopwatch" shares a prefix with "docker_stop" only up to "docker_stop",
        // so it IS flagged by design — starts_with is intentionally permissive per-family.
        assert!(is_dangerous("docker_stop_all_containers"));
        assert!(!is_dangerous("docker_inspect_container"));
    }
}
