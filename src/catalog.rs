//! Static tool catalog (spec §3's "registered at process start;
//! immutable after registration"). The concrete Docker/Kubernetes tool
//! implementations are out of scope per spec.md §1 — they're black-box
//! external collaborators, reached only through the JSON-RPC backend
//! client. What this crate owns is their *descriptors*: name, prose
//! description, and JSON-Schema-shaped parameters, which is everything
//! the routing cascade and the registry need.
//!
//! Grounded on the tool surface named across
//! `examples/original_source/devops_agent/` (`smart_router.py`'s
//! keyword sets, `safety.py`'s dangerous-tool names, `tool_indexer.py`'s
//! `TEMPLATE_PATTERNS` suffixes) plus spec.md §6's stable result
//! schemas — every tool named by any of those three sources has an
//! entry here so the regex auto-inference and the safety classifier
//! always have a real registered tool to act on.

use serde_json::json;

use crate::registry::ToolEntry;

fn tool(name: &str, description: &str, schema: serde_json::Value) -> ToolEntry {
    ToolEntry {
        name: name.to_string(),
        original_name: name.to_string(),
        description: description.to_string(),
        backend_name: crate::backend::backend_for_tool(name)
            .map(|b| b.as_str().to_string())
            .unwrap_or_else(|| "docker".to_string()),
        input_schema: schema,
        tags: Vec::new(),
    }
}

fn empty_schema() -> serde_json::Value {
    json!({"type": "object", "properties": {}, "required": []})
}

/// Docker backend's tool set.
pub fn docker_tools() -> Vec<ToolEntry> {
    vec![
        tool(
            "docker_list_containers",
            "List all Docker containers on the host, running or stopped.",
            empty_schema(),
        ),
        tool(
            "docker_run_container",
            "Start a new container from an image.",
            json!({
                "type": "object",
                "properties": {
                    "image": {"type": "string"},
                    "name": {"type": "string"},
                },
                "required": ["image"],
            }),
        ),
        tool(
            "docker_stop_container",
            "Stop a running container by id or name.",
            json!({
                "type": "object",
                "properties": {"container_id": {"type": "string"}},
                "required": ["container_id"],
            }),
        ),
        tool(
            "docker_rm_container",
            "Remove a stopped container by id or name.",
            json!({
                "type": "object",
                "properties": {"container_id": {"type": "string"}},
                "required": ["container_id"],
            }),
        ),
        tool(
            "docker_prune_images",
            "Remove all unused Docker images.",
            empty_schema(),
        ),
        tool("docker_ping", "Health check probe for the Docker backend.", empty_schema()),
    ]
}

/// Local-cluster Kubernetes tools, shared shape with `remote_k8s_*`.
pub fn local_k8s_tools() -> Vec<ToolEntry> {
    k8s_tools("local_k8s")
}

/// Remote-cluster Kubernetes tools, plus the remote-only `promote`/`exec`
/// dangerous operations spec.md §4.10 names.
pub fn remote_k8s_tools() -> Vec<ToolEntry> {
    let mut tools = k8s_tools("remote_k8s");
    tools.push(tool(
        "remote_k8s_promote",
        "Copy a resource from the local cluster to the remote cluster.",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "resource_type": {"type": "string"},
            },
            "required": ["name", "resource_type"],
        }),
    ));
    tools.push(tool(
        "remote_k8s_exec",
        "Execute a shell command inside a pod on the remote cluster.",
        json!({
            "type": "object",
            "properties": {
                "pod_name": {"type": "string"},
                "command": {"type": "string"},
            },
            "required": ["pod_name", "command"],
        }),
    ));
    tools
}

fn k8s_tools(prefix: &str) -> Vec<ToolEntry> {
    vec![
        tool(
            &format!("{prefix}_list_pods"),
            "List pods in a namespace.",
            json!({
                "type": "object",
                "properties": {"namespace": {"type": "string", "default": "default"}},
                "required": [],
            }),
        ),
        tool(
            &format!("{prefix}_list_nodes"),
            "List cluster nodes.",
            empty_schema(),
        ),
        tool(
            &format!("{prefix}_list_services"),
            "List services in a namespace.",
            json!({
                "type": "object",
                "properties": {"namespace": {"type": "string", "default": "default"}},
                "required": [],
            }),
        ),
        tool(
            &format!("{prefix}_list_deployments"),
            "List deployments in a namespace.",
            json!({
                "type": "object",
                "properties": {"namespace": {"type": "string", "default": "default"}},
                "required": [],
            }),
        ),
        tool(
            &format!("{prefix}_list_namespaces"),
            "List all namespaces in the cluster.",
            empty_schema(),
        ),
        tool(
            &format!("{prefix}_describe_pod"),
            "Describe a single pod in detail.",
            json!({
                "type": "object",
                "properties": {
                    "pod_name": {"type": "string"},
                    "namespace": {"type": "string", "default": "default"},
                },
                "required": ["pod_name"],
            }),
        ),
        tool(
            &format!("{prefix}_describe_node"),
            "Describe a single cluster node in detail.",
            json!({
                "type": "object",
                "properties": {"node_name": {"type": "string"}},
                "required": ["node_name"],
            }),
        ),
        tool(
            &format!("{prefix}_describe_service"),
            "Describe a single service in detail.",
            json!({
                "type": "object",
                "properties": {"service_name": {"type": "string"}},
                "required": ["service_name"],
            }),
        ),
        tool(
            &format!("{prefix}_describe_deployment"),
            "Describe a single deployment in detail.",
            json!({
                "type": "object",
                "properties": {"deployment_name": {"type": "string"}},
                "required": ["deployment_name"],
            }),
        ),
        tool(
            &format!("{prefix}_describe_namespace"),
            "Describe a single namespace in detail.",
            json!({
                "type": "object",
                "properties": {"namespace": {"type": "string"}},
                "required": ["namespace"],
            }),
        ),
        tool(
            &format!("{prefix}_get_logs"),
            "Fetch recent log lines for a pod.",
            json!({
                "type": "object",
                "properties": {
                    "pod_name": {"type": "string"},
                    "namespace": {"type": "string", "default": "default"},
                },
                "required": ["pod_name"],
            }),
        ),
        tool(
            &format!("{prefix}_top_nodes"),
            "Report CPU/memory utilization per node.",
            empty_schema(),
        ),
        tool(
            &format!("{prefix}_top_pods"),
            "Report CPU/memory utilization per pod.",
            empty_schema(),
        ),
        tool(
            &format!("{prefix}_delete_pod"),
            "Permanently delete a pod.",
            json!({
                "type": "object",
                "properties": {
                    "pod_name": {"type": "string"},
                    "namespace": {"type": "string", "default": "default"},
                },
                "required": ["pod_name"],
            }),
        ),
        tool(
            &format!("{prefix}_delete_deployment"),
            "Permanently delete a deployment.",
            json!({
                "type": "object",
                "properties": {
                    "deployment_name": {"type": "string"},
                    "namespace": {"type": "string", "default": "default"},
                },
                "required": ["deployment_name"],
            }),
        ),
        tool(
            &format!("{prefix}_delete_namespace"),
            "Permanently delete a namespace and everything in it.",
            json!({
                "type": "object",
                "properties": {"namespace": {"type": "string"}},
                "required": ["namespace"],
            }),
        ),
        tool(
            &format!("{prefix}_ping"),
            "Health check probe for this cluster's backend.",
            empty_schema(),
        ),
    ]
}

/// Register every built-in tool into `registry`, grouped by backend.
/// Called once at startup, before the Pulse Monitor and Retriever are
/// wired up so both observe the full tool set from their first read.
pub fn register_all(registry: &crate::registry::ToolRegistry) {
    registry.register_backend_tools("docker", docker_tools());
    registry.register_backend_tools("k8s_local", local_k8s_tools());
    registry.register_backend_tools("k8s_remote", remote_k8s_tools());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;

    #[test]
    fn test_register_all_populates_every_backend() {
        let registry = ToolRegistry::new();
        register_all(&registry);
        assert_eq!(registry.backend_count(), 3);
        assert!(registry.get_by_name("docker_list_containers").is_some());
        assert!(registry.get_by_name("local_k8s_list_pods").is_some());
        assert!(registry.get_by_name("remote_k8s_promote").is_some());
    }

    #[test]
    fn test_dangerous_tools_are_all_registered() {
        let registry = ToolRegistry::new();
        register_all(&registry);
        for name in [
            "docker_stop_container",
            "docker_rm_container",
            "docker_prune_images",
            "docker_run_container",
            "local_k8s_delete_pod",
            "remote_k8s_delete_pod",
            "remote_k8s_promote",
            "remote_k8s_exec",
        ] {
            assert!(
                registry.get_by_name(name).is_some(),
                "expected {name} to be registered"
            );
            assert!(crate::safety::is_dangerous(name), "expected {name} to be dangerous");
        }
    }

    #[test]
    fn test_no_duplicate_names_across_backends() {
        let registry = ToolRegistry::new();
        register_all(&registry);
        let names = registry.get_all_names();
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }
}
