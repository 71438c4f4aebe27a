//! Exact/regex router (spec §4.5): verbatim-query input cache, then an
//! ordered scan of manual templates (authored, highest priority) followed
//! by auto-inferred ones derived from tool-naming conventions. Grounded on
//! `router.py`'s regex-template tier and `tool_indexer.py`'s
//! `TEMPLATE_PATTERNS`/`infer_template`.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ToolEntry;
use crate::types::ToolCall;

/// One entry in the template list. `compiled_pattern` is built once at load
/// time (case-insensitive); `arg_mapping` values containing a `{group}`
/// placeholder are interpolated from the pattern's named captures.
pub struct Template {
    pub name: String,
    pub compiled_pattern: Regex,
    pub tool: String,
    pub arg_mapping: serde_json::Map<String, Value>,
}

/// On-disk shape for manual/auto templates (`{name, pattern, tool, args}`),
/// matching `router.py`'s `data/intents.json` `templates` array and
/// `tool_indexer.py`'s `auto_templates.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub pattern: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Map<String, Value>,
}

impl Template {
    pub fn compile(spec: TemplateSpec) -> Option<Template> {
        let compiled = regex::RegexBuilder::new(&spec.pattern)
            .case_insensitive(true)
            .build()
            .ok()?;
        Some(Template {
            name: spec.name,
            compiled_pattern: compiled,
            tool: spec.tool,
            arg_mapping: spec.args,
        })
    }
}

/// Naming-shape -> (pattern, arg-mapping) table used to auto-infer a
/// template for any tool matching a recognized suffix. Mirrors
/// `tool_indexer.py::TEMPLATE_PATTERNS` verbatim.
const AUTO_PATTERNS: &[(&str, &str, &[(&str, &str)])] = &[
    ("_describe_pod", r"describe (?:the )?(?:pod )?(?P<pod>[\w-]+)", &[("pod_name", "{pod}"), ("namespace", "default")]),
    ("_describe_node", r"describe (?:the )?node (?P<node>[\w-]+)", &[("node_name", "{node}")]),
    ("_describe_service", r"describe (?:the )?service (?P<service>[\w-]+)", &[("service_name", "{service}")]),
    ("_describe_deployment", r"describe (?:the )?deployment (?P<deployment>[\w-]+)", &[("deployment_name", "{deployment}")]),
    ("_describe_namespace", r"describe (?:the )?namespace (?P<namespace>[\w-]+)", &[("namespace", "{namespace}")]),
    ("_get_logs", r"(?:get |show )?logs (?:for )?(?:pod )?(?P<pod>[\w-]+)", &[("pod_name", "{pod}")]),
    ("_list_pods", r"(?:list|show) (?:all )?pods", &[]),
    ("_list_nodes", r"(?:list|show) (?:all )?nodes", &[]),
    ("_list_services", r"(?:list|show) (?:all )?services", &[]),
    ("_list_deployments", r"(?:list|show) (?:all )?deployments", &[]),
    ("_list_namespaces", r"(?:list|show) (?:all )?namespaces", &[]),
    ("_top_nodes", r"(?:top|metrics for) nodes", &[]),
    ("_top_pods", r"(?:top|metrics for) pods", &[]),
];

/// Infer a template for one tool entry, if its name matches a recognized
/// suffix shape. Scope prefix (`local `/`remote `) is prepended to the
/// pattern per naming convention so "describe web-1" doesn't accidentally
/// also match the local variant of a remote-only tool (and vice versa).
pub fn infer_template(tool: &ToolEntry) -> Option<Template> {
    let (_, pattern, args) = AUTO_PATTERNS
        .iter()
        .find(|(suffix, _, _)| tool.name.ends_with(suffix))?;

    let scope_prefix = if tool.name.starts_with("remote_k8s_") {
        "remote "
    } else if tool.name.starts_with("local_k8s_") {
        "local "
    } else {
        ""
    };

    let mut arg_mapping = serde_json::Map::new();
    for (key, value) in *args {
        arg_mapping.insert(key.to_string(), Value::String(value.to_string()));
    }

    Template::compile(TemplateSpec {
        name: format!("auto_{}", tool.name),
        pattern: format!("{scope_prefix}{pattern}"),
        tool: tool.name.clone(),
        args: arg_mapping,
    })
}

/// Substitute every `{group}` placeholder in `value` with the named capture
/// from `caps`. Returns `None` if a referenced group didn't participate in
/// the match, so the caller can skip this template rather than emit a
/// half-filled argument.
fn interpolate(value: &str, caps: &regex::Captures) -> Option<String> {
    if !value.contains('{') {
        return Some(value.to_string());
    }
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let close = value[i..].find('}').map(|o| i + o)?;
            let group = &value[i + 1..close];
            out.push_str(caps.name(group)?.as_str());
            i = close + 1;
        } else {
            let ch = value[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Some(out)
}

/// Deterministic, bounded-k exact/regex tier. Holds an exact-text input
/// cache plus the ordered template list (manual first, then auto-inferred).
pub struct RegexRouter {
    templates: Vec<Template>,
    input_cache: Mutex<HashMap<String, Vec<ToolCall>>>,
}

impl RegexRouter {
    pub fn new(manual: Vec<TemplateSpec>, tools: &[ToolEntry]) -> Self {
        let mut templates: Vec<Template> = manual.into_iter().filter_map(Template::compile).collect();
        let manual_tool_names: std::collections::HashSet<&str> =
            templates.iter().map(|t| t.tool.as_str()).collect();

        for tool in tools {
            if manual_tool_names.contains(tool.name.as_str()) {
                continue;
            }
            if let Some(auto) = infer_template(tool) {
                templates.push(auto);
            }
        }

        Self {
            templates,
            input_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Route a query, checking the exact-text cache first.
    pub fn route(&self, query: &str) -> Option<Vec<ToolCall>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(cached) = self.input_cache.lock().unwrap().get(trimmed) {
            return Some(cached.clone());
        }

        for template in &self.templates {
            let Some(caps) = template.compiled_pattern.captures(trimmed) else {
                continue;
            };

            let mut arguments = serde_json::Map::new();
            let mut ok = true;
            for (key, value) in &template.arg_mapping {
                match value {
                    Value::String(s) => match interpolate(s, &caps) {
                        Some(resolved) => {
                            arguments.insert(key.clone(), Value::String(resolved));
                        }
                        None => {
                            ok = false;
                            break;
                        }
                    },
                    other => {
                        arguments.insert(key.clone(), other.clone());
                    }
                }
            }
            if !ok {
                continue;
            }

            let calls = vec![ToolCall::new(template.tool.clone(), Value::Object(arguments))];
            self.input_cache
                .lock()
                .unwrap()
                .insert(trimmed.to_string(), calls.clone());
            return Some(calls);
        }

        None
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}
