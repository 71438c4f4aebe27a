//! The Orchestrator (spec §4.9): drives the full per-turn state machine
//! `received -> smart-routed -> cache-checked -> tier-cascaded ->
//! safety-gated -> (awaiting-approval | executing) -> formatted -> cached
//! -> responded`. Owns no long-lived state itself beyond the handles it
//! was constructed with (Registry, Retriever, Cache, Pulse, LLM client,
//! Session store) — every one of those is passed in explicitly at
//! construction, per spec.md §9's singleton-replacement note.
//!
//! Smart routing (backend keyword sets, anaphor/context detection,
//! ambiguous-k8s-defaults-to-both, disconnected-remote-drop) is grounded
//! almost verbatim on `examples/original_source/devops_agent/smart_router.py`.
//! Concurrent dispatch is grounded on
//! `gatemini::backend::mod::BackendManager::start_all`'s `JoinSet` fan-out,
//! generalized here via `futures::future::join_all` since every call is
//! independent (no phased startup ordering to preserve).

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::pulse::{PulseMonitor, PulseStatus};
use crate::backend::{BackendClient, BackendId, backend_for_tool};
use crate::cache::semantic_cache::SemanticCache;
use crate::errors::ErrorPayload;
use crate::formatters;
use crate::llm::agent::{LlmAgent, validate_calls};
use crate::registry::ToolRegistry;
use crate::router::intent_router::IntentRouter;
use crate::router::regex_router::RegexRouter;
use crate::router::retriever::Retriever;
use crate::safety::{self, RiskReport};
use crate::session::{Role, SessionStore};
use crate::tracker::CallTracker;
use crate::types::{CallResult, ResolutionSource, ToolCall};

const CHAT_KEYWORDS: &[&str] = &[
    "hi", "hello", "hey", "help", "who are you", "what is this", "thanks", "thank you", "bye",
    "test", "explain", "why",
];
const DOCKER_KEYWORDS: &[&str] = &["docker", "container", "image", "volume", "network", "compose"];
const LOCAL_K8S_KEYWORDS: &[&str] = &["local", "minikube", "kind", "desktop", "localhost"];
const REMOTE_K8S_KEYWORDS: &[&str] =
    &["remote", "cluster", "aws", "gcp", "azure", "cloud", "production", "staging"];
const K8S_COMMON_TERMS: &[&str] = &[
    "pod", "node", "deployment", "service", "namespace", "replicaset", "configmap", "secret",
    "ingress", "pvc", "pv", "log", "logs", "describe", "ip", "port", "status", "phase", "labeled",
    "label", "selector", "filtering", "filter", "promote", "trace", "diff", "utilization",
    "compare",
];
const CONTEXT_INDICATORS: &[&str] = &["it", "that", "this", "them", "those", "here", "there", "details", "more", "describe", "the"];

/// Candidate backend subset chosen by smart routing, before the cascade
/// resolves a concrete tool call. Distinct from [`BackendId`] because
/// `chat` is a valid routing target but never a dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RouteTarget {
    Docker,
    LocalK8s,
    RemoteK8s,
    Chat,
}

/// Everything the caller needs to render one turn's outcome: a formatted
/// response plus, when the pipeline paused, the structured pause payload.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_request: Option<ConfirmationRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disambiguation: Option<DisambiguationRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationRequest {
    pub tool: String,
    pub arguments: Value,
    pub risk: RiskReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisambiguationOption {
    pub label: String,
    pub tool: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisambiguationRequest {
    pub ambiguous_tool: String,
    pub options: std::collections::BTreeMap<String, DisambiguationOption>,
}

/// Per-turn caller input. `approved_tool` is spec §9's re-architected
/// safety-override mechanism: a per-turn flag threaded through the API,
/// never a module-level mutable flag.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub session_id: Uuid,
    pub query: String,
    pub approved_tool: Option<String>,
    pub forced_backends: Option<Vec<String>>,
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    backend_client: Arc<BackendClient>,
    pulse: Arc<PulseMonitor>,
    cache: Arc<SemanticCache>,
    regex_router: Arc<RegexRouter>,
    intent_router: Arc<IntentRouter>,
    retriever: Arc<Retriever>,
    llm_agent: Arc<LlmAgent>,
    llm: Arc<dyn crate::llm::client::LlmBackend>,
    sessions: Arc<SessionStore>,
    tracker: Arc<CallTracker>,
    safety_confirm: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ToolRegistry>,
        backend_client: Arc<BackendClient>,
        pulse: Arc<PulseMonitor>,
        cache: Arc<SemanticCache>,
        regex_router: Arc<RegexRouter>,
        intent_router: Arc<IntentRouter>,
        retriever: Arc<Retriever>,
        llm_agent: Arc<LlmAgent>,
        llm: Arc<dyn crate::llm::client::LlmBackend>,
        sessions: Arc<SessionStore>,
        tracker: Arc<CallTracker>,
        safety_confirm: bool,
    ) -> Self {
        Self {
            registry,
            backend_client,
            pulse,
            cache,
            regex_router,
            intent_router,
            retriever,
            llm_agent,
            llm,
            sessions,
            tracker,
            safety_confirm,
        }
    }

    pub async fn handle_query(&self, request: TurnRequest, now_ts: i64) -> TurnResponse {
        let mut session = self.sessions.get_or_create(request.session_id, now_ts);
        session.push(Role::User, request.query.clone(), now_ts);

        let route_targets = self.smart_route(&request, &session);
        let backend_scope = backend_scope_for(&route_targets);
        let k8s_ambiguous = route_targets.contains(&RouteTarget::LocalK8s)
            && route_targets.contains(&RouteTarget::RemoteK8s);

        // Cache check.
        if request.approved_tool.is_none() {
            if let Some(hit) = self.cache.lookup(&request.query, backend_scope.as_deref()).await {
                session.push(Role::Assistant, hit.output_text.clone(), now_ts);
                self.sessions.save(session).await;
                return TurnResponse {
                    output: hit.output_text,
                    confirmation_request: None,
                    disambiguation: None,
                    tool_calls: hit.tool_calls,
                    cached: true,
                };
            }
        }

        // Cascade.
        let (calls, _source) = match self.cascade(&request, &session).await {
            Some(resolved) => resolved,
            None => {
                let output = "🤔 I couldn't resolve that request to a known action.".to_string();
                session.push(Role::Assistant, output.clone(), now_ts);
                self.sessions.save(session).await;
                return TurnResponse {
                    output,
                    confirmation_request: None,
                    disambiguation: None,
                    tool_calls: Vec::new(),
                    cached: false,
                };
            }
        };

        // A caller approving a prior confirmation or disambiguation names
        // the tool it picked explicitly — that choice overrides whatever
        // name this turn's fresh cascade happened to resolve.
        let calls = match &request.approved_tool {
            Some(approved) if calls.len() == 1 && &calls[0].name != approved => {
                vec![ToolCall::new(approved.clone(), calls[0].arguments.clone())]
            }
            _ => calls,
        };

        // Disambiguation: a query naming neither cluster explicitly resolved
        // to one backend's tool, but the sibling cluster registers the same
        // operation — ask which cluster the caller meant rather than guess.
        if request.approved_tool.is_none() && k8s_ambiguous && calls.len() == 1 {
            if let Some(sibling_name) = sibling_k8s_tool(&calls[0].name) {
                if self.registry.get_by_name(&sibling_name).is_some() {
                    let output = format!(
                        "❓ Did you mean the local or remote cluster for '{}'?",
                        calls[0].name
                    );
                    session.push(Role::Assistant, output.clone(), now_ts);
                    self.sessions.save(session).await;
                    let (local_tool, remote_tool) = if calls[0].name.starts_with("local_k8s_") {
                        (calls[0].name.clone(), sibling_name)
                    } else {
                        (sibling_name, calls[0].name.clone())
                    };
                    let mut options = std::collections::BTreeMap::new();
                    options.insert(
                        "local".to_string(),
                        DisambiguationOption {
                            label: "Local cluster".to_string(),
                            tool: local_tool,
                        },
                    );
                    options.insert(
                        "remote".to_string(),
                        DisambiguationOption {
                            label: "Remote cluster".to_string(),
                            tool: remote_tool,
                        },
                    );
                    return TurnResponse {
                        output,
                        confirmation_request: None,
                        disambiguation: Some(DisambiguationRequest {
                            ambiguous_tool: calls[0].name.clone(),
                            options,
                        }),
                        tool_calls: calls,
                        cached: false,
                    };
                }
            }
        }

        // Safety gate. `safety_confirm = false` is an explicit operator
        // opt-out (config.rs's `DEVOPS_SAFETY_CONFIRM`) — dangerous calls
        // dispatch immediately instead of pausing for approval.
        if self.safety_confirm && request.approved_tool.is_none() {
            for call in &calls {
                let risk = safety::analyze_risk(&call.name, &call.arguments);
                if risk.dangerous {
                    let output = format!("🛑 Approval required for '{}'.", call.name);
                    session.push(Role::Assistant, output.clone(), now_ts);
                    self.sessions.save(session).await;
                    return TurnResponse {
                        output,
                        confirmation_request: Some(ConfirmationRequest {
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                            risk,
                        }),
                        disambiguation: None,
                        tool_calls: calls,
                        cached: false,
                    };
                }
            }
        }

        // Execution: concurrent dispatch, results collected in input order.
        let dispatches = calls.iter().map(|call| self.dispatch_one(call));
        let results: Vec<CallResult> = futures::future::join_all(dispatches).await;

        // Formatting.
        let mut sections = Vec::with_capacity(results.len());
        let mut all_succeeded = true;
        for (call, result) in calls.iter().zip(results.iter()) {
            match result {
                CallResult::Success { payload, .. } => {
                    sections.push(formatters::format_success(&call.name, payload));
                }
                CallResult::Failure(err) => {
                    all_succeeded = false;
                    sections.push(
                        formatters::format_failure(
                            &call.name,
                            &err.error,
                            err.raw_error.as_deref(),
                            &self.llm,
                        )
                        .await,
                    );
                }
            }
        }
        let output = sections.join("\n\n---\n\n");

        // Post-commit.
        if let Some(first) = calls.first() {
            if let Some(backend) = backend_for_tool(&first.name) {
                session.set_last_backend(backend.as_str(), now_ts);
            }
        }
        session.push(Role::Assistant, output.clone(), now_ts);
        self.sessions.save(session).await;

        if all_succeeded {
            self.cache
                .insert(&request.query, &output, calls.clone(), backend_scope, now_ts)
                .await;
        }

        TurnResponse {
            output,
            confirmation_request: None,
            disambiguation: None,
            tool_calls: calls,
            cached: false,
        }
    }

    async fn dispatch_one(&self, call: &ToolCall) -> CallResult {
        let Some(backend) = backend_for_tool(&call.name) else {
            return CallResult::Failure(ErrorPayload {
                success: false,
                error: format!("no backend routes tool '{}'", call.name),
                raw_error: None,
                status_code: None,
            });
        };

        let start = std::time::Instant::now();
        match self
            .backend_client
            .call_tool(backend, &call.name, call.arguments.clone())
            .await
        {
            Ok(payload) => {
                self.tracker
                    .record(&call.name, backend.as_str(), start.elapsed(), true);
                CallResult::success(payload)
            }
            Err(e) => {
                self.tracker
                    .record(&call.name, backend.as_str(), start.elapsed(), false);
                CallResult::Failure(ErrorPayload::from(&e))
            }
        }
    }

    /// Smart routing (spec §4.9, `smart_router.py`): classify the query over
    /// keyword sets, fold in sticky last-backend context for anaphoric
    /// follow-ups, default ambiguous k8s queries to both clusters, and drop
    /// a disconnected remote cluster unless explicitly named.
    fn smart_route(&self, request: &TurnRequest, session: &crate::session::Session) -> HashSet<RouteTarget> {
        if let Some(forced) = &request.forced_backends {
            return forced.iter().filter_map(|s| route_target_from_str(s)).collect();
        }

        let q_lower = request.query.to_lowercase();
        let mut selected: HashSet<RouteTarget> = HashSet::new();

        let words: Vec<&str> = q_lower.split_whitespace().collect();
        let is_follow_up = CONTEXT_INDICATORS.iter().any(|w| words.contains(w));
        if is_follow_up {
            if let Some(last) = &session.last_backend {
                if let Some(target) = route_target_from_str(last) {
                    selected.insert(target);
                }
            }
        }

        if CHAT_KEYWORDS.iter().any(|k| q_lower.contains(k)) {
            selected.insert(RouteTarget::Chat);
        }
        if DOCKER_KEYWORDS.iter().any(|k| q_lower.contains(k)) {
            selected.insert(RouteTarget::Docker);
        }
        if LOCAL_K8S_KEYWORDS.iter().any(|k| q_lower.contains(k)) {
            selected.insert(RouteTarget::LocalK8s);
        }
        if REMOTE_K8S_KEYWORDS.iter().any(|k| q_lower.contains(k)) {
            selected.insert(RouteTarget::RemoteK8s);
        }

        let is_k8s = K8S_COMMON_TERMS.iter().any(|k| q_lower.contains(k));
        if is_k8s {
            let has_local = selected.contains(&RouteTarget::LocalK8s);
            let has_remote = selected.contains(&RouteTarget::RemoteK8s);
            if !has_local && !has_remote {
                selected.insert(RouteTarget::LocalK8s);
                selected.insert(RouteTarget::RemoteK8s);
            }
        }

        if selected.is_empty() {
            if q_lower.contains("status") || q_lower.contains("check") {
                selected.insert(RouteTarget::Docker);
                selected.insert(RouteTarget::LocalK8s);
                selected.insert(RouteTarget::RemoteK8s);
            } else if words.len() > 5 {
                selected.insert(RouteTarget::Docker);
                selected.insert(RouteTarget::LocalK8s);
                selected.insert(RouteTarget::RemoteK8s);
                selected.insert(RouteTarget::Chat);
            } else {
                selected.insert(RouteTarget::Chat);
            }
        }

        let is_explicit_remote = q_lower.contains("remote");
        if selected.contains(&RouteTarget::RemoteK8s) && !is_explicit_remote {
            if self.pulse.status(BackendId::RemoteK8s) == PulseStatus::Disconnected {
                selected.remove(&RouteTarget::RemoteK8s);
            }
        }

        selected
    }

    /// Cascade: Exact/Regex -> Intent -> RAG shortlist + LLM Agent. Stop at
    /// the first tier yielding a validated call list.
    async fn cascade(
        &self,
        request: &TurnRequest,
        session: &crate::session::Session,
    ) -> Option<(Vec<ToolCall>, ResolutionSource)> {
        if let Some(calls) = self.regex_router.route(&request.query) {
            return Some((calls, ResolutionSource::RegexTemplate));
        }

        if let Some(call) = self.intent_router.route(&request.query).await {
            if validate_calls(std::slice::from_ref(&call), &self.registry).is_ok() {
                return Some((vec![call], ResolutionSource::IntentRouter));
            }
        }

        let shortlist_names = self.retriever.retrieve(&request.query, 8).await;
        let shortlist: Vec<_> = shortlist_names
            .iter()
            .filter_map(|name| self.registry.get_by_name(name))
            .collect();
        let candidates = if shortlist.is_empty() {
            self.registry.get_all()
        } else {
            shortlist
        };

        let history: Vec<String> = session
            .messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect();

        let result = self
            .llm_agent
            .resolve(&self.registry, &history, &candidates, &request.query)
            .await;

        if result.validated {
            Some((result.calls, result.source))
        } else {
            None
        }
    }
}

/// The same operation's tool name on the other k8s cluster, if `name`
/// belongs to one of them (`local_k8s_describe_pod` <-> `remote_k8s_describe_pod`).
fn sibling_k8s_tool(name: &str) -> Option<String> {
    if let Some(suffix) = name.strip_prefix("local_k8s_") {
        Some(format!("remote_k8s_{suffix}"))
    } else if let Some(suffix) = name.strip_prefix("remote_k8s_") {
        Some(format!("local_k8s_{suffix}"))
    } else {
        None
    }
}

fn route_target_from_str(s: &str) -> Option<RouteTarget> {
    match s {
        "docker" => Some(RouteTarget::Docker),
        "k8s_local" | "local_k8s" => Some(RouteTarget::LocalK8s),
        "k8s_remote" | "remote_k8s" => Some(RouteTarget::RemoteK8s),
        "chat" => Some(RouteTarget::Chat),
        _ => None,
    }
}

/// Scope key fed to the Semantic Cache's `backend_scope` isolation: `None`
/// when the smart router selected more than one (or zero) concrete
/// backend — only a single unambiguous backend narrows the cache lookup.
fn backend_scope_for(targets: &HashSet<RouteTarget>) -> Option<String> {
    let concrete: Vec<&RouteTarget> = targets
        .iter()
        .filter(|t| **t != RouteTarget::Chat)
        .collect();
    if concrete.len() == 1 {
        match concrete[0] {
            RouteTarget::Docker => Some("docker".to_string()),
            RouteTarget::LocalK8s => Some("k8s_local".to_string()),
            RouteTarget::RemoteK8s => Some("k8s_remote".to_string()),
            RouteTarget::Chat => None,
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::config::Config;
    use crate::llm::client::test_support::FakeLlmBackend;

    // Config::from_env reads process-global env vars; serialize tests that
    // build a Config so concurrent test threads don't clobber each other's
    // DEVOPS_STATE_DIR.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn make_config(state_dir: &std::path::Path, safety_confirm: bool) -> Config {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var("DEVOPS_STATE_DIR", state_dir);
            std::env::set_var("DEVOPS_SAFETY_CONFIRM", safety_confirm.to_string());
        }
        let config = Config::from_env().unwrap();
        unsafe {
            std::env::remove_var("DEVOPS_SAFETY_CONFIRM");
        }
        config
    }

    async fn build_orchestrator(
        dir: &std::path::Path,
        llm: Arc<dyn crate::llm::client::LlmBackend>,
    ) -> Orchestrator {
        build_orchestrator_with_safety_confirm(dir, llm, true).await
    }

    async fn build_orchestrator_with_safety_confirm(
        dir: &std::path::Path,
        llm: Arc<dyn crate::llm::client::LlmBackend>,
        safety_confirm: bool,
    ) -> Orchestrator {
        let config = make_config(dir, safety_confirm);
        let registry = ToolRegistry::new();
        catalog::register_all(&registry);

        let backend_client = Arc::new(BackendClient::new(&config).unwrap());
        let pulse = PulseMonitor::new(0);
        let cache = SemanticCache::load(&config.semantic_cache_path(), llm.clone()).await;
        let regex_router = Arc::new(RegexRouter::new(vec![], &registry.get_all()));
        let intent_router = Arc::new(IntentRouter::with_examples(vec![], llm.clone()));
        let retriever = Retriever::load_or_create(&config.tool_index_path(), llm.clone()).await;
        retriever.sync_with_registry(&registry).await;
        let llm_agent = Arc::new(LlmAgent::new(llm.clone(), 1));
        let sessions = SessionStore::new(config.session_log_path());
        let tracker = Arc::new(CallTracker::new());
        let safety_confirm = config.safety_confirm;

        Orchestrator::new(
            registry,
            backend_client,
            pulse,
            cache,
            regex_router,
            intent_router,
            retriever,
            llm_agent,
            llm,
            sessions,
            tracker,
            safety_confirm,
        )
    }

    #[test]
    fn test_smart_route_docker_keyword() {
        let targets = HashSet::from([RouteTarget::Docker]);
        assert_eq!(backend_scope_for(&targets), Some("docker".to_string()));
    }

    #[test]
    fn test_smart_route_ambiguous_k8s_scope_is_none() {
        let targets = HashSet::from([RouteTarget::LocalK8s, RouteTarget::RemoteK8s]);
        assert_eq!(backend_scope_for(&targets), None);
    }

    #[tokio::test]
    async fn test_dangerous_regex_resolved_call_pauses_for_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        // No manual template covers free-form phrasing like this, so the
        // call is resolved through the LLM fallback tier instead — what
        // matters here is that a dangerous resolved call pauses regardless
        // of which tier produced it.
        let llm: Arc<dyn crate::llm::client::LlmBackend> = Arc::new(
            FakeLlmBackend::new().with_completion(
                r#"[{"name": "docker_stop_container", "arguments": {"container_id": "123abc456"}}]"#,
            ),
        );
        let orchestrator = build_orchestrator(dir.path(), llm).await;

        let request = TurnRequest {
            session_id: Uuid::nil(),
            query: "stop container 123abc456".to_string(),
            approved_tool: None,
            forced_backends: Some(vec!["docker".to_string()]),
        };
        let response = orchestrator.handle_query(request, 0).await;
        assert!(response.confirmation_request.is_some());
        assert_eq!(
            response.confirmation_request.unwrap().tool,
            "docker_stop_container"
        );
    }

    #[tokio::test]
    async fn test_approved_dangerous_call_executes() {
        let dir = tempfile::tempdir().unwrap();
        let llm: Arc<dyn crate::llm::client::LlmBackend> = Arc::new(
            FakeLlmBackend::new().with_completion(
                r#"[{"name": "docker_stop_container", "arguments": {"container_id": "123abc456"}}]"#,
            ),
        );
        let orchestrator = build_orchestrator(dir.path(), llm).await;

        let request = TurnRequest {
            session_id: Uuid::nil(),
            query: "stop container 123abc456".to_string(),
            approved_tool: Some("docker_stop_container".to_string()),
            forced_backends: Some(vec!["docker".to_string()]),
        };
        let response = orchestrator.handle_query(request, 0).await;
        assert!(response.confirmation_request.is_none());
    }

    #[tokio::test]
    async fn test_safety_confirm_disabled_skips_confirmation_gate() {
        let dir = tempfile::tempdir().unwrap();
        let llm: Arc<dyn crate::llm::client::LlmBackend> = Arc::new(
            FakeLlmBackend::new().with_completion(
                r#"[{"name": "docker_stop_container", "arguments": {"container_id": "123abc456"}}]"#,
            ),
        );
        let orchestrator = build_orchestrator_with_safety_confirm(dir.path(), llm, false).await;

        let request = TurnRequest {
            session_id: Uuid::nil(),
            query: "stop container 123abc456".to_string(),
            approved_tool: None,
            forced_backends: Some(vec!["docker".to_string()]),
        };
        let response = orchestrator.handle_query(request, 0).await;
        assert!(response.confirmation_request.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_query_returns_thinking_emoji() {
        let dir = tempfile::tempdir().unwrap();
        let llm: Arc<dyn crate::llm::client::LlmBackend> = Arc::new(FakeLlmBackend::new());
        let orchestrator = build_orchestrator(dir.path(), llm).await;
        let request = TurnRequest {
            session_id: Uuid::nil(),
            query: "zzzzz completely unresolvable gibberish query".to_string(),
            approved_tool: None,
            forced_backends: None,
        };
        let response = orchestrator.handle_query(request, 0).await;
        assert!(response.output.starts_with("🤔"));
    }
}
