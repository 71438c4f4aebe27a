//! Optional admin/introspection API (axum HTTP server), feature-gated
//! behind the `admin` cargo feature. Grounded on `gatemini::admin::api`'s
//! `AdminState`/`start` shape, trimmed to the two endpoints this
//! dispatcher's state actually supports: a health summary driven by the
//! Pulse Monitor, and a tool listing from the Registry. The teacher's
//! `/api/discovery` endpoint is folded into `/tools` since this crate has
//! no separate discovery-vs-registered-tools distinction. `/tools?q=` fuses
//! the Registry's BM25 `search` with the Retriever's semantic ranking via
//! reciprocal rank fusion, mirroring `gatemini::registry::search_hybrid`.

#[cfg(feature = "admin")]
pub mod api {
    use axum::{Json, Router, extract::{Query, State}, routing::get};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;
    use tracing::info;

    use crate::backend::BackendId;
    use crate::backend::pulse::PulseMonitor;
    use crate::registry::{self, ToolRegistry};
    use crate::router::retriever::Retriever;

    #[derive(Clone)]
    pub struct AdminState {
        pub registry: Arc<ToolRegistry>,
        pub pulse: Arc<PulseMonitor>,
        pub retriever: Arc<Retriever>,
    }

    pub async fn start(state: AdminState, listen: &str, shutdown: Arc<Notify>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/healthz", get(healthz))
            .route("/tools", get(tools))
            .with_state(state);

        let listener = TcpListener::bind(listen).await?;
        info!(listen = %listen, "admin API started");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await?;
        info!("admin API stopped");
        Ok(())
    }

    #[derive(Serialize)]
    struct BackendHealth {
        backend: &'static str,
        status: crate::backend::pulse::PulseStatus,
    }

    #[derive(Serialize)]
    struct HealthResponse {
        status: &'static str,
        total_tools: usize,
        total_backends: usize,
        backends: Vec<BackendHealth>,
    }

    async fn healthz(State(state): State<AdminState>) -> Json<HealthResponse> {
        let backends: Vec<BackendHealth> = BackendId::ALL
            .into_iter()
            .map(|id| BackendHealth {
                backend: id.as_str(),
                status: state.pulse.status(id),
            })
            .collect();
        let all_healthy = backends
            .iter()
            .all(|b| b.status == crate::backend::pulse::PulseStatus::Healthy);
        Json(HealthResponse {
            status: if all_healthy { "healthy" } else { "degraded" },
            total_tools: state.registry.tool_count(),
            total_backends: state.registry.backend_count(),
            backends,
        })
    }

    #[derive(Serialize)]
    struct ToolEntry {
        name: String,
        description: String,
        backend: String,
        input_schema: Value,
    }

    impl From<crate::registry::ToolEntry> for ToolEntry {
        fn from(t: crate::registry::ToolEntry) -> Self {
            ToolEntry {
                name: t.name,
                description: t.description,
                backend: t.backend_name,
                input_schema: t.input_schema,
            }
        }
    }

    #[derive(Deserialize)]
    struct ToolsQuery {
        q: Option<String>,
        limit: Option<u32>,
    }

    /// With no `q`, a flat dump of every registered tool. With `q`, a BM25
    /// (`ToolRegistry::search`) + semantic (`Retriever::retrieve`) hybrid
    /// ranking, fused via `reciprocal_rank_fusion`.
    async fn tools(
        State(state): State<AdminState>,
        Query(params): Query<ToolsQuery>,
    ) -> Json<Vec<ToolEntry>> {
        let Some(q) = params.q.filter(|q| !q.trim().is_empty()) else {
            let entries: Vec<ToolEntry> =
                state.registry.get_all().into_iter().map(ToolEntry::from).collect();
            return Json(entries);
        };

        let limit = params.limit.unwrap_or(10);
        let fetch_limit = limit.max(30);

        let bm25_names: Vec<String> = state
            .registry
            .search(&q, fetch_limit)
            .into_iter()
            .map(|t| t.name)
            .collect();
        let semantic_names = state.retriever.retrieve(&q, fetch_limit as usize).await;

        let fused = registry::reciprocal_rank_fusion(&[bm25_names, semantic_names], limit as usize);
        let entries: Vec<ToolEntry> = fused
            .into_iter()
            .filter_map(|name| state.registry.get_by_name(&name))
            .map(ToolEntry::from)
            .collect();
        Json(entries)
    }
}
