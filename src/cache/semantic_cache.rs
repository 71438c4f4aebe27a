//! Semantic cache (spec §4.4): an embedding-keyed near-duplicate cache of
//! `query -> (tool_calls, output)`. Grounded almost directly on
//! `semantic_cache.py` — same 0.98 threshold, same 500-entry FIFO cap, same
//! never-cache-failure rule and dedup-on-exact-query-text check — ported
//! into this crate's async/atomic-persistence idiom (temp-file + rename,
//! saved on an executor so the hot path never blocks on I/O).
//!
//! Open question resolution (spec §9): `backend_scope` is always present
//! (`Option<String>`) and always read at both lookup and insert; `None`
//! never cross-matches a `Some` scope and vice versa, applied uniformly
//! here rather than the source's inconsistent `active_mcp` handling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::llm::client::LlmBackend;
use crate::types::ToolCall;
use crate::vecmath::{cosine_similarity, l2_normalize};

/// Similarity a cache lookup must clear to count as a hit (spec §4.4, §8).
pub const CACHE_THRESHOLD: f32 = 0.98;
/// FIFO cap (spec §3).
pub const CACHE_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    query_text: String,
    query_embedding: Vec<f32>,
    output_text: String,
    tool_calls: Vec<ToolCall>,
    backend_scope: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub output_text: String,
    pub tool_calls: Vec<ToolCall>,
}

pub struct SemanticCache {
    entries: RwLock<Vec<CacheEntry>>,
    llm: Arc<dyn LlmBackend>,
    path: PathBuf,
}

impl SemanticCache {
    pub async fn load(path: &Path, llm: Arc<dyn LlmBackend>) -> Arc<Self> {
        let entries = tokio::fs::read_to_string(path)
            .await
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Arc::new(Self {
            entries: RwLock::new(entries),
            llm,
            path: path.to_path_buf(),
        })
    }

    /// Look up a near-duplicate of `query`, restricted to entries whose
    /// `backend_scope` exactly matches (`None` only matches `None`).
    pub async fn lookup(&self, query: &str, backend_scope: Option<&str>) -> Option<CacheHit> {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return None;
        }

        let mut query_emb = self.llm.embed(query).await.ok()?;
        l2_normalize(&mut query_emb);

        let mut best: Option<(&CacheEntry, f32)> = None;
        for entry in entries.iter() {
            if entry.backend_scope.as_deref() != backend_scope {
                continue;
            }
            let score = cosine_similarity(&query_emb, &entry.query_embedding);
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((entry, score));
            }
        }

        let (entry, score) = best?;
        if score >= CACHE_THRESHOLD {
            Some(CacheHit {
                output_text: entry.output_text.clone(),
                tool_calls: entry.tool_calls.clone(),
            })
        } else {
            None
        }
    }

    /// Insert a successful, non-transient result. Never caches a failure
    /// (output containing "error"/"failed") or a pending confirmation —
    /// those are the caller's job to filter out before calling `insert`,
    /// but the checks are repeated here defensively since this is the one
    /// invariant spec §8 quantifies over every insert.
    pub async fn insert(
        &self,
        query: &str,
        output_text: &str,
        tool_calls: Vec<ToolCall>,
        backend_scope: Option<String>,
        now_ts: i64,
    ) {
        let lowered = output_text.to_lowercase();
        if lowered.contains("error") || lowered.contains("failed") {
            return;
        }

        let Ok(mut query_embedding) = self.llm.embed(query).await else {
            return;
        };
        l2_normalize(&mut query_embedding);

        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.query_text == query) {
            return;
        }

        entries.push(CacheEntry {
            query_text: query.to_string(),
            query_embedding,
            output_text: output_text.to_string(),
            tool_calls,
            backend_scope,
            timestamp: now_ts,
        });

        while entries.len() > CACHE_CAPACITY {
            entries.remove(0);
        }

        let snapshot = entries.clone();
        drop(entries);
        self.save_in_background(snapshot);
    }

    /// Deferred disk save — spawned onto the async executor so an insert's
    /// caller (the orchestrator's post-commit step) never blocks on I/O.
    fn save_in_background(&self, entries: Vec<CacheEntry>) {
        let path = self.path.clone();
        tokio::spawn(async move {
            let Ok(json) = serde_json::to_string_pretty(&entries) else {
                return;
            };
            let tmp = path.with_extension("tmp");
            if tokio::fs::write(&tmp, &json).await.is_ok() {
                let _ = tokio::fs::rename(&tmp, &path).await;
            }
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
