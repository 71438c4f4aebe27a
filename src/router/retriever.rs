//! Tool retriever / RAG tier (spec §4.7). Owns a flat inner-product vector
//! index over unit-normalized `(name + ": " + description)` embeddings; for
//! this crate's tool counts (order of a few hundred), a brute-force scan
//! beats an approximate index (no HNSW build cost, no recall tuning).
//! Grounded on `rag/faiss_index.py` (metadata shape: `tools` map +
//! `idx_to_tool` reverse map, temp+rename persistence under a lock file)
//! fused with `rag/tool_retriever.py`'s JSON linear-scan fallback as a
//! first-class path.
//!
//! Open question resolution (spec §9): the source rebuilds-without on
//! remove and *loses* embeddings, logging a warning that a manual
//! re-index is required. This implementation instead keeps each tool's raw
//! embedding adjacent to its metadata entry, so remove is an in-place
//! vector truncation with no data loss and no warning needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::llm::client::LlmBackend;
use crate::registry::{RegistryEvent, ToolRegistry};
use crate::vecmath::{dot, l2_normalize};

/// One entry in the flat index: unit-normalized vector plus enough
/// metadata to answer retrieval queries without a registry round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    tool_name: String,
    description: String,
    vector: Vec<f32>,
}

/// Persisted shape: `tools` keyed by name (bijection with index positions
/// via insertion order) plus the reverse `idx_to_tool` map, matching
/// `faiss_index.py`'s metadata file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexMetadata {
    entries: Vec<IndexEntry>,
}

pub struct Retriever {
    metadata: RwLock<IndexMetadata>,
    llm: Arc<dyn LlmBackend>,
    index_path: PathBuf,
    lock_path: PathBuf,
    query_cache: Mutex<HashMap<String, Vec<f32>>>,
}

/// Bound on the query-embedding cache (spec §4.7: 256 entries, cleared on
/// overflow rather than evicted piecemeal — a retrieval-tier cache churns
/// fast enough that a full clear is simpler and just as effective as LRU).
const QUERY_CACHE_LIMIT: usize = 256;

impl Retriever {
    pub async fn load_or_create(
        index_path: &Path,
        llm: Arc<dyn LlmBackend>,
    ) -> Arc<Self> {
        let metadata = tokio::fs::read_to_string(index_path)
            .await
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let lock_path = index_path.with_extension("lock");
        Arc::new(Self {
            metadata: RwLock::new(metadata),
            llm,
            index_path: index_path.to_path_buf(),
            lock_path,
            query_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Diff the registry's current tool set against the persisted index:
    /// embed and append anything new, drop anything the registry no longer
    /// has. Idempotent — running it twice with no registry change is a
    /// no-op that doesn't touch the on-disk file.
    pub async fn sync_with_registry(&self, registry: &ToolRegistry) {
        let current: Vec<_> = registry.get_all();
        let current_names: std::collections::HashSet<&str> =
            current.iter().map(|t| t.name.as_str()).collect();

        let mut metadata = self.metadata.write().await;
        let existing_names: std::collections::HashSet<String> =
            metadata.entries.iter().map(|e| e.tool_name.clone()).collect();

        let mut changed = false;

        metadata.entries.retain(|e| {
            let keep = current_names.contains(e.tool_name.as_str());
            changed |= !keep;
            keep
        });

        for tool in &current {
            if existing_names.contains(&tool.name) {
                continue;
            }
            let text = format!("{}: {}", tool.name, tool.description);
            if let Ok(mut vector) = self.llm.embed(&text).await {
                l2_normalize(&mut vector);
                metadata.entries.push(IndexEntry {
                    tool_name: tool.name.clone(),
                    description: tool.description.clone(),
                    vector,
                });
                changed = true;
            }
        }

        if changed {
            self.persist(&metadata).await;
        }
    }

    /// Subscribe to registry add/remove events and keep the index current
    /// without polling — the append-on-add / rebuild(-free)-on-remove
    /// discipline spec §5 requires of the single writer.
    pub fn spawn_sync_task(self: &Arc<Self>, mut events: tokio::sync::broadcast::Receiver<RegistryEvent>) {
        let retriever = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::Added(tools)) => {
                        let mut metadata = retriever.metadata.write().await;
                        let mut changed = false;
                        for tool in &tools {
                            if metadata.entries.iter().any(|e| e.tool_name == tool.name) {
                                continue;
                            }
                            let text = format!("{}: {}", tool.name, tool.description);
                            if let Ok(mut vector) = retriever.llm.embed(&text).await {
                                l2_normalize(&mut vector);
                                metadata.entries.push(IndexEntry {
                                    tool_name: tool.name.clone(),
                                    description: tool.description.clone(),
                                    vector,
                                });
                                changed = true;
                            }
                        }
                        if changed {
                            retriever.persist(&metadata).await;
                        }
                    }
                    Ok(RegistryEvent::Removed(names)) => {
                        let mut metadata = retriever.metadata.write().await;
                        let before = metadata.entries.len();
                        metadata.entries.retain(|e| !names.contains(&e.tool_name));
                        if metadata.entries.len() != before {
                            retriever.persist(&metadata).await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Atomic persist: write to `*.tmp` then rename, guarded by a sibling
    /// advisory lock file so a concurrent process's write can't interleave.
    async fn persist(&self, metadata: &IndexMetadata) {
        let _lock = AdvisoryLock::acquire(&self.lock_path).await;
        let Ok(json) = serde_json::to_string_pretty(metadata) else {
            return;
        };
        let tmp = self.index_path.with_extension("tmp");
        if tokio::fs::write(&tmp, &json).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, &self.index_path).await;
        }
    }

    /// Retrieve the top-`k` candidate tool names for `query`, with the
    /// query embedding cached per exact text (bounded to 256 entries,
    /// cleared wholesale on overflow).
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        let query_vec = {
            let mut cache = self.query_cache.lock().await;
            if let Some(v) = cache.get(query) {
                v.clone()
            } else {
                let Ok(mut v) = self.llm.embed(query).await else {
                    return Vec::new();
                };
                l2_normalize(&mut v);
                if cache.len() >= QUERY_CACHE_LIMIT {
                    cache.clear();
                }
                cache.insert(query.to_string(), v.clone());
                v
            }
        };

        let metadata = self.metadata.read().await;
        let mut scored: Vec<(&str, f32)> = metadata
            .entries
            .iter()
            .map(|e| (e.tool_name.as_str(), dot(&query_vec, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored.into_iter().map(|(name, _)| name.to_string()).collect()
    }

    pub async fn len(&self) -> usize {
        self.metadata.read().await.entries.len()
    }

    /// Consistency invariant check (spec §8): index size equals the number
    /// of distinct tool names stored, and no entry is duplicated.
    pub async fn is_consistent(&self) -> bool {
        let metadata = self.metadata.read().await;
        let unique: std::collections::HashSet<&str> =
            metadata.entries.iter().map(|e| e.tool_name.as_str()).collect();
        unique.len() == metadata.entries.len()
    }
}

/// Hand-rolled sibling-file advisory lock (teacher's own pattern for
/// guarding the tool-cache write, generalized here with a real exclusive
/// create-lock instead of bare rename-based atomicity, since two processes
/// persisting the retriever index concurrently is the scenario spec §6
/// calls out explicitly).
struct AdvisoryLock {
    path: PathBuf,
}

impl AdvisoryLock {
    async fn acquire(path: &Path) -> Self {
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(_) => return Self { path: path.to_path_buf() },
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        }
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::test_support::FakeLlmBackend;
    use crate::registry::ToolEntry;
    use serde_json::json;

    fn tool(name: &str, desc: &str) -> ToolEntry {
        ToolEntry {
            name: name.to_string(),
            original_name: name.to_string(),
            description: desc.to_string(),
            backend_name: "docker".to_string(),
            input_schema: json!({"type": "object"}),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_sync_adds_new_tools() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.json");
        let llm = Arc::new(FakeLlmBackend::new());
        let retriever = Retriever::load_or_create(&index_path, llm).await;

        let registry = ToolRegistry::new();
        registry.register_backend_tools("docker", vec![tool("docker_list_containers", "List containers")]);
        retriever.sync_with_registry(&registry).await;

        assert_eq!(retriever.len().await, 1);
        assert!(retriever.is_consistent().await);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.json");
        let llm = Arc::new(FakeLlmBackend::new());
        let retriever = Retriever::load_or_create(&index_path, llm).await;

        let registry = ToolRegistry::new();
        registry.register_backend_tools("docker", vec![tool("docker_list_containers", "List containers")]);
        retriever.sync_with_registry(&registry).await;
        let first_snapshot = tokio::fs::read_to_string(&index_path).await.unwrap();

        retriever.sync_with_registry(&registry).await;
        let second_snapshot = tokio::fs::read_to_string(&index_path).await.unwrap();
        assert_eq!(first_snapshot, second_snapshot);
    }

    #[tokio::test]
    async fn test_sync_removes_stale_tools() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.json");
        let llm = Arc::new(FakeLlmBackend::new());
        let retriever = Retriever::load_or_create(&index_path, llm).await;

        let registry = ToolRegistry::new();
        registry.register_backend_tools("docker", vec![tool("docker_list_containers", "List containers")]);
        retriever.sync_with_registry(&registry).await;
        assert_eq!(retriever.len().await, 1);

        registry.remove_backend_tools("docker");
        retriever.sync_with_registry(&registry).await;
        assert_eq!(retriever.len().await, 0);
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.json");
        let llm = Arc::new(
            FakeLlmBackend::new()
                .with_embedding("docker_list_containers: List containers", vec![1.0, 0.0])
                .with_embedding("docker_stop_container: Stop a container", vec![0.0, 1.0])
                .with_embedding("list my containers", vec![1.0, 0.0]),
        );
        let retriever = Retriever::load_or_create(&index_path, llm).await;
        let registry = ToolRegistry::new();
        registry.register_backend_tools(
            "docker",
            vec![
                tool("docker_list_containers", "List containers"),
                tool("docker_stop_container", "Stop a container"),
            ],
        );
        retriever.sync_with_registry(&registry).await;

        let top = retriever.retrieve("list my containers", 1).await;
        assert_eq!(top, vec!["docker_list_containers".to_string()]);
    }
}
