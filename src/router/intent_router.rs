//! Intent router (spec §4.6): curated `{text, tool, args}` examples with a
//! disk-cached embedding per text, matched by linear cosine scan. Grounded
//! on `router.py`'s semantic-intent tier — lazy embedding computation with
//! a `dirty`-flagged cache save, kept here as an explicit method instead of
//! happening implicitly during load.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::client::LlmBackend;
use crate::vecmath::{cosine_similarity, l2_normalize};

/// Threshold above which a semantic match is trusted (spec §4.6, §8).
pub const INTENT_THRESHOLD: f32 = 0.82;

/// On-disk shape of one curated example, before its embedding is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    pub text: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone)]
pub struct IntentExample {
    pub text: String,
    pub tool: String,
    pub args: Value,
    pub embedding: Vec<f32>,
}

#[derive(Serialize, Deserialize, Default)]
struct EmbeddingCache(std::collections::HashMap<String, Vec<f32>>);

pub struct IntentRouter {
    examples: Vec<IntentExample>,
    llm: Arc<dyn LlmBackend>,
}

impl IntentRouter {
    /// Load curated intents from `intents_path` and attach embeddings,
    /// computing+persisting any missing from `cache_path` via `llm`.
    pub async fn load(
        intents_path: &Path,
        cache_path: &Path,
        llm: Arc<dyn LlmBackend>,
    ) -> Self {
        let specs: Vec<IntentSpec> = tokio::fs::read_to_string(intents_path)
            .await
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let mut cache: EmbeddingCache = tokio::fs::read_to_string(cache_path)
            .await
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let mut dirty = false;
        let mut examples = Vec::with_capacity(specs.len());
        for spec in specs {
            let embedding = if let Some(v) = cache.0.get(&spec.text) {
                v.clone()
            } else {
                match llm.embed(&spec.text).await {
                    Ok(mut v) => {
                        l2_normalize(&mut v);
                        cache.0.insert(spec.text.clone(), v.clone());
                        dirty = true;
                        v
                    }
                    Err(_) => continue,
                }
            };
            examples.push(IntentExample {
                text: spec.text,
                tool: spec.tool,
                args: spec.args,
                embedding,
            });
        }

        if dirty {
            if let Ok(json) = serde_json::to_string_pretty(&cache.0) {
                let _ = tokio::fs::write(cache_path, json).await;
            }
        }

        Self { examples, llm }
    }

    pub fn with_examples(examples: Vec<IntentExample>, llm: Arc<dyn LlmBackend>) -> Self {
        Self { examples, llm }
    }

    /// Compute the query embedding, scan linearly for the best cosine
    /// match, and return it if it clears [`INTENT_THRESHOLD`].
    pub async fn route(&self, query: &str) -> Option<crate::types::ToolCall> {
        if self.examples.is_empty() {
            return None;
        }
        let mut query_emb = self.llm.embed(query).await.ok()?;
        l2_normalize(&mut query_emb);

        let mut best: Option<(&IntentExample, f32)> = None;
        for example in &self.examples {
            let score = cosine_similarity(&query_emb, &example.embedding);
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((example, score));
            }
        }

        let (example, score) = best?;
        if score > INTENT_THRESHOLD {
            Some(crate::types::ToolCall::new(
                example.tool.clone(),
                example.args.clone(),
            ))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn example_count(&self) -> usize {
        self.examples.len()
    }
}
