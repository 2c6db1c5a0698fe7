//! Context assembler: resolves a node's context selector into a
//! token-budgeted `ContextPackage`, following `ContextAssembler.build_context_for_profile`'s
//! tiered gather-then-trim shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::memory::{stores::MemoryTiers, Query};
use crate::model::{ContextItem, ContextPackage, ContextProfile, ContextSelector, MemoryTier, RetrievalPolicy};

/// A single chunk surfaced by the optional semantic retrieval subsystem.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Map<String, Value>,
}

/// Optional collaborator wired in when a profile's policy is `semantic` or
/// `hybrid`. Absent by default; the assembler degrades to recency-only
/// candidates when no retriever is configured.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>>;
}

pub struct ContextAssembler {
    memory: Arc<MemoryTiers>,
    profiles: HashMap<String, ContextProfile>,
    retriever: Option<Arc<dyn Retriever>>,
    head_tail_preserve: Option<usize>,
}

const CONVERSATION_PROTECTED_COUNT: usize = 3;

impl ContextAssembler {
    pub fn new(memory: Arc<MemoryTiers>, profiles: HashMap<String, ContextProfile>) -> Self {
        Self {
            memory,
            profiles,
            retriever: None,
            head_tail_preserve: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_head_tail_preserve(mut self, count: usize) -> Self {
        self.head_tail_preserve = Some(count);
        self
    }

    /// Resolve a node's context selector into an (optional) profile.
    pub fn resolve_context_profile(&self, selector: &ContextSelector) -> Result<Option<ContextProfile>> {
        if selector.is_none() {
            return Ok(None);
        }
        if selector.is_global() {
            return Ok(Some(ContextProfile::builtin_global()));
        }
        let profile_id = selector.profile_id().unwrap_or_default();
        let profile = self.profiles.get(profile_id).ok_or_else(|| {
            EngineError::validation(
                "context_profile_not_found",
                format!("context profile '{}' not found", profile_id),
            )
        })?;
        self.validate_profile(profile)?;
        Ok(Some(profile.clone()))
    }

    fn validate_profile(&self, profile: &ContextProfile) -> Result<()> {
        if profile.max_tokens == 0 {
            return Err(EngineError::validation(
                "context_profile_invalid_budget",
                format!("context profile '{}': max_tokens must be > 0", profile.id),
            ));
        }
        // `source.tier` and `retrieval_policy` are Rust enums: membership in
        // {task, project, global} / {recency, semantic, hybrid} is already
        // guaranteed by the type system, unlike the original's string checks.
        Ok(())
    }

    /// Run the 8-step assembly algorithm against a task's memory tiers.
    pub async fn build_context(
        &self,
        task_id: &str,
        project_id: &str,
        profile: &ContextProfile,
        inferred_query: Option<&str>,
    ) -> Result<ContextPackage> {
        // Step 1 + 2: query each source, apply OR tag filter, concatenate.
        let mut candidates: Vec<ContextItem> = Vec::new();
        for source in &profile.sources {
            let items = self
                .memory
                .query_tier(task_id, project_id, source.tier, &Query::default())
                .await?;
            let filtered = filter_by_tags(items, &source.tags);
            candidates.extend(filtered);
        }

        // Step 3: optional semantic/hybrid augmentation.
        if matches!(profile.retrieval_policy, RetrievalPolicy::Semantic | RetrievalPolicy::Hybrid) {
            if let (Some(retriever), Some(query)) = (&self.retriever, inferred_query) {
                if !query.is_empty() {
                    let top_k = 5;
                    let chunks = retriever.search(query, top_k).await.unwrap_or_default();
                    candidates.extend(chunks.into_iter().map(retrieved_chunk_to_item));
                }
            }
            // No retriever wired: the candidate set degrades to what the
            // tier queries above already produced. No panic, no fabricated
            // score.
        }

        let total_candidate_tokens: u64 = candidates.iter().map(|i| i.token_cost as u64).sum();

        // Step 4: sort by recency descending.
        candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        // Step 5: protected set.
        let protected = protected_set(&candidates);

        // Step 6 (+7): greedy budgeted selection with head/tail reorder.
        let mut selected = select_within_budget(&candidates, profile.max_tokens as u64, &protected, self.head_tail_preserve);

        selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let selected_tokens: u64 = selected.iter().map(|i| i.token_cost as u64).sum();
        let compression_ratio = if total_candidate_tokens == 0 {
            1.0
        } else {
            selected_tokens as f64 / total_candidate_tokens as f64
        };

        Ok(ContextPackage {
            id: format!("ctx-{}-{}", task_id, profile.id),
            items: selected,
            compression_ratio,
        })
    }
}

fn filter_by_tags(items: Vec<ContextItem>, tags: &[String]) -> Vec<ContextItem> {
    if tags.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| tags.iter().any(|t| item.tags.contains(t)))
        .collect()
}

fn item_role<'a>(item: &'a ContextItem) -> Option<&'a str> {
    item.metadata.get("role").and_then(|v| v.as_str())
}

/// System-tagged items plus the N most recent conversation turns.
fn protected_set(candidates: &[ContextItem]) -> Vec<ContextItem> {
    let mut protected: Vec<ContextItem> = candidates
        .iter()
        .filter(|i| item_role(i) == Some("system"))
        .cloned()
        .collect();

    let mut convo: Vec<&ContextItem> = candidates
        .iter()
        .filter(|i| matches!(item_role(i), Some("user") | Some("assistant")))
        .collect();
    convo.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let recent = convo
        .into_iter()
        .rev()
        .take(CONVERSATION_PROTECTED_COUNT)
        .cloned();
    protected.extend(recent);

    let mut seen = std::collections::HashSet::new();
    protected.retain(|item| seen.insert(item.id.clone()));
    protected
}

fn select_within_budget(
    candidates: &[ContextItem],
    budget: u64,
    protected: &[ContextItem],
    head_tail_preserve: Option<usize>,
) -> Vec<ContextItem> {
    let protected_ids: std::collections::HashSet<&str> = protected.iter().map(|i| i.id.as_str()).collect();

    let mut selected: Vec<ContextItem> = protected.to_vec();
    let mut tokens: u64 = selected.iter().map(|i| i.token_cost as u64).sum();

    let mut remaining: Vec<ContextItem> = candidates
        .iter()
        .filter(|i| !protected_ids.contains(i.id.as_str()))
        .cloned()
        .collect();
    remaining.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });

    // Step 7: head/tail reorder of the non-protected middle.
    if let Some(h) = head_tail_preserve {
        if h > 0 && remaining.len() > h * 2 {
            let head: Vec<ContextItem> = remaining[..h].to_vec();
            let tail: Vec<ContextItem> = remaining[remaining.len() - h..].to_vec();
            let head_tail_ids: std::collections::HashSet<&str> =
                head.iter().chain(tail.iter()).map(|i| i.id.as_str()).collect();
            let middle: Vec<ContextItem> = remaining
                .iter()
                .filter(|i| !head_tail_ids.contains(i.id.as_str()))
                .cloned()
                .collect();
            remaining = head.into_iter().chain(middle).chain(tail).collect();
        }
    }

    for item in remaining {
        let cost = item.token_cost as u64;
        if tokens + cost <= budget {
            tokens += cost;
            selected.push(item);
        }
        if tokens >= budget {
            break;
        }
    }

    selected
}

fn retrieved_chunk_to_item(chunk: RetrievedChunk) -> ContextItem {
    let mut metadata = chunk.metadata;
    metadata.insert("retrieval_score".to_string(), serde_json::json!(chunk.score));
    ContextItem {
        id: format!("rag-{}", chunk.id),
        kind: "retrieval_chunk".to_string(),
        source: "retrieval".to_string(),
        timestamp: chrono::Utc::now(),
        tags: vec!["retrieval".to_string()],
        importance: chunk.score,
        token_cost: chunk.text.split_whitespace().count() as u32,
        payload: Value::String(chunk.text),
        metadata,
        retrieval_score: Some(chunk.score),
    }
}
