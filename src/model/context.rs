//! Context memory types shared by the memory tiers and the context assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Task,
    Project,
    Global,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Task => "task",
            MemoryTier::Project => "project",
            MemoryTier::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPolicy {
    Recency,
    Semantic,
    Hybrid,
}

/// One named source feeding a context profile: a tier plus an optional tag filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSource {
    pub tier: MemoryTier,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A named retrieval specification: tiers, tag filters, policy, token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextProfile {
    pub id: String,
    pub max_tokens: u32,
    pub retrieval_policy: RetrievalPolicy,
    pub sources: Vec<ContextSource>,
}

impl ContextProfile {
    /// The built-in profile synthesized for the `"global"` context selector.
    pub fn builtin_global() -> Self {
        Self {
            id: "global_default".to_string(),
            max_tokens: 8000,
            retrieval_policy: RetrievalPolicy::Recency,
            sources: vec![
                ContextSource {
                    tier: MemoryTier::Task,
                    tags: vec![],
                },
                ContextSource {
                    tier: MemoryTier::Project,
                    tags: vec![],
                },
                ContextSource {
                    tier: MemoryTier::Global,
                    tags: vec![],
                },
            ],
        }
    }
}

/// A single stored memory item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub kind: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub importance: f32,
    pub token_cost: u32,
    pub payload: Value,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Set when the item was surfaced by the retrieval subsystem instead of
    /// a direct tier query.
    #[serde(default)]
    pub retrieval_score: Option<f32>,
}

/// The read-only assembled context handed to a node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPackage {
    pub id: String,
    pub items: Vec<ContextItem>,
    pub compression_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_global_profile_matches_spec() {
        let profile = ContextProfile::builtin_global();
        assert_eq!(profile.max_tokens, 8000);
        assert!(matches!(profile.retrieval_policy, RetrievalPolicy::Recency));
        assert_eq!(profile.sources.len(), 3);
    }
}
