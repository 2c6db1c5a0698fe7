//! The `MemoryBackend` trait: the narrow interface every memory tier store
//! delegates to, generalizing `CheckpointManager::new_in_memory`'s
//! mutex-guarded `Vec<Checkpoint>` to a pluggable storage contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::ContextItem;

/// A single filter term: `field <op> value`, matched against a ContextItem's
/// `metadata`/`tags`/top-level fields.
#[derive(Debug, Clone)]
pub enum FilterOp {
    Eq(serde_json::Value),
    Ne(serde_json::Value),
    Gt(serde_json::Value),
    Gte(serde_json::Value),
    Lt(serde_json::Value),
    Lte(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

/// Sort key for `query`: a field name plus direction. A leading `-` on the
/// field name (handled by the caller before constructing this) means
/// descending; `descending` defaults to true.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    /// Parse the `order_by` string convention: a leading `-` means descending.
    pub fn parse(spec: &str) -> Self {
        if let Some(field) = spec.strip_prefix('-') {
            OrderBy {
                field: field.to_string(),
                descending: true,
            }
        } else {
            OrderBy {
                field: spec.to_string(),
                descending: false,
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
    pub order_by: Option<OrderBy>,
}

/// Storage contract for a single memory tier. Implementations are free to be
/// ephemeral (in-memory), an append-log file, or an embedded relational
/// store; the three tiers (task/project/global) are thin wrappers that pick
/// a backend instance and forward to it.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn add(&self, item: ContextItem) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ContextItem>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn query(&self, query: &Query) -> Result<Vec<ContextItem>>;
    async fn list_all(&self) -> Result<Vec<ContextItem>>;
    async fn clear(&self) -> Result<()>;
    async fn count(&self) -> Result<usize>;
    /// Evict oldest-by-timestamp items until at most `max_items` remain.
    async fn enforce_retention(&self, max_items: usize) -> Result<usize>;
}

/// Evaluate a single filter term against an item's field. Shared helper so
/// every backend interprets filters identically.
pub fn item_field(item: &ContextItem, field: &str) -> Option<serde_json::Value> {
    match field {
        "id" => Some(serde_json::Value::String(item.id.clone())),
        "kind" => Some(serde_json::Value::String(item.kind.clone())),
        "source" => Some(serde_json::Value::String(item.source.clone())),
        "timestamp" => Some(serde_json::Value::String(item.timestamp.to_rfc3339())),
        "importance" => serde_json::Number::from_f64(item.importance as f64).map(serde_json::Value::Number),
        "token_cost" => Some(serde_json::Value::Number(item.token_cost.into())),
        "tags" => Some(serde_json::Value::Array(
            item.tags.iter().cloned().map(serde_json::Value::String).collect(),
        )),
        other => item.metadata.get(other).cloned(),
    }
}

fn cmp_values(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub fn matches_filter(item: &ContextItem, filter: &Filter) -> bool {
    let Some(actual) = item_field(item, &filter.field) else {
        return false;
    };

    // List-valued fields match on any overlap.
    if let serde_json::Value::Array(values) = &actual {
        let target = match &filter.op {
            FilterOp::Eq(v) | FilterOp::Ne(v) => v,
            _ => return false,
        };
        let overlaps = values.iter().any(|v| v == target);
        return match filter.op {
            FilterOp::Eq(_) => overlaps,
            FilterOp::Ne(_) => !overlaps,
            _ => false,
        };
    }

    match &filter.op {
        FilterOp::Eq(v) => &actual == v,
        FilterOp::Ne(v) => &actual != v,
        FilterOp::Gt(v) => cmp_values(&actual, v) == Some(std::cmp::Ordering::Greater),
        FilterOp::Gte(v) => matches!(
            cmp_values(&actual, v),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOp::Lt(v) => cmp_values(&actual, v) == Some(std::cmp::Ordering::Less),
        FilterOp::Lte(v) => matches!(
            cmp_values(&actual, v),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
    }
}

pub fn apply_query(mut items: Vec<ContextItem>, query: &Query) -> Vec<ContextItem> {
    items.retain(|item| query.filters.iter().all(|f| matches_filter(item, f)));

    if let Some(order) = &query.order_by {
        items.sort_by(|a, b| {
            let av = item_field(a, &order.field);
            let bv = item_field(b, &order.field);
            let ord = match (av, bv) {
                (Some(a), Some(b)) => cmp_values(&a, &b).unwrap_or(std::cmp::Ordering::Equal),
                _ => std::cmp::Ordering::Equal,
            };
            if order.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    } else {
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    if let Some(limit) = query.limit {
        items.truncate(limit);
    }
    items
}
