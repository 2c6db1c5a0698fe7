//! Telemetry event types recorded on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Task,
    Stage,
    Agent,
    Tool,
    Routing,
    Memory,
    Error,
    Telemetry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub task_id: Option<String>,
    pub stage_id: Option<String>,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Map<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType, payload: serde_json::Map<String, Value>) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            task_id: None,
            stage_id: None,
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_stage(mut self, stage_id: impl Into<String>) -> Self {
        self.stage_id = Some(stage_id.into());
        self
    }
}
