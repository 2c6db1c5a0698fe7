//! Structured error taxonomy shared by every runtime subsystem.
//!
//! Every error carries a category, the subsystem that raised it, a
//! severity, a stable id, a human message, and optional stage/task context.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Broad classification of what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Routing,
    Tool,
    Agent,
    Json,
    Security,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Routing => "routing",
            ErrorCategory::Tool => "tool",
            ErrorCategory::Agent => "agent",
            ErrorCategory::Json => "json",
            ErrorCategory::Security => "security",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subsystem that raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSource {
    ConfigLoader,
    Runtime,
    AgentRuntime,
    ToolRuntime,
    JsonEngine,
    Memory,
    Router,
    TaskManager,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::ConfigLoader => "config-loader",
            ErrorSource::Runtime => "runtime",
            ErrorSource::AgentRuntime => "agent-runtime",
            ErrorSource::ToolRuntime => "tool-runtime",
            ErrorSource::JsonEngine => "json-engine",
            ErrorSource::Memory => "memory",
            ErrorSource::Router => "router",
            ErrorSource::TaskManager => "task-manager",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// The single structured error type that crosses subsystem boundaries.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("[{category}] {source:?}: {message}")]
pub struct EngineError {
    pub category: ErrorCategory,
    pub source: ErrorSource,
    pub severity: Severity,
    pub id: String,
    pub message: String,
    pub stage_id: Option<String>,
    pub task_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn new(
        category: ErrorCategory,
        source: ErrorSource,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            source,
            severity: Severity::Error,
            id: id.into(),
            message: message.into(),
            stage_id: None,
            task_id: None,
            details: None,
        }
    }

    pub fn with_stage(mut self, stage_id: impl Into<String>) -> Self {
        self.stage_id = Some(stage_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, ErrorSource::ConfigLoader, id, message)
    }

    pub fn routing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Routing, ErrorSource::Router, id, message)
    }

    pub fn tool(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Tool, ErrorSource::ToolRuntime, id, message)
    }

    pub fn agent(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Agent, ErrorSource::AgentRuntime, id, message)
    }

    pub fn json(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Json, ErrorSource::JsonEngine, id, message)
    }

    pub fn security(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Security, ErrorSource::ToolRuntime, id, message)
    }

    pub fn memory(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, ErrorSource::Memory, id, message)
    }

    pub fn task_manager(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, ErrorSource::TaskManager, id, message)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::json("json_parse_failure", e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::new(
            ErrorCategory::Unknown,
            ErrorSource::TaskManager,
            "io_error",
            e.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_category_roundtrips_through_display() {
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
        assert_eq!(ErrorCategory::Security.to_string(), "security");
    }

    #[test]
    fn builder_chains_optional_fields() {
        let err = EngineError::routing("no_match", "no outbound edge matched")
            .with_stage("decision-1")
            .with_task("task-abc-1");
        assert_eq!(err.stage_id.as_deref(), Some("decision-1"));
        assert_eq!(err.task_id.as_deref(), Some("task-abc-1"));
        assert_eq!(err.category, ErrorCategory::Routing);
    }
}
