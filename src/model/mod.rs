//! Core data model shared by every runtime subsystem.

pub mod artifact;
pub mod context;
pub mod event;
pub mod node;
pub mod task;
pub mod tool;

pub use artifact::{Artifact, ArtifactType};
pub use context::{ContextItem, ContextPackage, ContextProfile, ContextSource, MemoryTier, RetrievalPolicy};
pub use event::{Event, EventType};
pub use node::{ContextSelector, Edge, Node, NodeKind, NodeRole};
pub use task::{Lineage, LineageState, StageExecutionRecord, Task, TaskMode, TaskSpec, TaskStatus};
pub use tool::{
    ToolCallRecord, ToolCapability, ToolDefinition, ToolKind, ToolPlan, ToolPlanStep, ToolRiskLevel,
};
