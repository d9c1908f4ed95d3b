// ABOUTME: Status projection type definitions
// ABOUTME: Transcript entries, tool calls, todos, phase, and the transmittable snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle phase of one execution. Transitions are monotonic:
/// Pending → InProgress → {Completed | Failed}, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionPhase {
    /// Rank used to enforce monotonic transitions.
    pub(crate) fn rank(self) -> u8 {
        match self {
            ExecutionPhase::Pending => 0,
            ExecutionPhase::InProgress => 1,
            ExecutionPhase::Completed | ExecutionPhase::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Completed | ExecutionPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Completed,
    Error,
}

/// Best-effort semantic grouping of a tool, inferred from its name.
/// Used only for downstream presentation, never for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileOps,
    Shell,
    Search,
    Network,
    Planning,
    Other,
}

/// One tool invocation tracked across its start and end events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Presentation name; for shell-style tools this is derived from the
    /// command text rather than the generic tool name
    pub display_name: String,
    pub args: Value,
    pub result: Option<String>,
    pub status: ToolCallStatus,
    pub category: ToolCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Ordered, append-only transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// Streamed model text; content grows in place while the entry is open
    AiText { content: String },
    /// Reference to a tool call tracked in the snapshot's tool call list
    Tool { tool_call_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub updated_at: DateTime<Utc>,
}

/// The full current projection: transcript, tool calls, todos, and phase.
/// A pure read view, safe to serialize and transmit at any point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub execution_id: String,
    pub phase: ExecutionPhase,
    pub transcript: Vec<TranscriptEntry>,
    pub tool_calls: Vec<ToolCall>,
    pub todos: HashMap<String, TodoItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lightweight liveness counters sent with heartbeats, cheaper than a
/// full snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub events_processed: u64,
    pub transcript_entries: usize,
    pub tool_calls: usize,
    pub phase: ExecutionPhase,
}
