// ABOUTME: Typed agent event stream consumed by the status aggregator
// ABOUTME: Tagged union over the step-generation engine's heterogeneous events

use crate::types::TodoStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One todo item as delivered in a planning update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoUpdate {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// An event from the step-generation engine's ordered stream.
///
/// Events may carry a `namespace` identifying which sub-agent emitted them;
/// it is preserved for downstream routing but otherwise uninterpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// A tool invocation began
    ToolStart {
        id: String,
        name: String,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },
    /// A tool invocation finished with output
    ToolEnd {
        id: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },
    /// One streamed token of model text output
    ModelOutputToken { text: String },
    /// A planning-state update carrying the current todo list
    PlanningUpdate { items: Vec<TodoUpdate> },
}

impl AgentEvent {
    /// Tool name and args when this event is a tool invocation.
    pub fn as_tool_start(&self) -> Option<(&str, &Value)> {
        match self {
            AgentEvent::ToolStart { name, args, .. } => Some((name.as_str(), args)),
            _ => None,
        }
    }
}
