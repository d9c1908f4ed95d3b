// ABOUTME: Execution status aggregation for agent runs
// ABOUTME: Projects a heterogeneous event stream into a transmittable status record

pub mod aggregator;
pub mod events;
pub mod types;

pub use aggregator::StatusAggregator;
pub use events::{AgentEvent, TodoUpdate};
pub use types::{
    ExecutionPhase, ProgressCounters, StatusSnapshot, TodoItem, TodoStatus, ToolCall,
    ToolCallStatus, ToolCategory, TranscriptEntry,
};
