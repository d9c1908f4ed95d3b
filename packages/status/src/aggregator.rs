// ABOUTME: In-memory state machine projecting agent events into a status record
// ABOUTME: Deduplicates tool starts, tolerates missing tool ends, streams tokens in place

use crate::events::{AgentEvent, TodoUpdate};
use crate::types::{
    ExecutionPhase, ProgressCounters, StatusSnapshot, TodoItem, ToolCall, ToolCallStatus,
    ToolCategory, TranscriptEntry,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tether_core::tool_fingerprint;
use tracing::{debug, warn};

/// Tools that update planning state without producing transcript entries.
const PLANNING_TOOLS: &[&str] = &["write_todos"];

/// Builds the execution status projection from an ordered event stream.
///
/// Scoped to a single session and driven by one sequential consumer, so no
/// internal synchronization is needed. `snapshot()` returns an owned copy
/// that can be serialized and transmitted without pausing ingestion.
pub struct StatusAggregator {
    execution_id: String,
    phase: ExecutionPhase,
    transcript: Vec<TranscriptEntry>,
    tool_calls: Vec<ToolCall>,
    /// Tool call id -> index into `tool_calls`, for O(1) end-event lookup
    tool_call_index: HashMap<String, usize>,
    /// Fingerprints of tool starts already seen this run
    seen_fingerprints: HashSet<String>,
    todos: HashMap<String, TodoItem>,
    error: Option<String>,
    events_processed: u64,
}

impl StatusAggregator {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            phase: ExecutionPhase::Pending,
            transcript: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_index: HashMap::new(),
            seen_fingerprints: HashSet::new(),
            todos: HashMap::new(),
            error: None,
            events_processed: 0,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Advance the phase. Backward transitions are ignored with a warning;
    /// the phase ladder is Pending → InProgress → {Completed | Failed}.
    pub fn set_phase(&mut self, phase: ExecutionPhase) {
        if phase.rank() < self.phase.rank() || (self.phase.is_terminal() && phase != self.phase) {
            warn!(
                current = ?self.phase,
                requested = ?phase,
                "Ignoring non-monotonic phase transition"
            );
            return;
        }
        self.phase = phase;
    }

    /// Record a diagnostic message for a failed run.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Process one event from the stream.
    pub fn process(&mut self, event: &AgentEvent) {
        self.events_processed += 1;
        match event {
            AgentEvent::ToolStart {
                id,
                name,
                args,
                namespace,
            } => self.handle_tool_start(id, name, args, namespace.as_deref()),
            AgentEvent::ToolEnd { id, output, .. } => self.handle_tool_end(id, output),
            AgentEvent::ModelOutputToken { text } => self.handle_token(text),
            AgentEvent::PlanningUpdate { items } => self.handle_planning_update(items),
        }
    }

    fn handle_tool_start(&mut self, id: &str, name: &str, args: &Value, namespace: Option<&str>) {
        if id.is_empty() || name.is_empty() {
            return;
        }

        // At-least-once event sources can redeliver; dedup on fingerprint.
        let fingerprint = tool_fingerprint(name, args);
        if !self.seen_fingerprints.insert(fingerprint) {
            debug!(tool = name, id, "Duplicate tool start ignored");
            return;
        }

        // Planning tools fold into the todo map instead of the transcript.
        if PLANNING_TOOLS.contains(&name) {
            if let Some(items) = args.get("todos").and_then(|v| v.as_array()) {
                let updates: Vec<TodoUpdate> = items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                self.handle_planning_update(&updates);
            }
            return;
        }

        let tool_call = ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            display_name: display_name(name, args),
            args: args.clone(),
            result: None,
            status: ToolCallStatus::Pending,
            category: infer_category(name),
            namespace: namespace.map(str::to_string),
            started_at: Utc::now(),
            completed_at: None,
        };

        self.tool_call_index
            .insert(id.to_string(), self.tool_calls.len());
        self.tool_calls.push(tool_call);
        self.transcript.push(TranscriptEntry::Tool {
            tool_call_id: id.to_string(),
        });

        debug!(tool = name, id, "Tool call added to status");
    }

    fn handle_tool_end(&mut self, id: &str, output: &str) {
        let index = match self.tool_call_index.get(id) {
            Some(index) => *index,
            None => {
                // Truncated or out-of-order stream; drop rather than error.
                warn!(id, "Tool end for unknown tool call dropped");
                return;
            }
        };

        let tool_call = &mut self.tool_calls[index];
        if tool_call.status != ToolCallStatus::Pending {
            debug!(id, "Tool end for already-completed call ignored");
            return;
        }
        tool_call.result = Some(output.to_string());
        tool_call.status = ToolCallStatus::Completed;
        tool_call.completed_at = Some(Utc::now());
    }

    fn handle_token(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        // Append to the open AI-text entry if one is current; otherwise open
        // a new entry. Avoids re-materializing the transcript per token.
        if let Some(TranscriptEntry::AiText { content }) = self.transcript.last_mut() {
            content.push_str(text);
            return;
        }
        self.transcript.push(TranscriptEntry::AiText {
            content: text.to_string(),
        });
    }

    fn handle_planning_update(&mut self, items: &[TodoUpdate]) {
        // Last-write-wins per id; items absent from the update are untouched.
        for item in items {
            if item.id.is_empty() {
                continue;
            }
            self.todos.insert(
                item.id.clone(),
                TodoItem {
                    id: item.id.clone(),
                    content: item.content.clone(),
                    status: item.status,
                    updated_at: Utc::now(),
                },
            );
        }
    }

    /// An immutable copy of the current projection.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            execution_id: self.execution_id.clone(),
            phase: self.phase,
            transcript: self.transcript.clone(),
            tool_calls: self.tool_calls.clone(),
            todos: self.todos.clone(),
            error: self.error.clone(),
        }
    }

    /// Lightweight counters for heartbeats.
    pub fn progress(&self) -> ProgressCounters {
        ProgressCounters {
            events_processed: self.events_processed,
            transcript_entries: self.transcript.len(),
            tool_calls: self.tool_calls.len(),
            phase: self.phase,
        }
    }
}

/// Derive a presentation name for a tool call. Shell-style tools show the
/// program being run instead of the generic tool name.
fn display_name(tool_name: &str, args: &Value) -> String {
    let is_shell = tool_name.starts_with("execute")
        || tool_name.eq_ignore_ascii_case("shell")
        || tool_name.eq_ignore_ascii_case("bash");
    if is_shell {
        if let Some(command) = args.get("command").and_then(|v| v.as_str()) {
            if let Some(program) = command.split_whitespace().next() {
                return program.to_string();
            }
        }
    }
    tool_name.to_string()
}

/// Pattern-match the tool name to a presentation category.
fn infer_category(tool_name: &str) -> ToolCategory {
    let name = tool_name.to_lowercase();
    if name.starts_with("execute") || name.contains("shell") || name.contains("bash") {
        ToolCategory::Shell
    } else if name.contains("todo") || name.contains("plan") {
        ToolCategory::Planning
    } else if name.contains("search") || name.contains("grep") || name.contains("glob") {
        ToolCategory::Search
    } else if name.contains("read")
        || name.contains("write")
        || name.contains("edit")
        || name.contains("file")
        || name == "ls"
    {
        ToolCategory::FileOps
    } else if name.contains("fetch") || name.contains("http") || name.contains("web") {
        ToolCategory::Network
    } else {
        ToolCategory::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TodoStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tool_start(id: &str, name: &str, args: Value) -> AgentEvent {
        AgentEvent::ToolStart {
            id: id.to_string(),
            name: name.to_string(),
            args,
            namespace: None,
        }
    }

    #[test]
    fn test_tool_start_creates_pending_call() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&tool_start("1", "search", json!({"q": "x"})));

        let snap = agg.snapshot();
        assert_eq!(snap.tool_calls.len(), 1);
        assert_eq!(snap.tool_calls[0].id, "1");
        assert_eq!(snap.tool_calls[0].status, ToolCallStatus::Pending);
        assert!(matches!(
            snap.transcript[0],
            TranscriptEntry::Tool { ref tool_call_id } if tool_call_id == "1"
        ));
    }

    #[test]
    fn test_duplicate_tool_start_is_idempotent() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&tool_start("1", "x", json!({})));
        agg.process(&tool_start("1", "x", json!({})));

        let snap = agg.snapshot();
        assert_eq!(snap.tool_calls.len(), 1);
        assert_eq!(snap.transcript.len(), 1);
    }

    #[test]
    fn test_tool_end_completes_call() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&tool_start("1", "search", json!({"q": "x"})));
        agg.process(&AgentEvent::ToolEnd {
            id: "1".to_string(),
            output: "3 results".to_string(),
            namespace: None,
        });

        let snap = agg.snapshot();
        assert_eq!(snap.tool_calls[0].status, ToolCallStatus::Completed);
        assert_eq!(snap.tool_calls[0].result.as_deref(), Some("3 results"));
        assert!(snap.tool_calls[0].completed_at.is_some());
    }

    #[test]
    fn test_unmatched_tool_end_dropped() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&AgentEvent::ToolEnd {
            id: "ghost".to_string(),
            output: "out".to_string(),
            namespace: None,
        });
        assert!(agg.snapshot().tool_calls.is_empty());
    }

    #[test]
    fn test_token_streaming_appends_to_open_entry() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&AgentEvent::ModelOutputToken {
            text: "He".to_string(),
        });
        agg.process(&AgentEvent::ModelOutputToken {
            text: "llo".to_string(),
        });

        let snap = agg.snapshot();
        assert_eq!(snap.transcript.len(), 1);
        assert!(matches!(
            snap.transcript[0],
            TranscriptEntry::AiText { ref content } if content == "Hello"
        ));
    }

    #[test]
    fn test_tool_call_closes_ai_text_entry() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&AgentEvent::ModelOutputToken {
            text: "Thinking".to_string(),
        });
        agg.process(&tool_start("1", "search", json!({"q": "x"})));
        agg.process(&AgentEvent::ModelOutputToken {
            text: "Done".to_string(),
        });

        // The tool entry closed the first text entry; a new one opens after.
        let snap = agg.snapshot();
        assert_eq!(snap.transcript.len(), 3);
        assert!(matches!(
            snap.transcript[2],
            TranscriptEntry::AiText { ref content } if content == "Done"
        ));
    }

    #[test]
    fn test_planning_update_upserts_last_write_wins() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&AgentEvent::PlanningUpdate {
            items: vec![
                TodoUpdate {
                    id: "t1".to_string(),
                    content: "first".to_string(),
                    status: TodoStatus::Pending,
                },
                TodoUpdate {
                    id: "t2".to_string(),
                    content: "second".to_string(),
                    status: TodoStatus::Pending,
                },
            ],
        });
        agg.process(&AgentEvent::PlanningUpdate {
            items: vec![TodoUpdate {
                id: "t1".to_string(),
                content: "first".to_string(),
                status: TodoStatus::Completed,
            }],
        });

        let snap = agg.snapshot();
        assert_eq!(snap.todos.len(), 2);
        assert_eq!(snap.todos["t1"].status, TodoStatus::Completed);
        // t2 absent from the second update but untouched.
        assert_eq!(snap.todos["t2"].status, TodoStatus::Pending);
    }

    #[test]
    fn test_write_todos_tool_folds_into_todo_map() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&tool_start(
            "1",
            "write_todos",
            json!({"todos": [{"id": "t1", "content": "plan", "status": "in_progress"}]}),
        ));

        let snap = agg.snapshot();
        assert!(snap.tool_calls.is_empty());
        assert!(snap.transcript.is_empty());
        assert_eq!(snap.todos["t1"].status, TodoStatus::InProgress);
    }

    #[test]
    fn test_phase_transitions_are_monotonic() {
        let mut agg = StatusAggregator::new("exec-1");
        assert_eq!(agg.phase(), ExecutionPhase::Pending);
        agg.set_phase(ExecutionPhase::InProgress);
        agg.set_phase(ExecutionPhase::Completed);
        // Backward and cross-terminal transitions are ignored.
        agg.set_phase(ExecutionPhase::InProgress);
        assert_eq!(agg.phase(), ExecutionPhase::Completed);
        agg.set_phase(ExecutionPhase::Failed);
        assert_eq!(agg.phase(), ExecutionPhase::Completed);
    }

    #[test]
    fn test_display_name_for_shell_tools() {
        assert_eq!(
            display_name("execute", &json!({"command": "pip install requests"})),
            "pip"
        );
        assert_eq!(
            display_name("Shell", &json!({"command": "echo hi"})),
            "echo"
        );
        assert_eq!(display_name("search", &json!({"q": "x"})), "search");
    }

    #[test]
    fn test_category_inference() {
        assert_eq!(infer_category("execute"), ToolCategory::Shell);
        assert_eq!(infer_category("read_file"), ToolCategory::FileOps);
        assert_eq!(infer_category("web_search"), ToolCategory::Search);
        assert_eq!(infer_category("fetch_url"), ToolCategory::Network);
        assert_eq!(infer_category("write_todos"), ToolCategory::Planning);
        assert_eq!(infer_category("summon"), ToolCategory::Other);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.process(&tool_start("1", "x", json!({})));
        let snap = agg.snapshot();
        agg.process(&tool_start("2", "y", json!({})));
        assert_eq!(snap.tool_calls.len(), 1);
        assert_eq!(agg.snapshot().tool_calls.len(), 2);
    }

    #[test]
    fn test_progress_counters() {
        let mut agg = StatusAggregator::new("exec-1");
        agg.set_phase(ExecutionPhase::InProgress);
        agg.process(&tool_start("1", "x", json!({})));
        agg.process(&AgentEvent::ModelOutputToken {
            text: "hi".to_string(),
        });

        let progress = agg.progress();
        assert_eq!(progress.events_processed, 2);
        assert_eq!(progress.tool_calls, 1);
        assert_eq!(progress.transcript_entries, 2);
        assert_eq!(progress.phase, ExecutionPhase::InProgress);
    }
}
