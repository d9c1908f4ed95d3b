// ABOUTME: Loop detection over the stream of tool invocations an agent issues
// ABOUTME: Tracks recent invocation signatures and emits interventions when repetition crosses thresholds

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tether_config::LoopConfig;
use tether_core::ToolSignature;
use tracing::{debug, info, warn};

/// How strongly the agent should be steered away from the repeated tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionSeverity {
    /// Consecutive repetition detected; suggest a different approach
    Warning,
    /// Total repetition limit crossed; the run must conclude
    Terminal,
}

/// A directive for the caller to inject into the agent's conversational
/// context. The detector itself never touches the sandbox or kills the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub severity: InterventionSeverity,
    pub tool_name: String,
    /// Repetition count that triggered the intervention
    pub count: usize,
    pub directive: String,
}

/// Detects unproductive repetition in an agent's tool invocations.
///
/// Keeps a fixed-capacity ring of the last N `(tool, arg-hash)` signatures.
/// Two checks run on every observation:
///
/// 1. Consecutive: the newest signature repeated back-to-back at least
///    `consecutive_threshold` times fires a single WARNING per run.
/// 2. Total: the newest signature appearing `total_threshold` times anywhere
///    in the ring fires a single TERMINAL and stops the detector. A terminal
///    crossing takes precedence over a warning on the same observation.
///
/// Once stopped, further observations are no-ops.
pub struct LoopDetector {
    config: LoopConfig,
    history: VecDeque<ToolSignature>,
    interventions_issued: usize,
    stopped: bool,
}

impl LoopDetector {
    pub fn new(config: LoopConfig) -> Self {
        let capacity = config.history_size;
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            interventions_issued: 0,
            stopped: false,
        }
    }

    /// Whether a terminal intervention has fired.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Number of interventions issued this run.
    pub fn interventions_issued(&self) -> usize {
        self.interventions_issued
    }

    /// Observe one tool invocation. Returns an intervention when a threshold
    /// is crossed for the first time, otherwise `None`.
    pub fn observe(&mut self, tool_name: &str, args: &Value) -> Option<Intervention> {
        if self.stopped {
            return None;
        }

        let signature = ToolSignature::new(tool_name, args);
        if self.history.len() == self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(signature);

        debug!(
            tool = tool_name,
            history_len = self.history.len(),
            "Tracked tool invocation"
        );

        let total = self.count_total();
        if total >= self.config.total_threshold {
            warn!(
                tool = tool_name,
                count = total,
                threshold = self.config.total_threshold,
                "Loop detected: total repetition limit reached, stopping"
            );
            self.stopped = true;
            self.interventions_issued += 1;
            return Some(self.terminal_intervention(tool_name, total));
        }

        let consecutive = self.count_consecutive();
        if consecutive >= self.config.consecutive_threshold && self.interventions_issued == 0 {
            warn!(
                tool = tool_name,
                count = consecutive,
                threshold = self.config.consecutive_threshold,
                "Loop warning: consecutive repetition detected"
            );
            self.interventions_issued += 1;
            return Some(self.warning_intervention(tool_name, consecutive));
        }

        None
    }

    /// Log a summary of what the detector saw during the run.
    pub fn log_summary(&self) {
        if !self.history.is_empty() {
            info!(
                tracked = self.history.len(),
                interventions = self.interventions_issued,
                stopped = self.stopped,
                "Loop detection summary"
            );
        }
    }

    /// Count immediately preceding entries sharing the newest signature.
    fn count_consecutive(&self) -> usize {
        let newest = match self.history.back() {
            Some(sig) => sig,
            None => return 0,
        };
        self.history
            .iter()
            .rev()
            .take_while(|sig| *sig == newest)
            .count()
    }

    /// Count occurrences of the newest signature anywhere in the ring.
    fn count_total(&self) -> usize {
        let newest = match self.history.back() {
            Some(sig) => sig,
            None => return 0,
        };
        self.history.iter().filter(|sig| *sig == newest).count()
    }

    fn warning_intervention(&self, tool_name: &str, count: usize) -> Intervention {
        Intervention {
            severity: InterventionSeverity::Warning,
            tool_name: tool_name.to_string(),
            count,
            directive: format!(
                "LOOP WARNING: Repetitive pattern detected. You have called '{tool}' \
                 {count} times in a row with similar parameters, which suggests you may \
                 be stuck or approaching the problem incorrectly. Try a completely \
                 different approach or tool, re-examine your assumptions, and consider \
                 whether you already have enough information to conclude. Avoid calling \
                 '{tool}' again unless absolutely necessary.",
                tool = tool_name,
                count = count
            ),
        }
    }

    fn terminal_intervention(&self, tool_name: &str, count: usize) -> Intervention {
        Intervention {
            severity: InterventionSeverity::Terminal,
            tool_name: tool_name.to_string(),
            count,
            directive: format!(
                "LOOP DETECTED: Critical repetition limit reached. You have called \
                 '{tool}' {count} times with similar parameters and are unable to make \
                 progress. You MUST conclude your work now: summarize what you have \
                 learned, explain the obstacle preventing progress, and provide your \
                 best assessment based on the information gathered. Do NOT call \
                 '{tool}' again.",
                tool = tool_name,
                count = count
            ),
        }
    }
}
