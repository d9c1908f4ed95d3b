// ABOUTME: Risk-lexicon routing for AUTO sandbox policy
// ABOUTME: Escalates interpreter, package-manager, and installer commands to an isolated backend

/// Where a command should run under the AUTO policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRoute {
    /// Safe to run directly on the host for minimum latency
    Direct,
    /// Escalate to a containerized or remote backend
    Isolated,
}

/// Programs whose invocation escalates a command to an isolated backend:
/// interpreters, package managers, and system-level installers.
const RISKY_PROGRAMS: &[&str] = &[
    "pip", "pip3", "npm", "npx", "yarn", "pnpm", "gem", "apt", "apt-get", "yum", "dnf", "brew",
    "python", "python3", "node", "ruby", "perl", "sudo",
];

/// Multi-word patterns checked against the whole command text.
const RISKY_PATTERNS: &[&str] = &["cargo install", "bash -c", "sh -c", "| sh", "| bash"];

/// Scan a command against the risk lexicon.
///
/// This is a latency heuristic, not a security boundary: callers that need
/// a hard isolation guarantee must pin the sandbox policy explicitly.
pub fn route(command: &str) -> CommandRoute {
    let lowered = command.to_lowercase();

    for pattern in RISKY_PATTERNS {
        if lowered.contains(pattern) {
            return CommandRoute::Isolated;
        }
    }

    // Check the leading program of each shell segment, so chained commands
    // like `cd /tmp && pip install x` still escalate.
    for segment in lowered.split(['|', ';']).flat_map(|s| s.split("&&")) {
        if let Some(program) = segment.split_whitespace().next() {
            let program = program.rsplit('/').next().unwrap_or(program);
            if RISKY_PROGRAMS.contains(&program) {
                return CommandRoute::Isolated;
            }
        }
    }

    CommandRoute::Direct
}
