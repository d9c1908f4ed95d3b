// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Tether

// Sandbox Configuration
pub const TETHER_SANDBOX_POLICY: &str = "TETHER_SANDBOX_POLICY";
pub const TETHER_SANDBOX_TTL_SECONDS: &str = "TETHER_SANDBOX_TTL_SECONDS";
pub const TETHER_SANDBOX_IMAGE: &str = "TETHER_SANDBOX_IMAGE";
pub const TETHER_WORKSPACE_DIR: &str = "TETHER_WORKSPACE_DIR";

// Provisioning & Health
pub const TETHER_PROVISIONING_TIMEOUT_SECONDS: &str = "TETHER_PROVISIONING_TIMEOUT_SECONDS";
pub const TETHER_PROVISIONING_POLL_INTERVAL_SECONDS: &str =
    "TETHER_PROVISIONING_POLL_INTERVAL_SECONDS";
pub const TETHER_HEALTH_PROBE_TIMEOUT_SECONDS: &str = "TETHER_HEALTH_PROBE_TIMEOUT_SECONDS";
pub const TETHER_COMMAND_TIMEOUT_SECONDS: &str = "TETHER_COMMAND_TIMEOUT_SECONDS";

// Remote Sandbox Service
pub const TETHER_REMOTE_API_URL: &str = "TETHER_REMOTE_API_URL";
pub const TETHER_REMOTE_API_KEY: &str = "TETHER_REMOTE_API_KEY";

// Loop Detection
pub const TETHER_LOOP_HISTORY_SIZE: &str = "TETHER_LOOP_HISTORY_SIZE";
pub const TETHER_LOOP_CONSECUTIVE_THRESHOLD: &str = "TETHER_LOOP_CONSECUTIVE_THRESHOLD";
pub const TETHER_LOOP_TOTAL_THRESHOLD: &str = "TETHER_LOOP_TOTAL_THRESHOLD";

// Status Reporting
pub const TETHER_STATUS_PUSH_INTERVAL_EVENTS: &str = "TETHER_STATUS_PUSH_INTERVAL_EVENTS";
pub const TETHER_HEARTBEAT_INTERVAL_EVENTS: &str = "TETHER_HEARTBEAT_INTERVAL_EVENTS";
pub const TETHER_COORDINATOR_URL: &str = "TETHER_COORDINATOR_URL";
pub const TETHER_COORDINATOR_TOKEN: &str = "TETHER_COORDINATOR_TOKEN";
