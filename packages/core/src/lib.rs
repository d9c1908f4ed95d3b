// ABOUTME: Shared fingerprinting utilities for Tether
// ABOUTME: Canonical argument hashing used by loop detection and status deduplication

pub mod fingerprint;

pub use fingerprint::{canonical_hash, tool_fingerprint, ToolSignature, SENTINEL_HASH};
