// ABOUTME: Integration tests for the complete sandbox lifecycle through the public API
// ABOUTME: Exercises acquire, execute, release, reuse, and destroy with the direct backend

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tether_config::{SandboxConfig, SandboxPolicy};
use tether_sandbox::{DirectBackend, ExecutionConstraints, SandboxManager, SandboxState};

fn setup_manager(root: &TempDir) -> SandboxManager {
    let config = SandboxConfig {
        policy: SandboxPolicy::Direct,
        provisioning_timeout_seconds: 5,
        provisioning_poll_interval_seconds: 1,
        workspace_dir: root.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let backend = DirectBackend::new(root.path(), Duration::from_secs(30));
    let mut manager = SandboxManager::new(config);
    manager.register_backend(Arc::new(backend));
    manager
}

/// Acquire → execute → release → reacquire: the keyed sandbox comes back
/// with its filesystem state intact.
#[tokio::test]
async fn test_keyed_lifecycle_preserves_state_across_reuse() {
    let root = TempDir::new().unwrap();
    let manager = setup_manager(&root);

    let handle = manager
        .acquire(Some("conv-1"), SandboxPolicy::Direct, None)
        .await
        .expect("acquire failed");
    assert_eq!(handle.state, SandboxState::Ready);

    let result = manager
        .execute(
            &handle,
            "echo persisted > state.txt",
            &ExecutionConstraints::default(),
        )
        .await
        .expect("execute failed");
    assert!(result.success());

    manager.release(handle).await.expect("release failed");

    let reacquired = manager
        .acquire(Some("conv-1"), SandboxPolicy::Direct, None)
        .await
        .expect("reacquire failed");
    let result = manager
        .execute(&reacquired, "cat state.txt", &ExecutionConstraints::default())
        .await
        .expect("execute failed");
    assert_eq!(result.stdout.trim(), "persisted");
}

#[tokio::test]
async fn test_destroy_removes_workspace() {
    let root = TempDir::new().unwrap();
    let manager = setup_manager(&root);

    let handle = manager
        .acquire(Some("conv-2"), SandboxPolicy::Direct, None)
        .await
        .expect("acquire failed");
    let workspace = handle.resource_id.clone();
    assert!(std::path::Path::new(&workspace).is_dir());

    manager.destroy(&handle).await.expect("destroy failed");
    assert!(!std::path::Path::new(&workspace).exists());

    // A fresh acquisition under the same key provisions a new workspace.
    let replacement = manager
        .acquire(Some("conv-2"), SandboxPolicy::Direct, None)
        .await
        .expect("acquire after destroy failed");
    assert_ne!(replacement.resource_id, workspace);
}

#[tokio::test]
async fn test_command_timeout_is_a_structured_result() {
    let root = TempDir::new().unwrap();
    let manager = setup_manager(&root);

    let handle = manager
        .acquire(None, SandboxPolicy::Direct, None)
        .await
        .expect("acquire failed");
    let result = manager
        .execute(
            &handle,
            "sleep 10",
            &ExecutionConstraints::with_timeout(Duration::from_millis(200)),
        )
        .await
        .expect("execute should not error on timeout");
    assert_eq!(result.exit_code, 124);
    assert!(result.stderr.contains("timed out"));

    manager.release(handle).await.expect("release failed");
}
