// ABOUTME: Sandbox acquisition, reuse pooling, and lifecycle orchestration
// ABOUTME: Resolves the execution backend once per acquisition and manages keyed reuse

use crate::backends::SandboxBackend;
use crate::routing::{route, CommandRoute};
use crate::types::{BackendKind, ExecutionConstraints, ExecutionResult, SandboxHandle, SandboxState};
use crate::{Result, SandboxError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tether_config::{SandboxConfig, SandboxPolicy};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns the registered execution backends and the session-keyed reuse pool.
///
/// A handle acquired with a session key is pooled on release and handed back
/// on the next acquisition under the same key, preserving sandbox filesystem
/// state across runs. Pooled handles are probed before reuse and containers
/// past their TTL are evicted lazily at the next acquisition.
pub struct SandboxManager {
    config: SandboxConfig,
    backends: HashMap<BackendKind, Arc<dyn SandboxBackend>>,
    pool: Arc<RwLock<HashMap<String, SandboxHandle>>>,
    // Serializes acquisitions per session key so concurrent sessions sharing
    // a key cannot double-provision.
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            pool: Arc::new(RwLock::new(HashMap::new())),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register_backend(&mut self, backend: Arc<dyn SandboxBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn registered_kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    /// Pick the backend kind for an acquisition. AUTO resolves exactly once
    /// here, from the command hint; later executions never re-route.
    fn resolve_kind(
        &self,
        policy: SandboxPolicy,
        command_hint: Option<&str>,
    ) -> Result<BackendKind> {
        let kind = match policy {
            SandboxPolicy::Direct => BackendKind::Direct,
            SandboxPolicy::Containerized => BackendKind::Containerized,
            SandboxPolicy::Remote => BackendKind::Remote,
            SandboxPolicy::Auto => match command_hint.map(route) {
                Some(CommandRoute::Isolated) => {
                    // Risky commands must never fall through to the host.
                    if self.backends.contains_key(&BackendKind::Containerized) {
                        BackendKind::Containerized
                    } else if self.backends.contains_key(&BackendKind::Remote) {
                        BackendKind::Remote
                    } else {
                        return Err(SandboxError::BackendUnavailable(
                            BackendKind::Containerized,
                        ));
                    }
                }
                _ => BackendKind::Direct,
            },
        };

        if self.backends.contains_key(&kind) {
            Ok(kind)
        } else {
            Err(SandboxError::BackendUnavailable(kind))
        }
    }

    fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn SandboxBackend>> {
        self.backends
            .get(&kind)
            .ok_or(SandboxError::BackendUnavailable(kind))
    }

    /// Acquire a sandbox, reusing a pooled one when a healthy handle exists
    /// under the session key, otherwise provisioning fresh.
    pub async fn acquire(
        &self,
        session_key: Option<&str>,
        policy: SandboxPolicy,
        command_hint: Option<&str>,
    ) -> Result<SandboxHandle> {
        let kind = self.resolve_kind(policy, command_hint)?;

        match session_key {
            Some(key) => {
                let lock = self.key_lock(key).await;
                let _guard = lock.lock().await;
                if let Some(handle) = self.reuse_pooled(key, kind).await? {
                    return Ok(handle);
                }
                let handle = self.provision_ready(kind, Some(key)).await?;
                self.pool
                    .write()
                    .await
                    .insert(key.to_string(), handle.clone());
                Ok(handle)
            }
            None => self.provision_ready(kind, None).await,
        }
    }

    /// Run a command in the sandbox the handle refers to. The configured
    /// default command timeout applies when the constraints leave it unset.
    pub async fn execute(
        &self,
        handle: &SandboxHandle,
        command: &str,
        constraints: &ExecutionConstraints,
    ) -> Result<ExecutionResult> {
        let backend = self.backend(handle.kind)?;

        let mut bounded = constraints.clone();
        if bounded.timeout.is_none() {
            bounded.timeout = Some(self.config.command_timeout());
        }

        backend.execute(&handle.resource_id, command, &bounded).await
    }

    /// Return a handle at session end. Keyed handles stay pooled for the next
    /// run under the same key; unkeyed handles are torn down immediately.
    ///
    /// A release that arrives after the pool entry was already replaced (the
    /// key was re-acquired while this handle was still held) must not clobber
    /// the newer entry; the superseded handle is torn down instead.
    pub async fn release(&self, handle: SandboxHandle) -> Result<()> {
        let Some(key) = handle.session_key.clone() else {
            return self.destroy(&handle).await;
        };

        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let superseded = self
            .pool
            .read()
            .await
            .get(&key)
            .is_some_and(|current| current.id != handle.id);
        if superseded {
            warn!(handle_id = %handle.id, session_key = %key, "Releasing superseded sandbox; tearing down");
            let backend = self.backend(handle.kind)?;
            return backend.destroy(&handle.resource_id).await;
        }

        debug!(handle_id = %handle.id, session_key = %key, "Pooling sandbox for reuse");
        self.pool.write().await.insert(key, handle);
        Ok(())
    }

    /// Tear down the underlying resource and forget the handle.
    pub async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        if let Some(key) = &handle.session_key {
            self.pool.write().await.remove(key);
            self.key_locks.lock().await.remove(key);
        }
        let backend = self.backend(handle.kind)?;
        backend.destroy(&handle.resource_id).await
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Hand back the pooled handle for this key if it is still usable.
    /// Stale or dead handles are destroyed and the pool entry dropped.
    async fn reuse_pooled(&self, key: &str, kind: BackendKind) -> Result<Option<SandboxHandle>> {
        let pooled = self.pool.read().await.get(key).cloned();
        let Some(mut handle) = pooled else {
            return Ok(None);
        };

        if handle.kind != kind {
            debug!(
                handle_id = %handle.id,
                pooled_kind = ?handle.kind,
                requested_kind = ?kind,
                "Pooled sandbox kind mismatch; replacing"
            );
            self.discard(key, &handle).await;
            return Ok(None);
        }

        if handle.kind == BackendKind::Containerized
            && handle.age() > chrono::Duration::seconds(self.config.ttl_seconds as i64)
        {
            info!(handle_id = %handle.id, "Pooled container exceeded TTL; evicting");
            self.discard(key, &handle).await;
            return Ok(None);
        }

        let backend = self.backend(kind)?;
        if backend
            .probe(&handle.resource_id, self.config.health_probe_timeout())
            .await
        {
            handle.last_probe_at = Some(Utc::now());
            self.pool
                .write()
                .await
                .insert(key.to_string(), handle.clone());
            info!(handle_id = %handle.id, session_key = %key, "Reusing pooled sandbox");
            Ok(Some(handle))
        } else {
            warn!(handle_id = %handle.id, "Pooled sandbox failed liveness probe; replacing");
            self.discard(key, &handle).await;
            Ok(None)
        }
    }

    async fn discard(&self, key: &str, handle: &SandboxHandle) {
        self.pool.write().await.remove(key);
        if let Ok(backend) = self.backend(handle.kind) {
            if let Err(e) = backend.destroy(&handle.resource_id).await {
                warn!(handle_id = %handle.id, error = %e, "Failed to tear down stale sandbox");
            }
        }
    }

    /// Provision a new sandbox and poll until it answers a liveness probe.
    /// A provisioning timeout tears the resource down so nothing leaks.
    async fn provision_ready(
        &self,
        kind: BackendKind,
        session_key: Option<&str>,
    ) -> Result<SandboxHandle> {
        let backend = self.backend(kind)?;
        let resource_id = backend.provision().await?;

        let mut handle = SandboxHandle {
            id: Uuid::new_v4().to_string(),
            kind,
            state: SandboxState::Provisioning,
            resource_id,
            session_key: session_key.map(|k| k.to_string()),
            created_at: Utc::now(),
            last_probe_at: None,
        };

        let deadline = tokio::time::Instant::now() + self.config.provisioning_timeout();
        loop {
            if backend
                .probe(&handle.resource_id, self.config.health_probe_timeout())
                .await
            {
                handle.state = SandboxState::Ready;
                handle.last_probe_at = Some(Utc::now());
                info!(handle_id = %handle.id, kind = ?kind, "Sandbox ready");
                return Ok(handle);
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(handle_id = %handle.id, "Sandbox provisioning timed out; tearing down");
                if let Err(e) = backend.destroy(&handle.resource_id).await {
                    warn!(handle_id = %handle.id, error = %e, "Teardown after provisioning timeout failed");
                }
                return Err(SandboxError::Provisioning(format!(
                    "Sandbox not ready after {} seconds",
                    self.config.provisioning_timeout_seconds
                )));
            }

            tokio::time::sleep(self.config.provisioning_poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockBackend {
        kind: BackendKind,
        provisioned: AtomicUsize,
        destroyed: Arc<Mutex<Vec<String>>>,
        // Probe outcomes consumed in order; the last value repeats.
        probe_script: Mutex<Vec<bool>>,
    }

    impl MockBackend {
        fn new(kind: BackendKind, probe_script: Vec<bool>) -> Self {
            Self {
                kind,
                provisioned: AtomicUsize::new(0),
                destroyed: Arc::new(Mutex::new(Vec::new())),
                probe_script: Mutex::new(probe_script),
            }
        }
    }

    #[async_trait::async_trait]
    impl SandboxBackend for MockBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn provision(&self) -> Result<String> {
            let n = self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(format!("resource-{}", n))
        }

        async fn execute(
            &self,
            _resource_id: &str,
            command: &str,
            _constraints: &ExecutionConstraints,
        ) -> Result<ExecutionResult> {
            Ok(ExecutionResult {
                exit_code: 0,
                stdout: format!("ran: {}", command),
                stderr: String::new(),
            })
        }

        async fn probe(&self, _resource_id: &str, _timeout: Duration) -> bool {
            let mut script = self.probe_script.lock().await;
            if script.len() > 1 {
                script.remove(0)
            } else {
                script.first().copied().unwrap_or(true)
            }
        }

        async fn destroy(&self, resource_id: &str) -> Result<()> {
            self.destroyed.lock().await.push(resource_id.to_string());
            Ok(())
        }
    }

    fn fast_config() -> SandboxConfig {
        SandboxConfig {
            provisioning_timeout_seconds: 1,
            provisioning_poll_interval_seconds: 1,
            ..Default::default()
        }
    }

    fn manager_with(backend: Arc<MockBackend>) -> SandboxManager {
        let mut manager = SandboxManager::new(fast_config());
        manager.register_backend(backend);
        manager
    }

    #[tokio::test]
    async fn test_keyed_acquire_reuses_healthy_sandbox() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let manager = manager_with(backend.clone());

        let first = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        manager.release(first.clone()).await.unwrap();

        let second = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_pooled_sandbox_replaced() {
        // Provisioning probe succeeds, the reuse probe fails, then the
        // replacement's provisioning probe succeeds.
        let backend = Arc::new(MockBackend::new(
            BackendKind::Direct,
            vec![true, false, true],
        ));
        let manager = manager_with(backend.clone());

        let first = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        manager.release(first.clone()).await.unwrap();

        let second = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 2);
        let destroyed = backend.destroyed.lock().await;
        assert_eq!(destroyed.as_slice(), &[first.resource_id.clone()]);
    }

    #[tokio::test]
    async fn test_provisioning_timeout_tears_down_resource() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![false]));
        let manager = manager_with(backend.clone());

        let result = manager.acquire(None, SandboxPolicy::Direct, None).await;
        assert!(matches!(result, Err(SandboxError::Provisioning(_))));
        let destroyed = backend.destroyed.lock().await;
        assert_eq!(destroyed.as_slice(), &["resource-0".to_string()]);
    }

    #[tokio::test]
    async fn test_auto_routes_risky_command_to_isolated_backend() {
        let direct = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let container = Arc::new(MockBackend::new(BackendKind::Containerized, vec![true]));
        let mut manager = SandboxManager::new(fast_config());
        manager.register_backend(direct);
        manager.register_backend(container);

        let handle = manager
            .acquire(None, SandboxPolicy::Auto, Some("pip install requests"))
            .await
            .unwrap();
        assert_eq!(handle.kind, BackendKind::Containerized);

        let safe = manager
            .acquire(None, SandboxPolicy::Auto, Some("cat README.md"))
            .await
            .unwrap();
        assert_eq!(safe.kind, BackendKind::Direct);
    }

    #[tokio::test]
    async fn test_auto_risky_without_isolated_backend_fails() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let manager = manager_with(backend);

        let result = manager
            .acquire(None, SandboxPolicy::Auto, Some("sudo rm -rf /tmp/x"))
            .await;
        assert!(matches!(
            result,
            Err(SandboxError::BackendUnavailable(BackendKind::Containerized))
        ));
    }

    #[tokio::test]
    async fn test_unkeyed_release_destroys() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let manager = manager_with(backend.clone());

        let handle = manager
            .acquire(None, SandboxPolicy::Direct, None)
            .await
            .unwrap();
        let resource = handle.resource_id.clone();
        manager.release(handle).await.unwrap();

        let destroyed = backend.destroyed.lock().await;
        assert_eq!(destroyed.as_slice(), &[resource]);
    }

    #[tokio::test]
    async fn test_execute_applies_default_timeout() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let manager = manager_with(backend);

        let handle = manager
            .acquire(None, SandboxPolicy::Direct, None)
            .await
            .unwrap();
        let result = manager
            .execute(&handle, "echo hi", &ExecutionConstraints::default())
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "ran: echo hi");
    }

    #[tokio::test]
    async fn test_explicit_policy_without_backend_fails() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let manager = manager_with(backend);

        let result = manager
            .acquire(None, SandboxPolicy::Remote, None)
            .await;
        assert!(matches!(
            result,
            Err(SandboxError::BackendUnavailable(BackendKind::Remote))
        ));
    }

    #[tokio::test]
    async fn test_late_release_does_not_clobber_replacement() {
        // Provision probe for the first handle, failed reuse probe, provision
        // probe for the replacement, then healthy probes from there on.
        let backend = Arc::new(MockBackend::new(
            BackendKind::Direct,
            vec![true, false, true, true],
        ));
        let manager = manager_with(backend.clone());

        let first = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        manager.release(first.clone()).await.unwrap();

        // The key is re-acquired while a clone of the first handle is still
        // held; the failed probe swaps in a replacement.
        let replacement = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        assert_ne!(replacement.id, first.id);

        // The stale holder releases late: it must be torn down, not pooled
        // over the replacement.
        manager.release(first.clone()).await.unwrap();
        let destroyed = backend.destroyed.lock().await;
        assert_eq!(destroyed.last(), Some(&first.resource_id));
        drop(destroyed);

        let reacquired = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        assert_eq!(reacquired.id, replacement.id);
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_destroy_prunes_key_lock() {
        let backend = Arc::new(MockBackend::new(BackendKind::Direct, vec![true]));
        let manager = manager_with(backend);

        let handle = manager
            .acquire(Some("run-a"), SandboxPolicy::Direct, None)
            .await
            .unwrap();
        assert_eq!(manager.key_locks.lock().await.len(), 1);

        manager.destroy(&handle).await.unwrap();
        assert!(manager.key_locks.lock().await.is_empty());
        assert!(manager.pool.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expired_container_evicted() {
        let backend = Arc::new(MockBackend::new(BackendKind::Containerized, vec![true]));
        let mut manager = SandboxManager::new(SandboxConfig {
            ttl_seconds: 0,
            provisioning_timeout_seconds: 1,
            provisioning_poll_interval_seconds: 1,
            ..Default::default()
        });
        manager.register_backend(backend.clone());

        let first = manager
            .acquire(Some("run-a"), SandboxPolicy::Containerized, None)
            .await
            .unwrap();
        manager.release(first.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let second = manager
            .acquire(Some("run-a"), SandboxPolicy::Containerized, None)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 2);
    }
}
