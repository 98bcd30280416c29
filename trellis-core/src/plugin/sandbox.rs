//! Cooperative sandbox around plugin code execution.
//!
//! Every call into plugin code passes through the enforcer: a bounded worker
//! pool absorbs invocation storms, a wall-clock deadline cancels the
//! underlying task (`JoinHandle::abort`, not merely giving up on waiting),
//! panics are contained at the task boundary, and a reservation ledger gates
//! memory growth before allocations proceed. Forbidden host operations are
//! denied at the call site through [`SandboxContext::check`].
//!
//! This is a best-effort guard inside a single trusted process, not a hard
//! security boundary: plugin code that ignores its context can bypass the
//! memory ledger and the operation gate. Genuine isolation would run hooks
//! in a separate OS process under rlimits with the enforcer acting as a
//! process supervisor.

use crate::plugin::error::{PluginError, PluginResult, SandboxError};
use crate::plugin::health::{ErrorKind, HealthMonitor};
use crate::plugin::manifest::PluginManifest;
use crate::plugin::security::{Capability, SecurityPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

/// Byte size with convenient constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Create from bytes.
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from kibibytes.
    pub const fn kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    /// Create from mebibytes.
    pub const fn mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    /// Size in bytes.
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Size in mebibytes.
    pub fn as_mib(&self) -> f64 {
        self.0 as f64 / (1024.0 * 1024.0)
    }
}

/// Per-invocation resource limits enforced by the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Wall-clock deadline for one plugin execution
    pub execution_timeout: Duration,
    /// Deadline for load-class operations (install hooks), which may retry
    pub load_timeout: Duration,
    /// Soft memory ceiling per execution
    pub memory_limit: ByteSize,
    /// Attempts for load-class operations on transient failure
    pub max_retry_attempts: u32,
    /// Concurrent plugin executions across the host
    pub max_concurrent: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(30),
            load_timeout: Duration::from_secs(10),
            memory_limit: ByteSize::mib(32),
            max_retry_attempts: 3,
            max_concurrent: 16,
        }
    }
}

/// Per-invocation context handed into plugin hooks.
///
/// Carries the plugin's granted capabilities and its memory ledger. Hooks
/// ask permission through [`SandboxContext::check`] before dangerous
/// operations and reserve memory through [`SandboxContext::try_reserve`]
/// before large allocations.
pub struct SandboxContext {
    plugin: String,
    granted: HashSet<Capability>,
    policy: Arc<SecurityPolicy>,
    memory_used: AtomicU64,
    memory_limit: u64,
}

impl SandboxContext {
    /// Name of the plugin this context belongs to.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Gate a host operation. Denials are returned before the operation
    /// runs.
    pub fn check(&self, op: Capability) -> Result<(), SandboxError> {
        self.policy.check(&self.plugin, op, &self.granted)
    }

    /// Reserve memory against the ceiling. The reservation is refused, not
    /// rolled back, when it would cross the limit.
    pub fn try_reserve(&self, bytes: u64) -> Result<(), SandboxError> {
        let mut current = self.memory_used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.memory_limit {
                return Err(SandboxError::MemoryExceeded {
                    plugin: self.plugin.clone(),
                    requested: bytes,
                    limit: self.memory_limit,
                });
            }
            match self.memory_used.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Return previously reserved memory to the ledger.
    pub fn release(&self, bytes: u64) {
        let mut current = self.memory_used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.memory_used.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bytes currently reserved.
    pub fn memory_in_use(&self) -> u64 {
        self.memory_used.load(Ordering::Relaxed)
    }
}

/// Counters describing enforcer activity.
#[derive(Debug, Default)]
struct SandboxStats {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Immutable snapshot of sandbox statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxStatsSnapshot {
    /// Total executions
    pub executions: u64,
    /// Successful executions
    pub successes: u64,
    /// Failed executions of any kind
    pub failures: u64,
    /// Executions cancelled at the deadline
    pub timeouts: u64,
}

/// Wraps plugin code execution with resource and operation enforcement.
pub struct SandboxEnforcer {
    limits: ResourceLimits,
    policy: Arc<SecurityPolicy>,
    pool: Arc<Semaphore>,
    health: Arc<HealthMonitor>,
    stats: SandboxStats,
}

impl SandboxEnforcer {
    /// Create an enforcer. Every execution outcome is reported to `health`.
    pub fn new(limits: ResourceLimits, policy: SecurityPolicy, health: Arc<HealthMonitor>) -> Self {
        let pool = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
        Self { limits, policy: Arc::new(policy), pool, health, stats: SandboxStats::default() }
    }

    /// The configured limits.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Build a per-invocation context for a plugin.
    pub fn context(&self, manifest: &PluginManifest) -> SandboxContext {
        SandboxContext {
            plugin: manifest.name.clone(),
            granted: manifest.permissions.clone(),
            policy: self.policy.clone(),
            memory_used: AtomicU64::new(0),
            memory_limit: self.limits.memory_limit.as_bytes(),
        }
    }

    /// Context for a plugin whose manifest is no longer on disk: no grants.
    pub fn context_named(&self, plugin: &str) -> SandboxContext {
        SandboxContext {
            plugin: plugin.to_string(),
            granted: HashSet::new(),
            policy: self.policy.clone(),
            memory_used: AtomicU64::new(0),
            memory_limit: self.limits.memory_limit.as_bytes(),
        }
    }

    /// Execute plugin code under the standard deadline.
    pub async fn execute<F, T>(&self, plugin: &str, hook: &str, fut: F) -> PluginResult<T>
    where
        F: Future<Output = PluginResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_inner(plugin, hook, fut, self.limits.execution_timeout).await
    }

    /// Execute a load-class operation, retrying transient failures.
    ///
    /// Retries apply only to loading (install hooks and loaders), never to
    /// enable/disable transitions, to avoid doubling side effects.
    pub async fn execute_with_retry<M, F, T>(
        &self,
        plugin: &str,
        hook: &str,
        mut make: M,
    ) -> PluginResult<T>
    where
        M: FnMut() -> F,
        F: Future<Output = PluginResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let attempts = self.limits.max_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute_inner(plugin, hook, make(), self.limits.load_timeout).await {
                Err(e) if is_transient(&e) && attempt < attempts => {
                    tracing::warn!(
                        plugin = %plugin,
                        hook = %hook,
                        attempt = attempt,
                        error = %e,
                        "transient load failure, retrying"
                    );
                },
                other => return other,
            }
        }
    }

    async fn execute_inner<F, T>(
        &self,
        plugin: &str,
        hook: &str,
        fut: F,
        deadline: Duration,
    ) -> PluginResult<T>
    where
        F: Future<Output = PluginResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PluginError::Sandbox(SandboxError::PoolClosed))?;

        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let mut task = tokio::spawn(fut);

        let result: PluginResult<T> = match timeout(deadline, &mut task).await {
            Err(_) => {
                // Cancel the underlying task, not just our wait on it.
                task.abort();
                Err(PluginError::Sandbox(SandboxError::Timeout {
                    plugin: plugin.to_string(),
                    limit_ms: deadline.as_millis() as u64,
                }))
            },
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "plugin code panicked".to_string()
                } else {
                    "plugin task was cancelled".to_string()
                };
                Err(PluginError::HookFailed {
                    plugin: plugin.to_string(),
                    hook: hook.to_string(),
                    reason,
                })
            },
            Ok(Ok(inner)) => inner,
        };

        self.stats.executions.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(_) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                self.health.record(plugin, Ok(()));
                tracing::debug!(
                    plugin = %plugin,
                    hook = %hook,
                    execution_id = %execution_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "plugin execution complete"
                );
            },
            Err(e) => {
                let kind = classify(e);
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                if kind == ErrorKind::Timeout {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                self.health.record(plugin, Err(kind));
                tracing::warn!(
                    plugin = %plugin,
                    hook = %hook,
                    execution_id = %execution_id,
                    kind = ?kind,
                    error = %e,
                    "plugin execution failed"
                );
            },
        }

        result
    }

    /// Snapshot of enforcer counters.
    pub fn stats(&self) -> SandboxStatsSnapshot {
        SandboxStatsSnapshot {
            executions: self.stats.executions.load(Ordering::Relaxed),
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Map a plugin error to the health monitor's error classification.
fn classify(err: &PluginError) -> ErrorKind {
    match err {
        PluginError::Sandbox(SandboxError::Timeout { .. }) => ErrorKind::Timeout,
        PluginError::Sandbox(SandboxError::MemoryExceeded { .. }) => ErrorKind::MemoryExceeded,
        PluginError::Sandbox(SandboxError::ForbiddenOperation { .. }) => {
            ErrorKind::ForbiddenOperation
        },
        _ => ErrorKind::HookFailed,
    }
}

/// Whether a failure class is worth retrying during load.
fn is_transient(err: &PluginError) -> bool {
    matches!(
        err,
        PluginError::Sandbox(SandboxError::Timeout { .. }) | PluginError::HookFailed { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::health::HealthThresholds;
    use std::sync::atomic::AtomicU32;

    fn enforcer(limits: ResourceLimits) -> (SandboxEnforcer, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new(HealthThresholds::default()));
        (SandboxEnforcer::new(limits, SecurityPolicy::default(), health.clone()), health)
    }

    fn manifest(name: &str) -> PluginManifest {
        PluginManifest::load_str(&format!(
            "[plugin]\nname = \"{name}\"\nversion = \"1.0.0\"\n"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn passes_results_through() {
        let (sandbox, _) = enforcer(ResourceLimits::default());
        let result = sandbox.execute("calc", "enable", async { Ok(41 + 1) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(sandbox.stats().successes, 1);
    }

    #[tokio::test]
    async fn deadline_cancels_and_reports_exactly_one_error() {
        let limits =
            ResourceLimits { execution_timeout: Duration::from_millis(20), ..Default::default() };
        let (sandbox, health) = enforcer(limits);

        let result: PluginResult<()> = sandbox
            .execute("sleeper", "enable", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(PluginError::Sandbox(SandboxError::Timeout { .. }))
        ));
        assert_eq!(health.error_count("sleeper"), 1);
        assert_eq!(sandbox.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn panics_become_hook_failures() {
        let (sandbox, health) = enforcer(ResourceLimits::default());
        let result: PluginResult<()> =
            sandbox.execute("crasher", "install", async { panic!("boom") }).await;
        assert!(matches!(result, Err(PluginError::HookFailed { .. })));
        assert_eq!(health.error_count("crasher"), 1);
    }

    #[tokio::test]
    async fn retry_applies_only_up_to_the_configured_attempts() {
        let limits = ResourceLimits { max_retry_attempts: 3, ..Default::default() };
        let (sandbox, _) = enforcer(limits);

        let calls = Arc::new(AtomicU32::new(0));
        let result: PluginResult<()> = sandbox
            .execute_with_retry("flaky", "install", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(PluginError::HookFailed {
                        plugin: "flaky".into(),
                        hook: "install".into(),
                        reason: "transient".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let limits = ResourceLimits { max_retry_attempts: 3, ..Default::default() };
        let (sandbox, _) = enforcer(limits);

        let calls = Arc::new(AtomicU32::new(0));
        let result: PluginResult<()> = sandbox
            .execute_with_retry("strict", "install", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(PluginError::Sandbox(SandboxError::ForbiddenOperation {
                        plugin: "strict".into(),
                        operation: "process_spawn".into(),
                    }))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn context_gates_forbidden_operations_at_the_call_site() {
        let (sandbox, _) = enforcer(ResourceLimits::default());
        let ctx = sandbox.context(&manifest("restricted"));

        let denied = ctx.check(Capability::ProcessSpawn);
        assert!(matches!(denied, Err(SandboxError::ForbiddenOperation { .. })));
        assert!(ctx.check(Capability::NetworkClient).is_ok());
    }

    #[tokio::test]
    async fn memory_ledger_refuses_reservations_over_the_ceiling() {
        let limits = ResourceLimits { memory_limit: ByteSize::kib(1), ..Default::default() };
        let (sandbox, _) = enforcer(limits);
        let ctx = sandbox.context(&manifest("hungry"));

        ctx.try_reserve(512).unwrap();
        ctx.try_reserve(512).unwrap();
        let over = ctx.try_reserve(1);
        assert!(matches!(over, Err(SandboxError::MemoryExceeded { .. })));

        ctx.release(512);
        assert!(ctx.try_reserve(256).is_ok());
        assert_eq!(ctx.memory_in_use(), 768);
    }

    #[test]
    fn byte_size_conversions() {
        assert_eq!(ByteSize::kib(1).as_bytes(), 1024);
        assert_eq!(ByteSize::mib(32).as_bytes(), 32 * 1024 * 1024);
        assert!((ByteSize::mib(32).as_mib() - 32.0).abs() < f64::EPSILON);
    }
}
