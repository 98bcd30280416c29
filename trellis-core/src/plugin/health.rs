//! Plugin health monitoring.
//!
//! Execution outcomes stream in from the sandbox; verdicts are computed
//! lazily and cached for a TTL rather than on a background timer, so idle
//! plugins cost nothing. The error window is a fixed window tied to the
//! verdict cache: counters accumulate while a cached verdict is fresh and
//! reset when the verdict is recomputed, so a plugin stays `Unhealthy` for
//! at most one TTL after its errors stop.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Health classification of a plugin or the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Elevated error rate, still below the disable threshold
    Degraded,
    /// Error threshold exceeded; candidate for auto-disable
    Unhealthy,
}

/// Classification of a failed plugin execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Wall-clock deadline exceeded
    Timeout,
    /// Memory ceiling exceeded
    MemoryExceeded,
    /// Blocked host operation attempted
    ForbiddenOperation,
    /// Hook raised an error or panicked
    HookFailed,
}

/// Thresholds driving verdict computation.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Errors within one window before a plugin is `Unhealthy`
    pub max_errors_per_plugin: u64,
    /// Fleet-wide unhealthy ratio above which auto-disable is suppressed
    pub max_unhealthy_ratio: f64,
    /// How long a computed verdict stays cached
    pub cache_ttl: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_errors_per_plugin: 10,
            max_unhealthy_ratio: 0.5,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Aggregate verdict across all tracked plugins.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetVerdict {
    /// Number of tracked plugins
    pub tracked: usize,
    /// Number of unhealthy plugins
    pub unhealthy: usize,
    /// Unhealthy ratio (0 when nothing is tracked)
    pub ratio: f64,
    /// Whether the fleet is degraded (auto-disable suppressed)
    pub degraded: bool,
}

impl Default for FleetVerdict {
    fn default() -> Self {
        Self { tracked: 0, unhealthy: 0, ratio: 0.0, degraded: false }
    }
}

#[derive(Debug)]
struct CachedVerdict {
    status: HealthStatus,
    computed_at: Instant,
}

/// Per-plugin health state. Counter updates are atomic; lost updates under
/// concurrency would silently mask real instability.
#[derive(Debug)]
struct PluginHealthState {
    errors_in_window: AtomicU64,
    total_errors: AtomicU64,
    total_ok: AtomicU64,
    last_error_kind: RwLock<Option<ErrorKind>>,
    verdict: RwLock<Option<CachedVerdict>>,
    tracking: AtomicBool,
    auto_disable_claimed: AtomicBool,
}

impl PluginHealthState {
    fn new() -> Self {
        Self {
            errors_in_window: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_ok: AtomicU64::new(0),
            last_error_kind: RwLock::new(None),
            verdict: RwLock::new(None),
            tracking: AtomicBool::new(true),
            auto_disable_claimed: AtomicBool::new(false),
        }
    }
}

/// Point-in-time snapshot of a plugin's health counters.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Plugin name
    pub plugin: String,
    /// Current verdict
    pub status: HealthStatus,
    /// Errors in the current window
    pub errors_in_window: u64,
    /// Errors since tracking began
    pub total_errors: u64,
    /// Successes since tracking began
    pub total_ok: u64,
    /// Kind of the most recent error
    pub last_error_kind: Option<ErrorKind>,
}

/// Tracks per-plugin error counts and derives health verdicts.
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    plugins: DashMap<String, Arc<PluginHealthState>>,
    fleet_tx: watch::Sender<FleetVerdict>,
}

impl HealthMonitor {
    /// Create a monitor with the given thresholds.
    pub fn new(thresholds: HealthThresholds) -> Self {
        let (fleet_tx, _) = watch::channel(FleetVerdict::default());
        Self { thresholds, plugins: DashMap::new(), fleet_tx }
    }

    /// The configured thresholds.
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Begin (or resume) tracking a plugin.
    pub fn track(&self, plugin: &str) {
        let state = self
            .plugins
            .entry(plugin.to_string())
            .or_insert_with(|| Arc::new(PluginHealthState::new()));
        state.tracking.store(true, Ordering::Relaxed);
    }

    /// Stop counting new outcomes for a plugin. Historical counts and the
    /// cached verdict are retained.
    pub fn stop_tracking(&self, plugin: &str) {
        if let Some(state) = self.plugins.get(plugin) {
            state.tracking.store(false, Ordering::Relaxed);
        }
    }

    /// Drop all state for a plugin (uninstall).
    pub fn forget(&self, plugin: &str) {
        self.plugins.remove(plugin);
    }

    /// Whether new outcomes are currently being counted for a plugin.
    pub fn is_tracking(&self, plugin: &str) -> bool {
        self.plugins.get(plugin).is_some_and(|s| s.tracking.load(Ordering::Relaxed))
    }

    /// Record one execution outcome.
    ///
    /// State is created lazily on the first outcome so install-time hook
    /// failures are visible before the plugin is ever enabled.
    pub fn record(&self, plugin: &str, outcome: Result<(), ErrorKind>) {
        let state = self
            .plugins
            .entry(plugin.to_string())
            .or_insert_with(|| Arc::new(PluginHealthState::new()))
            .clone();
        if !state.tracking.load(Ordering::Relaxed) {
            return;
        }
        match outcome {
            Ok(()) => {
                state.total_ok.fetch_add(1, Ordering::Relaxed);
            },
            Err(kind) => {
                state.errors_in_window.fetch_add(1, Ordering::Relaxed);
                state.total_errors.fetch_add(1, Ordering::Relaxed);
                *state.last_error_kind.write() = Some(kind);
                tracing::debug!(plugin = %plugin, kind = ?kind, "plugin execution failure recorded");
            },
        }
    }

    /// Current verdict for a plugin.
    ///
    /// Returns the cached verdict while it is fresh; otherwise recomputes
    /// from the window counter and starts a new window. Unknown plugins are
    /// reported `Healthy`.
    pub fn status(&self, plugin: &str) -> HealthStatus {
        let Some(state) = self.plugins.get(plugin).map(|s| s.clone()) else {
            return HealthStatus::Healthy;
        };
        self.status_of(plugin, &state)
    }

    fn status_of(&self, plugin: &str, state: &PluginHealthState) -> HealthStatus {
        {
            let cached = state.verdict.read();
            if let Some(verdict) = cached.as_ref() {
                if verdict.computed_at.elapsed() < self.thresholds.cache_ttl {
                    return verdict.status;
                }
            }
        }

        let mut cached = state.verdict.write();
        // Another caller may have recomputed while we waited for the lock.
        if let Some(verdict) = cached.as_ref() {
            if verdict.computed_at.elapsed() < self.thresholds.cache_ttl {
                return verdict.status;
            }
        }

        let errors = state.errors_in_window.swap(0, Ordering::Relaxed);
        let status = if errors > self.thresholds.max_errors_per_plugin {
            HealthStatus::Unhealthy
        } else if errors > self.thresholds.max_errors_per_plugin / 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        // New window: the auto-disable claim resets with it.
        state.auto_disable_claimed.store(false, Ordering::Relaxed);

        if let Some(previous) = cached.as_ref() {
            if previous.status != status {
                tracing::info!(plugin = %plugin, from = ?previous.status, to = ?status, "plugin health verdict changed");
            }
        } else if status != HealthStatus::Healthy {
            tracing::info!(plugin = %plugin, to = ?status, "plugin health verdict computed");
        }

        *cached = Some(CachedVerdict { status, computed_at: Instant::now() });
        status
    }

    /// Claim the single auto-disable slot of the current window.
    ///
    /// Returns `true` exactly once per window per plugin, so a persistent
    /// `Unhealthy` verdict cannot storm the orchestrator with repeated
    /// disable attempts.
    pub fn claim_auto_disable(&self, plugin: &str) -> bool {
        self.plugins
            .get(plugin)
            .is_some_and(|state| !state.auto_disable_claimed.swap(true, Ordering::Relaxed))
    }

    /// Compute the fleet verdict and publish it to watchers.
    pub fn fleet(&self) -> FleetVerdict {
        let tracked: Vec<(String, Arc<PluginHealthState>)> = self
            .plugins
            .iter()
            .filter(|e| e.tracking.load(Ordering::Relaxed))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let total = tracked.len();
        let unhealthy = tracked
            .iter()
            .filter(|(name, state)| self.status_of(name, state) == HealthStatus::Unhealthy)
            .count();
        let ratio = if total == 0 { 0.0 } else { unhealthy as f64 / total as f64 };
        let verdict = FleetVerdict {
            tracked: total,
            unhealthy,
            ratio,
            degraded: total > 0 && ratio > self.thresholds.max_unhealthy_ratio,
        };
        self.fleet_tx.send_replace(verdict.clone());
        verdict
    }

    /// Subscribe to fleet verdict updates.
    pub fn watch(&self) -> watch::Receiver<FleetVerdict> {
        self.fleet_tx.subscribe()
    }

    /// Errors recorded in the current window for a plugin.
    pub fn error_count(&self, plugin: &str) -> u64 {
        self.plugins
            .get(plugin)
            .map_or(0, |s| s.errors_in_window.load(Ordering::Relaxed))
    }

    /// Snapshot of one plugin's counters, if tracked.
    pub fn snapshot(&self, plugin: &str) -> Option<HealthSnapshot> {
        let state = self.plugins.get(plugin)?.clone();
        let status = self.status_of(plugin, &state);
        let last_error_kind = *state.last_error_kind.read();
        Some(HealthSnapshot {
            plugin: plugin.to_string(),
            status,
            errors_in_window: state.errors_in_window.load(Ordering::Relaxed),
            total_errors: state.total_errors.load(Ordering::Relaxed),
            total_ok: state.total_ok.load(Ordering::Relaxed),
            last_error_kind,
        })
    }
}
