use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;

use super::{BackendClient, BackendId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseStatus {
    Healthy,
    Degraded,
    Disconnected,
}

/// One resource as reported by a backend's pulse probe, indexed by
/// `(kind, name)` so the orchestrator can answer "which backend has pod X"
/// without a dedicated RPC round-trip.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceLocation {
    pub backend: &'static str,
    pub namespace: Option<String>,
}

/// A point-in-time view of one backend's health, published atomically via
/// [`ArcSwap`] so readers never observe a half-updated snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PulseSnapshot {
    pub status: PulseStatus,
    pub last_check_ts: i64,
}

struct BackendPulseState {
    consecutive_failures: u32,
    snapshot: ArcSwap<PulseSnapshot>,
}

/// Background health monitor for all three backends. Each backend is probed
/// independently every `interval` with a `timeout` ceiling; probes are
/// staggered across backends to avoid a thundering herd against the same
/// process clock tick.
///
/// State machine: `healthy -> degraded` after one failure, `degraded ->
/// disconnected` after a second consecutive failure, and any success snaps
/// straight back to `healthy` regardless of the current state.
pub struct PulseMonitor {
    states: HashMap<BackendId, BackendPulseState>,
    resource_index: ArcSwap<HashMap<(String, String), Vec<ResourceLocation>>>,
}

impl PulseMonitor {
    pub fn new(now_ts: i64) -> Arc<Self> {
        let mut states = HashMap::new();
        for id in BackendId::ALL {
            states.insert(
                id,
                BackendPulseState {
                    consecutive_failures: 0,
                    snapshot: ArcSwap::from_pointee(PulseSnapshot {
                        status: PulseStatus::Healthy,
                        last_check_ts: now_ts,
                    }),
                },
            );
        }
        Arc::new(Self {
            states,
            resource_index: ArcSwap::from_pointee(HashMap::new()),
        })
    }

    pub fn status(&self, backend: BackendId) -> PulseStatus {
        self.states
            .get(&backend)
            .map(|s| s.snapshot.load().status)
            .unwrap_or(PulseStatus::Disconnected)
    }

    pub fn snapshot(&self, backend: BackendId) -> Option<PulseSnapshot> {
        self.states.get(&backend).map(|s| (**s.snapshot.load()).clone())
    }

    pub fn locate(&self, kind: &str, name: &str) -> Vec<ResourceLocation> {
        self.resource_index
            .load()
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Only the owning probe task for a given backend ever calls this, so a
    /// plain load-then-store is enough to compute the next state from the
    /// prior snapshot without a separate failure counter.
    fn record(&self, backend: BackendId, success: bool, now_ts: i64) {
        let Some(state) = self.states.get(&backend) else {
            return;
        };

        let prior = state.snapshot.load();
        let next_status = if success {
            PulseStatus::Healthy
        } else {
            match prior.status {
                PulseStatus::Healthy => PulseStatus::Degraded,
                PulseStatus::Degraded | PulseStatus::Disconnected => PulseStatus::Disconnected,
            }
        };

        state.snapshot.store(Arc::new(PulseSnapshot {
            status: next_status,
            last_check_ts: now_ts,
        }));
    }
}

/// Probe one backend once: a lightweight `*_ping`/list call with the pulse
/// timeout. Treated as success if the backend answers at all, even with an
/// application-level error — a dead backend is a transport failure, not a
/// tool that happens to reject arguments.
async fn probe(client: &BackendClient, backend: BackendId, timeout: Duration) -> bool {
    let ping_tool = match backend {
        BackendId::Docker => "docker_ping",
        BackendId::LocalK8s => "local_k8s_ping",
        BackendId::RemoteK8s => "remote_k8s_ping",
    };
    matches!(
        tokio::time::timeout(
            timeout,
            client.call_tool(backend, ping_tool, serde_json::json!({})),
        )
        .await,
        Ok(Ok(_)) | Ok(Err(crate::errors::DispatchError::Backend { .. }))
    )
}

/// Spawn the staggered background probe loop. Runs until the process exits;
/// there is no explicit shutdown handle because the monitor has no
/// in-flight work worth draining.
pub fn spawn(
    monitor: Arc<PulseMonitor>,
    client: Arc<BackendClient>,
    interval: Duration,
    timeout: Duration,
    now_fn: impl Fn() -> i64 + Send + Sync + 'static,
) {
    for (stagger_index, backend) in BackendId::ALL.into_iter().enumerate() {
        let monitor = monitor.clone();
        let client = client.clone();
        let now_fn_clone = std::sync::Arc::new(now_fn);
        let now_fn = now_fn_clone.clone();
        tokio::spawn(async move {
            let stagger = interval / (BackendId::ALL.len() as u32).max(1) * stagger_index as u32;
            tokio::time::sleep(stagger).await;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let start = Instant::now();
                let success = probe(&client, backend, timeout).await;
                let _elapsed = start.elapsed();
                monitor.record(backend, success, now_fn());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_healthy() {
        let monitor = PulseMonitor::new(0);
        assert_eq!(monitor.status(BackendId::Docker), PulseStatus::Healthy);
    }

    #[test]
    fn test_single_failure_degrades() {
        let monitor = PulseMonitor::new(0);
        monitor.record(BackendId::Docker, false, 1);
        assert_eq!(monitor.status(BackendId::Docker), PulseStatus::Degraded);
    }

    #[test]
    fn test_second_consecutive_failure_disconnects() {
        let monitor = PulseMonitor::new(0);
        monitor.record(BackendId::Docker, false, 1);
        monitor.record(BackendId::Docker, false, 2);
        assert_eq!(monitor.status(BackendId::Docker), PulseStatus::Disconnected);
    }

    #[test]
    fn test_success_resets_to_healthy_from_any_state() {
        let monitor = PulseMonitor::new(0);
        monitor.record(BackendId::Docker, false, 1);
        monitor.record(BackendId::Docker, false, 2);
        assert_eq!(monitor.status(BackendId::Docker), PulseStatus::Disconnected);
        monitor.record(BackendId::Docker, true, 3);
        assert_eq!(monitor.status(BackendId::Docker), PulseStatus::Healthy);
    }

    #[test]
    fn test_backends_are_independent() {
        let monitor = PulseMonitor::new(0);
        monitor.record(BackendId::Docker, false, 1);
        assert_eq!(monitor.status(BackendId::Docker), PulseStatus::Degraded);
        assert_eq!(monitor.status(BackendId::LocalK8s), PulseStatus::Healthy);
    }

    #[test]
    fn test_locate_returns_empty_when_unknown() {
        let monitor = PulseMonitor::new(0);
        assert!(monitor.locate("pod", "web-1").is_empty());
    }
}
