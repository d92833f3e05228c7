//! Health waiter (C8): layered probe hierarchy (container status -> declared
//! healthcheck -> endpoint probe) with bounded fan-out across services.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::platform::Capabilities;

/// Declared-healthcheck state as reported by the runtime's JSON inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredHealth {
    /// No healthcheck declared for this container.
    None,
    /// Healthcheck declared but still in its start period.
    Starting,
    /// Healthcheck passing.
    Healthy,
    /// Healthcheck failing.
    Unhealthy,
}

/// Per-service result of the layered probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHealth {
    /// Service name as it appears in the compose document.
    pub service: String,
    /// Whether the container is reported "running".
    pub running: bool,
    /// Declared healthcheck state, if any.
    pub declared: DeclaredHealth,
    /// Whether the service's endpoint probe (if defined) succeeded.
    pub endpoint_ok: Option<bool>,
}

impl ServiceHealth {
    /// Success rule: healthy, or no declared health and running and endpoint (if any)
    /// succeeds.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        match self.declared {
            DeclaredHealth::Healthy => true,
            DeclaredHealth::Unhealthy => false,
            DeclaredHealth::Starting => false,
            DeclaredHealth::None => self.running && self.endpoint_ok.unwrap_or(true),
        }
    }
}

/// Allow-listed endpoint paths a service may be probed on.
const ENDPOINT_ALLOW_LIST: &[&str] = &["/health", "/api/health", "/-/ready", "/api/v1/targets"];

/// Maps a service name to the `(port, path)` endpoint to probe, if one applies. Only
/// paths from `ENDPOINT_ALLOW_LIST` are ever used.
fn endpoint_for(service: &str) -> Option<(u16, &'static str)> {
    match service {
        "app" => Some((8080, "/health")),
        "grafana" => Some((3000, "/api/health")),
        "prometheus" => Some((9090, "/-/ready")),
        _ => None,
    }
}

async fn probe_endpoint(host: &str, port: u16, path: &str, timeout: Duration) -> bool {
    debug_assert!(ENDPOINT_ALLOW_LIST.contains(&path));
    let addr = format!("{host}:{port}");
    let connect = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await;
    connect.is_ok_and(|r| r.is_ok())
}

async fn container_running(capabilities: &Capabilities, container_name: &str) -> Result<bool> {
    let output = capabilities
        .compose(&["ps", "--format", "json", container_name])
        .await?;
    if !output.status.success() {
        return Ok(false);
    }
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if let Some(state) = value.get("State").and_then(Value::as_str) {
                return Ok(state.eq_ignore_ascii_case("running"));
            }
        }
    }
    Ok(false)
}

async fn declared_health(capabilities: &Capabilities, container_name: &str) -> DeclaredHealth {
    let Ok(output) = capabilities.compose(&["ps", "--format", "json", container_name]).await else {
        return DeclaredHealth::None;
    };
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if let Some(health) = value.get("Health").and_then(Value::as_str) {
                return match health {
                    "starting" => DeclaredHealth::Starting,
                    "healthy" => DeclaredHealth::Healthy,
                    "unhealthy" => DeclaredHealth::Unhealthy,
                    _ => DeclaredHealth::None,
                };
            }
        }
    }
    DeclaredHealth::None
}

async fn probe_one(capabilities: Capabilities, service: String, container_name: String) -> ServiceHealth {
    let running = container_running(&capabilities, &container_name).await.unwrap_or(false);
    let declared = declared_health(&capabilities, &container_name).await;
    let endpoint_ok = match endpoint_for(&service) {
        Some((port, path)) => Some(probe_endpoint("127.0.0.1", port, path, Duration::from_secs(2)).await),
        None => None,
    };
    ServiceHealth {
        service,
        running,
        declared,
        endpoint_ok,
    }
}

/// Tail of a service's logs for failure reporting.
async fn tail_logs(capabilities: &Capabilities, container_name: &str, lines: u32) -> String {
    capabilities
        .compose(&["logs", "--tail", &lines.to_string(), container_name])
        .await
        .map(|out| String::from_utf8_lossy(&out.stdout).into_owned())
        .unwrap_or_default()
}

/// Wait for every service in `containers` (service name -> container name) to report
/// healthy, polling at `interval` until `startup_deadline` elapses. Splunk-named
/// services receive a one-shot grace sleep before their first poll, reflecting their
/// typical boot time.
pub async fn wait_health(
    capabilities: &Capabilities,
    containers: &BTreeMap<String, String>,
    startup_deadline: Duration,
    poll_interval: Duration,
    splunk_grace: Duration,
) -> Result<BTreeMap<String, ServiceHealth>> {
    if containers.values().any(|name| name.contains("splunk")) {
        tokio::time::sleep(splunk_grace).await;
    }

    let deadline = Instant::now() + startup_deadline;
    let permits = std::cmp::min(8, containers.len().max(1));
    let semaphore = Arc::new(Semaphore::new(permits));
    let capabilities = *capabilities;

    loop {
        let mut handles = Vec::new();
        for (service, container_name) in containers {
            let semaphore = semaphore.clone();
            let service = service.clone();
            let container_name = container_name.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                probe_one(capabilities, service, container_name).await
            }));
        }

        let mut results = BTreeMap::new();
        for handle in handles {
            if let Ok(health) = handle.await {
                results.insert(health.service.clone(), health);
            }
        }

        if results.values().all(ServiceHealth::is_healthy) {
            return Ok(results);
        }

        let timed_out = Instant::now() >= deadline;
        let any_unhealthy = results.values().any(|h| h.declared == DeclaredHealth::Unhealthy);
        if timed_out || any_unhealthy {
            return Err(report_failure(&capabilities, containers, &results).await);
        }

        tokio::time::sleep(poll_interval).await;
    }
}

async fn report_failure(
    capabilities: &Capabilities,
    containers: &BTreeMap<String, String>,
    results: &BTreeMap<String, ServiceHealth>,
) -> OrchestratorError {
    let mut reasons = Vec::new();
    for (service, health) in results {
        if !health.is_healthy() {
            let container_name = containers.get(service).cloned().unwrap_or_default();
            let tail = tail_logs(capabilities, &container_name, 20).await;
            warn!(service, "unhealthy at deadline, tail:\n{tail}");
            reasons.push(format!(
                "{service}: running={} declared={:?}",
                health.running, health.declared
            ));
        }
    }
    if reasons.is_empty() {
        reasons.push("health wait deadline exceeded with no service status available".to_string());
    }
    OrchestratorError::insufficient(reasons)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_declared_state_wins() {
        let health = ServiceHealth {
            service: "app".into(),
            running: true,
            declared: DeclaredHealth::Healthy,
            endpoint_ok: Some(false),
        };
        assert!(health.is_healthy());
    }

    #[test]
    fn unhealthy_declared_state_fails_regardless_of_running() {
        let health = ServiceHealth {
            service: "app".into(),
            running: true,
            declared: DeclaredHealth::Unhealthy,
            endpoint_ok: Some(true),
        };
        assert!(!health.is_healthy());
    }

    #[test]
    fn no_declared_health_falls_back_to_running_and_endpoint() {
        let passes = ServiceHealth {
            service: "app".into(),
            running: true,
            declared: DeclaredHealth::None,
            endpoint_ok: Some(true),
        };
        assert!(passes.is_healthy());

        let fails_endpoint = ServiceHealth {
            service: "app".into(),
            running: true,
            declared: DeclaredHealth::None,
            endpoint_ok: Some(false),
        };
        assert!(!fails_endpoint.is_healthy());

        let no_endpoint_defined = ServiceHealth {
            service: "redis".into(),
            running: true,
            declared: DeclaredHealth::None,
            endpoint_ok: None,
        };
        assert!(no_endpoint_defined.is_healthy());
    }

    #[test]
    fn starting_state_is_not_yet_healthy() {
        let health = ServiceHealth {
            service: "splunk_idx1".into(),
            running: true,
            declared: DeclaredHealth::Starting,
            endpoint_ok: None,
        };
        assert!(!health.is_healthy());
    }

    #[test]
    fn endpoint_allow_list_is_exhaustive_for_known_services() {
        for service in ["app", "grafana", "prometheus"] {
            let (_, path) = endpoint_for(service).unwrap();
            assert!(ENDPOINT_ALLOW_LIST.contains(&path));
        }
        assert!(endpoint_for("redis").is_none());
    }
}
