//! Health reporting for the model service

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::model::Device;
use crate::state::{LoadPhase, ServiceState};

/// Health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,

    pub model_loaded: bool,

    pub device: Device,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Load state, absent when the probe itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LoadPhase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub uptime_secs: u64,

    /// Unix timestamp
    pub timestamp: i64,
}

/// Builds health reports from the service state. Never triggers a model load.
pub struct HealthChecker {
    start_time: Instant,
    state: Arc<ServiceState>,
    probe_timeout: Duration,
}

impl HealthChecker {
    /// Create a health checker with a 2-second probe timeout
    pub fn new(state: Arc<ServiceState>) -> Self {
        Self::with_probe_timeout(state, Duration::from_secs(2))
    }

    pub fn with_probe_timeout(state: Arc<ServiceState>, probe_timeout: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            state,
            probe_timeout,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Current health. Failures to read the state are reported in-band.
    pub async fn check_health(&self) -> HealthReport {
        let uptime_secs = self.uptime_secs();
        let timestamp = chrono::Utc::now().timestamp();

        match tokio::time::timeout(self.probe_timeout, self.state.snapshot()).await {
            Ok(snapshot) => {
                debug!(state = snapshot.phase.as_str(), "Health probe");
                let status = if snapshot.phase == LoadPhase::Failed {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Healthy
                };
                HealthReport {
                    status,
                    model_loaded: snapshot.model_loaded(),
                    device: snapshot.device,
                    model_name: Some(snapshot.model_name),
                    state: Some(snapshot.phase),
                    error: snapshot.last_error,
                    uptime_secs,
                    timestamp,
                }
            }
            Err(_) => {
                warn!(timeout_ms = self.probe_timeout.as_millis() as u64, "Health probe timed out");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    model_loaded: false,
                    device: self.state.preferred_device(),
                    model_name: Some(self.state.model_name().to_string()),
                    state: None,
                    error: Some("Health check timeout".to_string()),
                    uptime_secs,
                    timestamp,
                }
            }
        }
    }

    /// Simple liveness check
    pub fn liveness(&self) -> bool {
        true
    }

    /// Ready once the model is loaded
    pub async fn readiness(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.state.model_loaded()).await {
            Ok(loaded) => loaded,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputSpec, MockModelLoader};

    fn checker() -> (Arc<ServiceState>, HealthChecker) {
        let loader = Arc::new(MockModelLoader::new("mock-clip", InputSpec::square(8), 16));
        let state = Arc::new(ServiceState::new(loader, true));
        (state.clone(), HealthChecker::new(state))
    }

    #[tokio::test]
    async fn test_health_before_load() {
        let (_state, checker) = checker();
        let health = checker.check_health().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(!health.model_loaded);
        assert_eq!(health.device, Device::Cpu);
        assert_eq!(health.state, Some(LoadPhase::Unloaded));
        assert!(health.error.is_none());
        assert!(!checker.readiness().await);
    }

    #[tokio::test]
    async fn test_health_after_load() {
        let (state, checker) = checker();
        state.ensure_loaded().await.unwrap();

        let health = checker.check_health().await;
        assert!(health.model_loaded);
        assert_eq!(health.model_name.as_deref(), Some("mock-clip"));
        assert!(checker.readiness().await);
    }

    #[tokio::test]
    async fn test_health_serialization_omits_empty_error() {
        let (_state, checker) = checker();
        let json = serde_json::to_value(checker.check_health().await).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["device"], "cpu");
        assert_eq!(json["state"], "unloaded");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_liveness() {
        let (_state, checker) = checker();
        assert!(checker.liveness());
    }
}
