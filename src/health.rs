//! `/health`: store reachability, configured gateways and the settlement backlog.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::error;

use crate::database::repository::TransactionStore;
use crate::payments::types::ProviderName;

const STORE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Open transactions past this count turn the backlog check into a warning.
const BACKLOG_WARNING: usize = 500;

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: BTreeMap<&'static str, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl ComponentState {
    fn implies(self) -> HealthState {
        match self {
            ComponentState::Up => HealthState::Healthy,
            ComponentState::Warning => HealthState::Degraded,
            ComponentState::Down => HealthState::Unhealthy,
        }
    }
}

impl ComponentHealth {
    fn new(status: ComponentState, details: Option<String>) -> Self {
        Self {
            status,
            response_time_ms: None,
            details,
        }
    }
}

impl HealthStatus {
    fn record(&mut self, name: &'static str, check: ComponentHealth) {
        self.status = self.status.max(check.status.implies());
        self.checks.insert(name, check);
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn TransactionStore>,
    gateways: Vec<ProviderName>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn TransactionStore>, gateways: Vec<ProviderName>) -> Self {
        Self { store, gateways }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health = HealthStatus {
            status: HealthState::Healthy,
            checks: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        };

        let started = Instant::now();
        let probe = timeout(
            STORE_PROBE_TIMEOUT,
            self.store.list_awaiting_confirmation(BACKLOG_WARNING as i64 + 1),
        )
        .await;
        match probe {
            Ok(Ok(open)) => {
                health.record(
                    "store",
                    ComponentHealth {
                        response_time_ms: Some(started.elapsed().as_millis()),
                        ..ComponentHealth::new(ComponentState::Up, None)
                    },
                );
                let backlog = if open.len() > BACKLOG_WARNING {
                    ComponentHealth::new(
                        ComponentState::Warning,
                        Some(format!(
                            "more than {} transactions awaiting confirmation",
                            BACKLOG_WARNING
                        )),
                    )
                } else {
                    ComponentHealth::new(ComponentState::Up, Some(format!("{} awaiting", open.len())))
                };
                health.record("backlog", backlog);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Store health check failed");
                health.record("store", ComponentHealth::new(ComponentState::Down, Some(e.to_string())));
            }
            Err(_) => {
                error!("Store health check timed out");
                health.record(
                    "store",
                    ComponentHealth::new(ComponentState::Down, Some("timeout".to_string())),
                );
            }
        }

        let gateways = if self.gateways.is_empty() {
            ComponentHealth::new(
                ComponentState::Warning,
                Some("no gateway configured".to_string()),
            )
        } else {
            let names: Vec<&str> = self.gateways.iter().map(|g| g.as_str()).collect();
            ComponentHealth::new(ComponentState::Up, Some(names.join(",")))
        };
        health.record("gateways", gateways);

        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;

    #[tokio::test]
    async fn memory_store_with_gateways_is_healthy() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryStore::new()),
            vec![ProviderName::Feexpay, ProviderName::LegacyCashier],
        );
        let status = checker.check_health().await;
        assert!(status.is_healthy());
        assert_eq!(status.checks["store"].status, ComponentState::Up);
        assert_eq!(status.checks["backlog"].details.as_deref(), Some("0 awaiting"));
        assert_eq!(
            status.checks["gateways"].details,
            Some(format!(
                "{},{}",
                ProviderName::Feexpay.as_str(),
                ProviderName::LegacyCashier.as_str()
            ))
        );
    }

    #[tokio::test]
    async fn no_gateway_degrades() {
        let checker = HealthChecker::new(Arc::new(InMemoryStore::new()), Vec::new());
        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["gateways"].status, ComponentState::Warning);
    }

    #[test]
    fn worst_component_wins() {
        let mut status = HealthStatus {
            status: HealthState::Healthy,
            checks: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        };
        status.record("a", ComponentHealth::new(ComponentState::Down, None));
        status.record("b", ComponentHealth::new(ComponentState::Warning, None));
        assert_eq!(status.status, HealthState::Unhealthy);
    }
}
