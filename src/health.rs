use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub state: HealthState,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub components: Vec<ComponentHealth>,
}

/// Aggregated readiness probe over external dependencies.
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: Option<PgPool>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<PgPool>) -> Self {
        Self { db_pool }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut components = Vec::new();

        if let Some(pool) = self.db_pool.as_ref() {
            let start = Instant::now();
            let result = crate::database::health_check(pool).await;
            let elapsed = start.elapsed().as_millis() as u64;
            components.push(match result {
                Ok(()) => ComponentHealth {
                    name: "database".to_string(),
                    state: HealthState::Healthy,
                    response_time_ms: elapsed,
                    error: None,
                },
                Err(e) => ComponentHealth {
                    name: "database".to_string(),
                    state: HealthState::Unhealthy,
                    response_time_ms: elapsed,
                    error: Some(e.to_string()),
                },
            });
        }

        let status = if components
            .iter()
            .any(|c| c.state == HealthState::Unhealthy)
        {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        };

        HealthStatus { status, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_dependencies_means_healthy() {
        let checker = HealthChecker::new(None);
        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Healthy);
        assert!(status.components.is_empty());
    }
}
