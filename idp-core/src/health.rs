//! MCP Health Checker (C2): periodic liveness probe gating tool availability.
//!
//! Grounded in `original_source/.../agent/react_agent/health_checker.py`'s
//! `MCPHealthChecker`: `{healthy, last_check, tools_count, error}` state,
//! `should_check_health(interval)` staleness gate, `set_unhealthy`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AgentError;
use crate::state::ToolSpec;

/// Abstraction over "the remote tool-server aggregator" (spec glossary: MCP
/// aggregator); `ToolRegistry`-backed in production, mocked in tests.
#[async_trait]
pub trait ToolLister: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError>;
}

#[derive(Debug, Clone)]
pub struct Health {
    pub healthy: bool,
    pub last_check_ts: Option<Instant>,
    pub tools_count: usize,
    pub error: Option<String>,
}

impl Default for Health {
    fn default() -> Self {
        Health {
            healthy: false,
            last_check_ts: None,
            tools_count: 0,
            error: None,
        }
    }
}

/// Liveness tracker for the tool aggregator (spec §4.2 state machine:
/// `Unknown -> Healthy | Unhealthy`, `Unhealthy -> Healthy` only on a
/// successful check).
pub struct HealthChecker {
    lister: std::sync::Arc<dyn ToolLister>,
    timeout: Duration,
    state: Mutex<Health>,
}

impl HealthChecker {
    pub fn new(lister: std::sync::Arc<dyn ToolLister>, timeout: Duration) -> Self {
        HealthChecker {
            lister,
            timeout,
            state: Mutex::new(Health::default()),
        }
    }

    /// Runs a check against the aggregator, updating and returning the new state.
    pub async fn force_check(&self) -> Health {
        let outcome = tokio::time::timeout(self.timeout, self.lister.list_tools()).await;
        let health = match outcome {
            Ok(Ok(tools)) => Health {
                healthy: !tools.is_empty(),
                last_check_ts: Some(Instant::now()),
                tools_count: tools.len(),
                error: None,
            },
            Ok(Err(err)) => Health {
                healthy: false,
                last_check_ts: Some(Instant::now()),
                tools_count: 0,
                error: Some(err.to_string()),
            },
            Err(_) => Health {
                healthy: false,
                last_check_ts: Some(Instant::now()),
                tools_count: 0,
                error: Some("health check timed out".to_string()),
            },
        };
        *self.state.lock().expect("health state lock poisoned") = health.clone();
        health
    }

    /// True iff the aggregator is currently believed healthy. Does not
    /// trigger a re-check; use [`Self::is_healthy_within`] for the
    /// staleness-aware variant engines should call before offering tools.
    pub fn is_healthy(&self) -> bool {
        self.state.lock().expect("health state lock poisoned").healthy
    }

    /// Re-checks if the last check is older than `max_staleness`, matching
    /// `should_check_health` (SPEC_FULL §4 C2 supplement), then returns
    /// whether the (possibly refreshed) state is healthy.
    pub async fn is_healthy_within(&self, max_staleness: Duration) -> bool {
        if self.should_check_health(max_staleness) {
            self.force_check().await;
        }
        self.is_healthy()
    }

    fn should_check_health(&self, max_staleness: Duration) -> bool {
        let state = self.state.lock().expect("health state lock poisoned");
        match state.last_check_ts {
            None => true,
            Some(ts) => ts.elapsed() >= max_staleness,
        }
    }

    pub fn tools_available(&self) -> usize {
        self.state.lock().expect("health state lock poisoned").tools_count
    }

    /// Marks the state unhealthy without performing a network check (used by
    /// the engine when it independently detects aggregator failure).
    pub fn set_unhealthy(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().expect("health state lock poisoned");
        *state = Health {
            healthy: false,
            last_check_ts: Some(Instant::now()),
            tools_count: 0,
            error: Some(reason.into()),
        };
    }

    pub fn snapshot(&self) -> Health {
        self.state.lock().expect("health state lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedLister(Vec<ToolSpec>);

    #[async_trait]
    impl ToolLister for FixedLister {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLister;

    #[async_trait]
    impl ToolLister for FailingLister {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
            Err(AgentError::TransportError("connection refused".into()))
        }
    }

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({}),
            supports_agent_context: false,
        }
    }

    /// **Scenario**: a check that returns ≥1 tool is healthy.
    #[tokio::test]
    async fn check_with_tools_is_healthy() {
        let checker = HealthChecker::new(
            std::sync::Arc::new(FixedLister(vec![spec("echo")])),
            Duration::from_secs(1),
        );
        let health = checker.force_check().await;
        assert!(health.healthy);
        assert_eq!(health.tools_count, 1);
    }

    /// **Scenario**: a check that returns zero tools is unhealthy.
    #[tokio::test]
    async fn check_with_no_tools_is_unhealthy() {
        let checker = HealthChecker::new(std::sync::Arc::new(FixedLister(vec![])), Duration::from_secs(1));
        let health = checker.force_check().await;
        assert!(!health.healthy);
    }

    /// **Scenario**: a failing aggregator call produces an unhealthy state with the error recorded.
    #[tokio::test]
    async fn check_with_transport_error_is_unhealthy_with_message() {
        let checker = HealthChecker::new(std::sync::Arc::new(FailingLister), Duration::from_secs(1));
        let health = checker.force_check().await;
        assert!(!health.healthy);
        assert!(health.error.is_some());
    }

    /// **Scenario**: set_unhealthy overrides a previously healthy state.
    #[tokio::test]
    async fn set_unhealthy_overrides_healthy_state() {
        let checker = HealthChecker::new(
            std::sync::Arc::new(FixedLister(vec![spec("echo")])),
            Duration::from_secs(1),
        );
        checker.force_check().await;
        assert!(checker.is_healthy());
        checker.set_unhealthy("aggregator restarted");
        assert!(!checker.is_healthy());
    }

    /// **Scenario**: is_healthy_within triggers a fresh check when the prior one is stale.
    #[tokio::test]
    async fn is_healthy_within_rechecks_when_stale() {
        let checker = HealthChecker::new(
            std::sync::Arc::new(FixedLister(vec![spec("echo")])),
            Duration::from_secs(1),
        );
        assert!(checker.is_healthy_within(Duration::from_secs(0)).await);
        assert!(checker.snapshot().last_check_ts.is_some());
    }
}
