// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::application::error::ServiceError;
use crate::domain::identity_config::OperationsConfig;
use crate::domain::user::UserId;

/// Per-call context handed in by the (already authenticated) caller.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub actor_id: UserId,
    pub correlation_id: Option<String>,
    pub deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new(actor_id: impl Into<UserId>) -> Self {
        Self {
            actor_id: actor_id.into(),
            correlation_id: None,
            deadline: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Run `operation` under the caller's deadline, or `default_timeout` from
    /// now when none was given. Steps already committed when the deadline
    /// fires stay committed.
    pub async fn run<T, F>(&self, default_timeout: Duration, operation: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + default_timeout);
        match tokio::time::timeout_at(deadline, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    actor = %self.actor_id,
                    correlation_id = self.correlation_id.as_deref().unwrap_or("-"),
                    "Operation exceeded its deadline"
                );
                Err(ServiceError::Timeout)
            }
        }
    }
}

/// Knobs shared by the service facades.
#[derive(Debug, Clone, Copy)]
pub struct OperationSettings {
    pub timeout: Duration,
    pub max_update_attempts: u32,
}

impl Default for OperationSettings {
    fn default() -> Self {
        OperationSettings::from(&OperationsConfig::default())
    }
}

impl From<&OperationsConfig> for OperationSettings {
    fn from(config: &OperationsConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_update_attempts: config.max_update_attempts.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_result_within_deadline() {
        let ctx = OperationContext::new("alice").with_correlation_id("req-1");
        let value = ctx
            .run(Duration::from_secs(1), async { Ok::<_, ServiceError>(7) })
            .await;
        assert_eq!(value.ok(), Some(7));
        assert_eq!(ctx.correlation_id(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = OperationContext::new("alice").with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(Duration::from_secs(10), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ServiceError>(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout)));
    }
}
