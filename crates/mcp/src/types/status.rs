//! Status types for provider connections.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Connection state of a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Connected and serving its catalog.
    Running,
    /// Not connected.
    Stopped,
    /// Launch or handshake in progress.
    Starting,
    /// Skipped or failed at launch.
    Error,
}

impl ProviderStatus {
    pub fn display(&self) -> &'static str {
        match self {
            ProviderStatus::Running => "Running",
            ProviderStatus::Stopped => "Stopped",
            ProviderStatus::Starting => "Starting",
            ProviderStatus::Error => "Error",
        }
    }
}

/// Health snapshot of a provider connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the provider is healthy.
    pub healthy: bool,

    /// Last time the snapshot changed.
    pub last_check: Option<SystemTime>,

    /// Number of consecutive failures.
    pub failure_count: u32,

    /// Last error message.
    pub last_error: Option<String>,
}

impl HealthStatus {
    /// Mark the provider as healthy.
    pub fn mark_healthy(&mut self) {
        self.healthy = true;
        self.failure_count = 0;
        self.last_error = None;
        self.last_check = Some(SystemTime::now());
    }

    /// Mark the provider as unhealthy with an error.
    pub fn mark_unhealthy(&mut self, error: String) {
        self.healthy = false;
        self.failure_count += 1;
        self.last_error = Some(error);
        self.last_check = Some(SystemTime::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhealthy_marks_accumulate_until_healthy() {
        let mut health = HealthStatus::default();
        health.mark_unhealthy("spawn failed".into());
        health.mark_unhealthy("spawn failed".into());
        assert_eq!(health.failure_count, 2);
        assert_eq!(health.last_error.as_deref(), Some("spawn failed"));

        health.mark_healthy();
        assert!(health.healthy);
        assert_eq!(health.failure_count, 0);
        assert!(health.last_error.is_none());
    }
}
