//! Measurement coordinator.
//!
//! Resolves the geometry of a registered step, waiting out anchors that have
//! not mounted yet and anchors that have mounted but not been laid out. The
//! registry is re-read on every attempt so a registration that arrives while
//! we wait is picked up.

use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::MeasurementConfig;
use crate::error::TourError;
use crate::steps::{StepDescriptor, StepLayout, StepRegistry};

/// Retry budget for a single measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementPolicy {
    /// Overall time allowed before the target is declared unavailable
    pub timeout: Duration,
    /// First retry delay
    pub backoff: Duration,
    /// Upper bound for the exponential retry delay
    pub max_backoff: Duration,
}

impl Default for MeasurementPolicy {
    fn default() -> Self {
        Self::from(&MeasurementConfig::default())
    }
}

impl From<&MeasurementConfig> for MeasurementPolicy {
    fn from(config: &MeasurementConfig) -> Self {
        let backoff_ms = config.backoff_ms.max(1);
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            backoff: Duration::from_millis(backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(backoff_ms)),
        }
    }
}

/// A resolved step: the descriptor as currently registered and its geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Measured {
    pub descriptor: StepDescriptor,
    pub layout: StepLayout,
}

/// Why an attempt did not produce a layout yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
enum NotReady {
    #[error("anchor not registered")]
    Unregistered,
    #[error("anchor not laid out")]
    Unmeasured,
}

#[derive(Debug, Clone)]
pub struct MeasurementCoordinator {
    registry: StepRegistry,
    policy: MeasurementPolicy,
}

impl MeasurementCoordinator {
    pub fn new(registry: StepRegistry, policy: MeasurementPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Build the retry strategy.
    ///
    /// Every delay is at least `backoff`, so this many attempts always
    /// outlasts the timeout envelope.
    fn retry_strategy(&self) -> ExponentialBuilder {
        let attempts = self.policy.timeout.as_millis() / self.policy.backoff.as_millis().max(1);
        ExponentialBuilder::default()
            .with_min_delay(self.policy.backoff)
            .with_max_delay(self.policy.max_backoff)
            .with_max_times(attempts as usize + 1)
    }

    fn attempt(&self, tour_id: &str, step_id: &str) -> Result<Measured, NotReady> {
        let step = self
            .registry
            .lookup(tour_id, step_id)
            .ok_or(NotReady::Unregistered)?;

        match step.capability.measure() {
            Some(layout) if layout.is_resolved() => Ok(Measured {
                descriptor: step.descriptor,
                layout,
            }),
            _ => Err(NotReady::Unmeasured),
        }
    }

    /// Resolve the step's current geometry, or `TargetUnavailable` once the
    /// timeout elapses without a laid-out anchor.
    #[instrument(skip(self))]
    pub async fn measure(&self, tour_id: &str, step_id: &str) -> Result<Measured, TourError> {
        let op = || async { self.attempt(tour_id, step_id) };

        let retried = op
            .retry(self.retry_strategy())
            .notify(|reason: &NotReady, dur: Duration| {
                debug!(reason = %reason, delay = ?dur, "step not ready, retrying");
            });

        match tokio::time::timeout(self.policy.timeout, retried).await {
            Ok(Ok(measured)) => Ok(measured),
            Ok(Err(reason)) => {
                debug!(reason = %reason, "retries exhausted");
                Err(self.unavailable(tour_id, step_id))
            }
            Err(_) => {
                debug!(timeout = ?self.policy.timeout, "measurement timed out");
                Err(self.unavailable(tour_id, step_id))
            }
        }
    }

    fn unavailable(&self, tour_id: &str, step_id: &str) -> TourError {
        TourError::TargetUnavailable {
            tour_id: tour_id.to_string(),
            step_id: step_id.to_string(),
        }
    }
}
