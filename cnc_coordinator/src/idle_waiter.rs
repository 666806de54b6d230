use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};
use utilities::{cancel::CancelToken, clock::Clock};

use crate::{models::AxisId, registry::PositionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    Idle,
    TimedOut,
    Cancelled,
}

/// Polls the controller state of an axis until it reports idle.
pub struct IdleWaiter {
    registry: PositionRegistry,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl IdleWaiter {
    pub fn new(registry: PositionRegistry, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            registry,
            clock,
            poll_interval,
        }
    }

    /// A timeout is not an error: the wait simply ends with [`IdleOutcome::TimedOut`].
    pub async fn wait(&self, axis: &AxisId, timeout: Duration, cancel: &CancelToken) -> IdleOutcome {
        let started = self.clock.now();

        loop {
            if cancel.is_cancelled() {
                info!(%axis, "Idle wait cancelled");
                return IdleOutcome::Cancelled;
            }

            if self.registry.is_idle(axis) {
                debug!(%axis, elapsed = ?self.clock.now().saturating_duration_since(started), "Controller idle");
                return IdleOutcome::Idle;
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= timeout {
                warn!(
                    %axis,
                    ?timeout,
                    state = ?self.registry.state(axis),
                    "Timed out waiting for controller to become idle"
                );
                return IdleOutcome::TimedOut;
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.clock.sleep(self.poll_interval) => {}
            }
        }
    }
}
