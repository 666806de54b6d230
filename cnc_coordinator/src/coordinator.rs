use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use utilities::{
    cancel::CancelToken,
    clock::{Clock, TokioClock},
};

use crate::{
    dispatcher::CommandDispatcher,
    error::MovementError,
    idle_waiter::{IdleOutcome, IdleWaiter},
    models::{
        AxisId, LocationTarget, MoveCompletion, MovementDefaults, MovementOptions, Position,
        RelativeMove,
    },
    registry::{MotionLease, PositionRegistry},
};

/// Per-axis relative delta, rounded to two decimals before it is sent anywhere.
pub fn calculate_movement_deltas(current: Position, target: Position) -> Position {
    (target - current).round_to_hundredths()
}

/// Turns absolute position requests for one axis into relative move commands.
///
/// The single-flight lock lives in the shared [`PositionRegistry`], so two
/// coordinators bound to the same axis still exclude each other.
pub struct MovementCoordinator {
    axis: AxisId,
    registry: PositionRegistry,
    dispatcher: Arc<dyn CommandDispatcher>,
    idle_waiter: IdleWaiter,
    defaults: MovementDefaults,
    error: watch::Sender<Option<String>>,
}

impl MovementCoordinator {
    pub fn new(
        axis: AxisId,
        registry: PositionRegistry,
        dispatcher: Arc<dyn CommandDispatcher>,
        defaults: MovementDefaults,
    ) -> Self {
        Self::with_clock(axis, registry, dispatcher, Arc::new(TokioClock), defaults)
    }

    pub fn with_clock(
        axis: AxisId,
        registry: PositionRegistry,
        dispatcher: Arc<dyn CommandDispatcher>,
        clock: Arc<dyn Clock>,
        defaults: MovementDefaults,
    ) -> Self {
        let idle_waiter = IdleWaiter::new(registry.clone(), clock, defaults.idle_poll_interval);
        let (error, _) = watch::channel(None);

        Self {
            axis,
            registry,
            dispatcher,
            idle_waiter,
            defaults,
            error,
        }
    }

    pub fn axis(&self) -> &AxisId {
        &self.axis
    }

    pub fn get_current_position(&self) -> Position {
        self.registry.pos(&self.axis)
    }

    pub fn is_moving(&self) -> bool {
        self.registry.is_busy(&self.axis)
    }

    pub fn watch_is_moving(&self) -> watch::Receiver<bool> {
        self.registry.watch_busy(&self.axis)
    }

    /// Message of the last failed operation, cleared when a new movement starts.
    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<String>> {
        self.error.subscribe()
    }

    pub fn can_execute_movement(&self) -> bool {
        self.registry.is_idle(&self.axis) && !self.is_moving()
    }

    pub async fn wait_for_cnc_idle(&self, timeout: Duration) -> IdleOutcome {
        self.idle_waiter
            .wait(&self.axis, timeout, &CancelToken::new())
            .await
    }

    #[instrument(skip(self, target, options), fields(axis = %self.axis, target = %target))]
    pub async fn execute_movement_to_position(
        &self,
        target: &LocationTarget,
        options: MovementOptions,
    ) -> Result<MoveCompletion, MovementError> {
        self.error.send_replace(None);

        let lease = match self.acquire() {
            Ok(lease) => lease,
            Err(e) => return self.report(Err(e)),
        };

        let result = self.run_movement(&lease, target, options).await;
        drop(lease);

        self.report(result)
    }

    /// Runs the targets in order, each with the fixed sequence step timeout
    /// and an idle wait. The axis stays locked for the whole sequence.
    #[instrument(skip(self, targets, options), fields(axis = %self.axis, steps = targets.len()))]
    pub async fn execute_movement_sequence(
        &self,
        targets: &[LocationTarget],
        options: MovementOptions,
    ) -> Result<Vec<MoveCompletion>, MovementError> {
        self.error.send_replace(None);

        if targets.is_empty() {
            return self.report(Err(MovementError::EmptySequence {
                axis: self.axis.clone(),
            }));
        }

        let lease = match self.acquire() {
            Ok(lease) => lease,
            Err(e) => return self.report(Err(e)),
        };

        let result = self.run_sequence(&lease, targets, options).await;
        drop(lease);

        self.report(result)
    }

    /// Aborts motion on the axis. The movement lock is released and any
    /// pending idle wait cancelled before the abort request is sent, so a
    /// slow or failing hardware service cannot keep the axis marked as moving.
    #[instrument(skip(self), fields(axis = %self.axis))]
    pub async fn emergency_stop(&self) -> Result<(), MovementError> {
        warn!("Emergency stop requested");

        self.registry.force_release(&self.axis);
        let result = self.dispatcher.abort(&self.axis).await;

        self.report(result.map_err(|source| MovementError::Abort {
            axis: self.axis.clone(),
            source,
        }))
    }

    fn acquire(&self) -> Result<MotionLease, MovementError> {
        self.registry
            .try_acquire(&self.axis)
            .ok_or_else(|| MovementError::Busy {
                axis: self.axis.clone(),
            })
    }

    fn report<T>(&self, result: Result<T, MovementError>) -> Result<T, MovementError> {
        if let Err(e) = &result {
            error!("{}", e);
            self.error.send_replace(Some(e.to_string()));
        }
        result
    }

    async fn run_sequence(
        &self,
        lease: &MotionLease,
        targets: &[LocationTarget],
        options: MovementOptions,
    ) -> Result<Vec<MoveCompletion>, MovementError> {
        let step_options = MovementOptions {
            timeout: Some(self.defaults.sequence_step_timeout),
            wait_for_idle: true,
            ..options
        };

        let mut completions = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            if lease.is_cancelled() {
                return Err(MovementError::Aborted {
                    axis: self.axis.clone(),
                });
            }

            debug!(step = index + 1, %target, "Executing sequence step");
            let completion = self
                .run_movement(lease, target, step_options)
                .await
                .inspect_err(|_| {
                    warn!(
                        step = index + 1,
                        skipped = targets.len() - index - 1,
                        "Sequence step failed"
                    )
                })?;
            completions.push(completion);
        }

        info!(steps = completions.len(), "Sequence completed");
        Ok(completions)
    }

    async fn run_movement(
        &self,
        lease: &MotionLease,
        target: &LocationTarget,
        options: MovementOptions,
    ) -> Result<MoveCompletion, MovementError> {
        let current = self.registry.pos(&self.axis);
        let delta = calculate_movement_deltas(current, target.position);

        if delta.is_zero() {
            debug!(%current, "Already at target, nothing to dispatch");
            return Ok(MoveCompletion::NoDisplacement);
        }

        let feedrate = options
            .feedrate
            .or(target.feedrate)
            .unwrap_or(self.defaults.feedrate);

        info!(%current, %delta, feedrate, "Dispatching relative move");
        self.dispatcher
            .move_relative(RelativeMove::new(self.axis.clone(), delta, feedrate))
            .await
            .map_err(|source| MovementError::Movement {
                axis: self.axis.clone(),
                target: target.position,
                source,
            })?;

        if !options.wait_for_idle {
            return Ok(MoveCompletion::NotAwaited);
        }

        let timeout = options.timeout.unwrap_or(self.defaults.timeout);
        match self
            .idle_waiter
            .wait(&self.axis, timeout, lease.cancel_token())
            .await
        {
            IdleOutcome::Idle => Ok(MoveCompletion::Confirmed),
            IdleOutcome::TimedOut => Ok(MoveCompletion::Unconfirmed),
            IdleOutcome::Cancelled => Err(MovementError::Aborted {
                axis: self.axis.clone(),
            }),
        }
    }
}
