use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{info, warn};
use utilities::clock::{Clock, TokioClock};

use crate::{
    coordinator::MovementCoordinator,
    dispatcher::CommandDispatcher,
    models::{AxisId, MovementDefaults, PositionUpdate},
    registry::PositionRegistry,
};

/// Owns one [`MovementCoordinator`] per registered axis.
pub struct CoordinatorService {
    registry: PositionRegistry,
    dispatcher: Arc<dyn CommandDispatcher>,
    clock: Arc<dyn Clock>,
    defaults: MovementDefaults,
    coordinators: RwLock<HashMap<AxisId, Arc<MovementCoordinator>>>,
}

impl CoordinatorService {
    pub fn new(
        registry: PositionRegistry,
        dispatcher: Arc<dyn CommandDispatcher>,
        defaults: MovementDefaults,
    ) -> Self {
        Self::with_clock(registry, dispatcher, Arc::new(TokioClock), defaults)
    }

    pub fn with_clock(
        registry: PositionRegistry,
        dispatcher: Arc<dyn CommandDispatcher>,
        clock: Arc<dyn Clock>,
        defaults: MovementDefaults,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
            defaults,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &PositionRegistry {
        &self.registry
    }

    /// Registering an axis twice returns the existing coordinator.
    pub fn register_axis(&self, axis: &AxisId) -> Arc<MovementCoordinator> {
        let mut coordinators = self
            .coordinators
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(coordinator) = coordinators.get(axis) {
            return coordinator.clone();
        }

        self.registry.add_position_data(axis);
        let coordinator = Arc::new(MovementCoordinator::with_clock(
            axis.clone(),
            self.registry.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            self.defaults,
        ));
        coordinators.insert(axis.clone(), coordinator.clone());
        info!(%axis, "Axis registered");

        coordinator
    }

    /// A movement already running on the axis runs to completion.
    pub fn deregister_axis(&self, axis: &AxisId) -> bool {
        let removed = self
            .coordinators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(axis)
            .is_some();
        let record_removed = self.registry.remove_position_data(axis);

        if removed {
            info!(%axis, "Axis deregistered");
        }
        removed || record_removed
    }

    pub fn coordinator(&self, axis: &AxisId) -> Option<Arc<MovementCoordinator>> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(axis)
            .cloned()
    }

    pub fn axes(&self) -> Vec<AxisId> {
        let mut axes: Vec<AxisId> = self
            .coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        axes.sort();
        axes
    }

    /// Telemetry for an axis that is not registered is dropped.
    pub fn apply_telemetry(&self, update: &PositionUpdate) -> bool {
        if self.coordinator(&update.axis_id).is_none() {
            warn!(axis = %update.axis_id, "Ignoring telemetry for unregistered axis");
            return false;
        }

        self.registry.update_position_data(update);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::testing::RecordingDispatcher,
        models::{LocationTarget, MoveCompletion, MovementOptions, Position},
    };

    fn service() -> (CoordinatorService, Arc<RecordingDispatcher>) {
        let dispatcher = RecordingDispatcher::new();
        let service = CoordinatorService::new(
            PositionRegistry::new(),
            dispatcher.clone(),
            MovementDefaults::default(),
        );
        (service, dispatcher)
    }

    fn telemetry(axis: &str, m_pos: Position, w_pos: Position, state: &str) -> PositionUpdate {
        PositionUpdate {
            axis_id: AxisId::from(axis),
            m_pos,
            w_pos,
            state: Some(state.to_string()),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let (service, _) = service();
        let axis = AxisId::from("gantry");

        let first = service.register_axis(&axis);
        let second = service.register_axis(&axis);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.axes(), vec![axis.clone()]);
        assert!(service.registry().contains(&axis));
    }

    #[test]
    fn deregister_removes_coordinator_and_record() {
        let (service, _) = service();
        let axis = AxisId::from("gantry");
        service.register_axis(&axis);

        assert!(service.deregister_axis(&axis));
        assert!(service.coordinator(&axis).is_none());
        assert!(!service.registry().contains(&axis));
        assert!(!service.deregister_axis(&axis));
    }

    #[test]
    fn telemetry_only_applies_to_registered_axes() {
        let (service, _) = service();
        service.register_axis(&AxisId::from("gantry"));

        let applied = service.apply_telemetry(&telemetry(
            "gantry",
            Position::new(5.0, 5.0, 5.0),
            Position::new(1.0, 1.0, 1.0),
            "Idle",
        ));
        assert!(applied);
        assert_eq!(
            service.registry().pos(&AxisId::from("gantry")),
            Position::new(4.0, 4.0, 4.0)
        );

        let ignored = service.apply_telemetry(&telemetry(
            "spindle",
            Position::new(1.0, 0.0, 0.0),
            Position::ZERO,
            "Idle",
        ));
        assert!(!ignored);
        assert!(!service.registry().contains(&AxisId::from("spindle")));
    }

    #[tokio::test(start_paused = true)]
    async fn axes_move_independently() {
        let (service, dispatcher) = service();
        let gantry = service.register_axis(&AxisId::from("gantry"));
        let spindle = service.register_axis(&AxisId::from("spindle"));
        for axis in ["gantry", "spindle"] {
            service.apply_telemetry(&telemetry(axis, Position::ZERO, Position::ZERO, "Idle"));
        }

        let target = LocationTarget::new(Position::new(1.0, 0.0, 0.0));
        let (a, b) = tokio::join!(
            gantry.execute_movement_to_position(&target, MovementOptions::default()),
            spindle.execute_movement_to_position(&target, MovementOptions::default()),
        );

        assert_eq!(a.unwrap(), MoveCompletion::Confirmed);
        assert_eq!(b.unwrap(), MoveCompletion::Confirmed);
        assert_eq!(dispatcher.moves().len(), 2);
    }
}
