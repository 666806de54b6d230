use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use utilities::cancel::CancelToken;

use crate::models::{AxisId, Position, PositionUpdate, is_idle_state};

/// Position vectors of one axis. `pos` is always derived as `m_pos - w_pos`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisRecord {
    pub pos: Position,
    pub m_pos: Position,
    pub w_pos: Position,
}

impl AxisRecord {
    fn derive(&mut self) {
        self.pos = self.m_pos - self.w_pos;
    }
}

#[derive(Default)]
struct PositionTable {
    records: HashMap<AxisId, AxisRecord>,
    cnc_states: HashMap<AxisId, String>,
}

struct MotionLock {
    lease: Option<(u64, CancelToken)>,
    busy: watch::Sender<bool>,
    /// Axis was removed while leased; drop the entry on release.
    retired: bool,
}

impl MotionLock {
    fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            lease: None,
            busy,
            retired: false,
        }
    }
}

#[derive(Default)]
struct Shared {
    positions: RwLock<PositionTable>,
    locks: Mutex<HashMap<AxisId, MotionLock>>,
    next_lease: AtomicU64,
}

/// Per-axis position and controller state, plus the per-axis motion lock.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone, Default)]
pub struct PositionRegistry {
    shared: Arc<Shared>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PositionTable> {
        self.shared
            .positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PositionTable> {
        self.shared
            .positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<AxisId, MotionLock>> {
        self.shared
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an axis with zero vectors. Returns `false` if it already existed.
    pub fn add_position_data(&self, axis: &AxisId) -> bool {
        {
            let mut table = self.write();
            if table.records.contains_key(axis) {
                return false;
            }
            table.records.insert(axis.clone(), AxisRecord::default());
        }

        if let Some(lock) = self.locks().get_mut(axis) {
            lock.retired = false;
        }
        info!(%axis, "Registered axis position data");
        true
    }

    /// Also drops the motion lock of the axis, once it is no longer leased.
    pub fn remove_position_data(&self, axis: &AxisId) -> bool {
        let removed = {
            let mut table = self.write();
            table.cnc_states.remove(axis);
            table.records.remove(axis).is_some()
        };

        let mut locks = self.locks();
        if let Some(lock) = locks.get_mut(axis) {
            if lock.lease.is_some() {
                lock.retired = true;
            } else {
                locks.remove(axis);
            }
        }

        if removed {
            info!(%axis, "Removed axis position data");
        }
        removed
    }

    pub fn contains(&self, axis: &AxisId) -> bool {
        self.read().records.contains_key(axis)
    }

    pub fn axes(&self) -> Vec<AxisId> {
        let mut axes: Vec<AxisId> = self.read().records.keys().cloned().collect();
        axes.sort();
        axes
    }

    /// Overwrites the machine position. Call [`PositionRegistry::set_pos`] afterwards.
    pub fn set_m_pos(&self, axis: &AxisId, x: f64, y: f64, z: f64) {
        self.write().records.entry(axis.clone()).or_default().m_pos = Position::new(x, y, z);
    }

    /// Overwrites the work offset. Call [`PositionRegistry::set_pos`] afterwards.
    pub fn set_w_pos(&self, axis: &AxisId, x: f64, y: f64, z: f64) {
        self.write().records.entry(axis.clone()).or_default().w_pos = Position::new(x, y, z);
    }

    pub fn set_pos(&self, axis: &AxisId) {
        if let Some(record) = self.write().records.get_mut(axis) {
            record.derive();
        }
    }

    pub fn set_state(&self, axis: &AxisId, state: impl Into<String>) {
        self.write().cnc_states.insert(axis.clone(), state.into());
    }

    /// Commits both vectors, the derived position and the state under one lock.
    pub fn update_position_data(&self, update: &PositionUpdate) {
        let mut table = self.write();

        let record = table.records.entry(update.axis_id.clone()).or_default();
        record.m_pos = update.m_pos;
        record.w_pos = update.w_pos;
        record.derive();
        let pos = record.pos;

        if let Some(state) = &update.state {
            table
                .cnc_states
                .insert(update.axis_id.clone(), state.clone());
        }

        debug!(axis = %update.axis_id, %pos, state = ?update.state, "Position data updated");
    }

    pub fn record(&self, axis: &AxisId) -> Option<AxisRecord> {
        self.read().records.get(axis).copied()
    }

    pub fn pos(&self, axis: &AxisId) -> Position {
        self.record(axis).map_or(Position::ZERO, |r| r.pos)
    }

    pub fn m_pos(&self, axis: &AxisId) -> Position {
        self.record(axis).map_or(Position::ZERO, |r| r.m_pos)
    }

    pub fn w_pos(&self, axis: &AxisId) -> Position {
        self.record(axis).map_or(Position::ZERO, |r| r.w_pos)
    }

    pub fn state(&self, axis: &AxisId) -> Option<String> {
        self.read().cnc_states.get(axis).cloned()
    }

    pub fn is_idle(&self, axis: &AxisId) -> bool {
        self.read()
            .cnc_states
            .get(axis)
            .is_some_and(|state| is_idle_state(state))
    }

    /// Takes the motion lock of `axis`, or returns `None` if it is held.
    pub fn try_acquire(&self, axis: &AxisId) -> Option<MotionLease> {
        let mut locks = self.locks();
        let lock = locks.entry(axis.clone()).or_insert_with(MotionLock::new);
        if lock.lease.is_some() {
            return None;
        }

        let id = self.shared.next_lease.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        lock.lease = Some((id, cancel.clone()));
        lock.busy.send_replace(true);

        Some(MotionLease {
            registry: self.clone(),
            axis: axis.clone(),
            id,
            cancel,
        })
    }

    fn release(&self, axis: &AxisId, id: u64) {
        let mut locks = self.locks();
        if let Some(lock) = locks.get_mut(axis) {
            if matches!(&lock.lease, Some((current, _)) if *current == id) {
                lock.lease = None;
                lock.busy.send_replace(false);
                if lock.retired {
                    locks.remove(axis);
                }
            }
        }
    }

    /// Clears the motion lock regardless of owner and cancels the owner's waits.
    pub fn force_release(&self, axis: &AxisId) -> bool {
        let mut locks = self.locks();
        let Some(lock) = locks.get_mut(axis) else {
            return false;
        };

        match lock.lease.take() {
            Some((id, cancel)) => {
                warn!(%axis, lease = id, "Motion lock forcibly released");
                cancel.cancel();
                lock.busy.send_replace(false);
                if lock.retired {
                    locks.remove(axis);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self, axis: &AxisId) -> bool {
        self.locks()
            .get(axis)
            .is_some_and(|lock| lock.lease.is_some())
    }

    pub fn watch_busy(&self, axis: &AxisId) -> watch::Receiver<bool> {
        self.locks()
            .entry(axis.clone())
            .or_insert_with(MotionLock::new)
            .busy
            .subscribe()
    }
}

#[cfg(test)]
impl PositionRegistry {
    fn tracked_locks(&self) -> usize {
        self.locks().len()
    }
}

/// Exclusive right to move one axis. Released on drop.
pub struct MotionLease {
    registry: PositionRegistry,
    axis: AxisId,
    id: u64,
    cancel: CancelToken,
}

impl MotionLease {
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for MotionLease {
    fn drop(&mut self) {
        self.registry.release(&self.axis, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> AxisId {
        AxisId::from("gantry")
    }

    fn update(m_pos: Position, w_pos: Position, state: Option<&str>) -> PositionUpdate {
        PositionUpdate {
            axis_id: axis(),
            m_pos,
            w_pos,
            state: state.map(str::to_string),
        }
    }

    #[test]
    fn unknown_axis_reads_defaults() {
        let registry = PositionRegistry::new();
        let unknown = AxisId::from("missing");

        assert_eq!(registry.pos(&unknown), Position::ZERO);
        assert_eq!(registry.m_pos(&unknown), Position::ZERO);
        assert_eq!(registry.w_pos(&unknown), Position::ZERO);
        assert_eq!(registry.state(&unknown), None);
        assert!(!registry.is_idle(&unknown));
        assert!(registry.record(&unknown).is_none());
    }

    #[test]
    fn add_position_data_starts_at_zero() {
        let registry = PositionRegistry::new();

        assert!(registry.add_position_data(&axis()));
        assert!(!registry.add_position_data(&axis()));
        assert_eq!(registry.record(&axis()), Some(AxisRecord::default()));
        assert_eq!(registry.axes(), vec![axis()]);
    }

    #[test]
    fn combined_update_derives_position() {
        let registry = PositionRegistry::new();
        registry.add_position_data(&axis());

        registry.update_position_data(&update(
            Position::new(5.0, 5.0, 5.0),
            Position::new(1.0, 1.0, 1.0),
            Some("Idle"),
        ));
        assert_eq!(registry.pos(&axis()), Position::new(4.0, 4.0, 4.0));
        assert_eq!(registry.state(&axis()).as_deref(), Some("Idle"));
        assert!(registry.is_idle(&axis()));

        registry.update_position_data(&update(
            Position::new(5.0, 5.0, 5.0),
            Position::new(2.0, 0.0, -1.0),
            Some("Run"),
        ));
        assert_eq!(registry.pos(&axis()), Position::new(3.0, 5.0, 6.0));
        assert!(!registry.is_idle(&axis()));
    }

    #[test]
    fn update_without_state_keeps_previous_state() {
        let registry = PositionRegistry::new();
        registry.set_state(&axis(), "Alarm");

        registry.update_position_data(&update(Position::ZERO, Position::ZERO, None));

        assert_eq!(registry.state(&axis()).as_deref(), Some("Alarm"));
    }

    #[test]
    fn individual_setters_derive_on_set_pos() {
        let registry = PositionRegistry::new();

        registry.set_m_pos(&axis(), 10.0, 20.0, 30.0);
        registry.set_w_pos(&axis(), 1.0, 2.0, 3.0);
        assert_eq!(registry.pos(&axis()), Position::ZERO);

        registry.set_pos(&axis());
        assert_eq!(registry.pos(&axis()), Position::new(9.0, 18.0, 27.0));
        assert_eq!(registry.m_pos(&axis()), Position::new(10.0, 20.0, 30.0));
        assert_eq!(registry.w_pos(&axis()), Position::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn remove_drops_record_and_state() {
        let registry = PositionRegistry::new();
        registry.update_position_data(&update(
            Position::new(1.0, 1.0, 1.0),
            Position::ZERO,
            Some("Idle"),
        ));

        assert!(registry.remove_position_data(&axis()));
        assert!(!registry.contains(&axis()));
        assert_eq!(registry.state(&axis()), None);
        assert_eq!(registry.pos(&axis()), Position::ZERO);
        assert!(!registry.remove_position_data(&axis()));
    }

    #[test]
    fn lease_is_exclusive_per_axis() {
        let registry = PositionRegistry::new();
        let other = AxisId::from("spindle");

        let lease = registry.try_acquire(&axis()).unwrap();
        assert!(registry.is_busy(&axis()));
        assert!(registry.try_acquire(&axis()).is_none());

        let other_lease = registry.try_acquire(&other);
        assert!(other_lease.is_some());

        drop(lease);
        assert!(!registry.is_busy(&axis()));
        assert!(registry.try_acquire(&axis()).is_some());
    }

    #[test]
    fn force_release_cancels_and_ignores_stale_lease() {
        let registry = PositionRegistry::new();

        let stale = registry.try_acquire(&axis()).unwrap();
        assert!(registry.force_release(&axis()));
        assert!(stale.is_cancelled());
        assert!(!registry.is_busy(&axis()));

        let fresh = registry.try_acquire(&axis()).unwrap();
        drop(stale);
        assert!(registry.is_busy(&axis()));
        assert!(!fresh.is_cancelled());

        drop(fresh);
        assert!(!registry.force_release(&axis()));
    }

    #[test]
    fn register_cycles_do_not_accumulate_locks() {
        let registry = PositionRegistry::new();

        for _ in 0..3 {
            registry.add_position_data(&axis());
            drop(registry.try_acquire(&axis()).unwrap());
            let _busy = registry.watch_busy(&axis());
            registry.remove_position_data(&axis());
        }

        assert_eq!(registry.tracked_locks(), 0);
    }

    #[test]
    fn removing_a_leased_axis_drops_its_lock_on_release() {
        let registry = PositionRegistry::new();
        registry.add_position_data(&axis());
        let lease = registry.try_acquire(&axis()).unwrap();

        registry.remove_position_data(&axis());
        assert!(registry.is_busy(&axis()));
        assert_eq!(registry.tracked_locks(), 1);

        drop(lease);
        assert!(!registry.is_busy(&axis()));
        assert_eq!(registry.tracked_locks(), 0);
    }

    #[test]
    fn watch_busy_follows_lease() {
        let registry = PositionRegistry::new();
        let busy = registry.watch_busy(&axis());
        assert!(!*busy.borrow());

        let lease = registry.try_acquire(&axis()).unwrap();
        assert!(*busy.borrow());

        drop(lease);
        assert!(!*busy.borrow());
    }
}
