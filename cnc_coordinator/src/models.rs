use std::{fmt, ops::Sub, time::Duration};

use serde::{Deserialize, Serialize};

pub const DEFAULT_FEEDRATE: f64 = 1500.0;
pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const SEQUENCE_STEP_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

const IDLE_STATE: &str = "idle";

/// Controller states are free-form; only "idle" (any case) means ready.
pub fn is_idle_state(state: &str) -> bool {
    state.eq_ignore_ascii_case(IDLE_STATE)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisId(String);

impl AxisId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AxisId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AxisId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ZERO: Position = Position::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Rounds every component to two decimals, the precision used on the wire.
    pub fn round_to_hundredths(self) -> Self {
        Self {
            x: round_to_hundredths(self.x),
            y: round_to_hundredths(self.y),
            z: round_to_hundredths(self.z),
        }
    }
}

/// Halves round towards positive infinity, so -0.125 becomes -0.12.
fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationTarget {
    #[serde(flatten)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedrate: Option<f64>,
}

impl LocationTarget {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            uid: None,
            name: None,
            feedrate: None,
        }
    }

    pub fn with_feedrate(mut self, feedrate: f64) -> Self {
        self.feedrate = Some(feedrate);
        self
    }
}

impl From<Position> for LocationTarget {
    fn from(position: Position) -> Self {
        Self::new(position)
    }
}

impl fmt::Display for LocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", name, self.position),
            None => write!(f, "{}", self.position),
        }
    }
}

/// Per-call overrides. Unset values fall back to the target, then to
/// [`MovementDefaults`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementOptions {
    pub feedrate: Option<f64>,
    pub timeout: Option<Duration>,
    pub wait_for_idle: bool,
}

impl Default for MovementOptions {
    fn default() -> Self {
        Self {
            feedrate: None,
            timeout: None,
            wait_for_idle: true,
        }
    }
}

impl MovementOptions {
    pub fn with_feedrate(mut self, feedrate: f64) -> Self {
        self.feedrate = Some(feedrate);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_idle_wait(mut self) -> Self {
        self.wait_for_idle = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementDefaults {
    pub feedrate: f64,
    pub timeout: Duration,
    pub sequence_step_timeout: Duration,
    pub idle_poll_interval: Duration,
}

impl Default for MovementDefaults {
    fn default() -> Self {
        Self {
            feedrate: DEFAULT_FEEDRATE,
            timeout: DEFAULT_MOVE_TIMEOUT,
            sequence_step_timeout: SEQUENCE_STEP_TIMEOUT,
            idle_poll_interval: IDLE_POLL_INTERVAL,
        }
    }
}

/// Combined telemetry push for one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub axis_id: AxisId,
    #[serde(rename = "mPos")]
    pub m_pos: Position,
    #[serde(rename = "wPos")]
    pub w_pos: Position,
    #[serde(default)]
    pub state: Option<String>,
}

/// Body of the relative-move request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelativeMove {
    pub axis_id: AxisId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub feedrate: f64,
}

impl RelativeMove {
    pub fn new(axis_id: AxisId, delta: Position, feedrate: f64) -> Self {
        Self {
            axis_id,
            x: delta.x,
            y: delta.y,
            z: delta.z,
            feedrate,
        }
    }

    pub fn delta(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Body of the abort (jog-cancel) request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub axis_id: AxisId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveCompletion {
    /// Controller reported idle after the move.
    Confirmed,
    /// Idle was not observed before the timeout; the machine may still be moving.
    Unconfirmed,
    /// Dispatched without waiting for idle.
    NotAwaited,
    /// Target equals the current position, nothing was dispatched.
    NoDisplacement,
}

impl fmt::Display for MoveCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoveCompletion::Confirmed => "confirmed",
            MoveCompletion::Unconfirmed => "unconfirmed",
            MoveCompletion::NotAwaited => "not_awaited",
            MoveCompletion::NoDisplacement => "no_displacement",
        };
        f.write_str(name)
    }
}
