use crate::models::{AxisId, LocationTarget, Position, PositionUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisProperty {
    Position,
    MachinePosition,
    WorkPosition,
    State,
    Ready,
    Moving,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Move {
        axis: AxisId,
        target: LocationTarget,
    },
    Sequence {
        axis: AxisId,
        targets: Vec<LocationTarget>,
    },
    Stop {
        axis: AxisId,
    },
    Get {
        axis: AxisId,
        property: AxisProperty,
    },
    Register {
        axis: AxisId,
    },
    Deregister {
        axis: AxisId,
    },
    Telemetry(PositionUpdate),
}

impl Request {
    /// Requests that may wait on the machine for seconds.
    pub fn is_motion(&self) -> bool {
        matches!(self, Request::Move { .. } | Request::Sequence { .. })
    }
}

pub fn parse_command(cmd_str: &str) -> Option<Request> {
    let cmd_str = cmd_str.trim();

    // The JSON payload may itself contain colons.
    if let Some(payload) = cmd_str.strip_prefix("telemetry:") {
        let update = serde_json::from_str::<PositionUpdate>(payload).ok()?;
        return Some(Request::Telemetry(update));
    }

    let parts: Vec<&str> = cmd_str.split(':').collect();
    if parts.len() < 2 {
        return None;
    }

    let axis = parse_axis(parts[1])?;

    let request = match parts[0] {
        "move" => {
            if parts.len() != 5 && parts.len() != 6 {
                return None;
            }
            let target = parse_target(&parts[2..])?;

            Request::Move { axis, target }
        }
        "sequence" => {
            if parts.len() != 3 {
                return None;
            }
            let targets = parts[2]
                .split(';')
                .filter(|step| !step.trim().is_empty())
                .map(|step| parse_target(&step.split(',').collect::<Vec<_>>()))
                .collect::<Option<Vec<_>>>()?;

            Request::Sequence { axis, targets }
        }
        "stop" => {
            if parts.len() != 2 {
                return None;
            }

            Request::Stop { axis }
        }
        "get" => {
            if parts.len() != 3 {
                return None;
            }
            let property = match parts[2] {
                "position" => AxisProperty::Position,
                "mpos" => AxisProperty::MachinePosition,
                "wpos" => AxisProperty::WorkPosition,
                "state" => AxisProperty::State,
                "ready" => AxisProperty::Ready,
                "moving" => AxisProperty::Moving,
                _ => return None,
            };

            Request::Get { axis, property }
        }
        "register" => {
            if parts.len() != 2 {
                return None;
            }

            Request::Register { axis }
        }
        "deregister" => {
            if parts.len() != 2 {
                return None;
            }

            Request::Deregister { axis }
        }
        _ => return None,
    };

    Some(request)
}

fn parse_axis(part: &str) -> Option<AxisId> {
    let axis = part.trim();
    if axis.is_empty() {
        return None;
    }
    Some(AxisId::from(axis))
}

/// `x, y, z` with an optional trailing feedrate.
fn parse_target(fields: &[&str]) -> Option<LocationTarget> {
    let values = fields
        .iter()
        .map(|field| parse_number(field))
        .collect::<Option<Vec<_>>>()?;

    match values.as_slice() {
        [x, y, z] => Some(LocationTarget::new(Position::new(*x, *y, *z))),
        [x, y, z, feedrate] if *feedrate > 0.0 => {
            Some(LocationTarget::new(Position::new(*x, *y, *z)).with_feedrate(*feedrate))
        }
        _ => None,
    }
}

fn parse_number(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
