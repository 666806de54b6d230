use utilities::command_executor::ExecutorError;

use crate::models::{AxisId, Position};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Hardware request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Hardware rejected command: {0}")]
    Rejected(String),

    #[error("Hardware executor unavailable: {0}")]
    Executor(#[from] ExecutorError),
}

#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    #[error("Movement already in progress on axis {axis}")]
    Busy { axis: AxisId },

    #[error("Movement sequence for axis {axis} has no targets")]
    EmptySequence { axis: AxisId },

    #[error("Failed to move axis {axis} to {target}: {source}")]
    Movement {
        axis: AxisId,
        target: Position,
        source: DispatchError,
    },

    #[error("Failed to abort motion on axis {axis}: {source}")]
    Abort { axis: AxisId, source: DispatchError },

    #[error("Movement on axis {axis} was interrupted by an emergency stop")]
    Aborted { axis: AxisId },
}
