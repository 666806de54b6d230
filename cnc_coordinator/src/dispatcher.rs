use crate::{
    error::DispatchError,
    models::{AxisId, RelativeMove},
};

/// Sends motion commands to the hardware control service.
///
/// A successful return only means the request was accepted, not that the
/// motion has finished.
#[async_trait::async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn move_relative(&self, command: RelativeMove) -> Result<(), DispatchError>;

    async fn abort(&self, axis: &AxisId) -> Result<(), DispatchError>;
}
