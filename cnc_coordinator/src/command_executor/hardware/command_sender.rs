use utilities::command_executor::CommandSender;

use crate::{
    dispatcher::CommandDispatcher,
    error::DispatchError,
    models::{AbortRequest, AxisId, RelativeMove},
};

use super::{
    HardwareHandler,
    commands::{HardwareCommand, HardwareResponse},
};

/// Moves go through the executor queue one at a time. Aborts are sent
/// straight away on a clone of the handler so they never wait behind a
/// move request that is still in flight.
#[derive(Clone)]
pub struct HardwareCommandSender {
    sender: CommandSender<HardwareCommand>,
    aborter: HardwareHandler,
}

impl HardwareCommandSender {
    pub fn new(sender: CommandSender<HardwareCommand>, aborter: HardwareHandler) -> Self {
        Self { sender, aborter }
    }
}

#[async_trait::async_trait]
impl CommandDispatcher for HardwareCommandSender {
    async fn move_relative(&self, command: RelativeMove) -> Result<(), DispatchError> {
        let response = self
            .sender
            .send_command(HardwareCommand::MoveRelative(command))
            .await?;

        match response {
            HardwareResponse::Accepted => Ok(()),
        }
    }

    async fn abort(&self, axis: &AxisId) -> Result<(), DispatchError> {
        let request = AbortRequest {
            axis_id: axis.clone(),
        };
        self.aborter.abort(&request).await
    }
}
