use utilities::command_executor::Command;

use crate::{
    command_executor::hardware::HardwareHandler, error::DispatchError, models::RelativeMove,
};

/// Queued hardware requests. Aborts never queue, see
/// [`HardwareCommandSender`](super::command_sender::HardwareCommandSender).
#[derive(Debug, Clone)]
pub enum HardwareCommand {
    MoveRelative(RelativeMove),
}

#[derive(Debug)]
pub enum HardwareResponse {
    Accepted,
}

impl Command for HardwareCommand {
    type Response = HardwareResponse;
    type Error = DispatchError;
    type Handler = HardwareHandler;

    async fn execute(self, handler: &mut HardwareHandler) -> Result<HardwareResponse, DispatchError> {
        match self {
            HardwareCommand::MoveRelative(command) => {
                handler.move_relative(&command).await?;
                Ok(HardwareResponse::Accepted)
            }
        }
    }
}
