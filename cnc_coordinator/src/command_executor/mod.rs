use utilities::command_executor::CommandExecutor;

use crate::{config::HardwareConfig, error::DispatchError};

use self::hardware::{HardwareHandler, command_sender::HardwareCommandSender};

pub mod hardware;

pub fn create_hardware_executor(
    config: &HardwareConfig,
) -> Result<(CommandExecutor<HardwareHandler>, HardwareCommandSender), DispatchError> {
    let handler = HardwareHandler::new(config)?;
    let aborter = handler.clone();

    let executor = CommandExecutor::new(handler);
    let sender = HardwareCommandSender::new(executor.sender(), aborter);

    Ok((executor, sender))
}
