use std::{fmt, future::Future};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to send command: executor is not running")]
    Closed,

    #[error("Failed to receive response: command was dropped by the executor")]
    Dropped,
}

pub trait Command: Send + 'static {
    type Response: Send + 'static;
    type Error: From<ExecutorError> + fmt::Display + Send + 'static;
    type Handler: DeviceHandler<Command = Self>;

    fn execute(
        self,
        handler: &mut Self::Handler,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}

pub trait DeviceHandler: Send + 'static {
    type Command: Command<Handler = Self>;
}

type CommandResult<C> = Result<<C as Command>::Response, <C as Command>::Error>;

pub struct GenericCommand<C: Command> {
    command: C,
    response_ch: oneshot::Sender<CommandResult<C>>,
}

impl<C: Command> GenericCommand<C> {
    pub fn new(command: C, response_ch: oneshot::Sender<CommandResult<C>>) -> Self {
        Self {
            command,
            response_ch,
        }
    }

    pub async fn execute(self, handler: &mut C::Handler) -> Result<(), ExecutorError> {
        let result = self.command.execute(handler).await;

        if let Err(e) = &result {
            warn!("Command failed: {}", e);
        }

        self.response_ch
            .send(result)
            .map_err(|_| ExecutorError::Dropped)
    }
}

/// Owns a device handler and runs queued commands against it one at a time.
pub struct CommandExecutor<H: DeviceHandler> {
    handler: H,
    commands_ch: mpsc::UnboundedReceiver<GenericCommand<H::Command>>,
    sender: mpsc::UnboundedSender<GenericCommand<H::Command>>,
}

impl<H: DeviceHandler> CommandExecutor<H> {
    pub fn new(handler: H) -> Self {
        let (sender, commands_ch) = mpsc::unbounded_channel();

        Self {
            handler,
            commands_ch,
            sender,
        }
    }

    pub fn sender(&self) -> CommandSender<H::Command> {
        CommandSender::new(self.sender.clone())
    }

    /// Runs until every [`CommandSender`] has been dropped.
    pub async fn run(self) {
        let Self {
            mut handler,
            mut commands_ch,
            sender,
        } = self;
        drop(sender);

        while let Some(command) = commands_ch.recv().await {
            if let Err(e) = command.execute(&mut handler).await {
                debug!("Response not delivered: {}", e);
            }
        }

        debug!("All command senders dropped, executor stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

pub struct CommandSender<C: Command> {
    commands_ch: mpsc::UnboundedSender<GenericCommand<C>>,
}

impl<C: Command> Clone for CommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            commands_ch: self.commands_ch.clone(),
        }
    }
}

impl<C: Command> CommandSender<C> {
    pub fn new(commands_ch: mpsc::UnboundedSender<GenericCommand<C>>) -> Self {
        Self { commands_ch }
    }

    pub async fn send_command(&self, command: C) -> Result<C::Response, C::Error> {
        let (response_ch, response_rx) = oneshot::channel();
        let command = GenericCommand::new(command, response_ch);

        self.commands_ch
            .send(command)
            .map_err(|_| ExecutorError::Closed)?;

        response_rx.await.map_err(|_| ExecutorError::Dropped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CounterHandler {
        count: u32,
    }

    impl DeviceHandler for CounterHandler {
        type Command = CounterCommand;
    }

    enum CounterCommand {
        Increment,
        Refuse,
    }

    #[derive(Debug, thiserror::Error)]
    enum CounterError {
        #[error("executor: {0}")]
        Executor(#[from] ExecutorError),

        #[error("refused")]
        Refused,
    }

    impl Command for CounterCommand {
        type Response = u32;
        type Error = CounterError;
        type Handler = CounterHandler;

        async fn execute(self, handler: &mut CounterHandler) -> Result<u32, CounterError> {
            match self {
                CounterCommand::Increment => {
                    handler.count += 1;
                    Ok(handler.count)
                }
                CounterCommand::Refuse => Err(CounterError::Refused),
            }
        }
    }

    #[tokio::test]
    async fn commands_run_in_order_against_one_handler() {
        let executor = CommandExecutor::new(CounterHandler { count: 0 });
        let sender = executor.sender();
        let handle = executor.spawn();

        assert_eq!(sender.send_command(CounterCommand::Increment).await.unwrap(), 1);
        assert_eq!(sender.send_command(CounterCommand::Increment).await.unwrap(), 2);

        let refused = sender.send_command(CounterCommand::Refuse).await;
        assert!(matches!(refused, Err(CounterError::Refused)));

        assert_eq!(sender.send_command(CounterCommand::Increment).await.unwrap(), 3);

        drop(sender);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sending_to_a_dropped_executor_fails() {
        let executor = CommandExecutor::new(CounterHandler { count: 0 });
        let sender = executor.sender();
        drop(executor);

        let result = sender.send_command(CounterCommand::Increment).await;
        assert!(matches!(
            result,
            Err(CounterError::Executor(ExecutorError::Closed))
        ));
    }
}
