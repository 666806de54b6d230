pub mod cancel;
pub mod clock;
pub mod command_executor;
