pub mod command_executor;
pub mod commands;
pub mod communication;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod idle_waiter;
pub mod logging;
pub mod models;
pub mod registry;
pub mod service;
