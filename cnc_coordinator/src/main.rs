use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use tracing::{error, info, warn};

use cnc_coordinator::{
    command_executor::create_hardware_executor,
    communication::run_communication_layer,
    config::{create_default_config, init_config},
    logging,
    registry::PositionRegistry,
    service::CoordinatorService,
};

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if should_create_config() {
        create_default_config(None::<PathBuf>)?;
    }

    let (config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let _log_guard = logging::init(&config.logging)?;
    info!(path = %config_manager.path().display(), "Configuration loaded");

    let (executor, dispatcher) = create_hardware_executor(&config.hardware)
        .context("Failed to create hardware executor")?;
    let executor_handle = executor.spawn();

    let service = Arc::new(CoordinatorService::new(
        PositionRegistry::new(),
        Arc::new(dispatcher),
        config.movement.defaults(),
    ));

    for axis in &config.axes {
        service.register_axis(axis);
    }

    tokio::select! {
        result = run_communication_layer(&config.socket.socket_path, service.clone()) => {
            if let Err(e) = &result {
                error!("Communication layer stopped: {:#}", e);
            }
            result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    for axis in service.axes() {
        let Some(coordinator) = service.coordinator(&axis) else {
            continue;
        };
        if coordinator.is_moving() {
            warn!(%axis, "Stopping axis before shutdown");
            if let Err(e) = coordinator.emergency_stop().await {
                error!(%axis, "Failed to stop axis: {}", e);
            }
        }
    }

    executor_handle.abort();
    let _ = std::fs::remove_file(&config.socket.socket_path);

    Ok(())
}
