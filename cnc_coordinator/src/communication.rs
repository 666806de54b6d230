use std::{path::Path, sync::Arc};

use anyhow::{Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixStream, unix::OwnedWriteHalf},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    commands::{AxisProperty, Request, parse_command},
    coordinator::MovementCoordinator,
    models::{AxisId, MoveCompletion, MovementOptions, Position},
    service::CoordinatorService,
};

pub async fn run_communication_layer(
    socket_path: &Path,
    service: Arc<CoordinatorService>,
) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .map_err(|e| anyhow!("Failed to remove existing socket file: {}", e))?;
    }

    let listener = tokio::net::UnixListener::bind(socket_path)
        .map_err(|e| anyhow!("Failed to bind to socket: {}", e))?;
    info!(path = %socket_path.display(), "Listening for requests");

    loop {
        let (socket, _) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("Failed to accept connection: {}", e))?;

        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(socket, service).await {
                warn!("Connection closed with error: {}", e);
            }
        });
    }
}

/// Motion requests run in their own task so that a `stop` on the same
/// connection is answered while a move is still waiting for idle. Their
/// replies are written when they finish, after any quicker replies.
async fn serve_connection(socket: UnixStream, service: Arc<CoordinatorService>) -> Result<()> {
    let (reader, writer) = socket.into_split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_replies(writer, reply_rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(request) = parse_command(&line) else {
            let _ = reply_tx.send("Error: Invalid command format".to_string());
            continue;
        };
        debug!(?request, "Handling request");

        if request.is_motion() {
            let service = service.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = handle_request(&service, request).await;
                let _ = reply_tx.send(reply);
            });
        } else {
            let reply = handle_request(&service, request).await;
            let _ = reply_tx.send(reply);
        }
    }

    drop(reply_tx);
    writer_task.await??;
    Ok(())
}

async fn write_replies(
    mut writer: OwnedWriteHalf,
    mut replies: mpsc::UnboundedReceiver<String>,
) -> std::io::Result<()> {
    while let Some(reply) = replies.recv().await {
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Executes one request and renders the reply line, without the newline.
pub async fn handle_request(service: &CoordinatorService, request: Request) -> String {
    match request {
        Request::Move { axis, target } => {
            let coordinator = match registered(service, &axis) {
                Ok(coordinator) => coordinator,
                Err(reply) => return reply,
            };

            match coordinator
                .execute_movement_to_position(&target, MovementOptions::default())
                .await
            {
                Ok(completion) => format!("OK {}", completion),
                Err(e) => format!("Error: {}", e),
            }
        }
        Request::Sequence { axis, targets } => {
            let coordinator = match registered(service, &axis) {
                Ok(coordinator) => coordinator,
                Err(reply) => return reply,
            };

            match coordinator
                .execute_movement_sequence(&targets, MovementOptions::default())
                .await
            {
                Ok(completions) => format!(
                    "OK {} steps: {}",
                    completions.len(),
                    join_completions(&completions)
                ),
                Err(e) => format!("Error: {}", e),
            }
        }
        Request::Stop { axis } => {
            let coordinator = match registered(service, &axis) {
                Ok(coordinator) => coordinator,
                Err(reply) => return reply,
            };

            match coordinator.emergency_stop().await {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("Error: {}", e),
            }
        }
        Request::Get { axis, property } => {
            let coordinator = match registered(service, &axis) {
                Ok(coordinator) => coordinator,
                Err(reply) => return reply,
            };
            let registry = service.registry();

            match property {
                AxisProperty::Position => {
                    format!("Position: {}", format_position(coordinator.get_current_position()))
                }
                AxisProperty::MachinePosition => {
                    format!("MPos: {}", format_position(registry.m_pos(&axis)))
                }
                AxisProperty::WorkPosition => {
                    format!("WPos: {}", format_position(registry.w_pos(&axis)))
                }
                AxisProperty::State => format!(
                    "State: {}",
                    registry.state(&axis).unwrap_or_else(|| "Unknown".to_string())
                ),
                AxisProperty::Ready => format!("Ready: {}", coordinator.can_execute_movement()),
                AxisProperty::Moving => format!("Moving: {}", coordinator.is_moving()),
            }
        }
        Request::Register { axis } => {
            service.register_axis(&axis);
            "OK".to_string()
        }
        Request::Deregister { axis } => {
            if service.deregister_axis(&axis) {
                "OK".to_string()
            } else {
                not_registered(&axis)
            }
        }
        Request::Telemetry(update) => {
            if service.apply_telemetry(&update) {
                "OK".to_string()
            } else {
                not_registered(&update.axis_id)
            }
        }
    }
}

fn registered(
    service: &CoordinatorService,
    axis: &AxisId,
) -> Result<Arc<MovementCoordinator>, String> {
    service.coordinator(axis).ok_or_else(|| not_registered(axis))
}

fn not_registered(axis: &AxisId) -> String {
    format!("Error: Axis {} not registered", axis)
}

fn format_position(position: Position) -> String {
    format!("{:.2} {:.2} {:.2}", position.x, position.y, position.z)
}

fn join_completions(completions: &[MoveCompletion]) -> String {
    completions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
