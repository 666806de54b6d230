use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use utilities::command_executor::DeviceHandler;

use crate::{
    config::HardwareConfig,
    error::DispatchError,
    models::{AbortRequest, RelativeMove},
};

use self::commands::HardwareCommand;

pub mod command_sender;
pub mod commands;

/// HTTP client for the hardware control service. Clones share one connection pool.
#[derive(Clone)]
pub struct HardwareHandler {
    client: reqwest::Client,
    move_url: String,
    abort_url: String,
}

impl DeviceHandler for HardwareHandler {
    type Command = HardwareCommand;
}

impl HardwareHandler {
    pub fn new(config: &HardwareConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            move_url: endpoint(&config.base_url, &config.move_path),
            abort_url: endpoint(&config.base_url, &config.abort_path),
        })
    }

    pub async fn move_relative(&self, command: &RelativeMove) -> Result<(), DispatchError> {
        debug!(axis = %command.axis_id, delta = %command.delta(), feedrate = command.feedrate, "POST {}", self.move_url);
        post(&self.client, &self.move_url, command).await
    }

    pub async fn abort(&self, request: &AbortRequest) -> Result<(), DispatchError> {
        debug!(axis = %request.axis_id, "POST {}", self.abort_url);
        post(&self.client, &self.abort_url, request).await
    }
}

async fn post<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<(), DispatchError> {
    let response = client.post(url).json(body).send().await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let text = response.text().await.unwrap_or_default();
    warn!(%status, url, "Hardware service rejected request");
    Err(DispatchError::Rejected(format!("{}: {}", status, text.trim())))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
