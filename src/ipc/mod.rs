//! Unix-socket transport: one JSON request per line, one JSON response per
//! line, in order. Each accepted socket is one tracked connection; closing
//! the socket closes the connection and cancels its streams.

use crate::api::{Request, Response};
use crate::core::error::GatewayError;
use crate::core::gateway::Gateway;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

pub struct IpcServer {
    gateway: Arc<Gateway>,
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(gateway: Arc<Gateway>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            socket_path: socket_path.into(),
        }
    }

    /// Bind the socket and serve until the task is aborted.
    pub async fn run(self) -> Result<()> {
        let listener = bind_socket(&self.socket_path)?;
        tracing::info!("IPC listening on {}", self.socket_path.display());

        loop {
            let (stream, _addr) = listener
                .accept()
                .await
                .context("Failed to accept IPC connection")?;
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move {
                let connection_id = Uuid::new_v4().to_string();
                if let Err(e) = serve_connection(gateway.clone(), stream, &connection_id).await {
                    tracing::warn!("IPC connection {} errored: {}", connection_id, e);
                }
                // Socket gone: drop the connection record and its streams.
                // NotFound just means the client never issued a request.
                match gateway.close_connection(&connection_id).await {
                    Ok(_) | Err(GatewayError::NotFound(_)) => {}
                    Err(e) => tracing::warn!(
                        "Failed to close connection {}: {}",
                        connection_id,
                        e
                    ),
                }
            });
        }
    }
}

fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
}

async fn serve_connection(
    gateway: Arc<Gateway>,
    stream: UnixStream,
    connection_id: &str,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await.context("IPC read failed")? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => gateway.handle(connection_id, request).await,
            Err(e) => Response::error(GatewayError::Validation(format!(
                "malformed request: {}",
                e
            ))),
        };

        let mut encoded =
            serde_json::to_vec(&response).context("Failed to encode IPC response")?;
        encoded.push(b'\n');
        write_half
            .write_all(&encoded)
            .await
            .context("IPC write failed")?;
    }

    Ok(())
}
