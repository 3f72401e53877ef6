pub mod api;
pub mod config;
pub mod core;
pub mod ipc;
pub mod llm;

pub use config::Config;
pub use core::{Gateway, GatewayError};

use anyhow::Result;
use llm::{OauthFlow, ProviderClient};
use std::sync::Arc;
use std::time::Duration;

/// How often the stream reaper scans for abandoned streams.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(
    config: Config,
    client: Arc<dyn ProviderClient>,
    oauth: Arc<dyn OauthFlow>,
) -> Result<()> {
    tracing::info!("Starting ModelGate...");

    let socket_path = config.ipc.socket_path.clone();
    let gateway = Arc::new(Gateway::new(config, client, oauth));

    // Reap abandoned streams in the background for the life of the process.
    let reaper_gateway = Arc::clone(&gateway);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            reaper_gateway.reap_idle_streams().await;
        }
    });

    let server = ipc::IpcServer::new(gateway, socket_path);
    tracing::info!("ModelGate running");
    server.run().await
}
