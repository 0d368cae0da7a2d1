//! Headless viewer: polls the server and logs marker changes.

use std::sync::Arc;
use std::time::Duration;

use bus_tracker::agents::client::HttpRegistryClient;
use bus_tracker::agents::renderer::TracingRenderer;
use bus_tracker::agents::subscriber::SubscriberAgent;
use bus_tracker::config::AgentConfig;
use bus_tracker::server::{init_tracing, BoxError};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing("bus_tracker=info,viewer=info");

    let config = AgentConfig::from_env()?;
    let client = Arc::new(HttpRegistryClient::with_timeout(
        &config.server_url,
        config.request_timeout,
    )?);

    let mut agent =
        SubscriberAgent::with_interval(client, TracingRenderer::default(), config.poll_interval);
    agent.start_tracking();

    let mut report = tokio::time::interval(config.poll_interval.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let shown = agent.display();
                match &shown.notice {
                    Some(notice) => info!("{}", notice),
                    None => {
                        let updated = shown.last_update.clone().unwrap_or_default();
                        info!("{} active bus(es), {}", shown.active_count, updated);
                        for bus in &shown.buses {
                            info!(
                                "  {} at {} ({}, {})",
                                bus.id, bus.position, bus.updated, bus.accuracy
                            );
                        }
                    }
                }
            }
        }
    }

    agent.stop_tracking();
    Ok(())
}
