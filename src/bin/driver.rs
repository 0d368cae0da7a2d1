//! Simulated bus: logs in and publishes positions along a fixed loop.

use std::sync::Arc;
use std::time::Duration;

use bus_tracker::agents::client::HttpRegistryClient;
use bus_tracker::agents::position::SimulatedRoute;
use bus_tracker::agents::publisher::PublisherAgent;
use bus_tracker::agents::renderer::TracingRenderer;
use bus_tracker::config::AgentConfig;
use bus_tracker::models::position::Position;
use bus_tracker::server::{init_tracing, BoxError};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing("bus_tracker=info,driver=info");

    let config = AgentConfig::from_env()?;
    let (username, password) = config.credentials()?;

    let client = Arc::new(HttpRegistryClient::with_timeout(
        &config.server_url,
        config.request_timeout,
    )?);
    client.login(username, password).await?;
    info!("logged in as {}", username);

    let route = SimulatedRoute::new(
        vec![
            Position::new(15.3173, 75.7139),
            Position::new(15.3350, 75.7200),
            Position::new(15.3400, 75.7050),
            Position::new(15.3173, 75.7139),
        ],
        Duration::from_secs(2),
    );

    let mut agent = PublisherAgent::new(client, route, TracingRenderer::default());
    agent.start();

    let mut report = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let status = agent.status();
                info!(
                    "{} | {} updates | {}",
                    status.message,
                    status.updates_count,
                    status.accuracy.unwrap_or_default()
                );
            }
        }
    }

    agent.stop();
    info!("{}", agent.status().message);
    Ok(())
}
