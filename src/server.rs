use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::handlers::expiry::LocationReaper;
use crate::handlers::routes::{app, AppState};
use crate::registry::Registry;
use crate::task::AutoCancelTask;

pub type BoxError = Box<dyn Error + Send + Sync>;

pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Router plus the background reaper when a TTL is configured.
fn build(config: &ServerConfig, registry: Arc<Registry>) -> (Router, Option<AutoCancelTask<()>>) {
    let state = Arc::new(AppState::new(config, registry.clone()));
    let router = app(state, config.static_dir.as_deref());
    let reaper = config
        .location_ttl
        .map(|ttl| AutoCancelTask::spawn(LocationReaper::run_actor(registry, ttl)));
    (router, reaper)
}

/// A server running in the background, stopped when dropped.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    _server: AutoCancelTask<()>,
    _reaper: Option<AutoCancelTask<()>>,
}

impl RunningServer {
    pub async fn bind(config: &ServerConfig, addr: SocketAddr) -> Result<Self, BoxError> {
        let registry = Arc::new(Registry::new());
        let (router, reaper) = build(config, registry.clone());

        let server = Server::try_bind(&addr)?.serve(router.into_make_service());
        let addr = server.local_addr();
        info!("listening on {}", addr);

        let server = AutoCancelTask::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("server error: {}", e);
            }
        });

        Ok(Self { addr, registry, _server: server, _reaper: reaper })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Serves until the process is terminated.
pub async fn serve(config: ServerConfig) -> Result<(), BoxError> {
    let addr: SocketAddr = config.bind_address().parse()?;
    let registry = Arc::new(Registry::new());
    let (router, _reaper) = build(&config, registry);

    info!("listening on {}", addr);
    Server::try_bind(&addr)?
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
