//! Bus location server.
//!
//! Run the server with
//! ```not_rust
//! cargo run --bin bus_tracker
//! ```
//!
//! Then start a simulated bus and a viewer in two more terminals
//! ```not_rust
//! DRIVER_USERNAME=driver1 DRIVER_PASSWORD=pass123 cargo run --bin driver
//! cargo run --bin viewer
//! ```

use bus_tracker::config::ServerConfig;
use bus_tracker::server::{init_tracing, serve, BoxError};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing("bus_tracker=debug,tower_http=debug");

    let config = ServerConfig::from_env()?;
    serve(config).await
}
