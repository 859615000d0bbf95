use log::{error, info, warn};
use std::net::SocketAddr;

use roomcast::config::ServerConfig;
use roomcast::handlers::{routes, AppState};

#[tokio::main]
async fn main() {
    // Load .env before logging so RUST_LOG can come from it
    let dotenv = dotenvy::dotenv();
    env_logger::init();

    match dotenv {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, storage={}",
        config.host,
        config.port,
        config
            .data_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "memory".to_string())
    );

    let state = match AppState::from_config(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize server state: {}", e);
            std::process::exit(1);
        }
    };

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting roomcast on {}", addr);
    warp::serve(routes(state)).run(addr).await;
}
