//! Request handlers for the HTTP and WebSocket endpoints

pub mod api;
pub mod websocket;

use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use crate::config::ServerConfig;
use crate::core::ip_extractor::IpExtractionConfig;
use crate::core::rate_limiter::RateLimiterDirectory;
use crate::core::room::RoomDirectory;
use crate::error::Result;
use crate::storage::{FileStorage, MemoryStorage, StorageProvider};

// Re-export the websocket handler
pub use websocket::handle_ws_client;

/// Shared state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomDirectory,
    pub ip_config: Arc<IpExtractionConfig>,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn StorageProvider> = match config.data_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir)?;
                Arc::new(FileStorage::new(dir))
            }
            None => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::with_storage(config, storage))
    }

    pub fn with_storage(config: &ServerConfig, storage: Arc<dyn StorageProvider>) -> Self {
        let limiters = RateLimiterDirectory::new(config.limiter_idle_timeout);
        Self {
            rooms: RoomDirectory::new(storage, limiters, config.room_idle_timeout),
            ip_config: Arc::new(IpExtractionConfig::from_config(config)),
        }
    }
}

/// All routes served by the chat server
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let create_room = warp::path!("api" / "room")
        .and(warp::post())
        .map(api::create_room);

    let websocket = warp::path!("api" / "room" / String / "websocket")
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(warp::header::headers_cloned())
        .and(with_state(state))
        .map(api::upgrade_room);

    let health = warp::path("health").and(warp::path::end()).map(|| "OK");

    create_room
        .or(websocket)
        .or(health)
        .with(warp::cors().allow_any_origin())
}

// Helper function to include shared state in request
fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}
