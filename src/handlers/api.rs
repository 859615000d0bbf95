//! HTTP glue: room creation and connection upgrade

use log::{debug, info};
use std::net::SocketAddr;
use warp::http::{HeaderMap, StatusCode};
use warp::ws::Ws;
use warp::Reply;

use super::websocket::handle_ws_client;
use super::AppState;
use crate::core::ip_extractor::extract_client_ip;
use crate::core::room_key::RoomKey;

/// `POST /api/room`: mint a private room id
pub fn create_room() -> impl Reply {
    let key = RoomKey::new_private();
    info!("Created private room {}", key);
    key.to_string()
}

/// `GET /api/room/<key>/websocket`: resolve the room and hand the socket to it
pub fn upgrade_room(
    token: String,
    ws: Ws,
    remote: Option<SocketAddr>,
    headers: HeaderMap,
    state: AppState,
) -> Box<dyn Reply> {
    let key = match RoomKey::parse(&token) {
        Ok(key) => key,
        Err(e) => {
            debug!("Rejected room token {:?}: {}", token, e);
            return Box::new(warp::reply::with_status(e.to_string(), StatusCode::NOT_FOUND));
        }
    };

    let identity = extract_client_ip(&headers, remote, &state.ip_config).to_string();
    let room_id = key.room_id();
    let rooms = state.rooms;
    Box::new(ws.on_upgrade(move |socket| handle_ws_client(socket, rooms, room_id, identity)))
}
