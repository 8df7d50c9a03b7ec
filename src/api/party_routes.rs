use std::convert::Infallible;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::Filter;

use super::party_websocket;
use crate::error::PartyError;
use crate::party::{PartyServer, PlaybackAction};

/// Body of the stateless control ingress. `time` is only meaningful for
/// seek.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: PlaybackAction,
    pub time: Option<f64>,
}

pub fn party_websocket_route(
    server: PartyServer,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("party")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_party_server(server))
        .map(|ws: warp::ws::Ws, server: PartyServer| {
            ws.on_upgrade(move |websocket| {
                party_websocket::handle_party_websocket(websocket, server)
            })
        })
}

/// `POST /party/room/{id}/control` — alternate ingress into the same
/// engine queue and broadcast path as the WebSocket channel. Unknown rooms
/// are an explicit 404; this path never auto-creates a room.
pub fn room_control_route(
    server: PartyServer,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("party" / "room" / String / "control")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_party_server(server))
        .and_then(handle_control)
}

async fn handle_control(
    room_id: String,
    request: ControlRequest,
    server: PartyServer,
) -> Result<impl warp::Reply, Infallible> {
    let (status, body) = match server.control(&room_id, request.action, request.time).await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::json!({ "status": "ok", "room_id": room_id }),
        ),
        Err(PartyError::RoomNotFound(_)) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "status": "error", "message": format!("Room {} not found", room_id) }),
        ),
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Control request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "status": "error", "message": e.to_string() }),
            )
        }
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

pub fn party_health_check(
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("party")
        .and(warp::path("health"))
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Watch Party Server",
                "version": "1.0.0"
            }))
        })
}

pub fn party_config_endpoint(
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("party")
        .and(warp::path("config"))
        .and(warp::get())
        .map(|| {
            use std::env;

            let config = serde_json::json!({
                "PARTY_WEBSOCKET_URL": env::var("PARTY_WEBSOCKET_URL").ok(),
                "ACQUISITION_SERVICE_URL": env::var("ACQUISITION_SERVICE_URL").ok(),
                "MEDIA_BASE_URL": env::var("MEDIA_BASE_URL").ok(),
            });

            warp::reply::json(&config)
        })
}

fn with_party_server(
    server: PartyServer,
) -> impl Filter<Extract = (PartyServer,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
