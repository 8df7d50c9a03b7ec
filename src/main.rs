mod api;
mod config;
mod error;
mod media;
mod party;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use warp::Filter;

use config::Config;
use media::AcquisitionClient;
use party::PartyServer;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let acquirer = AcquisitionClient::new(config.media.acquisition.clone())
        .expect("Failed to build acquisition client");
    let server = PartyServer::spawn(Arc::new(acquirer), config.media.media_dir.clone().into());

    let routes = api::party_routes::party_websocket_route(server.clone())
        .or(api::party_routes::room_control_route(server))
        .or(api::party_routes::party_health_check())
        .or(api::party_routes::party_config_endpoint());

    warp::serve(routes).run(config.bind_address()).await;
}
