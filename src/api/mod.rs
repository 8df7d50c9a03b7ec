pub mod party_routes;
pub mod party_websocket;
