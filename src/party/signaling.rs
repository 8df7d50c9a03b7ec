use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use warp::ws::Message;

use super::engine::PartyServer;
use super::events::PartyEvent;
use super::room::RoomSnapshot;

/// Messages a client may send over the `/party` WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        room_id: String,
    },
    Promote {
        room_id: String,
        target_id: String,
    },
    Play {
        room_id: String,
    },
    Pause {
        room_id: String,
    },
    Seek {
        room_id: String,
        time: f64,
    },
    LoadMedia {
        room_id: String,
        source_url: String,
        quality: Option<String>,
    },
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once per connection with the server-assigned id.
    Connected { connection_id: String },
    /// Full room state injected into a freshly joined connection.
    InitialState { room: RoomSnapshot },
    /// Full room state fanned out after membership or media changes.
    RoomUpdated { room: RoomSnapshot },
    /// Minimal descriptor relayed when an admin plays, pauses or seeks.
    ActionPerformed { action: PlaybackAction, time: f64 },
    /// Periodic drift correction from the background clock.
    ClockSync { time: f64 },
    /// Acquisition progress relayed verbatim from the collaborator.
    DownloadProgress { percent: f32 },
    Notice { message: String },
    ErrorNotice { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek,
}

/// Per-connection bridge between the WebSocket pump and the engine queue.
/// Owns the server-assigned connection id for its lifetime.
pub struct SignalingHandler {
    server: PartyServer,
    connection_id: String,
}

impl SignalingHandler {
    /// Registers the connection with the engine and hands over its outbound
    /// channel. The engine answers with a `connected` message.
    pub fn new(server: PartyServer, sender: mpsc::UnboundedSender<Message>) -> Self {
        let connection_id = generate_connection_id();
        server.emit(PartyEvent::Register {
            connection_id: connection_id.clone(),
            sender,
        });
        Self {
            server,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn handle_message(&self, message: ClientMessage) {
        let connection_id = self.connection_id.clone();
        let event = match message {
            ClientMessage::Join { room_id } => PartyEvent::Join {
                connection_id,
                room_id,
            },
            ClientMessage::Promote { room_id, target_id } => PartyEvent::Promote {
                connection_id,
                room_id,
                target_id,
            },
            ClientMessage::Play { room_id } => PartyEvent::Control {
                connection_id: Some(connection_id),
                room_id,
                action: PlaybackAction::Play,
                time: None,
                reply: None,
            },
            ClientMessage::Pause { room_id } => PartyEvent::Control {
                connection_id: Some(connection_id),
                room_id,
                action: PlaybackAction::Pause,
                time: None,
                reply: None,
            },
            ClientMessage::Seek { room_id, time } => PartyEvent::Control {
                connection_id: Some(connection_id),
                room_id,
                action: PlaybackAction::Seek,
                time: Some(time),
                reply: None,
            },
            ClientMessage::LoadMedia {
                room_id,
                source_url,
                quality,
            } => PartyEvent::LoadMedia {
                connection_id,
                room_id,
                source_url,
                quality,
            },
        };
        self.server.emit(event);
    }

    /// Called when the WebSocket closes, cleanly or not.
    pub fn cleanup(&self) {
        self.server.emit(PartyEvent::Disconnect {
            connection_id: self.connection_id.clone(),
        });
    }
}

/// Generate a random server-assigned connection ID.
fn generate_connection_id() -> String {
    let mut rng = rand::thread_rng();
    format!("conn-{:016x}", rng.gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique_and_prefixed() {
        let a = generate_connection_id();
        let b = generate_connection_id();
        assert!(a.starts_with("conn-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_client_message_wire_format() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"seek","room_id":"abc","time":42.5}"#).unwrap();
        match message {
            ClientMessage::Seek { room_id, time } => {
                assert_eq!(room_id, "abc");
                assert_eq!(time, 42.5);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let message: ClientMessage = serde_json::from_str(
            r#"{"type":"load_media","room_id":"abc","source_url":"https://example.com/v","quality":"720p"}"#,
        )
        .unwrap();
        assert!(matches!(message, ClientMessage::LoadMedia { .. }));
    }

    #[test]
    fn test_server_message_wire_format() {
        let text = serde_json::to_string(&ServerMessage::ClockSync { time: 15.0 }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "clock_sync");
        assert_eq!(value["time"], 15.0);

        let text = serde_json::to_string(&ServerMessage::ActionPerformed {
            action: PlaybackAction::Pause,
            time: 3.0,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "action_performed");
        assert_eq!(value["action"], "pause");
    }
}
