use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use warp::ws::Message;

use super::signaling::{PlaybackAction, ServerMessage};
use crate::media::AcquiredMedia;

/// Everything that can mutate room state, in the order it was dequeued.
/// WebSocket handlers, the HTTP control endpoint, the background clock and
/// acquisition tasks all funnel through this queue, so no two mutations to
/// the same room ever interleave.
#[derive(Debug)]
pub enum PartyEvent {
    /// A new WebSocket connection registered its outbound channel.
    Register {
        connection_id: String,
        sender: mpsc::UnboundedSender<Message>,
    },
    /// A connection asked to join a room (created on first join).
    Join {
        connection_id: String,
        room_id: String,
    },
    /// A connection dropped; membership and admin rights go with it.
    Disconnect { connection_id: String },
    /// An admin asked to grant admin rights to another member.
    Promote {
        connection_id: String,
        room_id: String,
        target_id: String,
    },
    /// Play/pause/seek from either ingress. `connection_id` is `None` for
    /// the stateless HTTP control path, which bypasses the admin check.
    Control {
        connection_id: Option<String>,
        room_id: String,
        action: PlaybackAction,
        time: Option<f64>,
        reply: Option<oneshot::Sender<crate::error::Result<()>>>,
    },
    /// An admin asked to load new media into a room.
    LoadMedia {
        connection_id: String,
        room_id: String,
        source_url: String,
        quality: Option<String>,
    },
    /// Progress relayed from an in-flight acquisition task.
    DownloadProgress { room_id: String, percent: f32 },
    /// An acquisition task finished, one way or the other.
    MediaResolved {
        room_id: String,
        result: Result<AcquiredMedia, String>,
    },
    /// One second elapsed on the background clock.
    Tick,
}

/// Delivery is fire-and-forget: a send to a closed or missing connection is
/// logged and dropped, and the next clock sync or rejoin snapshot corrects
/// whatever the recipient missed.
pub fn to_connection(
    connections: &HashMap<String, mpsc::UnboundedSender<Message>>,
    connection_id: &str,
    message: &ServerMessage,
) {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server message");
            return;
        }
    };
    match connections.get(connection_id) {
        Some(sender) => {
            if sender.send(Message::text(text)).is_err() {
                tracing::debug!(
                    connection_id = %connection_id,
                    "Dropped message for closed connection"
                );
            }
        }
        None => {
            tracing::debug!(
                connection_id = %connection_id,
                "Dropped message for unknown connection"
            );
        }
    }
}

pub fn to_room(
    connections: &HashMap<String, mpsc::UnboundedSender<Message>>,
    members: &HashSet<String>,
    message: &ServerMessage,
) {
    for member in members {
        to_connection(connections, member, message);
    }
}

/// Fans out to every member except the action's originator. Pure echo
/// avoidance: the originator already holds the state it authored.
pub fn to_room_except_sender(
    connections: &HashMap<String, mpsc::UnboundedSender<Message>>,
    members: &HashSet<String>,
    sender_id: &str,
    message: &ServerMessage,
) {
    for member in members {
        if member != sender_id {
            to_connection(connections, member, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(serde_json::from_str(message.to_str().unwrap()).unwrap());
        }
        out
    }

    #[test]
    fn test_to_room_reaches_every_member() {
        let mut connections = HashMap::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        connections.insert("conn-a".to_string(), tx_a);
        connections.insert("conn-b".to_string(), tx_b);

        let members: HashSet<String> =
            ["conn-a".to_string(), "conn-b".to_string()].into_iter().collect();
        to_room(&connections, &members, &ServerMessage::ClockSync { time: 5.0 });

        assert_eq!(collect(&mut rx_a).len(), 1);
        assert_eq!(collect(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_except_sender_skips_originator() {
        let mut connections = HashMap::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        connections.insert("conn-a".to_string(), tx_a);
        connections.insert("conn-b".to_string(), tx_b);

        let members: HashSet<String> =
            ["conn-a".to_string(), "conn-b".to_string()].into_iter().collect();
        to_room_except_sender(
            &connections,
            &members,
            "conn-a",
            &ServerMessage::ClockSync { time: 5.0 },
        );

        assert!(collect(&mut rx_a).is_empty());
        assert_eq!(collect(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_closed_connection_does_not_panic() {
        let mut connections = HashMap::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        connections.insert("conn-a".to_string(), tx);

        to_connection(&connections, "conn-a", &ServerMessage::ClockSync { time: 1.0 });
        to_connection(&connections, "conn-missing", &ServerMessage::ClockSync { time: 1.0 });
    }
}
