mod engine;
mod events;
mod playback;
mod room;
mod signaling;

pub use engine::PartyServer;
pub use events::PartyEvent;
pub use playback::{PlaybackState, PlaybackStatus};
pub use room::{Room, RoomRegistry, RoomSnapshot};
pub use signaling::{ClientMessage, PlaybackAction, ServerMessage, SignalingHandler};
