use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use warp::ws::Message;

use super::events::{self, PartyEvent};
use super::playback::{PlaybackState, PlaybackStatus};
use super::room::RoomRegistry;
use super::signaling::{PlaybackAction, ServerMessage};
use crate::error::{PartyError, Result};
use crate::media::MediaAcquirer;

/// Interval of the process-wide background clock.
const CLOCK_TICK: Duration = Duration::from_secs(1);

/// A forced `clock_sync` goes out whenever the whole-second position is a
/// multiple of this, keeping drift correction cheaper than tick-rate chatter.
const SYNC_EVERY_SECS: i64 = 5;

/// Cloneable handle to the engine's event queue. WebSocket handlers, HTTP
/// routes and the CLI-facing surface all talk to the engine through this.
#[derive(Clone)]
pub struct PartyServer {
    events: mpsc::UnboundedSender<PartyEvent>,
}

impl PartyServer {
    /// Starts the engine task and the background clock, returning the
    /// handle used by all ingress paths.
    pub fn spawn(acquirer: Arc<dyn MediaAcquirer>, media_dir: PathBuf) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let engine = Engine::new(acquirer, media_dir, events_tx.clone());
        tokio::spawn(engine.run(events_rx));
        tokio::spawn(run_clock(events_tx.clone()));

        Self { events: events_tx }
    }

    pub fn emit(&self, event: PartyEvent) {
        if self.events.send(event).is_err() {
            tracing::error!("Party engine event queue is closed, dropping event");
        }
    }

    /// Control ingress for the stateless HTTP endpoint. Resolves once the
    /// engine has processed the action, with an explicit error for unknown
    /// rooms.
    pub async fn control(
        &self,
        room_id: &str,
        action: PlaybackAction,
        time: Option<f64>,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(PartyEvent::Control {
                connection_id: None,
                room_id: room_id.to_string(),
                action,
                time,
                reply: Some(reply_tx),
            })
            .map_err(|_| PartyError::EngineUnavailable)?;
        reply_rx.await.map_err(|_| PartyError::EngineUnavailable)?
    }
}

/// Emits one `Tick` per second onto the engine queue. The clock never
/// touches room state directly; ordering against other events is whatever
/// order the queue dequeues them.
async fn run_clock(events: mpsc::UnboundedSender<PartyEvent>) {
    let mut ticker = interval(CLOCK_TICK);
    ticker.tick().await; // the first tick fires immediately
    loop {
        ticker.tick().await;
        if events.send(PartyEvent::Tick).is_err() {
            break;
        }
    }
}

/// Owns every piece of mutable party state. Runs as a single task draining
/// the event queue, so handlers never interleave and no locking exists
/// anywhere in the room model.
struct Engine {
    registry: RoomRegistry,
    connections: HashMap<String, mpsc::UnboundedSender<Message>>,
    /// connection id -> the one room it currently occupies
    memberships: HashMap<String, String>,
    /// room id -> playback state to restore if the in-flight acquisition fails
    pending_downloads: HashMap<String, PlaybackState>,
    acquirer: Arc<dyn MediaAcquirer>,
    media_dir: PathBuf,
    events: mpsc::UnboundedSender<PartyEvent>,
}

impl Engine {
    fn new(
        acquirer: Arc<dyn MediaAcquirer>,
        media_dir: PathBuf,
        events: mpsc::UnboundedSender<PartyEvent>,
    ) -> Self {
        Self {
            registry: RoomRegistry::new(),
            connections: HashMap::new(),
            memberships: HashMap::new(),
            pending_downloads: HashMap::new(),
            acquirer,
            media_dir,
            events,
        }
    }

    async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<PartyEvent>) {
        tracing::info!("Party engine started");
        while let Some(event) = events_rx.recv().await {
            self.handle_event(event);
        }
        tracing::info!("Party engine stopped");
    }

    fn handle_event(&mut self, event: PartyEvent) {
        match event {
            PartyEvent::Register {
                connection_id,
                sender,
            } => self.handle_register(connection_id, sender),
            PartyEvent::Join {
                connection_id,
                room_id,
            } => self.handle_join(connection_id, room_id),
            PartyEvent::Disconnect { connection_id } => self.handle_disconnect(&connection_id),
            PartyEvent::Promote {
                connection_id,
                room_id,
                target_id,
            } => self.handle_promote(&connection_id, &room_id, &target_id),
            PartyEvent::Control {
                connection_id,
                room_id,
                action,
                time,
                reply,
            } => {
                let result = self.handle_control(connection_id.as_deref(), &room_id, action, time);
                if let Err(ref e) = result {
                    if let Some(ref conn) = connection_id {
                        events::to_connection(
                            &self.connections,
                            conn,
                            &ServerMessage::ErrorNotice {
                                message: e.to_string(),
                            },
                        );
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            PartyEvent::LoadMedia {
                connection_id,
                room_id,
                source_url,
                quality,
            } => self.handle_load_media(&connection_id, &room_id, source_url, quality),
            PartyEvent::DownloadProgress { room_id, percent } => {
                self.handle_download_progress(&room_id, percent)
            }
            PartyEvent::MediaResolved { room_id, result } => {
                self.handle_media_resolved(&room_id, result)
            }
            PartyEvent::Tick => self.handle_tick(),
        }
    }

    fn handle_register(
        &mut self,
        connection_id: String,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        tracing::info!(connection_id = %connection_id, "Connection registered");
        self.connections.insert(connection_id.clone(), sender);
        events::to_connection(
            &self.connections,
            &connection_id,
            &ServerMessage::Connected { connection_id: connection_id.clone() },
        );
    }

    fn handle_join(&mut self, connection_id: String, room_id: String) {
        if !self.connections.contains_key(&connection_id) {
            tracing::debug!(connection_id = %connection_id, "Join from unregistered connection");
            return;
        }

        // A connection occupies at most one room; switching rooms leaves
        // the old one first (which may garbage collect it).
        let switching = self
            .memberships
            .get(&connection_id)
            .map_or(false, |current| *current != room_id);
        if switching {
            self.leave_room(&connection_id);
        }

        let room = self.registry.get_or_create(&room_id, &connection_id);
        room.members.insert(connection_id.clone());
        let snapshot = room.snapshot();
        let members = room.members.clone();

        self.memberships
            .insert(connection_id.clone(), room_id.clone());

        tracing::info!(connection_id = %connection_id, room_id = %room_id, "Connection joined room");

        events::to_connection(
            &self.connections,
            &connection_id,
            &ServerMessage::InitialState {
                room: snapshot.clone(),
            },
        );
        events::to_room(
            &self.connections,
            &members,
            &ServerMessage::RoomUpdated { room: snapshot },
        );
    }

    fn handle_disconnect(&mut self, connection_id: &str) {
        self.leave_room(connection_id);
        self.connections.remove(connection_id);
        tracing::info!(connection_id = %connection_id, "Connection removed");
    }

    /// Removes the connection from its room, deleting the room if it ends
    /// up empty and broadcasting the new membership otherwise.
    fn leave_room(&mut self, connection_id: &str) {
        let Some(room_id) = self.memberships.remove(connection_id) else {
            return;
        };
        let Some(room) = self.registry.get_mut(&room_id) else {
            return;
        };

        room.members.remove(connection_id);
        room.admins.remove(connection_id);
        tracing::info!(connection_id = %connection_id, room_id = %room_id, "Connection left room");

        if room.members.is_empty() {
            let room = self
                .registry
                .remove(&room_id)
                .expect("room was just borrowed");
            self.pending_downloads.remove(&room_id);
            if let Some(media_ref) = room.playback.media_ref {
                self.purge_media(&room_id, &media_ref);
            }
        } else {
            let snapshot = room.snapshot();
            let members = room.members.clone();
            events::to_room(
                &self.connections,
                &members,
                &ServerMessage::RoomUpdated { room: snapshot },
            );
        }
    }

    fn handle_promote(&mut self, connection_id: &str, room_id: &str, target_id: &str) {
        let Some(room) = self.registry.get_mut(room_id) else {
            events::to_connection(
                &self.connections,
                connection_id,
                &ServerMessage::ErrorNotice {
                    message: PartyError::RoomNotFound(room_id.to_string()).to_string(),
                },
            );
            return;
        };

        if !room.promote(connection_id, target_id) {
            return;
        }
        let snapshot = room.snapshot();
        let members = room.members.clone();

        events::to_room(
            &self.connections,
            &members,
            &ServerMessage::Notice {
                message: format!("{} is now an admin", target_id),
            },
        );
        events::to_room(
            &self.connections,
            &members,
            &ServerMessage::RoomUpdated { room: snapshot },
        );
    }

    /// Shared by both ingress paths. `origin` is `None` for HTTP control,
    /// which is a privileged alternate ingress rather than a member action.
    fn handle_control(
        &mut self,
        origin: Option<&str>,
        room_id: &str,
        action: PlaybackAction,
        time: Option<f64>,
    ) -> Result<()> {
        let Some(room) = self.registry.get_mut(room_id) else {
            return Err(PartyError::RoomNotFound(room_id.to_string()));
        };

        if let Some(origin) = origin {
            // Fail-closed, fail-silent: a non-admin attempt changes nothing
            // and surfaces nothing.
            if !room.is_admin(origin) {
                tracing::debug!(
                    connection_id = %origin,
                    room_id = %room_id,
                    ?action,
                    "Control action from non-admin dropped"
                );
                return Ok(());
            }
        }

        let accepted = match action {
            PlaybackAction::Play => room.playback.play(),
            PlaybackAction::Pause => room.playback.pause(),
            PlaybackAction::Seek => {
                let Some(time) = time else {
                    return Err(PartyError::InvalidControlAction(
                        "seek requires a time".to_string(),
                    ));
                };
                room.playback.seek(time)
            }
        };

        if !accepted {
            tracing::debug!(room_id = %room_id, ?action, "Control action rejected by playback state");
            return Ok(());
        }

        let position = room.playback.position;
        let members = room.members.clone();
        tracing::info!(room_id = %room_id, ?action, position = position, "Playback action applied");

        let message = ServerMessage::ActionPerformed {
            action,
            time: position,
        };
        match origin {
            Some(origin) => {
                events::to_room_except_sender(&self.connections, &members, origin, &message)
            }
            None => events::to_room(&self.connections, &members, &message),
        }
        Ok(())
    }

    fn handle_load_media(
        &mut self,
        connection_id: &str,
        room_id: &str,
        source_url: String,
        quality: Option<String>,
    ) {
        let Some(room) = self.registry.get_mut(room_id) else {
            events::to_connection(
                &self.connections,
                connection_id,
                &ServerMessage::ErrorNotice {
                    message: PartyError::RoomNotFound(room_id.to_string()).to_string(),
                },
            );
            return;
        };

        if !room.is_admin(connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                room_id = %room_id,
                "Load media request from non-admin dropped"
            );
            return;
        }

        // No cancellation of in-flight acquisitions; the requester must
        // wait for the current one to resolve.
        if room.playback.status == PlaybackStatus::Downloading {
            events::to_connection(
                &self.connections,
                connection_id,
                &ServerMessage::Notice {
                    message: "media acquisition already in progress".to_string(),
                },
            );
            return;
        }

        let prior = room.playback.begin_download();
        let snapshot = room.snapshot();
        let members = room.members.clone();
        self.pending_downloads.insert(room_id.to_string(), prior);

        tracing::info!(room_id = %room_id, source_url = %source_url, "Media acquisition started");
        events::to_room(
            &self.connections,
            &members,
            &ServerMessage::RoomUpdated { room: snapshot },
        );

        self.spawn_acquisition(room_id.to_string(), source_url, quality);
    }

    /// One task per request; its resolution re-enters the event queue as a
    /// regular `MediaResolved` event so serialization is preserved.
    fn spawn_acquisition(&self, room_id: String, source_url: String, quality: Option<String>) {
        let acquirer = Arc::clone(&self.acquirer);
        let events = self.events.clone();

        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let relay = {
                let events = events.clone();
                let room_id = room_id.clone();
                tokio::spawn(async move {
                    while let Some(percent) = progress_rx.recv().await {
                        if events
                            .send(PartyEvent::DownloadProgress {
                                room_id: room_id.clone(),
                                percent,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })
            };

            let result = acquirer
                .acquire(&source_url, quality.as_deref(), progress_tx)
                .await;
            // The progress channel closes when acquire returns, so the
            // relay drains fully before the resolution is queued.
            let _ = relay.await;
            let _ = events.send(PartyEvent::MediaResolved {
                room_id,
                result: result.map_err(|e| e.to_string()),
            });
        });
    }

    fn handle_download_progress(&mut self, room_id: &str, percent: f32) {
        let Some(room) = self.registry.get(room_id) else {
            return;
        };
        if room.playback.status != PlaybackStatus::Downloading {
            return;
        }
        events::to_room(
            &self.connections,
            &room.members,
            &ServerMessage::DownloadProgress { percent },
        );
    }

    fn handle_media_resolved(
        &mut self,
        room_id: &str,
        result: std::result::Result<crate::media::AcquiredMedia, String>,
    ) {
        let prior = self.pending_downloads.remove(room_id);

        let stale = prior.is_none() || !self.registry.contains(room_id);
        if stale {
            // The room emptied out (or was recreated) while the download
            // ran; nothing to update, but don't leak the file.
            if let Ok(media) = result {
                tracing::info!(room_id = %room_id, "Discarding acquisition for vanished room");
                self.purge_media(room_id, &media.local_ref);
            }
            return;
        }
        let room = self
            .registry
            .get_mut(room_id)
            .expect("registry membership checked above");

        match result {
            Ok(media) => {
                let replaced = room
                    .playback
                    .media_ref
                    .clone()
                    .filter(|old| *old != media.local_ref);
                room.playback.load(media.local_ref.clone(), media.duration_seconds);
                let snapshot = room.snapshot();
                let members = room.members.clone();

                tracing::info!(
                    room_id = %room_id,
                    media_ref = %media.local_ref,
                    duration = ?media.duration_seconds,
                    "Media loaded, autoplay started"
                );
                events::to_room(
                    &self.connections,
                    &members,
                    &ServerMessage::RoomUpdated { room: snapshot },
                );
                if let Some(old_ref) = replaced {
                    self.purge_media(room_id, &old_ref);
                }
            }
            Err(reason) => {
                room.playback
                    .restore(prior.expect("pending download checked above"));
                let snapshot = room.snapshot();
                let members = room.members.clone();

                tracing::warn!(room_id = %room_id, reason = %reason, "Media acquisition failed");
                events::to_room(
                    &self.connections,
                    &members,
                    &ServerMessage::ErrorNotice {
                        message: format!("media acquisition failed: {}", reason),
                    },
                );
                events::to_room(
                    &self.connections,
                    &members,
                    &ServerMessage::RoomUpdated { room: snapshot },
                );
            }
        }
    }

    /// Advances every playing room by one second. A room with no media or
    /// not currently playing is skipped without error, and an empty member
    /// set just means the sync fan-out reaches nobody.
    fn handle_tick(&mut self) {
        let connections = &self.connections;
        for room in self.registry.iter_mut() {
            if let Some(position) = room.playback.tick() {
                if (position.floor() as i64) % SYNC_EVERY_SECS == 0 {
                    events::to_room(
                        connections,
                        &room.members,
                        &ServerMessage::ClockSync { time: position },
                    );
                }
            }
        }
    }

    /// Best-effort removal of a downloaded media file once no room refers
    /// to it. Only the file name component is honored, so a hostile
    /// `local_ref` cannot point outside the media directory.
    fn purge_media(&self, room_id: &str, media_ref: &str) {
        let Some(file_name) = Path::new(media_ref).file_name() else {
            return;
        };
        let path = self.media_dir.join(file_name);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!(room_id = %room_id, path = %path.display(), "Purged media file")
                }
                Err(e) => {
                    tracing::debug!(
                        room_id = %room_id,
                        path = %path.display(),
                        error = %e,
                        "Media file purge skipped"
                    )
                }
            }
        });
    }
}
