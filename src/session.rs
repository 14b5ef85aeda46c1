//! Session reconstruction over classified log events.
//!
//! The log never states "a session started" outright. The reconciler
//! infers logical instance sessions from the event stream: an
//! `OnJoinedRoom` is authoritative, a room transition line primes the
//! next session with world metadata, and a bare `OnPlayerJoined` with no
//! surrounding session opens a fallback session that a late
//! `OnJoinedRoom` can promote in place.
//!
//! All timing decisions take an injected `now` so the windows are
//! testable without sleeping.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::classifier::{LineClassifier, LogEvent};
use crate::dispatch::NotificationRequest;

/// A fallback session may be promoted by a self-join arriving within
/// this many seconds of the fallback's creation.
const SELF_JOIN_GRACE_SECS: i64 = 30;

/// Promotion additionally requires the self-join to arrive within this
/// gap of the most recent player join, so a stale fallback is not
/// silently adopted.
const JOIN_CONTINUATION_GAP_SECS: i64 = 4;

/// Window after a self-join during which an anonymous or placeholder
/// `OnPlayerJoined` is treated as the local client's own echo.
const SELF_ECHO_WINDOW_SECS: i64 = 10;

/// Shown when a join carries neither a usable name nor a user id.
const UNKNOWN_PLAYER: &str = "Unknown VRChat user";

/// How the current session came into existence. Room transition lines
/// only prime metadata for the next session; they never open one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    /// Opened by an `OnJoinedRoom` line.
    SelfJoin,

    /// Opened by an `OnPlayerJoined` with no active session.
    PlayerJoinFallback,
}

impl SessionSource {
    fn label(self) -> &'static str {
        match self {
            Self::SelfJoin => "self-join",
            Self::PlayerJoinFallback => "player-join fallback",
        }
    }
}

/// World/instance metadata captured from a room transition line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub world_id: String,
    pub instance_id: Option<String>,
}

impl RoomInfo {
    fn describe(&self) -> String {
        let world = if self.world_id.is_empty() {
            "unknown world"
        } else {
            &self.world_id
        };
        match &self.instance_id {
            Some(instance) => format!("{world}:{instance}"),
            None => world.to_string(),
        }
    }
}

/// A logical stay in one VRChat instance.
#[derive(Debug)]
struct Session {
    id: u64,
    source: SessionSource,
    started_at: DateTime<Utc>,
    last_join_at: Option<DateTime<Utc>>,
    room: Option<RoomInfo>,
    /// Dedup ledger: cooldown key of every join already notified this
    /// session, with the time it was first seen.
    seen_players: HashMap<String, DateTime<Utc>>,
    local_user_id: Option<String>,
    /// True when `local_user_id` came from a leave line. A hint never
    /// suppresses joins: the leave purge promises that a re-join by the
    /// same id is treated as new.
    local_id_hint: bool,
}

/// A recent self-join awaiting its own `OnPlayerJoined` echo.
#[derive(Debug)]
struct PendingSelfJoin {
    session_id: u64,
    placeholder: Option<String>,
    at: DateTime<Utc>,
}

/// Turns the classified event stream into sessions and notification
/// requests.
#[derive(Debug)]
pub struct SessionReconciler {
    classifier: LineClassifier,
    next_id: u64,
    current: Option<Session>,
    pending_room: Option<RoomInfo>,
    pending_self_join: Option<PendingSelfJoin>,
}

impl Default for SessionReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            classifier: LineClassifier::new(),
            next_id: 0,
            current: None,
            pending_room: None,
            pending_self_join: None,
        }
    }

    /// Applies one event and returns the notifications it produced.
    pub fn handle(&mut self, event: LogEvent, now: DateTime<Utc>) -> Vec<NotificationRequest> {
        match event {
            LogEvent::RoomLeft => {
                self.on_room_left();
                Vec::new()
            }
            LogEvent::RoomEnter {
                world_id,
                instance_id,
                ..
            } => {
                self.on_room_enter(RoomInfo {
                    world_id,
                    instance_id,
                });
                Vec::new()
            }
            LogEvent::SelfJoin { raw } => self.on_self_join(&raw, now),
            LogEvent::PlayerJoin {
                display_name,
                user_id,
                placeholder,
                raw,
            } => self.on_player_join(display_name, user_id, placeholder, &raw, now),
            LogEvent::PlayerLeft {
                display_name,
                user_id,
                ..
            } => {
                self.on_player_left(&display_name, user_id.as_deref());
                Vec::new()
            }
        }
    }

    /// Discards all state, e.g. after a log rotation.
    pub fn reset(&mut self, reason: &str) {
        if let Some(session) = self.current.take() {
            info!("Session {} reset ({reason}).", session.id);
        }
        self.pending_room = None;
        self.pending_self_join = None;
    }

    /// One-line description of the current state, for shutdown logging.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.current {
            Some(s) => format!(
                "Session {} ({}): {} players seen",
                s.id,
                s.source.label(),
                s.seen_players.len()
            ),
            None => "No active session".to_string(),
        }
    }

    fn on_room_left(&mut self) {
        match self.current.take() {
            Some(session) => info!(
                "Session {} ended after tracking {} players.",
                session.id,
                session.seen_players.len()
            ),
            None => debug!("Room-left with no active session"),
        }
        self.pending_room = None;
        self.pending_self_join = None;
    }

    fn on_room_enter(&mut self, room: RoomInfo) {
        if let Some(session) = &mut self.current {
            debug!(
                "Session {} room updated to {}",
                session.id,
                room.describe()
            );
            session.room = Some(room.clone());
        }
        // Also primed for the next session: a transition line usually
        // precedes the OnJoinedRoom that opens it.
        self.pending_room = Some(room);
    }

    fn on_self_join(&mut self, raw: &str, now: DateTime<Utc>) -> Vec<NotificationRequest> {
        let fields = self.classifier.extract_fields(raw, "OnJoinedRoom");

        let promoted = match &mut self.current {
            Some(session) if session.source == SessionSource::PlayerJoinFallback => {
                let age = clamp_secs(now - session.started_at);
                let continuation = match session.last_join_at {
                    None => true,
                    Some(last) => clamp_secs(now - last) <= JOIN_CONTINUATION_GAP_SECS,
                };
                if age < SELF_JOIN_GRACE_SECS && continuation {
                    session.source = SessionSource::SelfJoin;
                    info!("Session {} promoted to self-join.", session.id);
                    true
                } else {
                    false
                }
            }
            _ => false,
        };

        if !promoted {
            if let Some(old) = self.current.take() {
                info!(
                    "Session {} superseded by a new self-join.",
                    old.id
                );
            }
            self.allocate(SessionSource::SelfJoin, now);
        }

        let session = match &mut self.current {
            Some(s) => s,
            // allocate() always leaves a session in place.
            None => return Vec::new(),
        };

        if let Some(id) = &fields.user_id {
            // A self-join is authoritative: it fills in or overrides a
            // leave-derived hint, but never overwrites a confirmed id.
            let adopt = match (&session.local_user_id, session.local_id_hint) {
                (None, _) | (Some(_), true) => true,
                (Some(known), false) if known != id => {
                    warn!(
                        "Session {}: self-join carries user id {id} but {known} is already recorded, ignoring",
                        session.id
                    );
                    false
                }
                _ => false,
            };
            if adopt {
                debug!("Session {}: local user id is {id}", session.id);
                session.local_user_id = Some(id.clone());
                session.local_id_hint = false;
            }
        }

        self.pending_self_join = Some(PendingSelfJoin {
            session_id: session.id,
            placeholder: fields.placeholder.clone(),
            at: now,
        });

        let mut message = if fields.display_name.is_empty() {
            "You joined your instance".to_string()
        } else {
            format!("You joined as {}", fields.display_name)
        };
        if let Some(p) = &fields.placeholder {
            if !p.is_empty() && p != "you" {
                message.push_str(&format!(" ({p})"));
            }
        }
        message.push('.');

        vec![NotificationRequest {
            cooldown_key: format!("self:{}", session.id),
            title: "VRChat".to_string(),
            message,
            wants_desktop: true,
            wants_push: true,
        }]
    }

    fn on_player_join(
        &mut self,
        display_name: String,
        user_id: Option<String>,
        placeholder: Option<String>,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Vec<NotificationRequest> {
        if self.current.is_none() {
            self.allocate(SessionSource::PlayerJoinFallback, now);
        }
        let session = match &mut self.current {
            Some(s) => s,
            None => return Vec::new(),
        };

        // The local client's own join echoes back as OnPlayerJoined.
        if let (Some(id), Some(local)) = (&user_id, &session.local_user_id) {
            if id == local && !session.local_id_hint {
                debug!("Session {}: suppressed own join echo ({id})", session.id);
                self.pending_self_join = None;
                return Vec::new();
            }
        }

        // Within the echo window any placeholder-shaped join is the
        // local client's own arrival, whatever id it carries.
        if let Some(pending) = &self.pending_self_join {
            let age = clamp_secs(now - pending.at);
            if pending.session_id == session.id
                && age < SELF_ECHO_WINDOW_SECS
                && placeholder.is_some()
            {
                if let Some(id) = &user_id {
                    if session.local_user_id.is_none() || session.local_id_hint {
                        debug!(
                            "Session {}: adopting {id} as the local user from the join echo",
                            session.id
                        );
                        session.local_user_id = Some(id.clone());
                        session.local_id_hint = false;
                    }
                }
                debug!(
                    "Session {}: suppressed placeholder join as self-echo",
                    session.id
                );
                self.pending_self_join = None;
                return Vec::new();
            }
        }

        // A placeholder label next to a concrete id on a fallback session
        // is the local user seen before their own OnJoinedRoom.
        if placeholder.is_some() {
            if let Some(id) = &user_id {
                if session.source == SessionSource::PlayerJoinFallback
                    && session.local_user_id.is_none()
                {
                    debug!(
                        "Session {}: adopting {id} as the local user from a placeholder join",
                        session.id
                    );
                    session.local_user_id = Some(id.clone());
                    session.local_id_hint = false;
                    return Vec::new();
                }
                if session.local_id_hint && session.local_user_id.as_deref() == Some(id.as_str()) {
                    debug!(
                        "Session {}: placeholder join confirms {id} as the local user",
                        session.id
                    );
                    session.local_id_hint = false;
                    self.pending_self_join = None;
                    return Vec::new();
                }
            }
        }

        // A named join matching a leave-derived id means the hint was
        // wrong or the player came back; the purge promise wins either
        // way, so drop the hint and notify.
        if session.local_id_hint && user_id.is_some() && user_id == session.local_user_id {
            debug!(
                "Session {}: discarding leave-derived local id on re-join",
                session.id
            );
            session.local_user_id = None;
            session.local_id_hint = false;
        }

        let resolved = if !display_name.is_empty() {
            display_name.clone()
        } else if let Some(id) = &user_id {
            id.clone()
        } else {
            UNKNOWN_PLAYER.to_string()
        };

        let identity = user_id.clone().or_else(|| {
            (placeholder.is_none() && !display_name.is_empty())
                .then(|| display_name.to_lowercase())
        });
        let key = match identity {
            Some(ident) => format!("join:{}:{ident}", session.id),
            None => format!("join:{}:anon:{}", session.id, short_hash(raw)),
        };

        if session.seen_players.contains_key(&key) {
            debug!("Session {}: duplicate join for {key}", session.id);
            return Vec::new();
        }
        session.seen_players.insert(key.clone(), now);
        session.last_join_at = Some(now);

        info!(
            "Session {}: player joined '{}' ({})",
            session.id,
            resolved,
            user_id.as_deref().unwrap_or("no id")
        );

        // A bare "a player" with no id carries too little signal for an
        // alert; it still occupies a dedup slot.
        let wants_desktop = !(placeholder.as_deref() == Some("a player") && user_id.is_none());
        let wants_push = placeholder.is_none();

        vec![NotificationRequest {
            cooldown_key: key,
            title: "VRChat".to_string(),
            message: format!("{resolved} joined your instance."),
            wants_desktop,
            wants_push,
        }]
    }

    fn on_player_left(&mut self, display_name: &str, user_id: Option<&str>) {
        let Some(session) = &mut self.current else {
            debug!("Player-left with no active session");
            return;
        };

        let mut cleared = false;
        if let Some(id) = user_id {
            if session.local_user_id.is_none() {
                debug!(
                    "Session {}: noting {id} from a leave line as a possible local user",
                    session.id
                );
                session.local_user_id = Some(id.to_string());
                session.local_id_hint = true;
            }
            let suffix = format!(":{id}");
            let before = session.seen_players.len();
            session.seen_players.retain(|k, _| !k.ends_with(&suffix));
            cleared = session.seen_players.len() != before;
        }

        let shown = if display_name.is_empty() {
            UNKNOWN_PLAYER
        } else {
            display_name
        };
        info!(
            "Session {}: player left '{}' ({}){}",
            session.id,
            shown,
            user_id.unwrap_or("no id"),
            if cleared { " [cleared join tracking]" } else { "" }
        );
    }

    fn allocate(&mut self, source: SessionSource, now: DateTime<Utc>) {
        self.next_id += 1;
        let room = self.pending_room.take();
        let decoration = room
            .as_ref()
            .map(|r| format!(" in {}", r.describe()))
            .unwrap_or_default();
        info!(
            "Session {} started ({}){decoration}",
            self.next_id,
            source.label()
        );
        self.current = Some(Session {
            id: self.next_id,
            source,
            started_at: now,
            last_join_at: None,
            room,
            seen_players: HashMap::new(),
            local_user_id: None,
            local_id_hint: false,
        });
    }
}

/// Seconds in `d`, floored at zero. The log clock can jump backwards
/// across the injected `now`; a negative gap never widens a window.
fn clamp_secs(d: chrono::Duration) -> i64 {
    d.num_seconds().max(0)
}

fn short_hash(raw: &str) -> String {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    format!("{:08x}", hasher.finish() & 0xffff_ffff)
}
