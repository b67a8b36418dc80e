//! Room registry and the player collection it owns
//!
//! The lobby is the canonical owner of both the rooms and the
//! connection-to-player map that [`crate::broadcast`] reads. It is mutated only
//! by the server's main loop, one inbound packet at a time, so a fan-out call
//! always sees a consistent view.
//!
//! Rooms are password protected and belong to their GM. When the GM drops, the
//! room goes inactive instead of closing; it is only removed once the GM has
//! been gone for the reconnect grace period.

use crate::config::ServerConfig;
use crate::utils::{color_or_default, get_timestamp, new_id};
use log::{debug, info};
use shared::{
    ChatKind, ChatMessage, ClientId, Event, MapId, PlayerInfo, PlayerRecord, RoomId,
    RoomListing, RoomSnapshot, StateEntry, MAX_CHAT_MESSAGE_LEN, MAX_STATE_ENTRIES,
    MAX_STATE_KEY_LEN,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Room not found")]
    RoomNotFound,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Room is full")]
    RoomFull,
    #[error("Already in a room")]
    AlreadyInRoom,
    #[error("You are not in a room")]
    NotInRoom,
    #[error("Message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("State name and key must be at most {0} characters")]
    StateKeyTooLong(usize),
    #[error("Room state is full ({0} entries)")]
    StateFull(usize),
}

/// A game room: one GM plus up to `max_players` regular players
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    password: String,
    pub gm: PlayerInfo,
    gm_connection: Option<ClientId>,
    players: Vec<PlayerInfo>,
    pub max_players: usize,
    chat_history: VecDeque<ChatMessage>,
    /// Latest payload per `(event name, key)`
    state: BTreeMap<(String, String), Vec<u8>>,
    pub created_at: u64,
    /// False while the GM is disconnected
    pub active: bool,
    gm_disconnected_at: Option<Instant>,
}

impl Room {
    fn new(
        name: String,
        password: String,
        gm: PlayerInfo,
        gm_connection: ClientId,
        max_players: usize,
    ) -> Self {
        Self {
            id: new_id(),
            name,
            password,
            gm,
            gm_connection: Some(gm_connection),
            players: Vec::new(),
            max_players,
            chat_history: VecDeque::new(),
            state: BTreeMap::new(),
            created_at: get_timestamp(),
            active: true,
            gm_disconnected_at: None,
        }
    }

    /// Regular players in join order
    pub fn players(&self) -> &[PlayerInfo] {
        &self.players
    }

    /// Regular players plus the GM if the GM is online
    pub fn player_count(&self) -> usize {
        self.players.len() + usize::from(self.active)
    }

    /// Head count used in join and leave notices: regular players plus the
    /// GM seat, whether or not the GM is connected
    pub fn member_count(&self) -> usize {
        self.players.len() + 1
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn gm_disconnected_at(&self) -> Option<Instant> {
        self.gm_disconnected_at
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.chat_history.iter().cloned().collect()
    }

    pub fn state_entries(&self) -> Vec<StateEntry> {
        self.state
            .iter()
            .map(|((name, key), payload)| StateEntry {
                name: name.clone(),
                key: key.clone(),
                payload: payload.clone(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            gm: self.gm.clone(),
            players: self.players.clone(),
            max_players: self.max_players,
        }
    }

    pub fn listing(&self) -> RoomListing {
        RoomListing {
            id: self.id.clone(),
            name: self.name.clone(),
            player_count: self.player_count(),
            max_players: self.max_players + 1,
            gm_name: self.gm.name.clone(),
            created_at: self.created_at,
            has_password: true,
            gm_online: self.active,
        }
    }

    fn push_chat(&mut self, message: ChatMessage, limit: usize) {
        self.chat_history.push_back(message);
        while self.chat_history.len() > limit {
            self.chat_history.pop_front();
        }
    }

    fn member_mut(&mut self, player_id: &str) -> Option<&mut PlayerInfo> {
        if self.gm.id == player_id {
            return Some(&mut self.gm);
        }
        self.players.iter_mut().find(|p| p.id == player_id)
    }
}

#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub max_players_per_room: usize,
    pub chat_history_limit: usize,
    pub gm_reconnect_grace: Duration,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for LobbySettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_players_per_room: config.max_players_per_room,
            chat_history_limit: config.chat_history_limit,
            gm_reconnect_grace: config.gm_reconnect_grace,
        }
    }
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub room_id: RoomId,
    pub room: RoomSnapshot,
    pub player: PlayerInfo,
    pub chat_history: Vec<ChatMessage>,
    pub gm_reconnect: bool,
    pub player_count: usize,
    pub state: Vec<StateEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    GmDisconnected {
        room_id: RoomId,
        player: PlayerInfo,
    },
    PlayerLeft {
        room_id: RoomId,
        player: PlayerInfo,
        player_count: usize,
    },
}

impl LeaveOutcome {
    pub fn room_id(&self) -> &str {
        match self {
            LeaveOutcome::GmDisconnected { room_id, .. } => room_id,
            LeaveOutcome::PlayerLeft { room_id, .. } => room_id,
        }
    }
}

/// A room removed after its GM failed to come back
#[derive(Debug, Clone)]
pub struct ClosedRoom {
    pub room_id: RoomId,
    pub name: String,
    /// Connections that were still in the room
    pub orphans: Vec<ClientId>,
}

pub struct Lobby {
    rooms: HashMap<RoomId, Room>,
    players: HashMap<ClientId, PlayerRecord>,
    settings: LobbySettings,
}

impl Lobby {
    pub fn new(settings: LobbySettings) -> Self {
        Self {
            rooms: HashMap::new(),
            players: HashMap::new(),
            settings,
        }
    }

    /// The player collection, keyed by connection
    pub fn players(&self) -> &HashMap<ClientId, PlayerRecord> {
        &self.players
    }

    pub fn player(&self, client_id: ClientId) -> Option<&PlayerRecord> {
        self.players.get(&client_id)
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    fn in_any_room(&self, client_id: ClientId) -> bool {
        self.players
            .get(&client_id)
            .map_or(false, |record| record.room_id.is_some())
    }

    /// Creates a room owned by `client_id`, who becomes its GM
    pub fn create_room(
        &mut self,
        client_id: ClientId,
        room_name: &str,
        gm_name: &str,
        password: &str,
        color: Option<&str>,
    ) -> Result<RoomSnapshot, RoomError> {
        let room_name = require(room_name, "Room name")?;
        let gm_name = require(gm_name, "GM name")?;
        require(password, "Password")?;

        if self.in_any_room(client_id) {
            return Err(RoomError::AlreadyInRoom);
        }

        let gm = PlayerInfo {
            id: new_id(),
            name: gm_name.to_string(),
            color: color_or_default(color, true),
            is_gm: true,
        };
        let room = Room::new(
            room_name.to_string(),
            password.to_string(),
            gm.clone(),
            client_id,
            self.settings.max_players_per_room,
        );
        let room_id = room.id.clone();
        let snapshot = room.snapshot();

        self.players
            .insert(client_id, PlayerRecord::new(client_id, Some(room_id.clone()), gm));
        self.rooms.insert(room_id.clone(), room);

        info!(
            "Room '{}' ({}) created by client {} - total rooms: {}",
            room_name,
            room_id,
            client_id,
            self.rooms.len()
        );
        Ok(snapshot)
    }

    /// Joins `client_id` to a room
    ///
    /// Joining under the GM's name is treated as the GM reconnecting.
    pub fn join_room(
        &mut self,
        client_id: ClientId,
        room_id: &str,
        player_name: &str,
        password: &str,
        color: Option<&str>,
    ) -> Result<JoinResult, RoomError> {
        let room_id = require(room_id, "Room ID")?;
        let player_name = require(player_name, "Player name")?;
        require(password, "Password")?;

        let already_in_room = self.in_any_room(client_id);
        let room = self.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)?;
        if room.password != password {
            return Err(RoomError::IncorrectPassword);
        }

        if room.gm.name == player_name {
            if already_in_room {
                let tracked_gm = self
                    .players
                    .get(&client_id)
                    .map_or(false, |r| r.profile.is_gm && r.in_room(room_id));
                if tracked_gm {
                    debug!("GM client {} already tracked in room {}", client_id, room_id);
                    return Ok(join_result(room, room.gm.clone(), true));
                }
                return Err(RoomError::AlreadyInRoom);
            }

            // The new connection takes over from any stale GM connection
            if let Some(previous) = room.gm_connection.replace(client_id) {
                if previous != client_id {
                    self.players.remove(&previous);
                }
            }
            room.active = true;
            room.gm_disconnected_at = None;
            if let Some(color) = color.map(str::trim).filter(|c| !c.is_empty()) {
                room.gm.color = color.to_string();
            }

            self.players.insert(
                client_id,
                PlayerRecord::new(client_id, Some(room.id.clone()), room.gm.clone()),
            );
            info!("GM {} reconnected to room '{}'", player_name, room.name);
            return Ok(join_result(room, room.gm.clone(), true));
        }

        if already_in_room {
            return Err(RoomError::AlreadyInRoom);
        }
        if room.is_full() {
            return Err(RoomError::RoomFull);
        }

        let player = PlayerInfo {
            id: new_id(),
            name: player_name.to_string(),
            color: color_or_default(color, false),
            is_gm: false,
        };
        room.players.push(player.clone());
        self.players.insert(
            client_id,
            PlayerRecord::new(client_id, Some(room.id.clone()), player.clone()),
        );

        info!(
            "{} joined room '{}' - total players: {}",
            player_name,
            room.name,
            room.player_count()
        );
        Ok(join_result(room, player, false))
    }

    /// Removes `client_id` from its room, if it is in one
    pub fn leave_room(&mut self, client_id: ClientId) -> Option<LeaveOutcome> {
        let record = self.players.remove(&client_id)?;
        let room_id = record.room_id?;
        let room = self.rooms.get_mut(&room_id)?;

        if record.profile.is_gm {
            if room.gm_connection == Some(client_id) {
                room.gm_connection = None;
                room.active = false;
                room.gm_disconnected_at = Some(Instant::now());
            }
            info!("GM temporarily left room '{}' ({})", room.name, room.id);
            Some(LeaveOutcome::GmDisconnected {
                room_id,
                player: record.profile,
            })
        } else {
            room.players.retain(|p| p.id != record.profile.id);
            info!("Player {} left room '{}'", record.profile.name, room.name);
            Some(LeaveOutcome::PlayerLeft {
                player_count: room.member_count(),
                room_id,
                player: record.profile,
            })
        }
    }

    /// Closes rooms whose GM has been gone for the whole grace period
    pub fn close_expired_rooms(&mut self, now: Instant) -> Vec<ClosedRoom> {
        let grace = self.settings.gm_reconnect_grace;
        let expired: Vec<RoomId> = self
            .rooms
            .values()
            .filter(|room| {
                !room.active
                    && room
                        .gm_disconnected_at
                        .map_or(false, |since| now.saturating_duration_since(since) >= grace)
            })
            .map(|room| room.id.clone())
            .collect();

        let mut closed = Vec::with_capacity(expired.len());
        for room_id in expired {
            let Some(room) = self.rooms.remove(&room_id) else {
                continue;
            };

            let orphans: Vec<ClientId> = self
                .players
                .iter()
                .filter(|(_, record)| record.in_room(&room_id))
                .map(|(id, _)| *id)
                .collect();
            for client_id in &orphans {
                self.players.remove(client_id);
            }

            info!(
                "GM didn't reconnect, closing room '{}' ({})",
                room.name, room.id
            );
            closed.push(ClosedRoom {
                room_id,
                name: room.name,
                orphans,
            });
        }
        closed
    }

    /// Moves the player onto another map within its room
    pub fn set_map(
        &mut self,
        client_id: ClientId,
        map_id: &str,
    ) -> Result<(RoomId, PlayerInfo), RoomError> {
        let map_id: MapId = require(map_id, "Map ID")?.to_string();
        let record = self
            .players
            .get_mut(&client_id)
            .ok_or(RoomError::NotInRoom)?;
        let room_id = record.room_id.clone().ok_or(RoomError::NotInRoom)?;

        debug!("{} moved to map {}", record.profile.name, map_id);
        record.map_id = Some(map_id);
        Ok((room_id, record.profile.clone()))
    }

    /// Appends a chat message to the sender's room history
    pub fn post_chat(
        &mut self,
        client_id: ClientId,
        content: &str,
        kind: ChatKind,
    ) -> Result<(RoomId, ChatMessage), RoomError> {
        let record = self.players.get(&client_id).ok_or(RoomError::NotInRoom)?;
        let room_id = record.room_id.as_ref().ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)?;

        let content = require(content, "Message")?;
        if content.chars().count() > MAX_CHAT_MESSAGE_LEN {
            return Err(RoomError::MessageTooLong(MAX_CHAT_MESSAGE_LEN));
        }

        let message = ChatMessage {
            id: new_id(),
            player_id: record.profile.id.clone(),
            player_name: record.profile.name.clone(),
            player_color: record.profile.color.clone(),
            is_gm: record.profile.is_gm,
            content: content.to_string(),
            timestamp: get_timestamp(),
            kind,
        };
        room.push_chat(message.clone(), self.settings.chat_history_limit);

        Ok((room_id.clone(), message))
    }

    /// Changes a player's color; a blank color resets it to the role default
    pub fn update_color(
        &mut self,
        client_id: ClientId,
        color: &str,
    ) -> Result<(RoomId, PlayerInfo), RoomError> {
        let record = self
            .players
            .get_mut(&client_id)
            .ok_or(RoomError::NotInRoom)?;
        let room_id = record.room_id.clone().ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get_mut(&room_id).ok_or(RoomError::RoomNotFound)?;

        let color = color_or_default(Some(color), record.profile.is_gm);
        record.profile.color = color.clone();
        if let Some(member) = room.member_mut(&record.profile.id) {
            member.color = color;
        }

        Ok((room_id, record.profile.clone()))
    }

    /// Stores a keyed event in the sender's room state
    ///
    /// Unkeyed events are relayed but never stored. A keyed event with an empty
    /// payload removes its entry.
    pub fn apply_event(&mut self, client_id: ClientId, event: &Event) -> Result<(), RoomError> {
        let record = self.players.get(&client_id).ok_or(RoomError::NotInRoom)?;
        let room_id = record.room_id.as_ref().ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)?;

        let Some(key) = event.key.as_deref() else {
            return Ok(());
        };
        if key.chars().count() > MAX_STATE_KEY_LEN
            || event.name.chars().count() > MAX_STATE_KEY_LEN
        {
            return Err(RoomError::StateKeyTooLong(MAX_STATE_KEY_LEN));
        }

        let slot = (event.name.clone(), key.to_string());
        if event.payload.is_empty() {
            room.state.remove(&slot);
            return Ok(());
        }
        if !room.state.contains_key(&slot) && room.state.len() >= MAX_STATE_ENTRIES {
            return Err(RoomError::StateFull(MAX_STATE_ENTRIES));
        }

        debug!("State {}/{} updated in room {}", slot.0, slot.1, room.id);
        room.state.insert(slot, event.payload.clone());
        Ok(())
    }

    /// Everything stored for the sender's room
    pub fn room_state(&self, client_id: ClientId) -> Result<Vec<StateEntry>, RoomError> {
        let record = self.players.get(&client_id).ok_or(RoomError::NotInRoom)?;
        let room_id = record.room_id.as_ref().ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get(room_id).ok_or(RoomError::RoomNotFound)?;
        Ok(room.state_entries())
    }

    /// Room browser listing, oldest room first
    pub fn list_rooms(&self) -> Vec<RoomListing> {
        let mut rooms: Vec<RoomListing> = self.rooms.values().map(Room::listing).collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rooms
    }
}

impl Default for Lobby {
    fn default() -> Self {
        Self::new(LobbySettings::default())
    }
}

fn require<'a>(value: &'a str, field: &'static str) -> Result<&'a str, RoomError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RoomError::MissingField(field))
    } else {
        Ok(trimmed)
    }
}

fn join_result(room: &Room, player: PlayerInfo, gm_reconnect: bool) -> JoinResult {
    JoinResult {
        room_id: room.id.clone(),
        room: room.snapshot(),
        player,
        chat_history: room.chat_history(),
        gm_reconnect,
        player_count: room.member_count(),
        state: room.state_entries(),
    }
}
