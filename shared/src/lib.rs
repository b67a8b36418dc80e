use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PACKET_SIZE: usize = 65536;
pub const MAX_CHAT_MESSAGE_LEN: usize = 256;
pub const MAX_EVENT_PAYLOAD_LEN: usize = 1024;
/// Keyed entries a room keeps for late joiners; bounds the `FullSync` datagram
pub const MAX_STATE_ENTRIES: usize = 32;
pub const MAX_STATE_KEY_LEN: usize = 64;
pub const DEFAULT_PLAYER_COLOR: &str = "#4a90e2";
pub const DEFAULT_GM_COLOR: &str = "#d4af37";

/// Server-assigned identifier of one live connection
pub type ClientId = u32;
pub type RoomId = String;
pub type MapId = String;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    CreateRoom {
        room_name: String,
        gm_name: String,
        password: String,
        color: Option<String>,
    },
    JoinRoom {
        room_id: RoomId,
        player_name: String,
        password: String,
        color: Option<String>,
    },
    LeaveRoom,
    ChangeMap {
        map_id: MapId,
    },
    Chat {
        message: String,
        kind: ChatKind,
    },
    RoomEvent {
        event: Event,
    },
    MapEvent {
        event: Event,
    },
    Move {
        x: f32,
        y: f32,
        dragging: bool,
    },
    UpdateColor {
        color: String,
    },
    ListRooms,
    RequestFullSync,
    HealthCheck,
    Heartbeat {
        timestamp: u64,
    },
    Disconnect,

    Connected {
        client_id: ClientId,
    },
    RoomCreated {
        room: RoomSnapshot,
    },
    RoomJoined {
        room: RoomSnapshot,
        player: PlayerInfo,
        chat_history: Vec<ChatMessage>,
        gm_reconnect: bool,
    },
    PlayerJoined {
        player: PlayerInfo,
        player_count: usize,
    },
    PlayerLeft {
        player: PlayerInfo,
        player_count: usize,
    },
    GmReconnected,
    GmDisconnected,
    RoomClosed {
        reason: String,
    },
    RoomList {
        rooms: Vec<RoomListing>,
    },
    ChatMessage {
        message: ChatMessage,
    },
    Event {
        from: String,
        scope: EventScope,
        event: Event,
    },
    PlayerMapChanged {
        player_id: String,
        map_id: MapId,
    },
    PlayerMoved {
        player_id: String,
        player_name: String,
        x: f32,
        y: f32,
        dragging: bool,
        server_timestamp: u64,
    },
    PlayerColorUpdated {
        player_id: String,
        color: String,
        is_gm: bool,
    },
    FullSync {
        entries: Vec<StateEntry>,
    },
    HealthResponse {
        player_id: Option<String>,
        room_id: Option<RoomId>,
        room_name: Option<String>,
        timestamp: u64,
    },
    HeartbeatAck {
        timestamp: u64,
    },
    Error {
        message: String,
    },
    Disconnected {
        reason: String,
    },
}

/// A named application event relayed verbatim to other players.
///
/// The payload is opaque to the server; clients conventionally encode JSON in it.
/// An event carrying a `key` also updates the room's state under `(name, key)`,
/// and an empty payload on a keyed event clears that entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            key: None,
            payload: payload.into(),
        }
    }

    pub fn keyed(
        name: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
            payload: payload.into(),
        }
    }
}

/// One stored piece of room state, e.g. a token position or a dropped item
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub name: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    Room,
    Map,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatKind {
    #[default]
    Chat,
    System,
    Roll,
}

/// Public view of a room member
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub color: String,
    pub is_gm: bool,
}

/// One entry of the connection layer's player collection.
///
/// `room_id` and `map_id` are optional: a record lacking either never matches
/// a broadcast filter on that field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub connection_id: ClientId,
    pub room_id: Option<RoomId>,
    pub map_id: Option<MapId>,
    pub profile: PlayerInfo,
}

impl PlayerRecord {
    pub fn new(connection_id: ClientId, room_id: Option<RoomId>, profile: PlayerInfo) -> Self {
        Self {
            connection_id,
            room_id,
            map_id: None,
            profile,
        }
    }

    pub fn in_room(&self, room_id: &str) -> bool {
        self.room_id.as_deref() == Some(room_id)
    }

    pub fn on_map(&self, map_id: &str) -> bool {
        self.map_id.as_deref() == Some(map_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub player_id: String,
    pub player_name: String,
    pub player_color: String,
    pub is_gm: bool,
    pub content: String,
    pub timestamp: u64,
    pub kind: ChatKind,
}

/// Room state sent to a player on create or join
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub gm: PlayerInfo,
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
}

/// Room browser entry
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomListing {
    pub id: RoomId,
    pub name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub gm_name: String,
    pub created_at: u64,
    pub has_password: bool,
    pub gm_online: bool,
}
