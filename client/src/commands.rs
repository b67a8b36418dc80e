//! Parsing of typed console lines into client actions

use shared::{ChatKind, Event, Packet, MAX_CHAT_MESSAGE_LEN};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create {
        room_name: String,
        gm_name: String,
        password: String,
        color: Option<String>,
    },
    Join {
        room_id: String,
        player_name: String,
        password: String,
        color: Option<String>,
    },
    Leave,
    Map(String),
    Move { x: f32, y: f32, dragging: bool },
    Color(String),
    Rooms,
    Health,
    RoomEvent { name: String, payload: String },
    MapEvent { name: String, payload: String },
    /// Keyed room event; an empty payload clears the stored entry
    SetState { name: String, key: String, payload: String },
    Sync,
    Roll(String),
    Chat(String),
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty input")]
    Empty,
    #[error("unknown command /{0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid coordinate '{0}'")]
    InvalidCoordinate(String),
    #[error("message longer than {0} characters")]
    TooLong(usize),
}

/// Parses one line of user input. Anything not starting with `/` is chat.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CommandError::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return chat(line).map(Command::Chat);
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let words: Vec<&str> = args.split_whitespace().collect();

    match name {
        "create" => match words.as_slice() {
            [room, gm, password] | [room, gm, password, _] => Ok(Command::Create {
                room_name: room.to_string(),
                gm_name: gm.to_string(),
                password: password.to_string(),
                color: words.get(3).map(|c| c.to_string()),
            }),
            _ => Err(CommandError::Usage("/create <room> <gm> <password> [color]")),
        },
        "join" => match words.as_slice() {
            [room, player, password] | [room, player, password, _] => Ok(Command::Join {
                room_id: room.to_string(),
                player_name: player.to_string(),
                password: password.to_string(),
                color: words.get(3).map(|c| c.to_string()),
            }),
            _ => Err(CommandError::Usage("/join <room-id> <name> <password> [color]")),
        },
        "leave" => Ok(Command::Leave),
        "map" => match words.as_slice() {
            [map] => Ok(Command::Map(map.to_string())),
            _ => Err(CommandError::Usage("/map <id>")),
        },
        "move" => match words.as_slice() {
            [x, y] => Ok(Command::Move {
                x: coordinate(x)?,
                y: coordinate(y)?,
                dragging: false,
            }),
            [x, y, "drag"] => Ok(Command::Move {
                x: coordinate(x)?,
                y: coordinate(y)?,
                dragging: true,
            }),
            _ => Err(CommandError::Usage("/move <x> <y> [drag]")),
        },
        "color" => match words.as_slice() {
            [color] => Ok(Command::Color(color.to_string())),
            _ => Err(CommandError::Usage("/color <c>")),
        },
        "rooms" => Ok(Command::Rooms),
        "health" => Ok(Command::Health),
        "event" | "mapevent" => {
            let Some((event_name, payload)) = args.split_once(char::is_whitespace) else {
                return Err(CommandError::Usage("/event <name> <text>"));
            };
            let (name_owned, payload) = (event_name.to_string(), payload.trim().to_string());
            if name == "event" {
                Ok(Command::RoomEvent {
                    name: name_owned,
                    payload,
                })
            } else {
                Ok(Command::MapEvent {
                    name: name_owned,
                    payload,
                })
            }
        }
        "set" => {
            let mut parts = args.splitn(3, char::is_whitespace);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(key), Some(payload)) if !name.is_empty() => {
                    Ok(Command::SetState {
                        name: name.to_string(),
                        key: key.to_string(),
                        payload: payload.trim().to_string(),
                    })
                }
                _ => Err(CommandError::Usage("/set <name> <key> <text>")),
            }
        }
        "unset" => match words.as_slice() {
            [name, key] => Ok(Command::SetState {
                name: name.to_string(),
                key: key.to_string(),
                payload: String::new(),
            }),
            _ => Err(CommandError::Usage("/unset <name> <key>")),
        },
        "sync" => Ok(Command::Sync),
        "roll" => {
            if args.is_empty() {
                return Err(CommandError::Usage("/roll <text>"));
            }
            chat(args).map(Command::Roll)
        }
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn chat(text: &str) -> Result<String, CommandError> {
    if text.chars().count() > MAX_CHAT_MESSAGE_LEN {
        return Err(CommandError::TooLong(MAX_CHAT_MESSAGE_LEN));
    }
    Ok(text.to_string())
}

fn coordinate(value: &str) -> Result<f32, CommandError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::InvalidCoordinate(value.to_string()))
}

impl Command {
    /// The packet this command sends, or `None` for local-only commands.
    pub fn into_packet(self) -> Option<Packet> {
        let packet = match self {
            Command::Create {
                room_name,
                gm_name,
                password,
                color,
            } => Packet::CreateRoom {
                room_name,
                gm_name,
                password,
                color,
            },
            Command::Join {
                room_id,
                player_name,
                password,
                color,
            } => Packet::JoinRoom {
                room_id,
                player_name,
                password,
                color,
            },
            Command::Leave => Packet::LeaveRoom,
            Command::Map(map_id) => Packet::ChangeMap { map_id },
            Command::Move { x, y, dragging } => Packet::Move { x, y, dragging },
            Command::Color(color) => Packet::UpdateColor { color },
            Command::Rooms => Packet::ListRooms,
            Command::Health => Packet::HealthCheck,
            Command::RoomEvent { name, payload } => Packet::RoomEvent {
                event: Event::new(name, payload.into_bytes()),
            },
            Command::MapEvent { name, payload } => Packet::MapEvent {
                event: Event::new(name, payload.into_bytes()),
            },
            Command::SetState { name, key, payload } => Packet::RoomEvent {
                event: Event::keyed(name, key, payload.into_bytes()),
            },
            Command::Sync => Packet::RequestFullSync,
            Command::Roll(message) => Packet::Chat {
                message,
                kind: ChatKind::Roll,
            },
            Command::Chat(message) => Packet::Chat {
                message,
                kind: ChatKind::Chat,
            },
            Command::Quit => return None,
        };
        Some(packet)
    }
}
