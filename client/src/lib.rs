//! # Room Client Library
//!
//! A headless console client for the room server. Lines typed on stdin are
//! parsed into commands and sent as packets; everything the server sends back
//! is printed as one line of text.
//!
//! ## Module Organization
//!
//! ### Commands Module (`commands`)
//! Turns console input into [`commands::Command`] values and their packets.
//!
//! ### Network Module (`network`)
//! Owns the UDP socket, the connection handshake and the heartbeat, and drives
//! the select loop over the socket, stdin and timers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> client::ClientResult<()> {
//!     let mut client = Client::new("127.0.0.1:3001").await?;
//!     client.run().await
//! }
//! ```

pub mod commands;
pub mod network;

use shared::{ChatKind, EventScope, Packet};

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Renders a server packet as a single line for the console.
pub fn format_packet(packet: &Packet) -> String {
    match packet {
        Packet::Connected { client_id } => format!("connected as client {}", client_id),
        Packet::Disconnected { reason } => format!("disconnected: {}", reason),
        Packet::RoomCreated { room } => {
            format!("created room '{}' (id {})", room.name, room.id)
        }
        Packet::RoomJoined {
            room,
            player,
            chat_history,
            gm_reconnect,
        } => {
            let role = if *gm_reconnect { "GM" } else { "player" };
            format!(
                "joined '{}' as {} {} ({} players, {} chat messages)",
                room.name,
                role,
                player.name,
                room.players.len(),
                chat_history.len()
            )
        }
        Packet::PlayerJoined {
            player,
            player_count,
        } => format!("{} joined ({} in room)", player.name, player_count),
        Packet::PlayerLeft {
            player,
            player_count,
        } => format!("{} left ({} in room)", player.name, player_count),
        Packet::GmReconnected => "the GM is back".to_string(),
        Packet::GmDisconnected => "the GM disconnected, waiting for reconnect".to_string(),
        Packet::RoomClosed { reason } => format!("room closed: {}", reason),
        Packet::RoomList { rooms } => {
            if rooms.is_empty() {
                return "no open rooms".to_string();
            }
            let entries: Vec<String> = rooms
                .iter()
                .map(|r| {
                    format!(
                        "{} '{}' GM {}{} {}/{}",
                        r.id,
                        r.name,
                        r.gm_name,
                        if r.gm_online { "" } else { " (away)" },
                        r.player_count,
                        r.max_players
                    )
                })
                .collect();
            format!("rooms: {}", entries.join("; "))
        }
        Packet::ChatMessage { message } => {
            let gm = if message.is_gm { " [GM]" } else { "" };
            let name = &message.player_name;
            match message.kind {
                ChatKind::Chat => format!("<{}{}> {}", name, gm, message.content),
                ChatKind::Roll => format!("* {}{} rolls {}", name, gm, message.content),
                ChatKind::System => format!("-- {}", message.content),
            }
        }
        Packet::Event { from, scope, event } => {
            let scope = match scope {
                EventScope::Room => "room",
                EventScope::Map => "map",
            };
            format!(
                "{} event '{}' from {}: {}",
                scope,
                event.name,
                from,
                String::from_utf8_lossy(&event.payload)
            )
        }
        Packet::PlayerMapChanged { player_id, map_id } => {
            format!("{} moved to map {}", player_id, map_id)
        }
        Packet::PlayerMoved {
            player_name,
            x,
            y,
            dragging,
            ..
        } => format!(
            "{} {} to ({:.1}, {:.1})",
            player_name,
            if *dragging { "drags" } else { "moves" },
            x,
            y
        ),
        Packet::PlayerColorUpdated {
            player_id, color, ..
        } => format!("{} changed color to {}", player_id, color),
        Packet::HealthResponse {
            player_id,
            room_name,
            timestamp,
            ..
        } => format!(
            "healthy at {}: player {}, room {}",
            timestamp,
            player_id.as_deref().unwrap_or("-"),
            room_name.as_deref().unwrap_or("-")
        ),
        Packet::FullSync { entries } => {
            let keys: Vec<String> = entries
                .iter()
                .map(|e| format!("{}/{}", e.name, e.key))
                .collect();
            format!("room state: {} entries [{}]", entries.len(), keys.join(", "))
        }
        Packet::HeartbeatAck { timestamp } => format!("heartbeat ack {}", timestamp),
        Packet::Error { message } => format!("error: {}", message),
        other => format!("unexpected packet {:?}", other),
    }
}
