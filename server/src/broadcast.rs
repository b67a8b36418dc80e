//! Room and map scoped fan-out of relayed events
//!
//! Given the connection layer's player collection, these functions deliver one
//! message to every *other* player sharing the sender's room (and optionally
//! the sender's map). They never touch the collection beyond reading it, and
//! they do not care what the message is: the server passes whole packets.
//!
//! Delivery goes through the [`Deliver`] primitive. Errors it returns are not
//! caught here; the first one aborts the fan-out and is handed to the caller.

use shared::{ClientId, PlayerRecord};
use std::collections::HashMap;

/// Per-connection send primitive used by the fan-out
pub trait Deliver<M: ?Sized> {
    type Error;

    fn deliver(&mut self, recipient: ClientId, message: &M) -> Result<(), Self::Error>;
}

/// Delivers `message` to every player in `room_id` except `sender_id`.
///
/// Players whose record has no room never match. A room nobody is in simply
/// yields no deliveries.
pub fn broadcast_to_room<M, D>(
    players: &HashMap<ClientId, PlayerRecord>,
    sender_id: ClientId,
    room_id: &str,
    message: &M,
    delivery: &mut D,
) -> Result<(), D::Error>
where
    M: ?Sized,
    D: Deliver<M>,
{
    fan_out(players, sender_id, message, delivery, |record| {
        record.in_room(room_id)
    })
}

/// Delivers `message` to every player in `room_id` who is also on `map_id`,
/// except `sender_id`.
///
/// The recipients are always a subset of what [`broadcast_to_room`] would
/// reach for the same room.
pub fn broadcast_to_map<M, D>(
    players: &HashMap<ClientId, PlayerRecord>,
    sender_id: ClientId,
    room_id: &str,
    map_id: &str,
    message: &M,
    delivery: &mut D,
) -> Result<(), D::Error>
where
    M: ?Sized,
    D: Deliver<M>,
{
    fan_out(players, sender_id, message, delivery, |record| {
        record.in_room(room_id) && record.on_map(map_id)
    })
}

fn fan_out<M, D, F>(
    players: &HashMap<ClientId, PlayerRecord>,
    sender_id: ClientId,
    message: &M,
    delivery: &mut D,
    matches: F,
) -> Result<(), D::Error>
where
    M: ?Sized,
    D: Deliver<M>,
    F: Fn(&PlayerRecord) -> bool,
{
    for (connection_id, record) in players {
        if *connection_id == sender_id || !matches(record) {
            continue;
        }
        delivery.deliver(*connection_id, message)?;
    }
    Ok(())
}
