//! Server network layer handling UDP communications and the room event loop

use crate::broadcast::{broadcast_to_map, broadcast_to_room, Deliver};
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::lobby::{Lobby, LobbySettings, LeaveOutcome};
use crate::throttle::{BroadcastThrottle, THROTTLE_ENTRY_LIFETIME};
use crate::utils::get_timestamp;
use crate::ServerResult;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    ChatKind, ClientId, Event, EventScope, Packet, MAX_EVENT_PAYLOAD_LEN, MAX_PACKET_SIZE,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ClientId },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    SendToClient { packet: Packet, client_id: ClientId },
    BroadcastPacket { packet: Packet, exclude: Option<ClientId> },
}

/// Fan-out delivery that queues one packet per recipient for the sender task
pub struct OutboundQueue<'a> {
    tx: &'a mpsc::UnboundedSender<OutboundMessage>,
}

impl<'a> OutboundQueue<'a> {
    pub fn new(tx: &'a mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }
}

impl Deliver<Packet> for OutboundQueue<'_> {
    type Error = mpsc::error::SendError<OutboundMessage>;

    fn deliver(&mut self, recipient: ClientId, message: &Packet) -> Result<(), Self::Error> {
        self.tx.send(OutboundMessage::SendToClient {
            packet: message.clone(),
            client_id: recipient,
        })
    }
}

/// Main server coordinating networking and room state
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    lobby: Lobby,
    throttle: BroadcastThrottle,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr()).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            lobby: Lobby::new(LobbySettings::from(&config)),
            throttle: BroadcastThrottle::new(),
            config,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping the main loop from another task
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            warn!("Network sender already running");
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::SendToClient { packet, client_id } => {
                        let addr = {
                            let clients_guard = clients.read().await;
                            clients_guard.addr_of(client_id)
                        };

                        match addr {
                            Some(addr) => {
                                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await
                                {
                                    error!("Failed to send to client {}: {}", client_id, e);
                                }
                            }
                            None => debug!("Dropping packet for departed client {}", client_id),
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> ServerResult<()> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outbound_tx.send(OutboundMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_to_client(&self, client_id: ClientId, packet: Packet) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendToClient { packet, client_id })
        {
            error!("Failed to queue packet for client {}: {}", client_id, e);
        }
    }

    fn send_error(&self, client_id: ClientId, message: impl Into<String>) {
        self.send_to_client(
            client_id,
            Packet::Error {
                message: message.into(),
            },
        );
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ClientId>) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Relays to everyone else in `room_id`
    fn relay_to_room(&self, sender: ClientId, room_id: &str, packet: &Packet) {
        let mut queue = OutboundQueue::new(&self.outbound_tx);
        let players = self.lobby.players();
        if let Err(e) = broadcast_to_room(players, sender, room_id, packet, &mut queue) {
            error!("Failed to queue room broadcast for {}: {}", room_id, e);
        }
    }

    /// Relays to everyone else in `room_id` standing on `map_id`
    fn relay_to_map(&self, sender: ClientId, room_id: &str, map_id: &str, packet: &Packet) {
        let mut queue = OutboundQueue::new(&self.outbound_tx);
        if let Err(e) =
            broadcast_to_map(self.lobby.players(), sender, room_id, map_id, packet, &mut queue)
        {
            error!("Failed to queue map broadcast for {}/{}: {}", room_id, map_id, e);
        }
    }

    fn broadcast_room_list(&self) {
        self.broadcast_packet(
            Packet::RoomList {
                rooms: self.lobby.list_rooms(),
            },
            None,
        );
    }

    /// Processes incoming packets and updates room state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            let client_id = clients.find_client_by_addr(addr);
            if let Some(id) = client_id {
                clients.touch(id);
            }
            client_id
        };

        let Some(client_id) = client_id else {
            warn!("Packet from unknown client at {}", addr);
            return;
        };

        match packet {
            Packet::CreateRoom {
                room_name,
                gm_name,
                password,
                color,
            } => {
                match self
                    .lobby
                    .create_room(client_id, &room_name, &gm_name, &password, color.as_deref())
                {
                    Ok(room) => {
                        self.send_to_client(client_id, Packet::RoomCreated { room });
                        self.broadcast_room_list();
                    }
                    Err(e) => self.send_error(client_id, e.to_string()),
                }
            }

            Packet::JoinRoom {
                room_id,
                player_name,
                password,
                color,
            } => {
                match self
                    .lobby
                    .join_room(client_id, &room_id, &player_name, &password, color.as_deref())
                {
                    Ok(joined) => {
                        let notice = if joined.gm_reconnect {
                            Packet::GmReconnected
                        } else {
                            Packet::PlayerJoined {
                                player: joined.player.clone(),
                                player_count: joined.player_count,
                            }
                        };
                        self.relay_to_room(client_id, &joined.room_id, &notice);
                        self.send_to_client(
                            client_id,
                            Packet::RoomJoined {
                                room: joined.room,
                                player: joined.player,
                                chat_history: joined.chat_history,
                                gm_reconnect: joined.gm_reconnect,
                            },
                        );
                        if !joined.state.is_empty() {
                            self.send_to_client(
                                client_id,
                                Packet::FullSync {
                                    entries: joined.state,
                                },
                            );
                        }
                        self.broadcast_room_list();
                    }
                    Err(e) => self.send_error(client_id, e.to_string()),
                }
            }

            Packet::LeaveRoom => {
                if self.leave_room(client_id) {
                    self.broadcast_room_list();
                } else {
                    self.send_error(client_id, "You are not in a room");
                }
            }

            Packet::ChangeMap { map_id } => match self.lobby.set_map(client_id, &map_id) {
                Ok((room_id, player)) => {
                    let changed = Packet::PlayerMapChanged {
                        player_id: player.id,
                        map_id,
                    };
                    self.relay_to_room(client_id, &room_id, &changed);
                    self.send_to_client(client_id, changed);
                }
                Err(e) => self.send_error(client_id, e.to_string()),
            },

            Packet::Chat { message, kind } => self.handle_chat(client_id, &message, kind),

            Packet::RoomEvent { event } => self.handle_event(client_id, EventScope::Room, event),

            Packet::MapEvent { event } => self.handle_event(client_id, EventScope::Map, event),

            Packet::Move { x, y, dragging } => self.handle_move(client_id, x, y, dragging),

            Packet::UpdateColor { color } => match self.lobby.update_color(client_id, &color) {
                Ok((room_id, player)) => {
                    let updated = Packet::PlayerColorUpdated {
                        player_id: player.id,
                        color: player.color,
                        is_gm: player.is_gm,
                    };
                    self.relay_to_room(client_id, &room_id, &updated);
                    self.send_to_client(client_id, updated);
                }
                Err(e) => self.send_error(client_id, e.to_string()),
            },

            Packet::RequestFullSync => match self.lobby.room_state(client_id) {
                Ok(entries) => self.send_to_client(client_id, Packet::FullSync { entries }),
                Err(e) => self.send_error(client_id, e.to_string()),
            },

            Packet::ListRooms => {
                self.send_to_client(
                    client_id,
                    Packet::RoomList {
                        rooms: self.lobby.list_rooms(),
                    },
                );
            }

            Packet::HealthCheck => {
                let record = self.lobby.player(client_id);
                let room_id = record.and_then(|r| r.room_id.clone());
                let room_name = room_id
                    .as_deref()
                    .and_then(|id| self.lobby.room(id))
                    .map(|room| room.name.clone());

                self.send_to_client(
                    client_id,
                    Packet::HealthResponse {
                        player_id: record.map(|r| r.profile.id.clone()),
                        room_id,
                        room_name,
                        timestamp: get_timestamp(),
                    },
                );
            }

            Packet::Heartbeat { timestamp } => {
                self.send_to_client(client_id, Packet::HeartbeatAck { timestamp });
            }

            Packet::Disconnect => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    clients.remove_client(&client_id)
                };
                if removed {
                    self.handle_departure(client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client {} at {}", client_id, addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        // Remove existing connection if present
        let existing_client_id = {
            let mut clients = self.clients.write().await;
            let existing = clients.find_client_by_addr(addr);
            if let Some(existing_id) = existing {
                info!("Removing existing client {} from {}", existing_id, addr);
                clients.remove_client(&existing_id);
            }
            existing
        };
        if let Some(existing_id) = existing_client_id {
            self.handle_departure(existing_id);
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };

        let response = match client_id {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.send_packet(response, addr);
    }

    fn handle_chat(&mut self, client_id: ClientId, message: &str, kind: ChatKind) {
        match self.lobby.post_chat(client_id, message, kind) {
            Ok((room_id, message)) => {
                debug!("Chat in {} from {}: {}", room_id, message.player_name, message.content);
                let packet = Packet::ChatMessage { message };
                self.relay_to_room(client_id, &room_id, &packet);
                self.send_to_client(client_id, packet);
            }
            Err(e) => self.send_error(client_id, e.to_string()),
        }
    }

    fn handle_event(&mut self, client_id: ClientId, scope: EventScope, event: Event) {
        if event.payload.len() > MAX_EVENT_PAYLOAD_LEN {
            self.send_error(
                client_id,
                format!("Event payload exceeds {} bytes", MAX_EVENT_PAYLOAD_LEN),
            );
            return;
        }

        let Some(record) = self.lobby.player(client_id) else {
            self.send_error(client_id, "You are not in a room");
            return;
        };
        let Some(room_id) = record.room_id.clone() else {
            self.send_error(client_id, "You are not in a room");
            return;
        };
        let map_id = match (scope, record.map_id.clone()) {
            (EventScope::Room, _) => None,
            (EventScope::Map, Some(map_id)) => Some(map_id),
            (EventScope::Map, None) => {
                self.send_error(client_id, "You are not on a map");
                return;
            }
        };
        let from = record.profile.id.clone();

        if let Err(e) = self.lobby.apply_event(client_id, &event) {
            self.send_error(client_id, e.to_string());
            return;
        }

        let packet = Packet::Event { from, scope, event };
        match map_id {
            Some(map_id) => self.relay_to_map(client_id, &room_id, &map_id, &packet),
            None => self.relay_to_room(client_id, &room_id, &packet),
        }
    }

    fn handle_move(&mut self, client_id: ClientId, x: f32, y: f32, dragging: bool) {
        if !x.is_finite() || !y.is_finite() {
            self.send_error(client_id, "Invalid movement data");
            return;
        }

        let Some(record) = self.lobby.player(client_id) else {
            self.send_error(client_id, "You are not in a room");
            return;
        };
        let (Some(room_id), Some(map_id)) = (record.room_id.as_deref(), record.map_id.as_deref())
        else {
            self.send_error(client_id, "You are not on a map");
            return;
        };

        let key = format!("{}_{}", room_id, record.profile.id);
        let now = Instant::now();
        if dragging {
            if !self
                .throttle
                .should_broadcast(&key, self.config.move_throttle, now)
            {
                return;
            }
        } else {
            self.throttle.record(&key, now);
        }

        let packet = Packet::PlayerMoved {
            player_id: record.profile.id.clone(),
            player_name: record.profile.name.clone(),
            x,
            y,
            dragging,
            server_timestamp: get_timestamp(),
        };
        self.relay_to_map(client_id, room_id, map_id, &packet);
    }

    /// Removes the client from its room and tells the others. Returns false if
    /// it was not in a room.
    fn leave_room(&mut self, client_id: ClientId) -> bool {
        let Some(outcome) = self.lobby.leave_room(client_id) else {
            return false;
        };

        let notice = match &outcome {
            LeaveOutcome::GmDisconnected { .. } => Packet::GmDisconnected,
            LeaveOutcome::PlayerLeft {
                player,
                player_count,
                ..
            } => Packet::PlayerLeft {
                player: player.clone(),
                player_count: *player_count,
            },
        };
        self.relay_to_room(client_id, outcome.room_id(), &notice);
        true
    }

    /// Cleanup after a connection is gone for good
    fn handle_departure(&mut self, client_id: ClientId) {
        if self.leave_room(client_id) {
            self.broadcast_room_list();
        }
    }

    /// Closes rooms whose GM never came back
    fn close_expired_rooms(&mut self) {
        let closed = self.lobby.close_expired_rooms(Instant::now());
        if closed.is_empty() {
            return;
        }

        for room in &closed {
            for client_id in &room.orphans {
                self.send_to_client(
                    *client_id,
                    Packet::RoomClosed {
                        reason: format!("The GM has left. Room '{}' is now closed.", room.name),
                    },
                );
            }
        }
        self.broadcast_room_list();
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> ServerResult<()> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut maintenance = interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut throttle_cleanup = interval(self.config.throttle_cleanup_interval);
        throttle_cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.handle_departure(client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = maintenance.tick() => {
                    self.close_expired_rooms();
                },

                _ = throttle_cleanup.tick() => {
                    let removed = self.throttle.cleanup(THROTTLE_ENTRY_LIFETIME, Instant::now());
                    if removed > 0 {
                        debug!(
                            "Throttle cleanup: {} stale entries removed, {} rooms, {} players",
                            removed,
                            self.lobby.room_count(),
                            self.lobby.player_count()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}
