//! Integration tests for the room server
//!
//! These tests run a real server on an ephemeral UDP port and drive it with raw
//! sockets speaking the wire protocol.

use bincode::{deserialize, serialize};
use server::config::ServerConfig;
use server::network::Server;
use shared::{ChatKind, Event, EventScope, Packet, RoomId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

async fn start_server(config: ServerConfig) -> SocketAddr {
    let mut server = Server::new(ServerConfig { port: 0, ..config })
        .await
        .expect("Failed to start server");
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl TestClient {
    async fn new(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        TestClient { socket, server }
    }

    async fn connected(server: SocketAddr) -> Self {
        let client = Self::new(server).await;
        client
            .send(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await;
        client
            .expect(|p| matches!(p, Packet::Connected { .. }))
            .await;
        client
    }

    async fn send(&self, packet: &Packet) {
        let data = serialize(packet).unwrap();
        self.socket.send_to(&data, self.server).await.unwrap();
    }

    async fn recv(&self, wait: Duration) -> Option<Packet> {
        let mut buf = vec![0u8; shared::MAX_PACKET_SIZE];
        match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(deserialize(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    /// Waits for the first packet matching `pred`, skipping others.
    async fn expect(&self, pred: impl Fn(&Packet) -> bool) -> Packet {
        let deadline = Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv(remaining).await {
                Some(packet) if pred(&packet) => return packet,
                Some(_) => continue,
                None => panic!("Expected packet never arrived"),
            }
        }
    }

    /// Asserts no packet matching `pred` arrives within the quiet period.
    async fn expect_none(&self, pred: impl Fn(&Packet) -> bool) {
        let deadline = Instant::now() + QUIET_PERIOD;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.recv(remaining).await {
                Some(packet) if pred(&packet) => panic!("Unexpected packet: {:?}", packet),
                Some(_) => continue,
                None => return,
            }
        }
    }

    async fn create_room(&self, name: &str, gm: &str) -> RoomId {
        self.send(&Packet::CreateRoom {
            room_name: name.to_string(),
            gm_name: gm.to_string(),
            password: "secret".to_string(),
            color: None,
        })
        .await;
        match self.expect(|p| matches!(p, Packet::RoomCreated { .. })).await {
            Packet::RoomCreated { room } => room.id,
            _ => unreachable!(),
        }
    }

    async fn join_room(&self, room_id: &str, name: &str) {
        self.send(&Packet::JoinRoom {
            room_id: room_id.to_string(),
            player_name: name.to_string(),
            password: "secret".to_string(),
            color: None,
        })
        .await;
        self.expect(|p| matches!(p, Packet::RoomJoined { .. })).await;
    }

    async fn change_map(&self, map_id: &str) {
        self.send(&Packet::ChangeMap {
            map_id: map_id.to_string(),
        })
        .await;
        self.sync().await;
    }

    /// Round-trips a health check so every earlier packet has been handled.
    async fn sync(&self) {
        self.send(&Packet::HealthCheck).await;
        self.expect(|p| matches!(p, Packet::HealthResponse { .. }))
            .await;
    }
}

fn is_event(p: &Packet) -> bool {
    matches!(p, Packet::Event { .. })
}

fn is_player_left(p: &Packet) -> bool {
    matches!(p, Packet::PlayerLeft { .. })
}

/// Checks the `PlayerLeft` notice names `name` and counts the GM seat
fn assert_left(packet: Packet, name: &str, count: usize) {
    match packet {
        Packet::PlayerLeft {
            player,
            player_count,
        } => {
            assert_eq!(player.name, name);
            assert!(!player.is_gm);
            assert_eq!(player_count, count);
        }
        other => panic!("Unexpected packet: {:?}", other),
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn connect_assigns_client_id() {
        let addr = start_server(ServerConfig::default()).await;
        let client = TestClient::new(addr).await;

        client
            .send(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await;

        match client.expect(|p| matches!(p, Packet::Connected { .. })).await {
            Packet::Connected { client_id } => assert!(client_id > 0),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn version_mismatch_is_refused() {
        let addr = start_server(ServerConfig::default()).await;
        let client = TestClient::new(addr).await;

        client
            .send(&Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
            })
            .await;

        match client.expect(|_| true).await {
            Packet::Disconnected { reason } => assert_eq!(reason, "Protocol version mismatch"),
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn full_server_refuses_connection() {
        let addr = start_server(ServerConfig {
            max_clients: 1,
            ..ServerConfig::default()
        })
        .await;
        let _first = TestClient::connected(addr).await;
        let second = TestClient::new(addr).await;

        second
            .send(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await;

        match second.expect(|_| true).await {
            Packet::Disconnected { reason } => assert_eq!(reason, "Server full"),
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_sender_is_ignored() {
        let addr = start_server(ServerConfig::default()).await;
        let stranger = TestClient::new(addr).await;

        stranger.send(&Packet::ListRooms).await;
        assert!(stranger.recv(QUIET_PERIOD).await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_and_health_check() {
        let addr = start_server(ServerConfig::default()).await;
        let client = TestClient::connected(addr).await;

        client.send(&Packet::Heartbeat { timestamp: 1234 }).await;
        match client.expect(|p| matches!(p, Packet::HeartbeatAck { .. })).await {
            Packet::HeartbeatAck { timestamp } => assert_eq!(timestamp, 1234),
            _ => unreachable!(),
        }

        let room_id = client.create_room("Keep", "Morgana").await;
        client.send(&Packet::HealthCheck).await;
        match client.expect(|p| matches!(p, Packet::HealthResponse { .. })).await {
            Packet::HealthResponse {
                room_id: reported,
                room_name,
                player_id,
                ..
            } => {
                assert_eq!(reported, Some(room_id));
                assert_eq!(room_name.as_deref(), Some("Keep"));
                assert!(player_id.is_some());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn server_rejects_invalid_config() {
        let result = tokio_test::block_on(Server::new(ServerConfig {
            port: 0,
            max_players_per_room: 0,
            ..ServerConfig::default()
        }));
        assert!(result.is_err());
    }
}

/// ROOM FAN-OUT TESTS
mod fanout_tests {
    use super::*;

    #[tokio::test]
    async fn room_and_map_events_reach_the_right_players() {
        let addr = start_server(ServerConfig::default()).await;

        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;
        let bob = TestClient::connected(addr).await;
        let carol = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;
        bob.join_room(&keep, "Bob").await;
        carol.create_room("Tower", "Carol").await;

        gm.change_map("m1").await;
        alice.change_map("m1").await;
        bob.change_map("m2").await;
        carol.change_map("m1").await;

        alice
            .send(&Packet::MapEvent {
                event: Event::new("token_moved", b"{\"x\":3}".to_vec()),
            })
            .await;

        match gm.expect(is_event).await {
            Packet::Event { scope, event, .. } => {
                assert_eq!(scope, EventScope::Map);
                assert_eq!(event.name, "token_moved");
                assert_eq!(event.payload, b"{\"x\":3}".to_vec());
            }
            _ => unreachable!(),
        }
        alice.expect_none(is_event).await;
        bob.expect_none(is_event).await;
        carol.expect_none(is_event).await;

        alice
            .send(&Packet::RoomEvent {
                event: Event::new("scene_changed", b"dusk".to_vec()),
            })
            .await;

        for receiver in [&gm, &bob] {
            match receiver.expect(is_event).await {
                Packet::Event { scope, event, .. } => {
                    assert_eq!(scope, EventScope::Room);
                    assert_eq!(event.name, "scene_changed");
                }
                _ => unreachable!(),
            }
        }
        alice.expect_none(is_event).await;
        carol.expect_none(is_event).await;
    }

    #[tokio::test]
    async fn map_event_without_map_is_an_error() {
        let addr = start_server(ServerConfig::default()).await;
        let gm = TestClient::connected(addr).await;
        gm.create_room("Keep", "Morgana").await;

        gm.send(&Packet::MapEvent {
            event: Event::new("ping", Vec::new()),
        })
        .await;

        match gm.expect(|p| matches!(p, Packet::Error { .. })).await {
            Packet::Error { message } => assert_eq!(message, "You are not on a map"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn chat_reaches_room_and_sender() {
        let addr = start_server(ServerConfig::default()).await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;
        let outsider = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;

        alice
            .send(&Packet::Chat {
                message: "hello table".to_string(),
                kind: ChatKind::Chat,
            })
            .await;

        for receiver in [&gm, &alice] {
            match receiver
                .expect(|p| matches!(p, Packet::ChatMessage { .. }))
                .await
            {
                Packet::ChatMessage { message } => {
                    assert_eq!(message.content, "hello table");
                    assert_eq!(message.player_name, "Alice");
                }
                _ => unreachable!(),
            }
        }
        outsider
            .expect_none(|p| matches!(p, Packet::ChatMessage { .. }))
            .await;

        // Late joiners get the history
        let bob = TestClient::connected(addr).await;
        bob.send(&Packet::JoinRoom {
            room_id: keep.clone(),
            player_name: "Bob".to_string(),
            password: "secret".to_string(),
            color: None,
        })
        .await;
        match bob.expect(|p| matches!(p, Packet::RoomJoined { .. })).await {
            Packet::RoomJoined { chat_history, .. } => {
                assert_eq!(chat_history.len(), 1);
                assert_eq!(chat_history[0].content, "hello table");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn dragging_moves_are_throttled() {
        let addr = start_server(ServerConfig {
            move_throttle: Duration::from_millis(500),
            ..ServerConfig::default()
        })
        .await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;
        gm.change_map("m1").await;
        alice.change_map("m1").await;

        for x in [1.0, 2.0] {
            alice
                .send(&Packet::Move {
                    x,
                    y: 0.0,
                    dragging: true,
                })
                .await;
        }
        alice
            .send(&Packet::Move {
                x: 3.0,
                y: 0.0,
                dragging: false,
            })
            .await;

        let is_move = |p: &Packet| matches!(p, Packet::PlayerMoved { .. });
        let mut seen = Vec::new();
        for _ in 0..2 {
            match gm.expect(is_move).await {
                Packet::PlayerMoved { x, dragging, .. } => seen.push((x, dragging)),
                _ => unreachable!(),
            }
        }
        assert_eq!(seen, vec![(1.0, true), (3.0, false)]);
        gm.expect_none(is_move).await;
        alice.expect_none(is_move).await;
    }

    #[tokio::test]
    async fn wrong_password_is_reported() {
        let addr = start_server(ServerConfig::default()).await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice
            .send(&Packet::JoinRoom {
                room_id: keep,
                player_name: "Alice".to_string(),
                password: "guess".to_string(),
                color: None,
            })
            .await;

        match alice.expect(|p| matches!(p, Packet::Error { .. })).await {
            Packet::Error { message } => assert_eq!(message, "Incorrect password"),
            _ => unreachable!(),
        }
        gm.expect_none(|p| matches!(p, Packet::PlayerJoined { .. }))
            .await;
    }
}

/// GM LIFECYCLE TESTS
mod gm_tests {
    use super::*;

    #[tokio::test]
    async fn gm_can_reconnect_within_grace() {
        let addr = start_server(ServerConfig::default()).await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;

        gm.send(&Packet::Disconnect).await;
        alice
            .expect(|p| matches!(p, Packet::GmDisconnected))
            .await;

        let returning = TestClient::connected(addr).await;
        returning.send(&Packet::JoinRoom {
            room_id: keep.clone(),
            player_name: "Morgana".to_string(),
            password: "secret".to_string(),
            color: None,
        })
        .await;

        match returning
            .expect(|p| matches!(p, Packet::RoomJoined { .. }))
            .await
        {
            Packet::RoomJoined {
                gm_reconnect,
                player,
                ..
            } => {
                assert!(gm_reconnect);
                assert!(player.is_gm);
            }
            _ => unreachable!(),
        }
        alice.expect(|p| matches!(p, Packet::GmReconnected)).await;
    }

    #[tokio::test]
    async fn room_closes_when_grace_expires() {
        let addr = start_server(ServerConfig {
            gm_reconnect_grace: Duration::from_millis(200),
            maintenance_interval: Duration::from_millis(50),
            ..ServerConfig::default()
        })
        .await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;

        gm.send(&Packet::Disconnect).await;
        alice
            .expect(|p| matches!(p, Packet::GmDisconnected))
            .await;
        alice
            .expect(|p| matches!(p, Packet::RoomClosed { .. }))
            .await;

        alice.send(&Packet::ListRooms).await;
        match alice.expect(|p| matches!(p, Packet::RoomList { .. })).await {
            Packet::RoomList { rooms } => assert!(rooms.iter().all(|r| r.id != keep)),
            _ => unreachable!(),
        }

        // Closed rooms leave their players free to chat nowhere
        alice
            .send(&Packet::Chat {
                message: "anyone?".to_string(),
                kind: ChatKind::Chat,
            })
            .await;
        match alice.expect(|p| matches!(p, Packet::Error { .. })).await {
            Packet::Error { message } => assert_eq!(message, "You are not in a room"),
            _ => unreachable!(),
        }
    }
}

/// DEPARTURE TESTS
mod departure_tests {
    use super::*;

    async fn room_with_alice(config: ServerConfig) -> (TestClient, TestClient, RoomId) {
        let addr = start_server(config).await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;
        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;
        gm.expect(|p| matches!(p, Packet::PlayerJoined { .. }))
            .await;
        alice.sync().await;
        (gm, alice, keep)
    }

    #[tokio::test]
    async fn leave_room_notifies_the_others() {
        let (gm, alice, keep) = room_with_alice(ServerConfig::default()).await;

        alice.send(&Packet::LeaveRoom).await;

        assert_left(gm.expect(is_player_left).await, "Alice", 1);
        match gm.expect(|p| matches!(p, Packet::RoomList { .. })).await {
            Packet::RoomList { rooms } => {
                let listing = rooms.iter().find(|r| r.id == keep).unwrap();
                assert_eq!(listing.player_count, 1);
            }
            _ => unreachable!(),
        }
        alice.expect_none(is_player_left).await;

        alice.send(&Packet::LeaveRoom).await;
        match alice.expect(|p| matches!(p, Packet::Error { .. })).await {
            Packet::Error { message } => assert_eq!(message, "You are not in a room"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn disconnect_notifies_the_others() {
        let (gm, alice, _keep) = room_with_alice(ServerConfig::default()).await;

        alice.send(&Packet::Disconnect).await;

        assert_left(gm.expect(is_player_left).await, "Alice", 1);
        gm.expect(|p| matches!(p, Packet::RoomList { .. })).await;
        alice.expect_none(|_| true).await;
    }

    #[tokio::test]
    async fn silent_player_times_out() {
        let (gm, alice, _keep) = room_with_alice(ServerConfig {
            client_timeout: Duration::from_millis(500),
            ..ServerConfig::default()
        })
        .await;

        // The GM keeps talking while Alice goes quiet
        let deadline = Instant::now() + Duration::from_secs(4);
        let left = loop {
            assert!(Instant::now() < deadline, "Alice never timed out");
            gm.send(&Packet::Heartbeat { timestamp: 0 }).await;
            match gm.recv(Duration::from_millis(100)).await {
                Some(packet) if is_player_left(&packet) => break packet,
                _ => continue,
            }
        };

        assert_left(left, "Alice", 1);
        alice.expect_none(|_| true).await;

        // Alice is no longer a known client
        alice.send(&Packet::HealthCheck).await;
        assert!(alice.recv(QUIET_PERIOD).await.is_none());
    }

    #[tokio::test]
    async fn reconnect_from_same_address_replaces_the_old_client() {
        let (gm, alice, _keep) = room_with_alice(ServerConfig::default()).await;

        alice.send(&Packet::HealthCheck).await;
        let old_player = match alice
            .expect(|p| matches!(p, Packet::HealthResponse { .. }))
            .await
        {
            Packet::HealthResponse { player_id, .. } => player_id,
            _ => unreachable!(),
        };
        assert!(old_player.is_some());

        alice
            .send(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await;
        alice
            .expect(|p| matches!(p, Packet::Connected { .. }))
            .await;

        assert_left(gm.expect(is_player_left).await, "Alice", 1);
        gm.expect(|p| matches!(p, Packet::RoomList { .. })).await;

        // The fresh connection starts outside any room
        alice.send(&Packet::HealthCheck).await;
        match alice
            .expect(|p| matches!(p, Packet::HealthResponse { .. }))
            .await
        {
            Packet::HealthResponse {
                player_id, room_id, ..
            } => {
                assert!(player_id.is_none());
                assert!(room_id.is_none());
            }
            _ => unreachable!(),
        }
    }
}

/// ROOM STATE TESTS
mod state_tests {
    use super::*;

    #[tokio::test]
    async fn keyed_events_reach_late_joiners() {
        let addr = start_server(ServerConfig::default()).await;
        let gm = TestClient::connected(addr).await;
        let alice = TestClient::connected(addr).await;

        let keep = gm.create_room("Keep", "Morgana").await;
        alice.join_room(&keep, "Alice").await;

        gm.send(&Packet::RoomEvent {
            event: Event::keyed("token", "goblin", b"{\"x\":3}".to_vec()),
        })
        .await;
        gm.send(&Packet::RoomEvent {
            event: Event::new("ping", b"unkeyed".to_vec()),
        })
        .await;
        gm.sync().await;

        // Keyed events are still relayed live
        match alice.expect(is_event).await {
            Packet::Event { event, .. } => assert_eq!(event.key.as_deref(), Some("goblin")),
            _ => unreachable!(),
        }

        let bob = TestClient::connected(addr).await;
        bob.send(&Packet::JoinRoom {
            room_id: keep.clone(),
            player_name: "Bob".to_string(),
            password: "secret".to_string(),
            color: None,
        })
        .await;
        bob.expect(|p| matches!(p, Packet::RoomJoined { .. }))
            .await;
        match bob.expect(|p| matches!(p, Packet::FullSync { .. })).await {
            Packet::FullSync { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "token");
                assert_eq!(entries[0].key, "goblin");
                assert_eq!(entries[0].payload, b"{\"x\":3}".to_vec());
            }
            _ => unreachable!(),
        }

        // Clearing the entry empties the snapshot
        gm.send(&Packet::RoomEvent {
            event: Event::keyed("token", "goblin", Vec::new()),
        })
        .await;
        gm.sync().await;
        alice.send(&Packet::RequestFullSync).await;
        match alice.expect(|p| matches!(p, Packet::FullSync { .. })).await {
            Packet::FullSync { entries } => assert!(entries.is_empty()),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn full_sync_requires_a_room() {
        let addr = start_server(ServerConfig::default()).await;
        let loner = TestClient::connected(addr).await;

        loner.send(&Packet::RequestFullSync).await;
        match loner.expect(|p| matches!(p, Packet::Error { .. })).await {
            Packet::Error { message } => assert_eq!(message, "You are not in a room"),
            _ => unreachable!(),
        }
    }
}
