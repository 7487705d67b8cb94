//! Integration tests for the networked synchronization layer
//!
//! These tests run a real server on a loopback port and talk to it the way clients do:
//! with raw datagrams and with the client network agent.

use client::network::{AgentConfig, NetworkAgent};
use client::reconciliation::Reconciler;
use server::level::{DirectoryLevels, LevelSource, MemoryLevels};
use server::network::{Server, ServerConfig, ServerEvent};
use shared::protocol::{ENEMY_RECORD_LEN, KIND_SNAPSHOT, PLAYER_RECORD_LEN};
use shared::{
    Action, ClientMessage, EnemyState, PlayerReport, ServerMessage, WorldSnapshot,
};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_test::assert_ok;

const START_LEVEL: &str = r#"{
    "tile_size": 16,
    "tilemap": {
        "2;2": {"type": "spawners", "variant": 0, "pos": [2, 2]},
        "20;2": {"type": "spawners", "variant": 1, "pos": [20, 2]},
        "40;2": {"type": "spawners", "variant": 2, "pos": [40, 2]}
    }
}"#;

const NEXT_LEVEL: &str = r#"{
    "tile_size": 16,
    "tilemap": {
        "0;10": {"type": "stone", "variant": 0, "pos": [0, 10]},
        "4;6": {"type": "spawners", "variant": 0, "pos": [4, 6]},
        "30;6": {"type": "spawners", "variant": 1, "pos": [30, 6]}
    }
}"#;

/// Starts a server on an ephemeral loopback port and returns its address and stop handle
async fn start_server(levels: Box<dyn LevelSource>) -> (SocketAddr, UnboundedSender<ServerEvent>) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        seed: Some(42),
        ..ServerConfig::default()
    };
    let mut server = assert_ok!(Server::with_levels(config, levels).await);
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            panic!("server failed: {}", e);
        }
    });

    (addr, shutdown)
}

fn two_levels() -> Box<dyn LevelSource> {
    Box::new(
        MemoryLevels::new()
            .with_level(0, START_LEVEL)
            .with_level(1, NEXT_LEVEL),
    )
}

/// Blocking client socket; tests run on a multi-threaded runtime so the server keeps ticking
fn raw_client() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind client socket");
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    socket
}

fn send(socket: &UdpSocket, server: SocketAddr, message: &ClientMessage) {
    socket.send_to(&message.encode().unwrap(), server).unwrap();
}

/// Receives raw datagrams until `pick` accepts one, for at most two seconds
fn recv_until<T>(socket: &UdpSocket, mut pick: impl FnMut(&[u8]) -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut buffer = [0u8; 4096];

    while Instant::now() < deadline {
        if let Ok((len, _)) = socket.recv_from(&mut buffer) {
            if let Some(value) = pick(&buffer[..len]) {
                return value;
            }
        }
    }
    panic!("expected datagram never arrived");
}

fn connect(socket: &UdpSocket, server: SocketAddr) -> u32 {
    send(socket, server, &ClientMessage::Connect);
    recv_until(socket, |data| match ServerMessage::decode(data) {
        Ok(ServerMessage::Assigned { player_id }) => Some(player_id),
        _ => None,
    })
}

fn next_snapshot(socket: &UdpSocket, mut accept: impl FnMut(&WorldSnapshot) -> bool) -> WorldSnapshot {
    recv_until(socket, |data| match ServerMessage::decode(data) {
        Ok(ServerMessage::Snapshot(snapshot)) if accept(&snapshot) => Some(snapshot),
        _ => None,
    })
}

fn report_at(x: f32, y: f32) -> ClientMessage {
    ClientMessage::PlayerReport(PlayerReport {
        x,
        y,
        vx: 0.0,
        vy: 0.0,
        action: Action::Run,
        flip: true,
        weapon_id: 2,
    })
}

/// SESSION AND PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests id assignment and reconnect idempotence over real sockets
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connect_assigns_stable_ids() {
        let (server, shutdown) = start_server(two_levels()).await;

        let first = raw_client();
        let second = raw_client();

        assert_eq!(connect(&first, server), 1);
        assert_eq!(connect(&second, server), 2);
        assert_eq!(connect(&first, server), 1);

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests that ping timestamps come back unchanged
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_is_echoed() {
        let (server, shutdown) = start_server(two_levels()).await;
        let socket = raw_client();

        send(&socket, server, &ClientMessage::Ping { timestamp: 0xDEAD_BEEF_0001 });
        let echoed = recv_until(&socket, |data| match ServerMessage::decode(data) {
            Ok(ServerMessage::Pong { timestamp }) => Some(timestamp),
            _ => None,
        });
        assert_eq!(echoed, 0xDEAD_BEEF_0001);

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests that snapshot counts match the records that follow
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn snapshot_layout_matches_counts() {
        let (server, shutdown) = start_server(two_levels()).await;
        let socket = raw_client();
        connect(&socket, server);

        let raw = recv_until(&socket, |data| {
            (data.first() == Some(&KIND_SNAPSHOT)).then(|| data.to_vec())
        });

        let players = raw[1] as usize;
        let enemies = raw[2 + players * PLAYER_RECORD_LEN] as usize;
        assert_eq!(players, 1);
        assert_eq!(enemies, 2);
        assert_eq!(
            raw.len(),
            3 + players * PLAYER_RECORD_LEN + enemies * ENEMY_RECORD_LEN
        );

        let snapshot = WorldSnapshot::decode(&raw).unwrap();
        assert_eq!(snapshot.players[0].id, 1);
        assert_eq!(snapshot.players[0].x, 32.0);

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests that malformed datagrams change nothing and the loop keeps going
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_datagrams_are_ignored() {
        let (server, shutdown) = start_server(two_levels()).await;
        let socket = raw_client();
        let id = connect(&socket, server);

        send(&socket, server, &report_at(100.0, 80.0));
        next_snapshot(&socket, |s| s.players.iter().any(|p| p.id == id && p.x == 100.0));

        let full = report_at(300.0, 300.0).encode().unwrap();
        socket.send_to(&full[..full.len() - 3], server).unwrap();
        socket.send_to(&[], server).unwrap();
        socket.send_to(&[77, 1, 2, 3], server).unwrap();

        // Several ticks later the truncated report still has not been applied
        for _ in 0..5 {
            let snapshot = next_snapshot(&socket, |_| true);
            let me = snapshot.players.iter().find(|p| p.id == id).unwrap();
            assert_eq!((me.x, me.y), (100.0, 80.0));
            assert_eq!(me.action, Action::Run);
            assert!(me.flip);
            assert_eq!(me.weapon_id, 2);
        }

        send(&socket, server, &report_at(120.0, 80.0));
        next_snapshot(&socket, |s| s.players.iter().any(|p| p.id == id && p.x == 120.0));

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests that reports from endpoints without a session create nothing
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_endpoint_reports_are_dropped() {
        let (server, shutdown) = start_server(two_levels()).await;
        let player = raw_client();
        let stranger = raw_client();
        connect(&player, server);

        send(&stranger, server, &report_at(5.0, 5.0));
        for _ in 0..3 {
            let snapshot = next_snapshot(&player, |_| true);
            assert_eq!(snapshot.players.len(), 1);
        }

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests that disconnect removes the session from later snapshots
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_removes_player() {
        let (server, shutdown) = start_server(two_levels()).await;
        let stays = raw_client();
        let leaves = raw_client();
        connect(&stays, server);
        connect(&leaves, server);

        next_snapshot(&stays, |s| s.players.len() == 2);
        send(&leaves, server, &ClientMessage::Disconnect);
        send(&leaves, server, &ClientMessage::Disconnect);
        let snapshot = next_snapshot(&stays, |s| s.players.len() == 1);
        assert_eq!(snapshot.players[0].id, 1);

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }
}

/// ENEMY AND LEVEL TESTS
mod world_tests {
    use super::*;

    /// Tests that a player standing next to an enemy is chased
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nearby_player_is_chased() {
        let (server, shutdown) = start_server(two_levels()).await;
        let socket = raw_client();
        connect(&socket, server);

        // Blob spawns at (320, 32)
        send(&socket, server, &report_at(360.0, 32.0));
        let snapshot = next_snapshot(&socket, |s| {
            s.enemies.iter().any(|e| e.state == EnemyState::Chase)
        });
        let chaser = snapshot
            .enemies
            .iter()
            .find(|e| e.state == EnemyState::Chase)
            .unwrap();
        assert_eq!(chaser.id, 1);

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests the full level change sequence seen from a client
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn level_change_is_broadcast() {
        let (server, shutdown) = start_server(two_levels()).await;
        let requester = raw_client();
        let observer = raw_client();
        connect(&requester, server);
        connect(&observer, server);

        send(&requester, server, &report_at(200.0, 200.0));
        send(&requester, server, &ClientMessage::RequestLevelChange);

        let level_id = recv_until(&observer, |data| match ServerMessage::decode(data) {
            Ok(ServerMessage::LevelChanged { level_id }) => Some(level_id),
            _ => None,
        });
        assert_eq!(level_id, 1);

        let snapshot = next_snapshot(&observer, |_| true);
        assert_eq!(snapshot.enemies.len(), 1);
        assert!(snapshot.enemies[0].id > 2);
        for player in &snapshot.players {
            assert_eq!((player.x, player.y), (64.0, 96.0));
        }

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests that clearing every enemy advances the level on its own
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clearing_enemies_advances_level() {
        let (server, shutdown) = start_server(two_levels()).await;
        let socket = raw_client();
        connect(&socket, server);

        send(&socket, server, &ClientMessage::RemoveEnemy { enemy_id: 1 });
        send(&socket, server, &ClientMessage::RemoveEnemy { enemy_id: 2 });

        let level_id = recv_until(&socket, |data| match ServerMessage::decode(data) {
            Ok(ServerMessage::LevelChanged { level_id }) => Some(level_id),
            _ => None,
        });
        assert_eq!(level_id, 1);

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }

    /// Tests loading the bundled level files from disk
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bundled_levels_load() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/maps");
        let levels = DirectoryLevels::new(&dir);
        assert!(levels.level_count() >= 2);
        for id in 0..levels.level_count() as u32 {
            let level = assert_ok!(levels.load(id));
            assert!(level.enemy_spawns().count() > 0);
            assert!(!level.tiles.is_empty());
        }

        let (server, shutdown) = start_server(Box::new(levels)).await;
        let socket = raw_client();
        connect(&socket, server);
        let snapshot = next_snapshot(&socket, |_| true);
        assert!(!snapshot.enemies.is_empty());

        shutdown.send(ServerEvent::Shutdown).unwrap();
    }
}

/// CLIENT AGENT TESTS
mod agent_tests {
    use super::*;

    async fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
        for _ in 0..100 {
            if let Some(value) = poll() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    fn agent_config(server: SocketAddr) -> AgentConfig {
        AgentConfig {
            server_addr: server.to_string(),
            ping_interval: Duration::from_millis(100),
            ..AgentConfig::default()
        }
    }

    /// Tests the agent against a real server, feeding a reconciler
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn agent_end_to_end() {
        let (server, shutdown) = start_server(two_levels()).await;

        let mut agent = assert_ok!(NetworkAgent::connect(agent_config(server)).await);
        let other = assert_ok!(NetworkAgent::connect(agent_config(server)).await);
        assert_eq!(agent.player_id(), 1);
        assert_eq!(other.player_id(), 2);

        assert_ok!(other.send_report(&PlayerReport {
            x: 150.0,
            y: 40.0,
            vx: 30.0,
            action: Action::Run,
            ..PlayerReport::default()
        }));

        let mut reconciler = Reconciler::default();
        reconciler.set_local_id(agent.player_id());

        let state = wait_for(|| {
            agent
                .take_snapshot()
                .filter(|s| s.players.get(&2).map(|p| p.x) == Some(150.0))
        })
        .await;
        reconciler.apply_snapshot(&state);
        assert!(reconciler.player(1).is_none());
        assert_eq!(reconciler.player(2).unwrap().view.display.x, 150.0);
        assert_eq!(reconciler.enemies().count(), 2);

        // Dead reckoning carries the remote player along its velocity
        reconciler.advance(0.1);
        let moved = reconciler.player(2).unwrap().view.display.x;
        assert!(moved > 150.0 && moved <= 153.0 + 1e-3);

        wait_for(|| agent.latency().last()).await;

        assert_ok!(other.request_level_change());
        assert_eq!(wait_for(|| agent.take_level_change()).await, 1);

        // The first snapshot of the new level places everyone without smoothing
        let state = wait_for(|| agent.take_snapshot().filter(|s| s.level_epoch == 1)).await;
        reconciler.apply_snapshot(&state);
        let view = reconciler.player(2).unwrap().view;
        assert_eq!(view.display, view.server);

        other.disconnect().await;
        wait_for(|| {
            agent
                .take_snapshot()
                .filter(|s| s.players.len() == 1)
                .map(|_| ())
        })
        .await;

        agent.disconnect().await;
        shutdown.send(ServerEvent::Shutdown).unwrap();
    }
}
