//! Server network layer handling UDP communications and game loop coordination

use crate::game::{Outbound, World, WorldConfig};
use crate::level::{DirectoryLevels, LevelSource};
use log::{debug, error, info};
use shared::{ClientMessage, DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_DATAGRAM_LEN};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Runtime settings for [`Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tick_rate: u32,
    pub max_clients: usize,
    pub levels_dir: PathBuf,
    pub start_level: u32,
    pub seed: Option<u64>,
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            levels_dir: PathBuf::from("data/maps"),
            start_level: 0,
            seed: None,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn world_config(&self) -> WorldConfig {
        WorldConfig {
            tick_rate: self.tick_rate,
            max_clients: self.max_clients,
            start_level: self.start_level,
            seed: self.seed,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Events sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerEvent {
    MessageReceived {
        message: ClientMessage,
        addr: SocketAddr,
    },
    Shutdown,
}

/// Main server coordinating networking and world simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    world: World,
    tick_duration: Duration,

    // Communication channels
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Server {
    /// Binds the socket and loads the start level from `config.levels_dir`
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let levels = DirectoryLevels::new(&config.levels_dir);
        Self::with_levels(config, Box::new(levels)).await
    }

    pub async fn with_levels(
        config: ServerConfig,
        levels: Box<dyn LevelSource>,
    ) -> Result<Self, ServerError> {
        let world = World::new(levels, &config.world_config())?;
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            world,
            tick_duration: config.tick_duration(),
            event_tx,
            event_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping [`Server::run`] from another task
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.event_tx.clone()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match ClientMessage::decode(&buffer[..len]) {
                        Ok(message) => {
                            if event_tx
                                .send(ServerEvent::MessageReceived { message, addr })
                                .is_err()
                            {
                                debug!("Main loop gone, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        // Peers vanishing can surface here as connection resets.
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that processes the outgoing datagram queue.
    /// Returns `None` if the queue was already handed to an earlier run.
    fn spawn_network_sender(&mut self) -> Option<JoinHandle<()>> {
        let mut outbound_rx = self.outbound_rx.take()?;
        let socket = Arc::clone(&self.socket);

        Some(tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::SendTo { addr, payload } => {
                        if let Err(e) = socket.send_to(&payload, addr).await {
                            error!("Failed to send to {}: {}", addr, e);
                        }
                    }
                    Outbound::Broadcast { addrs, payload } => {
                        for addr in addrs {
                            if let Err(e) = socket.send_to(&payload, addr).await {
                                error!("Failed to send to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        }))
    }

    fn dispatch(&self, outbound: Vec<Outbound>) {
        for message in outbound {
            if let Err(e) = self.outbound_tx.send(message) {
                error!("Failed to queue datagram for sending: {}", e);
            }
        }
    }

    /// Main server loop: applies inbound messages as they arrive and ticks the world at a fixed rate
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let receiver = self.spawn_network_receiver();
        let sender = self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started on level {} at {:.0}Hz",
            self.world.level_id(),
            1.0 / self.tick_duration.as_secs_f64()
        );

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(ServerEvent::MessageReceived { message, addr }) => {
                            let outbound = self.world.handle_message(message, addr);
                            self.dispatch(outbound);
                        }
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let outbound = self.world.tick();
                    self.dispatch(outbound);
                },
            }
        }

        // The receiver would otherwise sit in recv_from holding the socket
        receiver.abort();
        if let Some(sender) = sender {
            sender.abort();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::MemoryLevels;
    use shared::ServerMessage;
    use tokio_test::assert_ok;

    const LEVEL: &str = r#"{"tile_size": 16, "tilemap": {
        "2;2": {"type": "spawners", "variant": 0, "pos": [2, 2]},
        "9;9": {"type": "spawners", "variant": 1, "pos": [9, 9]}
    }}"#;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            seed: Some(5),
            ..ServerConfig::default()
        }
    }

    async fn test_server() -> Server {
        let levels = MemoryLevels::new().with_level(0, LEVEL);
        assert_ok!(Server::with_levels(local_config(), Box::new(levels)).await)
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5006");
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.max_clients, 32);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_tick_duration() {
        let config = ServerConfig {
            tick_rate: 50,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(20));

        let zero = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert_eq!(zero.tick_duration(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_levels_dir_fails() {
        let config = ServerConfig {
            levels_dir: PathBuf::from("/definitely/not/a/level/dir"),
            ..local_config()
        };
        assert!(Server::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_binds_ephemeral_port() {
        let server = test_server().await;
        let addr = assert_ok!(server.local_addr());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.world().level_id(), 0);
        assert_eq!(server.world().enemies().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_and_shutdown() {
        let mut server = test_server().await;
        let server_addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move { server.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&ClientMessage::Connect.encode().unwrap(), server_addr)
            .await
            .unwrap();

        let mut buffer = [0u8; 512];
        let reply = loop {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buffer))
                .await
                .expect("server did not answer")
                .unwrap();
            // Snapshots may race the reply; skip until the id arrives.
            if let Ok(ServerMessage::Assigned { player_id }) = ServerMessage::decode(&buffer[..len]) {
                break player_id;
            }
        };
        assert_eq!(reply, 1);

        shutdown.send(ServerEvent::Shutdown).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let mut server = test_server().await;
        let server_addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move { server.run().await });

        // Let the receiver task block in recv_from first
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(ServerEvent::Shutdown).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());

        // Aborted tasks are dropped on their next poll, so allow a few attempts
        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(socket) = UdpSocket::bind(server_addr).await {
                rebound = Some(socket);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let socket = rebound.expect("port still held after shutdown");
        assert_eq!(socket.local_addr().unwrap(), server_addr);
    }
}
