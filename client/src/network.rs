//! Client network agent: connection handshake, background receive and ping tasks,
//! and the non-blocking consumer API used by the frame loop

use crate::latency::LatencyTracker;
use log::{debug, error, info, warn};
use shared::protocol::ProtocolError;
use shared::{
    get_timestamp, ClientMessage, EnemySnapshot, PlayerReport, PlayerSnapshot, ServerMessage,
    WorldSnapshot, DEFAULT_PORT, MAX_DATAGRAM_LEN, PING_INTERVAL_MS,
};
use std::collections::BTreeMap;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server address: {0}")]
    AddrParse(#[from] AddrParseError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server did not answer after {attempts} connect attempts")]
    ConnectTimeout { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_addr: String,
    pub connect_attempts: u32,
    /// How long each attempt waits for the id reply
    pub connect_timeout: Duration,
    pub retry_pause: Duration,
    pub ping_interval: Duration,
    /// Upper bound on a single socket read in the receive task
    pub read_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_attempts: 5,
            connect_timeout: Duration::from_secs(2),
            retry_pause: Duration::from_millis(500),
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// Latest world state received from the server.
///
/// Published whole through a `watch` channel, so a reader always sees one complete snapshot.
#[derive(Debug, Clone)]
pub struct RemoteState {
    pub players: BTreeMap<u32, PlayerSnapshot>,
    pub enemies: BTreeMap<u32, EnemySnapshot>,
    /// Number of snapshots received before this one
    pub sequence: u64,
    /// Level changes announced before this snapshot arrived
    pub level_epoch: u64,
    pub received_at: Instant,
}

impl RemoteState {
    pub fn empty() -> Self {
        Self {
            players: BTreeMap::new(),
            enemies: BTreeMap::new(),
            sequence: 0,
            level_epoch: 0,
            received_at: Instant::now(),
        }
    }

    pub fn from_snapshot(snapshot: WorldSnapshot, sequence: u64) -> Self {
        Self {
            players: snapshot.players.into_iter().map(|p| (p.id, p)).collect(),
            enemies: snapshot.enemies.into_iter().map(|e| (e.id, e)).collect(),
            sequence,
            level_epoch: 0,
            received_at: Instant::now(),
        }
    }

    pub fn with_level_epoch(mut self, level_epoch: u64) -> Self {
        self.level_epoch = level_epoch;
        self
    }
}

/// Connected client endpoint.
///
/// Owns a receive task and a ping task; both stop when the agent disconnects or is dropped.
pub struct NetworkAgent {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    player_id: u32,

    state_rx: watch::Receiver<Arc<RemoteState>>,
    level_rx: watch::Receiver<Option<u32>>,
    latency_rx: watch::Receiver<LatencyTracker>,
    shutdown_tx: watch::Sender<bool>,

    tasks: Vec<JoinHandle<()>>,
}

impl NetworkAgent {
    /// Performs the connect handshake and starts the background tasks
    pub async fn connect(config: AgentConfig) -> Result<Self, ClientError> {
        let server_addr: SocketAddr = config.server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!("Connecting to {} from {}", server_addr, socket.local_addr()?);

        let player_id = Self::handshake(&socket, server_addr, &config).await?;
        info!("Connected as player {}", player_id);

        let (state_tx, state_rx) = watch::channel(Arc::new(RemoteState::empty()));
        let (level_tx, level_rx) = watch::channel(None);
        let (latency_tx, latency_rx) = watch::channel(LatencyTracker::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            server_addr,
            config.read_timeout,
            Publishers {
                state: state_tx,
                level: level_tx,
                latency: latency_tx,
            },
            shutdown_rx.clone(),
        ));
        let pinger = tokio::spawn(ping_loop(
            Arc::clone(&socket),
            server_addr,
            config.ping_interval,
            shutdown_rx,
        ));

        Ok(NetworkAgent {
            socket,
            server_addr,
            player_id,
            state_rx,
            level_rx,
            latency_rx,
            shutdown_tx,
            tasks: vec![receiver, pinger],
        })
    }

    async fn handshake(
        socket: &UdpSocket,
        server_addr: SocketAddr,
        config: &AgentConfig,
    ) -> Result<u32, ClientError> {
        let request = ClientMessage::Connect.encode()?;
        let attempts = config.connect_attempts.max(1);

        for attempt in 1..=attempts {
            socket.send_to(&request, server_addr).await?;

            match timeout(config.connect_timeout, await_assignment(socket, server_addr)).await {
                Ok(player_id) => return Ok(player_id),
                Err(_) => {
                    warn!("No answer to connect attempt {}/{}", attempt, attempts);
                    if attempt < attempts {
                        sleep(config.retry_pause).await;
                    }
                }
            }
        }

        Err(ClientError::ConnectTimeout { attempts })
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Most recent snapshot, or an empty state before the first one
    pub fn latest(&self) -> Arc<RemoteState> {
        Arc::clone(&self.state_rx.borrow())
    }

    /// The latest snapshot if it has not been taken yet
    pub fn take_snapshot(&mut self) -> Option<Arc<RemoteState>> {
        match self.state_rx.has_changed() {
            Ok(true) => Some(Arc::clone(&self.state_rx.borrow_and_update())),
            _ => None,
        }
    }

    /// Id of the level announced since the last call, if any.
    /// Several changes between calls collapse into the newest.
    pub fn take_level_change(&mut self) -> Option<u32> {
        match self.level_rx.has_changed() {
            Ok(true) => *self.level_rx.borrow_and_update(),
            _ => None,
        }
    }

    pub fn latency(&self) -> LatencyTracker {
        self.latency_rx.borrow().clone()
    }

    pub fn send_report(&self, report: &PlayerReport) -> Result<(), ClientError> {
        self.send(&ClientMessage::PlayerReport(*report))
    }

    pub fn request_enemy_removal(&self, enemy_id: u32) -> Result<(), ClientError> {
        self.send(&ClientMessage::RemoveEnemy { enemy_id })
    }

    pub fn request_level_change(&self) -> Result<(), ClientError> {
        self.send(&ClientMessage::RequestLevelChange)
    }

    /// Never waits: a full socket buffer drops the datagram like the network would
    fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        let data = message.encode()?;
        match self.socket.try_send_to(&data, self.server_addr) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Socket busy, dropped {:?}", message);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tells the server we are leaving, then stops the background tasks.
    /// The disconnect datagram is best-effort.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.send(&ClientMessage::Disconnect) {
            warn!("Failed to send disconnect: {}", e);
        }
        let _ = self.shutdown_tx.send(true);

        for task in std::mem::take(&mut self.tasks) {
            if timeout(Duration::from_secs(1), task).await.is_err() {
                warn!("Background task did not stop in time");
            }
        }
        info!("Disconnected from {}", self.server_addr);
    }
}

impl Drop for NetworkAgent {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Reads until the id reply arrives, skipping anything else
async fn await_assignment(socket: &UdpSocket, server_addr: SocketAddr) -> u32 {
    let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, addr)) if addr == server_addr => {
                if let Ok(ServerMessage::Assigned { player_id }) = ServerMessage::decode(&buffer[..len])
                {
                    return player_id;
                }
            }
            Ok((_, addr)) => debug!("Ignoring datagram from {}", addr),
            // An unreachable server can surface here as a connection reset
            Err(e) => {
                debug!("Receive error while connecting: {}", e);
                sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

struct Publishers {
    state: watch::Sender<Arc<RemoteState>>,
    level: watch::Sender<Option<u32>>,
    latency: watch::Sender<LatencyTracker>,
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    read_timeout: Duration,
    publishers: Publishers,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];
    let mut received: u64 = 0;
    let mut level_epoch: u64 = 0;

    while !*shutdown_rx.borrow() {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = timeout(read_timeout, socket.recv_from(&mut buffer)) => {
                let (len, addr) = match result {
                    // No data yet
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        debug!("Receive error: {}", e);
                        continue;
                    }
                    Ok(Ok(datagram)) => datagram,
                };

                if addr != server_addr {
                    debug!("Ignoring datagram from {}", addr);
                    continue;
                }

                match ServerMessage::decode(&buffer[..len]) {
                    Ok(ServerMessage::Snapshot(snapshot)) => {
                        let state = RemoteState::from_snapshot(snapshot, received)
                            .with_level_epoch(level_epoch);
                        received += 1;
                        publishers.state.send_replace(Arc::new(state));
                    }
                    Ok(ServerMessage::Pong { timestamp }) => {
                        let now = get_timestamp();
                        publishers
                            .latency
                            .send_modify(|tracker| tracker.record_pong(timestamp, now));
                    }
                    Ok(ServerMessage::LevelChanged { level_id }) => {
                        info!("Server changed level to {}", level_id);
                        // Bumped before publishing so every later snapshot carries the new epoch
                        level_epoch += 1;
                        publishers.level.send_replace(Some(level_id));
                    }
                    Ok(ServerMessage::Assigned { player_id }) => {
                        debug!("Duplicate id reply ({})", player_id);
                    }
                    Err(e) => debug!("Dropping malformed datagram: {}", e),
                }
            }
        }
    }

    debug!("Receive task stopped");
}

async fn ping_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !*shutdown_rx.borrow() {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let ping = ClientMessage::Ping { timestamp: get_timestamp() };
                match ping.encode() {
                    Ok(data) => {
                        if let Err(e) = socket.send_to(&data, server_addr).await {
                            debug!("Failed to send ping: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to encode ping: {}", e),
                }
            }
        }
    }

    debug!("Ping task stopped");
}
