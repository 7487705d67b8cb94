use clap::Parser;
use client::network::{AgentConfig, NetworkAgent};
use client::reconciliation::{Reconciler, DEFAULT_SMOOTHING_RATE};
use log::{info, warn};
use shared::{Action, PlayerReport, Vec2};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5006")]
    server: String,

    /// How fast remote entities are pulled toward their server position, per second
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_RATE)]
    smoothing: f32,

    /// Local frames per second
    #[arg(short, long, default_value = "60")]
    frame_rate: u32,

    /// Walk the local player back and forth instead of standing still
    #[arg(short, long)]
    walk: bool,
}

const WALK_SPEED: f32 = 40.0;
const WALK_TURN_SECS: f32 = 2.0;

/// Stand-in for the local player simulation, which lives outside this crate
struct LocalPlayer {
    position: Vec2,
    velocity: Vec2,
    walking: bool,
    turn_timer: f32,
}

impl LocalPlayer {
    fn new(walking: bool) -> Self {
        Self {
            position: Vec2::ZERO,
            velocity: if walking {
                Vec2::new(WALK_SPEED, 0.0)
            } else {
                Vec2::ZERO
            },
            walking,
            turn_timer: WALK_TURN_SECS,
        }
    }

    fn update(&mut self, dt: f32) {
        if !self.walking {
            return;
        }
        self.turn_timer -= dt;
        if self.turn_timer <= 0.0 {
            self.turn_timer = WALK_TURN_SECS;
            self.velocity = self.velocity * -1.0;
        }
        self.position += self.velocity * dt;
    }

    fn report(&self) -> PlayerReport {
        PlayerReport {
            x: self.position.x,
            y: self.position.y,
            vx: self.velocity.x,
            vy: self.velocity.y,
            action: if self.velocity.is_zero() {
                Action::Idle
            } else {
                Action::Run
            },
            flip: self.velocity.x < 0.0,
            weapon_id: 0,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let config = AgentConfig {
        server_addr: args.server.clone(),
        ..AgentConfig::default()
    };
    let mut agent = NetworkAgent::connect(config).await?;

    let mut reconciler = Reconciler::new(args.smoothing);
    reconciler.set_local_id(agent.player_id());

    let mut local = LocalPlayer::new(args.walk);
    // Where the server placed us is only known from the next snapshot
    let mut resync_local = true;

    let frame_duration = Duration::from_secs_f64(1.0 / args.frame_rate.max(1) as f64);
    let mut frames = interval(frame_duration);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_frame = Instant::now();
    let mut last_log = Instant::now();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, disconnecting...");
                break;
            }
            _ = frames.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;

                // Remote views reset themselves on the first snapshot of the new level
                if let Some(level_id) = agent.take_level_change() {
                    info!("Entering level {}", level_id);
                    resync_local = true;
                }

                if let Some(state) = agent.take_snapshot() {
                    if resync_local {
                        if let Some(me) = state.players.get(&agent.player_id()) {
                            local.position = Vec2::new(me.x, me.y);
                            resync_local = false;
                        }
                    }
                    reconciler.apply_snapshot(&state);
                }

                reconciler.advance(dt);

                if !resync_local {
                    local.update(dt);
                    if let Err(e) = agent.send_report(&local.report()) {
                        warn!("Failed to send report: {}", e);
                    }
                }

                if now.duration_since(last_log) >= Duration::from_secs(1) {
                    last_log = now;
                    log_status(&agent, &reconciler, &local);
                }
            }
        }
    }

    agent.disconnect().await;

    Ok(())
}

fn log_status(agent: &NetworkAgent, reconciler: &Reconciler, local: &LocalPlayer) {
    let latency = agent.latency();
    info!(
        "Player {} at ({:.1}, {:.1}) | rtt {:.0}ms avg {:.0}ms jitter {:.1}ms",
        agent.player_id(),
        local.position.x,
        local.position.y,
        latency.last().unwrap_or(0.0),
        latency.average().unwrap_or(0.0),
        latency.jitter().unwrap_or(0.0),
    );

    for (id, remote) in reconciler.players() {
        info!(
            "  player {} {} at ({:.1}, {:.1})",
            id,
            remote.action.as_str(),
            remote.view.display.x,
            remote.view.display.y
        );
    }
    for (id, remote) in reconciler.enemies() {
        info!(
            "  enemy {} {} at ({:.1}, {:.1})",
            id,
            remote.state.as_str(),
            remote.view.display.x,
            remote.view.display.y
        );
    }
}
