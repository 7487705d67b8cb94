use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig, ServerEvent};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// World updates per second
    #[arg(short, long, default_value_t = shared::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of connected players
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Directory holding <id>.json level files
    #[arg(short, long, default_value = "data/maps")]
    levels: PathBuf,

    /// Level to start on
    #[arg(long, default_value = "0")]
    start_level: u32,

    /// Seed for enemy wander randomness
    #[arg(long)]
    seed: Option<u64>,

    /// Drop players silent for this many seconds (never, when unset)
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        levels_dir: args.levels,
        start_level: args.start_level,
        seed: args.seed,
        idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
    };

    info!("Starting server with {:?}", config);
    let mut server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerEvent::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
