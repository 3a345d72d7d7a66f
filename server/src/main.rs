use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_PORT, MAX_PLAYERS};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind both sockets to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// TCP control port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// UDP data port, defaults to the TCP port
    #[arg(short, long)]
    udp_port: Option<u16>,

    /// Lobby time before the race starts, in seconds
    #[arg(short, long, default_value = "30")]
    lobby_seconds: u64,

    /// Countdown announced once every racer has loaded, in seconds
    #[arg(long, default_value = "3")]
    race_countdown: u8,

    /// Laps per race
    #[arg(long, default_value = "3")]
    race_laps: u8,

    /// Maximum simultaneous players
    #[arg(short, long, default_value_t = MAX_PLAYERS)]
    max_clients: usize,

    /// Bind unknown UDP senders to sessions by IP address
    #[arg(short, long)]
    discover: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        udp_port: args.udp_port.unwrap_or(args.port),
        lobby_duration: Duration::from_secs(args.lobby_seconds),
        race_countdown: args.race_countdown,
        race_laps: args.race_laps,
        max_clients: args.max_clients.min(MAX_PLAYERS),
        discover: args.discover,
    };

    info!("Starting server...");
    info!(
        "Lobby {}s, {} laps, up to {} players",
        args.lobby_seconds, config.race_laps, config.max_clients
    );
    if config.discover {
        info!("UDP discovery enabled");
    }

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
