use clap::Parser;
use client::session::{ClientConfig, Session};
use client::vehicle::HeadlessFactory;
use log::{info, warn};
use shared::DEFAULT_PORT;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// TCP control port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// UDP data port, defaults to the TCP port
    #[arg(short, long)]
    udp_port: Option<u16>,

    /// Nickname to answer the server's prompt with
    #[arg(short, long)]
    name: Option<String>,

    /// Hold the throttle once the race starts
    #[arg(short, long)]
    throttle: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        server_host: args.server,
        port: args.port,
        udp_port: args.udp_port.unwrap_or(args.port),
        name: args.name,
        throttle: args.throttle,
    };

    info!("Starting client...");
    info!("Connecting to: {}", config.control_addr());
    info!("Type 'lap' to report a completed lap, 'quit' to leave");

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if input_tx.send(line).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    return;
                }
            }
        }
    });

    let mut session = Session::new(config, Arc::new(HeadlessFactory));

    tokio::select! {
        result = session.run(input_rx) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving");
        }
    }

    Ok(())
}
