//! Server settings

use shared::{DEFAULT_PORT, MAX_PLAYERS};
use std::time::Duration;

/// Settings for one server process.
///
/// Built from command-line flags by the binary; tests start from
/// [`ServerConfig::default`] and override what they need.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address both sockets bind to
    pub host: String,
    /// TCP control port, 0 picks an ephemeral port
    pub port: u16,
    /// UDP data port, 0 picks an ephemeral port
    pub udp_port: u16,
    /// Time from the first lobby join until the race starts
    pub lobby_duration: Duration,
    /// Seconds announced in `RaceStartCountdown`
    pub race_countdown: u8,
    /// Laps after which a racer is done
    pub race_laps: u8,
    pub max_clients: usize,
    /// Bind unknown UDP senders by their IP address
    pub discover: bool,
}

impl ServerConfig {
    pub fn tcp_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn udp_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            udp_port: DEFAULT_PORT,
            lobby_duration: Duration::from_secs(30),
            race_countdown: 3,
            race_laps: 3,
            max_clients: MAX_PLAYERS,
            discover: false,
        }
    }
}
