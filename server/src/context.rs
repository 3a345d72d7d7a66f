//! State shared by the server tasks

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::lifecycle::{LobbyCountdown, MatchLifecycle};
use shared::VehicleStateSnapshot;
use std::collections::HashMap;
use tokio::sync::{watch, Mutex, RwLock};

/// Everything the control, data and match tasks share, handed around in an `Arc`.
///
/// `countdown` and `latest_states` may be taken while holding `clients`, never
/// the other way round, and never both at once.
pub struct ServerContext {
    pub config: ServerConfig,
    pub clients: RwLock<ClientManager>,
    pub lifecycle: MatchLifecycle,
    pub countdown: Mutex<LobbyCountdown>,
    /// Newest snapshot per client id since the last tick
    pub latest_states: Mutex<HashMap<u16, VehicleStateSnapshot>>,
    udp_ready: watch::Sender<bool>,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let clients = RwLock::new(ClientManager::new(config.max_clients));
        let countdown = Mutex::new(LobbyCountdown::new(config.lobby_duration));
        let (udp_ready, _) = watch::channel(false);

        Self {
            config,
            clients,
            lifecycle: MatchLifecycle::new(),
            countdown,
            latest_states: Mutex::new(HashMap::new()),
            udp_ready,
        }
    }

    /// Called by the data channel once its receive loop is up.
    pub fn mark_udp_ready(&self) {
        self.udp_ready.send_replace(true);
    }

    pub async fn wait_udp_ready(&self) {
        let mut rx = self.udp_ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Clears everything a finished match leaves behind.
    pub async fn reset_match_state(&self) {
        self.clients.write().await.reset_all();
        self.countdown.lock().await.reset();
        self.latest_states.lock().await.clear();
    }
}
