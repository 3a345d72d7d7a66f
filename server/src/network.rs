//! Server wiring: sockets, tasks and the match supervisor

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::control::ControlChannel;
use crate::data::DataChannel;
use crate::lifecycle::MatchPhase;
use crate::match_loop::MatchLoop;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};

/// A bound race server.
///
/// Binding and running are separate so callers can learn the actual ports
/// (for example after binding port 0) before the server starts.
pub struct Server {
    listener: TcpListener,
    socket: Arc<UdpSocket>,
    context: Arc<ServerContext>,
}

impl Server {
    /// Binds both sockets. Failure here is the only fatal server error.
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(config.tcp_bind_addr()).await?;
        let socket = Arc::new(UdpSocket::bind(config.udp_bind_addr()).await?);
        info!(
            "Server bound: TCP {}, UDP {}",
            listener.local_addr()?,
            socket.local_addr()?
        );

        Ok(Server {
            listener,
            socket,
            context: Arc::new(ServerContext::new(config)),
        })
    }

    pub fn local_tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn local_udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// Runs the control channel, the data channel and one match after
    /// another. Only returns if one of the channels stops.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let control = ControlChannel::new(Arc::clone(&self.context));
        let control_handle = tokio::spawn(control.run(self.listener));

        let data = DataChannel::new(Arc::clone(&self.socket), Arc::clone(&self.context));
        let data_handle = tokio::spawn(data.run());

        let supervisor_handle = tokio::spawn(supervise_matches(
            Arc::clone(&self.context),
            Arc::clone(&self.socket),
        ));

        info!("Server started successfully");

        tokio::select! {
            result = control_handle => {
                error!("Control channel stopped: {:?}", result);
            }
            result = data_handle => {
                error!("Data channel stopped: {:?}", result);
            }
            result = supervisor_handle => {
                error!("Match supervisor stopped: {:?}", result);
            }
        }

        Ok(())
    }
}

/// Drives the match phase cycle forever.
///
/// Waits for the control channel to start a race, runs the match loop until
/// the race finishes, then clears the registry, the countdown and leftover
/// states and reopens the lobby.
async fn supervise_matches(context: Arc<ServerContext>, socket: Arc<UdpSocket>) {
    let mut match_number: u32 = 0;
    loop {
        context.lifecycle.wait_for(MatchPhase::Running).await;
        match_number += 1;
        info!("Match {} running", match_number);

        let match_loop_handle = {
            let mut match_loop = MatchLoop::new(Arc::clone(&context), Arc::clone(&socket));
            tokio::spawn(async move {
                match_loop.run().await;
                match_loop
            })
        };

        context.lifecycle.wait_for(MatchPhase::Finished).await;
        match match_loop_handle.await {
            Ok(mut match_loop) => match_loop.reset().await,
            Err(e) => error!("Match loop task failed: {}", e),
        }

        context.reset_match_state().await;
        context.lifecycle.reset_to_lobby();
        info!("Match {} finished, lobby open", match_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            udp_port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_ports() {
        let server = Server::bind(local_config()).await.unwrap();
        assert_ne!(server.local_tcp_addr().unwrap().port(), 0);
        assert_ne!(server.local_udp_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_fails() {
        let first = Server::bind(local_config()).await.unwrap();
        let taken = first.local_tcp_addr().unwrap().port();

        let result = Server::bind(ServerConfig {
            port: taken,
            ..local_config()
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_supervisor_returns_to_lobby() {
        let context = Arc::new(ServerContext::new(local_config()));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        tokio::spawn(supervise_matches(Arc::clone(&context), socket));

        context.countdown.lock().await.start();
        context.lifecycle.start_race();
        tokio::time::sleep(Duration::from_millis(50)).await;
        context.lifecycle.finish();

        tokio::time::timeout(Duration::from_secs(1), context.lifecycle.wait_for(MatchPhase::Lobby))
            .await
            .expect("supervisor should reopen the lobby");
        assert!(!context.countdown.lock().await.is_running());
    }
}
