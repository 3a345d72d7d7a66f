//! Lobby and match control over TCP
//!
//! One dispatcher task owns all control decisions. Each accepted connection
//! gets a reader task, which turns frames into [`ControlEvent`]s for the
//! dispatcher, and a writer task, which drains the session's outbound queue.
//! Dropping a session from the registry drops its queue, the writer exits and
//! takes the reader down with it, which closes the socket.
//!
//! Per-session flow: `WaitingForNick -> InLobby -> InGame`.

use crate::client_manager::{ClientManager, LobbyState};
use crate::context::ServerContext;
use crate::lifecycle::MatchPhase;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use shared::framing;
use shared::opponent::VEHICLE_PALETTE;
use shared::tcp::opponents_info_packets;
use shared::{OpponentInfo, TcpPacket, VehicleColor, MAX_NICKNAME_LENGTH};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// What connection tasks report to the dispatcher
#[derive(Debug)]
pub enum ControlEvent {
    Packet { peer: SocketAddr, packet: TcpPacket },
    Closed { peer: SocketAddr },
}

/// Why a requested nickname was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRejection {
    Empty,
    TooLong,
    InvalidCharacter,
    Taken,
}

/// Checks a requested nickname against the lobby rules.
///
/// Accepted names are 1 to 20 bytes of printable ASCII not already used by a
/// visible session.
pub fn validate_nickname(name: &str, clients: &ClientManager) -> Result<(), NameRejection> {
    if name.is_empty() {
        return Err(NameRejection::Empty);
    }
    if name.len() > MAX_NICKNAME_LENGTH {
        return Err(NameRejection::TooLong);
    }
    if !name.bytes().all(|b| (32..=126).contains(&b)) {
        return Err(NameRejection::InvalidCharacter);
    }
    if clients.nickname_taken(name) {
        return Err(NameRejection::Taken);
    }
    Ok(())
}

/// True once the running match has nobody left racing, or every racer has
/// completed `race_laps`.
pub fn match_over(clients: &ClientManager, race_laps: u8) -> bool {
    let mut racers = clients
        .iter()
        .filter(|s| s.lobby_state() == LobbyState::InGame)
        .peekable();
    racers.peek().is_none() || racers.all(|s| s.lap_count >= race_laps)
}

fn shuffled_palette() -> Vec<VehicleColor> {
    let mut colors = VEHICLE_PALETTE.to_vec();
    colors.shuffle(&mut rand::thread_rng());
    colors
}

/// The control-plane dispatcher
pub struct ControlChannel {
    context: Arc<ServerContext>,
    events_tx: mpsc::UnboundedSender<ControlEvent>,
    events_rx: mpsc::UnboundedReceiver<ControlEvent>,
    race_countdown_sent: bool,
}

impl ControlChannel {
    pub fn new(context: Arc<ServerContext>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            context,
            events_tx,
            events_rx,
            race_countdown_sent: false,
        }
    }

    /// Accepts connections and dispatches their packets until the listener fails.
    pub async fn run(mut self, listener: TcpListener) -> io::Result<()> {
        let mut countdown_timer = interval(Duration::from_secs(1));
        countdown_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Control channel listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept(stream, peer).await,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                },

                _ = countdown_timer.tick() => {
                    self.on_timer().await;
                },
            }
        }
    }

    async fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.context.lifecycle.current() != MatchPhase::Lobby {
            info!("Rejecting {}: match in progress", peer);
            return;
        }

        let mut clients = self.context.clients.write().await;
        if clients.is_full() {
            info!("Rejecting {}: server full", peer);
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", peer, e);
        }
        let control = spawn_connection(stream, peer, self.events_tx.clone());
        if let Some(session) = clients.new_client(peer, control) {
            session.send(TcpPacket::ProvideName);
        }
    }

    pub async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Packet { peer, packet } => self.handle_packet(peer, packet).await,
            ControlEvent::Closed { peer } => self.handle_closed(peer).await,
        }
    }

    async fn handle_packet(&mut self, peer: SocketAddr, packet: TcpPacket) {
        match packet {
            TcpPacket::Name(name) => self.handle_name(peer, name).await,
            TcpPacket::UdpInfo(port) => self.handle_udp_info(peer, port).await,
            TcpPacket::ClientGameLoaded => self.handle_game_loaded(peer).await,
            TcpPacket::LapCount(laps) => self.handle_lap_count(peer, laps).await,
            other => {
                debug!("Ignoring {:?} from {}", other.packet_type(), peer);
            }
        }
    }

    async fn handle_name(&mut self, peer: SocketAddr, name: String) {
        let mut clients = self.context.clients.write().await;
        let Some(session) = clients.get_by_peer(peer) else {
            return;
        };
        if session.lobby_state() != LobbyState::WaitingForNick {
            debug!("Client {} sent a name while {:?}", session.id, session.lobby_state());
            return;
        }
        let id = session.id;

        if let Err(reason) = validate_nickname(&name, &clients) {
            info!("Client {} nickname {:?} rejected: {:?}", id, name, reason);
            session.send(TcpPacket::NameTaken);
            return;
        }

        let lobby_was_empty = clients.count_in_state(LobbyState::InLobby) == 0;
        if let Some(session) = clients.get_mut(id) {
            session.nickname = name.clone();
            session.advance_to(LobbyState::InLobby);
            session.send(TcpPacket::NameAccepted);
        }
        info!("Client {} joined the lobby as {:?}", id, name);

        clients.broadcast(&TcpPacket::ClientConnected(name), Some(id), |s| {
            s == LobbyState::InLobby
        });

        let secs = {
            let mut countdown = self.context.countdown.lock().await;
            if lobby_was_empty || !countdown.is_running() {
                countdown.start();
            }
            countdown.remaining_secs()
        };
        clients.broadcast(&TcpPacket::TimeUntilStart(secs), None, |s| {
            s == LobbyState::InLobby
        });

        if let Some(session) = clients.get(id) {
            session.send(TcpPacket::LobbyClientList(clients.lobby_nicknames(id)));
        }
    }

    async fn handle_udp_info(&mut self, peer: SocketAddr, port: u16) {
        let mut clients = self.context.clients.write().await;
        let Some(id) = clients.get_by_peer(peer).map(|s| s.id) else {
            return;
        };
        let addr = SocketAddr::new(peer.ip(), port);
        if !clients.update_udp_address(id, addr) {
            warn!("Client {} announced UDP address {} already in use", id, addr);
        }
    }

    async fn handle_game_loaded(&mut self, peer: SocketAddr) {
        let context = Arc::clone(&self.context);
        let mut clients = context.clients.write().await;
        let Some(session) = clients.get_by_peer_mut(peer) else {
            return;
        };
        if session.lobby_state() != LobbyState::InGame {
            return;
        }
        session.game_loaded = true;
        debug!("Client {} finished loading", session.id);

        self.maybe_send_race_countdown(&clients);
    }

    async fn handle_lap_count(&mut self, peer: SocketAddr, laps: u8) {
        let mut clients = self.context.clients.write().await;
        let Some(session) = clients.get_by_peer_mut(peer) else {
            return;
        };
        if !session.lobby_state().is_visible() {
            return;
        }
        session.lap_count = laps;
        let client_id = session.id;
        info!("Client {} completed {} laps", client_id, laps);

        clients.broadcast(
            &TcpPacket::LapsUpdate { client_id, laps },
            Some(client_id),
            |s| s.is_visible(),
        );
        self.check_match_end(&clients);
    }

    async fn handle_closed(&mut self, peer: SocketAddr) {
        let context = Arc::clone(&self.context);
        let mut clients = context.clients.write().await;
        let Some(session) = clients.remove(peer) else {
            return;
        };

        if session.lobby_state().is_visible() {
            clients.broadcast(
                &TcpPacket::ClientDisconnected(session.nickname.clone()),
                None,
                |s| s.is_visible(),
            );
        }
        self.context.latest_states.lock().await.remove(&session.id);

        match self.context.lifecycle.current() {
            MatchPhase::Lobby => {
                let mut countdown = self.context.countdown.lock().await;
                if clients.count_in_state(LobbyState::InLobby) == 0 {
                    countdown.freeze();
                } else {
                    let secs = countdown.remaining_secs();
                    clients.broadcast(&TcpPacket::TimeUntilStart(secs), None, |s| {
                        s == LobbyState::InLobby
                    });
                }
            }
            MatchPhase::Running => {
                self.maybe_send_race_countdown(&clients);
                self.check_match_end(&clients);
            }
            MatchPhase::Finished => {}
        }
    }

    /// Runs once a second: starts the race when the lobby countdown expires and
    /// catches a match left without racers.
    pub async fn on_timer(&mut self) {
        match self.context.lifecycle.current() {
            MatchPhase::Lobby => {
                let expired = self.context.countdown.lock().await.expired();
                if expired {
                    self.start_race().await;
                }
            }
            MatchPhase::Running => {
                let clients = self.context.clients.read().await;
                self.check_match_end(&clients);
            }
            MatchPhase::Finished => {}
        }
    }

    /// Moves the lobby onto the grid.
    pub async fn start_race(&mut self) {
        let colors = shuffled_palette();

        {
            let clients = self.context.clients.read().await;
            if clients.count_in_state(LobbyState::InLobby) == 0 {
                self.context.countdown.lock().await.freeze();
                return;
            }
        }

        if !self.context.lifecycle.start_race() {
            return;
        }
        self.context.countdown.lock().await.freeze();
        self.race_countdown_sent = false;

        self.context.wait_udp_ready().await;

        let mut clients = self.context.clients.write().await;

        // Anyone still picking a nickname missed the start
        let stragglers: Vec<SocketAddr> = clients
            .iter()
            .filter(|s| s.lobby_state() == LobbyState::WaitingForNick)
            .map(|s| s.peer)
            .collect();
        for peer in stragglers {
            clients.remove(peer);
        }

        let racers = clients.ids_in_state(LobbyState::InLobby);
        let mut infos = Vec::with_capacity(racers.len());
        for (rank, id) in racers.iter().enumerate() {
            let Some(session) = clients.get_mut(*id) else {
                continue;
            };
            session.grid_position = rank as u8;
            session.color = colors[rank % colors.len()];
            session.lap_count = 0;
            session.game_loaded = false;
            session.advance_to(LobbyState::InGame);
            session.send(TcpPacket::StartGame {
                grid_position: session.grid_position,
                color: session.color,
            });
            infos.push(OpponentInfo {
                id: session.id,
                color: session.color,
                grid_position: session.grid_position,
                nickname: session.nickname.clone(),
            });
        }
        info!("Race started with {} racers", infos.len());

        for id in &racers {
            let Some(session) = clients.get(*id) else {
                continue;
            };
            let opponents: Vec<OpponentInfo> =
                infos.iter().filter(|info| info.id != *id).cloned().collect();
            for packet in opponents_info_packets(&opponents) {
                session.send(packet);
            }
        }
    }

    /// Announces the start countdown once every racer has loaded.
    fn maybe_send_race_countdown(&mut self, clients: &ClientManager) {
        if self.race_countdown_sent {
            return;
        }
        let mut racers = clients
            .iter()
            .filter(|s| s.lobby_state() == LobbyState::InGame)
            .peekable();
        if racers.peek().is_none() || !racers.all(|s| s.game_loaded) {
            return;
        }

        let secs = self.context.config.race_countdown;
        info!("All racers loaded, starting countdown of {}s", secs);
        clients.broadcast(&TcpPacket::RaceStartCountdown(secs), None, |s| {
            s == LobbyState::InGame
        });
        self.race_countdown_sent = true;
    }

    fn check_match_end(&self, clients: &ClientManager) {
        if self.context.lifecycle.current() == MatchPhase::Running
            && match_over(clients, self.context.config.race_laps)
        {
            self.context.lifecycle.finish();
        }
    }
}

/// Starts the reader and writer tasks for one connection and returns its outbound queue.
fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<ControlEvent>,
) -> mpsc::UnboundedSender<TcpPacket> {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let reader_task = tokio::spawn(read_loop(reader, peer, events.clone()));
    tokio::spawn(write_loop(writer, rx, reader_task, peer, events));
    tx
}

async fn read_loop<R>(reader: R, peer: SocketAddr, events: mpsc::UnboundedSender<ControlEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        match framing::read_frame(&mut reader).await {
            Ok((header, payload)) => match TcpPacket::decode(&header, &payload) {
                Ok(packet) => {
                    if events.send(ControlEvent::Packet { peer, packet }).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Dropping malformed packet from {}: {}", peer, e),
            },
            Err(e) => {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    info!("{} hung up", peer);
                } else {
                    warn!("Read error from {}: {}", peer, e);
                }
                let _ = events.send(ControlEvent::Closed { peer });
                return;
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<TcpPacket>,
    reader_task: JoinHandle<()>,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<ControlEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = outbound.recv().await {
        if let Err(e) = framing::write_packet(&mut writer, &packet).await {
            warn!("Write to {} failed: {}", peer, e);
            let _ = events.send(ControlEvent::Closed { peer });
            break;
        }
    }
    reader_task.abort();
    let _ = writer.shutdown().await;
    debug!("Connection to {} closed", peer);
}
