//! One client's run from connecting to the match ending
//!
//! The session owns everything the control channel drives: nickname
//! negotiation, the lobby view, both countdowns, the local vehicle and lap
//! reports. Opponents live in a shared roster that the data channel's
//! receiver writes into.

use crate::control::{self, ControlLink};
use crate::countdown::DisplayCountdown;
use crate::data::DataLink;
use crate::laps::{LapBoard, LapTracker};
use crate::lobby::LobbyView;
use crate::opponents::OpponentRoster;
use crate::vehicle::{Vehicle, VehicleFactory};
use log::{debug, info, warn};
use shared::{ControlState, InputBitmap, TcpPacket, VehicleColor, VehicleStateSnapshot, TICK_DURATION};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub port: u16,
    pub udp_port: u16,
    /// Answers the nickname prompt without reading input
    pub name: Option<String>,
    /// Hold the throttle once the race starts
    pub throttle: bool,
}

impl ClientConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.port)
    }

    pub async fn data_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((self.server_host.as_str(), self.udp_port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", self.server_host),
                )
            })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            port: shared::DEFAULT_PORT,
            udp_port: shared::DEFAULT_PORT,
            name: None,
            throttle: false,
        }
    }
}

struct LocalRacer {
    vehicle: Box<dyn Vehicle>,
    grid_position: u8,
    color: VehicleColor,
}

enum Flow {
    Continue,
    Quit,
}

pub struct Session {
    config: ClientConfig,
    factory: Arc<dyn VehicleFactory>,
    roster: Arc<Mutex<OpponentRoster>>,
    lobby: LobbyView,
    lobby_countdown: DisplayCountdown,
    race_countdown: Option<DisplayCountdown>,
    racing: bool,
    laps: LapBoard,
    local: Option<LocalRacer>,
    local_state: watch::Sender<Option<VehicleStateSnapshot>>,
    nickname: Option<String>,
    name_attempted: bool,
    awaiting_name: bool,
}

impl Session {
    pub fn new(config: ClientConfig, factory: Arc<dyn VehicleFactory>) -> Self {
        let roster = Arc::new(Mutex::new(OpponentRoster::new(Arc::clone(&factory))));
        let (local_state, _) = watch::channel(None);
        Self {
            config,
            factory,
            roster,
            lobby: LobbyView::new(),
            lobby_countdown: DisplayCountdown::default(),
            race_countdown: None,
            racing: false,
            laps: LapBoard::new(),
            local: None,
            local_state,
            nickname: None,
            name_attempted: false,
            awaiting_name: false,
        }
    }

    pub fn roster(&self) -> Arc<Mutex<OpponentRoster>> {
        Arc::clone(&self.roster)
    }

    /// The local vehicle's latest snapshot, `None` until the race starts.
    pub fn local_state(&self) -> watch::Receiver<Option<VehicleStateSnapshot>> {
        self.local_state.subscribe()
    }

    pub fn lobby(&self) -> &LobbyView {
        &self.lobby
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn laps(&self) -> &LapBoard {
        &self.laps
    }

    pub fn is_racing(&self) -> bool {
        self.racing
    }

    /// Runs until the server hangs up or `quit` is read from `input`.
    ///
    /// `input` carries user lines: a nickname when prompted, `lap` to report a
    /// completed lap, `quit` to leave.
    pub async fn run(&mut self, mut input: mpsc::UnboundedReceiver<String>) -> io::Result<()> {
        let (mut link, mut packets) = control::connect(&self.config.control_addr()).await?;
        let data = DataLink::bind(self.config.data_addr().await?).await?;
        link.send(&TcpPacket::UdpInfo(data.local_port()?)).await?;

        let receiver = data.spawn_receiver(Arc::clone(&self.roster));
        let sender = data.spawn_sender(self.local_state.subscribe(), Arc::clone(&self.roster));

        let mut seconds = interval_at(Instant::now() + Duration::from_secs(1), Duration::from_secs(1));
        let mut physics = interval(TICK_DURATION);
        physics.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut input_open = true;

        let result = loop {
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        if let Err(e) = self.handle_packet(packet, &mut link).await {
                            break Err(e);
                        }
                    }
                    None => {
                        println!("Disconnected from server");
                        info!("Server closed the connection");
                        break Ok(());
                    }
                },
                line = input.recv(), if input_open => match line {
                    Some(line) => match self.handle_input(line.trim(), &mut link).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Ok(()),
                        Err(e) => break Err(e),
                    },
                    None => input_open = false,
                },
                _ = seconds.tick() => self.on_second(),
                _ = physics.tick() => self.step(TICK_DURATION.as_secs_f32()).await,
            }
        };

        sender.abort();
        receiver.abort();
        self.local_state.send_replace(None);
        self.roster.lock().await.clear();
        result
    }

    async fn handle_packet(&mut self, packet: TcpPacket, link: &mut ControlLink) -> io::Result<()> {
        match packet {
            TcpPacket::ProvideName => match self.config.name.clone() {
                Some(name) if !self.name_attempted => {
                    self.name_attempted = true;
                    self.nickname = Some(name.clone());
                    link.send(&TcpPacket::Name(name)).await?;
                }
                _ => {
                    println!("Enter your nickname:");
                    self.awaiting_name = true;
                }
            },
            TcpPacket::NameAccepted => {
                self.awaiting_name = false;
                info!("Joined the lobby as {}", self.nickname.as_deref().unwrap_or("?"));
            }
            TcpPacket::NameTaken => {
                self.nickname = None;
                self.awaiting_name = true;
                println!("Nickname rejected, enter another:");
            }
            TcpPacket::LobbyClientList(members) => {
                println!("In lobby: {}", members.join(", "));
                self.lobby.set_members(members);
            }
            TcpPacket::ClientConnected(nickname) => {
                println!("{} joined", nickname);
                self.lobby.joined(nickname);
            }
            TcpPacket::ClientDisconnected(nickname) => {
                println!("{} left", nickname);
                self.lobby.left(&nickname);
            }
            TcpPacket::TimeUntilStart(secs) => {
                debug!("Race starts in {}s", secs);
                self.lobby_countdown.set(secs);
            }
            TcpPacket::StartGame { grid_position, color } => {
                let transform = shared::opponent::starting_transform(grid_position);
                let vehicle = self.factory.spawn(transform, color);
                self.local_state
                    .send_replace(Some(vehicle.snapshot(InputBitmap::default())));
                self.local = Some(LocalRacer {
                    vehicle,
                    grid_position,
                    color,
                });
                info!("Race loading, grid position {}", grid_position);
                link.send(&TcpPacket::ClientGameLoaded).await?;
            }
            TcpPacket::OpponentsInfo(opponents) => {
                let mut roster = self.roster.lock().await;
                for info in &opponents {
                    roster.spawn_from_info(info);
                }
            }
            TcpPacket::RaceStartCountdown(secs) => {
                println!("Race starts in {}", secs);
                let countdown = DisplayCountdown::new(u32::from(secs));
                if countdown.finished() {
                    self.start_racing();
                }
                self.race_countdown = Some(countdown);
            }
            TcpPacket::LapsUpdate { client_id, laps } => {
                debug!("Client {} is on lap {}", client_id, laps);
                self.laps.set_opponent_laps(client_id, laps);
            }
            other => warn!("Unexpected {:?} from server", other.packet_type()),
        }
        Ok(())
    }

    async fn handle_input(&mut self, line: &str, link: &mut ControlLink) -> io::Result<Flow> {
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        if self.awaiting_name {
            self.awaiting_name = false;
            self.nickname = Some(line.to_string());
            link.send(&TcpPacket::Name(line.to_string())).await?;
            return Ok(Flow::Continue);
        }

        match line {
            "quit" => return Ok(Flow::Quit),
            "lap" if self.racing && self.local.is_some() => {
                let laps = self.laps.report_local_lap_increment();
                println!("Lap {}", laps);
                link.send(&TcpPacket::LapCount(laps)).await?;
            }
            "lap" => println!("Not racing yet"),
            other => debug!("Ignoring input {:?}", other),
        }
        Ok(Flow::Continue)
    }

    fn on_second(&mut self) {
        if self.local.is_none() && !self.lobby_countdown.finished() {
            self.lobby_countdown.tick();
        }
        if let Some(countdown) = self.race_countdown.as_mut() {
            if !countdown.finished() && countdown.tick() == 0 {
                self.start_racing();
            }
        }
    }

    fn start_racing(&mut self) {
        if !self.racing {
            self.racing = true;
            println!("Go!");
        }
    }

    async fn step(&mut self, dt: f32) {
        if let Some(local) = self.local.as_mut() {
            let controls = ControlState {
                forward: self.racing && self.config.throttle,
                ..ControlState::default()
            };
            local.vehicle.apply_control_state(controls);
            local.vehicle.step(dt);
            let snapshot = local.vehicle.snapshot(InputBitmap::from_controls(controls));
            self.local_state.send_replace(Some(snapshot));
        }
        self.roster.lock().await.apply_last_inputs(dt);
    }

    /// Grid slot and color of the local vehicle, once spawned.
    pub fn local_racer(&self) -> Option<(u8, VehicleColor)> {
        self.local.as_ref().map(|local| (local.grid_position, local.color))
    }
}
