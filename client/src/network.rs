use crate::game::{ClientGameState, Effect};
use crate::input::ScriptedInput;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION, SERVER_BUFFER_SIZE};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Headless client: streams the local character's moves and applies what
/// the server sends back.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    name: String,
    connected: bool,

    game_state: ClientGameState,
    bot: Option<ScriptedInput>,

    fake_ping_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        name: &str,
        fake_ping_ms: u64,
        bot_seed: Option<u64>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            name: name.to_string(),
            connected: false,
            game_state: ClientGameState::new(),
            bot: bot_seed.map(ScriptedInput::new),
            fake_ping_ms,
        })
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn game_state_mut(&mut self) -> &mut ClientGameState {
        &mut self.game_state
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server as {}...", self.name);

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            name: self.name.clone(),
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) {
        match &packet {
            Packet::Connected { client_id, .. } => {
                info!("Connected! Client ID: {}", client_id);
                self.connected = true;
            }
            Packet::Disconnected { .. } => {
                self.connected = false;
            }
            _ => {}
        }
        self.game_state.apply_packet(packet);
    }

    async fn flush_outgoing(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for packet in self.game_state.drain_outgoing() {
            if self.connected {
                self.send_packet(&packet).await?;
            }
        }
        Ok(())
    }

    fn log_effects(&mut self) {
        for effect in self.game_state.drain_effects() {
            match effect {
                Effect::Damage { entity_id, amount, .. } => {
                    debug!("Entity {} took {} damage", entity_id, amount);
                }
                Effect::Local(cue) => debug!("Local cue: {:?}", cue),
                other => debug!("{:?}", other),
            }
        }
    }

    /// Runs one rendered frame: input, simulation, outgoing packets.
    async fn frame(&mut self, dt: f32) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(bot) = self.bot.as_mut() {
            let keys = bot.next_keys(dt);
            self.game_state.sample_keys(keys);
            if self.game_state.local().map_or(false, |local| local.health <= 0 && local.health_max > 0) {
                self.game_state.request_respawn();
            }
        }

        self.game_state.step_frame(dt);
        self.flush_outgoing().await?;
        self.log_effects();
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut frame_interval = interval(Duration::from_millis(16));
        let mut last_frame = Instant::now();
        let mut buffer = [0u8; SERVER_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => self.handle_packet(packet),
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }

                            if let Some(reason) = self.game_state.disconnect_reason() {
                                info!("Server closed the session: {}", reason);
                                break;
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;

                    if let Err(e) = self.frame(dt).await {
                        error!("Error sending moves: {}", e);
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}
