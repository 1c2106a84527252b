//! Server glue: one room, two transports.
//!
//! Binds the UDP audio endpoint and the WebSocket listener, starts the
//! mix tick, and routes session events into the room. Datagram clients
//! bind their own identity inside the endpoint; stream clients are keyed
//! by their session uuid here.

use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::log::{log, LogLevel};
use crate::packet::AudioPacket;
use crate::room::{Client, ClientSink, Room};
use crate::udp;
use crate::ws::{self, Opcode, SessionEvent};

pub struct VoiceRelayServer {
    config: ServerConfig,
    room: Room,
}

impl VoiceRelayServer {
    pub fn new(config: ServerConfig) -> Self {
        VoiceRelayServer {
            config,
            room: Room::new(),
        }
    }

    /// Bring up both transports and run until shutdown.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!();
        println!("========================================");
        println!("      voxroom relay server starting");
        println!("========================================");
        println!();

        let udp_socket = Arc::new(UdpSocket::bind(("0.0.0.0", self.config.port)).await?);
        let tcp_listener = TcpListener::bind(("0.0.0.0", self.config.ws_port)).await?;

        log(
            LogLevel::Voice,
            &format!("UDP audio endpoint listening on port {}", self.config.port),
        );
        log(
            LogLevel::Session,
            &format!("Stream transport listening on port {}", self.config.ws_port),
        );

        let (udp_outbound, _udp_writer) = udp::spawn_writer(Arc::clone(&udp_socket));
        tokio::spawn(udp::run_endpoint(
            udp_socket,
            self.room.clone(),
            udp_outbound,
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(ws::run_listener(tcp_listener, events_tx));

        let _mix_task = self.room.spawn_mix_task();

        log(LogLevel::Info, "Server ready and accepting clients");
        route_session_events(self.room.clone(), events_rx).await;
        Ok(())
    }
}

/// Feed session traffic into the room until every event sender is gone.
pub async fn route_session_events(room: Room, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Open { handle } => {
                let id = handle.uuid().to_string();
                log(LogLevel::Session, &format!("Stream client joined: {}", id));
                room.add_client(Client::new(id, ClientSink::Session { handle }))
                    .await;
            }
            SessionEvent::Frame { id, opcode, payload } => match opcode {
                Opcode::Binary => {
                    room.ingest(&id, AudioPacket::new(payload)).await;
                }
                // Text and continuation frames carry no audio.
                _ => {}
            },
            SessionEvent::Closed { id } => {
                log(LogLevel::Session, &format!("Stream client left: {}", id));
                room.remove_client(&id).await;
            }
        }
    }
}
