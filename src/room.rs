//! The single relay room: membership, per-sender packet history, and the
//! periodic mix tick.
//!
//! All state lives behind one exclusive lock. Every operation takes the
//! lock for its full duration and never holds it across an await, so the
//! tick always observes a consistent snapshot. Delivery to clients is
//! fire-and-forget through each client's sink and can never block a tick.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::log::{log, LogLevel};
use crate::mixer;
use crate::packet::AudioPacket;
use crate::ws::{Opcode, SessionHandle};

/// Packets retained per sender between ticks.
pub const MAX_HISTORY: usize = 50;

/// A sender idle longer than this stops contributing to mixes and has its
/// buffers reclaimed. Membership is not affected.
pub const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Mixing period.
pub const MIX_INTERVAL: Duration = Duration::from_millis(20);

/// Stable identity of a client for the lifetime of its attachment.
/// `address:port` for datagram clients, a UUIDv4 for stream clients.
pub type ClientId = String;

// ============================================================================
// CLIENT ADAPTER
// ============================================================================

/// Transport-specific outbound path. Both variants enqueue and return;
/// the actual socket write happens on the owning transport's writer task.
#[derive(Clone)]
pub enum ClientSink {
    /// UDP client: hand the packet to the shared datagram writer task.
    Datagram {
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<(SocketAddr, AudioPacket)>,
    },
    /// WebSocket client: enqueue a Binary frame on the session.
    Session { handle: SessionHandle },
}

impl ClientSink {
    fn send(&self, packet: AudioPacket) {
        match self {
            ClientSink::Datagram { addr, outbound } => {
                let _ = outbound.send((*addr, packet));
            }
            ClientSink::Session { handle } => {
                handle.send(packet.into_bytes(), Opcode::Binary);
            }
        }
    }
}

#[derive(Clone)]
pub struct Client {
    pub id: ClientId,
    pub sink: ClientSink,
}

impl Client {
    pub fn new(id: ClientId, sink: ClientSink) -> Self {
        Client { id, sink }
    }
}

// ============================================================================
// ROOM
// ============================================================================

struct RoomState {
    members: HashMap<ClientId, Client>,
    history: HashMap<ClientId, VecDeque<AudioPacket>>,
    last_activity: HashMap<ClientId, Instant>,
}

/// The one room every client joins. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Room {
    inner: Arc<RwLock<RoomState>>,
}

impl Room {
    pub fn new() -> Self {
        Room {
            inner: Arc::new(RwLock::new(RoomState {
                members: HashMap::new(),
                history: HashMap::new(),
                last_activity: HashMap::new(),
            })),
        }
    }

    /// Register a client. Idempotent by id: adding an id that is already a
    /// member replaces its sink and leaves history and activity intact.
    pub async fn add_client(&self, client: Client) {
        let mut state = self.inner.write().await;
        state.members.insert(client.id.clone(), client);
    }

    /// Drop a client and all of its buffers. Unknown ids are a no-op.
    pub async fn remove_client(&self, id: &str) {
        let mut state = self.inner.write().await;
        state.members.remove(id);
        state.history.remove(id);
        state.last_activity.remove(id);
    }

    pub async fn get_client(&self, id: &str) -> Option<Client> {
        let state = self.inner.read().await;
        state.members.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let state = self.inner.read().await;
        state.members.contains_key(id)
    }

    pub async fn member_count(&self) -> usize {
        let state = self.inner.read().await;
        state.members.len()
    }

    /// Buffer a packet from `sender_id` for the next tick and refresh the
    /// sender's activity timestamp. Packets from ids that are not members
    /// are dropped; both transports register a client before ingesting.
    pub async fn ingest(&self, sender_id: &str, packet: AudioPacket) {
        let mut state = self.inner.write().await;
        if !state.members.contains_key(sender_id) {
            return;
        }

        let buffer = state.history.entry(sender_id.to_string()).or_default();
        buffer.push_back(packet);
        if buffer.len() > MAX_HISTORY {
            buffer.pop_front();
        }

        state
            .last_activity
            .insert(sender_id.to_string(), Instant::now());
    }

    /// Run the mix loop until the task is dropped.
    pub fn spawn_mix_task(&self) -> JoinHandle<()> {
        let room = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MIX_INTERVAL);
            loop {
                interval.tick().await;
                room.run_tick_once(Instant::now()).await;
            }
        })
    }

    /// One mix tick. For every member, average together the buffered audio
    /// of all OTHER senders that were active within `ACTIVITY_TIMEOUT` of
    /// `now`, then deliver the result through the member's sink. All
    /// buffered audio is consumed by the tick; stale senders' buffers are
    /// reclaimed afterwards.
    pub async fn run_tick_once(&self, now: Instant) {
        let mut state = self.inner.write().await;
        let state = &mut *state;

        for (client_id, client) in &state.members {
            let mut to_mix: Vec<AudioPacket> = Vec::new();

            for (sender_id, buffer) in &state.history {
                if sender_id == client_id || buffer.is_empty() {
                    continue;
                }
                let active = state
                    .last_activity
                    .get(sender_id)
                    .map(|t| now.duration_since(*t) <= ACTIVITY_TIMEOUT)
                    .unwrap_or(false);
                if active {
                    to_mix.extend(buffer.iter().cloned());
                }
            }

            if !to_mix.is_empty() {
                let mixed = mixer::mix(&to_mix);
                // An all-empty history still mixes to nothing; silence is
                // generated client-side, so nothing is sent.
                if !mixed.is_empty() {
                    client.sink.send(mixed);
                }
            }
        }

        for buffer in state.history.values_mut() {
            buffer.clear();
        }

        let timed_out: Vec<ClientId> = state
            .last_activity
            .iter()
            .filter(|(_, t)| now.duration_since(**t) > ACTIVITY_TIMEOUT)
            .map(|(id, _)| id.clone())
            .collect();
        for id in timed_out {
            state.history.remove(&id);
            state.last_activity.remove(&id);
            log(LogLevel::Voice, &format!("Client {} idle, buffers reclaimed", id));
        }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}
