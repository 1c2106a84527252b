//! Datagram audio endpoint.
//!
//! Inbound datagrams are bare PCM payloads; the source `address:port` is
//! the client identity, registered on first sight. Outbound packets for
//! every datagram client funnel through one writer task so the mix tick
//! never touches the socket itself. Send failures are logged and the
//! client stays registered.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::log::{log, log_error, LogLevel};
use crate::packet::AudioPacket;
use crate::room::{Client, ClientSink, Room};

/// Largest datagram the endpoint will read.
pub const MAX_DATAGRAM_SIZE: usize = 32 * 1024;

/// Start the shared outbound writer. Every datagram client's sink clones
/// the returned sender.
pub fn spawn_writer(
    socket: Arc<UdpSocket>,
) -> (
    mpsc::UnboundedSender<(SocketAddr, AudioPacket)>,
    JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(SocketAddr, AudioPacket)>();
    let task = tokio::spawn(async move {
        while let Some((addr, packet)) = rx.recv().await {
            if let Err(e) = socket.send_to(packet.as_bytes(), addr).await {
                log_error(&format!("Datagram send to {}", addr), &e);
            }
        }
    });
    (tx, task)
}

/// Read datagrams forever, registering first-seen sources into the room
/// and buffering their audio for the next tick.
pub async fn run_endpoint(
    socket: Arc<UdpSocket>,
    room: Room,
    outbound: mpsc::UnboundedSender<(SocketAddr, AudioPacket)>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((size, peer_addr)) => {
                // PCM payloads are non-empty and sample-aligned.
                if size == 0 || size % 2 != 0 {
                    log(
                        LogLevel::Warn,
                        &format!("Dropping malformed {}-byte datagram from {}", size, peer_addr),
                    );
                    continue;
                }

                let client_id = peer_addr.to_string();
                if !room.contains(&client_id).await {
                    log(LogLevel::Voice, &format!("New client connected: {}", client_id));
                    room.add_client(Client::new(
                        client_id.clone(),
                        ClientSink::Datagram {
                            addr: peer_addr,
                            outbound: outbound.clone(),
                        },
                    ))
                    .await;
                }

                room.ingest(&client_id, AudioPacket::new(buf[..size].to_vec()))
                    .await;
            }
            Err(e) => {
                log_error("Datagram receive", &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::time::{sleep, timeout};

    async fn start_endpoint() -> (SocketAddr, Room) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let room = Room::new();
        let (outbound, _writer) = spawn_writer(socket.clone());
        tokio::spawn(run_endpoint(socket, room.clone(), outbound));
        (addr, room)
    }

    #[tokio::test]
    async fn test_first_datagram_registers_and_cross_mix_flows_back() {
        let (server_addr, room) = start_endpoint().await;

        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let loud = AudioPacket::from_samples(&[10000i16; 8]);
        let soft = AudioPacket::from_samples(&[6000i16; 8]);
        a.send_to(loud.as_bytes(), server_addr).await.unwrap();
        b.send_to(soft.as_bytes(), server_addr).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(room.member_count().await, 2);
        assert!(room.contains(&a.local_addr().unwrap().to_string()).await);

        room.run_tick_once(Instant::now()).await;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (n, _) = timeout(Duration::from_secs(1), a.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let to_a = AudioPacket::new(buf[..n].to_vec());
        assert_eq!(to_a.sample_count(), 8);
        for i in 0..8 {
            assert_eq!(to_a.sample(i), 3000);
        }

        let (n, _) = timeout(Duration::from_secs(1), b.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let to_b = AudioPacket::new(buf[..n].to_vec());
        for i in 0..8 {
            assert_eq!(to_b.sample(i), 5000);
        }
    }

    #[tokio::test]
    async fn test_malformed_datagrams_are_not_registered() {
        let (server_addr, room) = start_endpoint().await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[1, 2, 3], server_addr).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(room.member_count().await, 0);
    }
}
