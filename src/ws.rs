//! WebSocket transport: HTTP upgrade handshake, RFC 6455 frame codec,
//! and the per-connection session task.
//!
//! The server side only: inbound frames must be masked, outbound frames
//! never are. A session owns its read loop; outbound frames go through an
//! unbounded queue drained by a dedicated writer task, which keeps frame
//! order FIFO with a single write in flight. Sessions talk to the rest of
//! the server through `SessionEvent`s.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;
use crate::log::{log, log_error, LogLevel};

/// Upper bound on a single frame's payload.
pub const MAX_FRAME_PAYLOAD: usize = 100 * 1024 * 1024;

/// Upper bound on the upgrade request head.
const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// Key-concatenation constant from RFC 6455 §4.2.2.
const WEBSOCKET_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

// ============================================================================
// FRAME CODEC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Try to parse one client-to-server frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only part of a frame; the
/// bytes are left in place and parsing resumes after the next read.
/// A protocol violation is an error and tears the session down.
pub fn parse_frame(buf: &mut BytesMut) -> Result<Option<Frame>, RelayError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];

    if b0 & 0x70 != 0 {
        return Err(RelayError::Protocol("reserved bits set"));
    }
    let opcode = Opcode::from_u8(b0 & 0x0F)
        .ok_or(RelayError::Protocol("unknown opcode"))?;
    let fin = b0 & 0x80 != 0;

    if b1 & 0x80 == 0 {
        return Err(RelayError::Protocol("client frame not masked"));
    }

    let len7 = b1 & 0x7F;
    let (payload_len, ext_len) = match len7 {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            let mut cursor = Cursor::new(&buf[2..4]);
            (ReadBytesExt::read_u16::<BigEndian>(&mut cursor).unwrap() as usize, 2)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            if buf[2] & 0x80 != 0 {
                return Err(RelayError::Protocol("64-bit length high bit set"));
            }
            let mut cursor = Cursor::new(&buf[2..10]);
            (ReadBytesExt::read_u64::<BigEndian>(&mut cursor).unwrap() as usize, 8)
        }
        n => (n as usize, 0),
    };

    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(RelayError::Protocol("payload exceeds maximum size"));
    }

    let total = 2 + ext_len + 4 + payload_len;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(2 + ext_len);
    let mask = [buf[0], buf[1], buf[2], buf[3]];
    buf.advance(4);

    let mut payload = buf.split_to(payload_len);
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Some(Frame {
        fin,
        opcode,
        payload: payload.freeze(),
    }))
}

/// Build one server-to-client frame: FIN set, never masked.
pub fn encode_frame(payload: &[u8], opcode: Opcode) -> Bytes {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | opcode as u8);

    if payload.len() <= 125 {
        frame.push(payload.len() as u8);
    } else if payload.len() <= 65535 {
        frame.push(126);
        WriteBytesExt::write_u16::<BigEndian>(&mut frame, payload.len() as u16).unwrap();
    } else {
        frame.push(127);
        WriteBytesExt::write_u64::<BigEndian>(&mut frame, payload.len() as u64).unwrap();
    }

    frame.extend_from_slice(payload);
    Bytes::from(frame)
}

// ============================================================================
// UPGRADE HANDSHAKE
// ============================================================================

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_MAGIC.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Pull the `Sec-WebSocket-Key` value out of the request head.
/// Header name match is case-insensitive, value is trimmed.
fn extract_websocket_key(request: &str) -> Option<String> {
    for line in request.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read the request head up to and including the blank line. Any bytes
/// past the terminator stay in `buf` for the frame parser.
async fn read_request_head<R>(reader: &mut R, buf: &mut BytesMut) -> Result<String, RelayError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = find_header_end(buf) {
            let head = buf.split_to(pos + 4);
            return Ok(String::from_utf8_lossy(&head).into_owned());
        }
        if buf.len() > MAX_REQUEST_SIZE {
            return Err(RelayError::Handshake("upgrade request too large"));
        }
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            return Err(RelayError::Handshake("connection closed before upgrade"));
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Notifications a session sends to the server glue.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake completed; the session is open for traffic.
    Open { handle: SessionHandle },
    /// One complete data frame arrived. Control frames never show up
    /// here; the session answers Ping and Close itself.
    Frame {
        id: String,
        opcode: Opcode,
        payload: Bytes,
    },
    /// The session is gone, whatever the reason.
    Closed { id: String },
}

/// Cheap handle for enqueueing outbound frames on a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    uuid: String,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl SessionHandle {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Frame `payload` and queue it. Fire-and-forget: a session already
    /// torn down swallows the frame.
    pub fn send(&self, payload: Bytes, opcode: Opcode) {
        let _ = self.outbound.send(encode_frame(&payload, opcode));
    }
}

/// Drive one connection: handshake, then frames until close or error.
///
/// Generic over the byte stream so a TLS wrapper (or an in-memory pipe in
/// tests) slots in without touching the protocol logic.
pub async fn run_session<S>(stream: S, events: mpsc::UnboundedSender<SessionEvent>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let uuid = Uuid::new_v4().to_string();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(64 * 1024);

    let request = match read_request_head(&mut reader, &mut buf).await {
        Ok(request) => request,
        Err(e) => {
            log_error("Handshake read", &e);
            return;
        }
    };

    // No key, no response: just drop the connection.
    let key = match extract_websocket_key(&request) {
        Some(key) => key,
        None => {
            log(LogLevel::Session, "Upgrade request without Sec-WebSocket-Key");
            return;
        }
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(&key)
    );
    if let Err(e) = writer.write_all(response.as_bytes()).await {
        log_error("Handshake write", &e);
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let handle = SessionHandle {
        uuid: uuid.clone(),
        outbound: outbound_tx,
    };

    // Writer task: drains the queue one frame at a time. Ends when every
    // handle is dropped or the peer stops accepting writes.
    let writer_uuid = uuid.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                log_error(&format!("Session {} write", writer_uuid), &e);
                break;
            }
        }
    });

    let _ = events.send(SessionEvent::Open {
        handle: handle.clone(),
    });
    log(LogLevel::Session, &format!("Session {} open", uuid));

    'session: loop {
        loop {
            match parse_frame(&mut buf) {
                Ok(Some(frame)) => match frame.opcode {
                    Opcode::Ping => handle.send(frame.payload, Opcode::Pong),
                    Opcode::Pong => {}
                    Opcode::Close => {
                        handle.send(frame.payload, Opcode::Close);
                        break 'session;
                    }
                    opcode => {
                        let _ = events.send(SessionEvent::Frame {
                            id: uuid.clone(),
                            opcode,
                            payload: frame.payload,
                        });
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    log_error(&format!("Session {}", uuid), &e);
                    break 'session;
                }
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => break 'session,
            Ok(_) => {}
            Err(e) => {
                log_error(&format!("Session {} read", uuid), &e);
                break 'session;
            }
        }
    }

    drop(handle);
    let _ = events.send(SessionEvent::Closed { id: uuid.clone() });
    log(LogLevel::Session, &format!("Session {} closed", uuid));

    // Let queued frames (including a Close reply) flush before the writer
    // half is dropped with the task.
    let _ = write_task.await;
}

// ============================================================================
// LISTENER
// ============================================================================

/// Accept stream connections forever, one session task per connection.
pub async fn run_listener(listener: TcpListener, events: mpsc::UnboundedSender<SessionEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                log(LogLevel::Session, &format!("New stream connection from {}", addr));
                tokio::spawn(run_session(stream, events.clone()));
            }
            Err(e) => {
                log_error("Stream accept", &e);
            }
        }
    }
}
