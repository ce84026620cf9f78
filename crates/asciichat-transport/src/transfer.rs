//! Bulk session transfer: one connection, one length-prefixed container.
//!
//! ```text
//! [0..8]   length  u64 BE  L
//! [8..8+L] payload         session container (see `codec`)
//! ```
//!
//! The receiver buffers the whole payload before decoding; a connection that
//! closes early yields [`Truncation`] and the partial buffer is dropped.

use std::net::SocketAddr;
use std::time::Duration;

use asciichat_core::{Session, TransportError, Truncation};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::codec;

/// Receive chunk size; the accumulation target is always the declared length.
pub const READ_CHUNK: usize = 4096;
pub const LENGTH_PREFIX: usize = 8;

/// Upfront allocation cap so a bogus length cannot reserve memory by itself.
const PREALLOC_LIMIT: u64 = 1 << 20;

// ── Framing ───────────────────────────────────────────────────────────────────

/// Writes the length prefix then the payload.
pub async fn write_frame(
    stream: &mut (impl AsyncWrite + Unpin),
    payload: &[u8],
) -> Result<(), TransportError> {
    stream.write_all(&(payload.len() as u64).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one complete frame, or fails without returning any partial data.
pub async fn read_frame(
    stream: &mut (impl AsyncRead + Unpin),
    max_len: u64,
) -> Result<Vec<u8>, TransportError> {
    let mut header = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        let n = stream.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(TransportError::Truncated(Truncation::Header { received: filled }));
        }
        filled += n;
    }

    let declared = u64::from_be_bytes(header);
    if declared > max_len {
        return Err(TransportError::PayloadTooLarge { declared, limit: max_len });
    }
    debug!("Expecting {} payload bytes", declared);

    let mut payload = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
    let mut chunk = [0u8; READ_CHUNK];
    while (payload.len() as u64) < declared {
        let want = (declared - payload.len() as u64).min(READ_CHUNK as u64) as usize;
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(TransportError::Truncated(Truncation::Payload {
                expected: declared,
                received: payload.len() as u64,
            }));
        }
        payload.extend_from_slice(&chunk[..n]);
    }
    Ok(payload)
}

/// Encodes and writes a session; returns the payload length `L`.
pub async fn write_session(
    stream: &mut (impl AsyncWrite + Unpin),
    session: &Session,
) -> Result<u64, TransportError> {
    let payload = codec::encode(session)?;
    write_frame(stream, &payload).await?;
    Ok(payload.len() as u64)
}

/// Reads a complete frame and decodes it into a session.
pub async fn read_session(
    stream: &mut (impl AsyncRead + Unpin),
    max_len: u64,
) -> Result<Session, TransportError> {
    let payload = read_frame(stream, max_len).await?;
    Ok(codec::decode(&payload)?)
}

// ── Sender ────────────────────────────────────────────────────────────────────

/// Connects to `host:port` and sends `session` within `timeout`.
///
/// Returns the payload length written after the prefix.
pub async fn send_session(
    host: &str,
    port: u16,
    session: &Session,
    timeout: Duration,
) -> Result<u64, TransportError> {
    let addr = format!("{host}:{port}");
    let ms = timeout.as_millis() as u64;

    let transfer = async {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::ConnectFailed { addr: addr.clone(), reason: e.to_string() })?;
        stream.set_nodelay(true)?;
        let len = write_session(&mut stream, session).await?;
        stream.shutdown().await?;
        Ok::<_, TransportError>(len)
    };

    let len = tokio::time::timeout(timeout, transfer)
        .await
        .map_err(|_| TransportError::Timeout { ms })??;
    info!("Sent {} payload bytes ({} frames) to {}", len, session.frame_count(), addr);
    Ok(len)
}

// ── Receiver ──────────────────────────────────────────────────────────────────

/// Listening socket for exactly one inbound session transfer.
pub struct SessionReceiver {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl SessionReceiver {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| TransportError::BindFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr()?;
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts one sender and reads its session.
    ///
    /// `timeout` bounds the wait for the sender to connect and, separately,
    /// the transfer itself. The listener is closed once a sender connects.
    pub async fn receive(
        self,
        timeout: Duration,
        max_len: u64,
    ) -> Result<(Session, SocketAddr), TransportError> {
        let ms = timeout.as_millis() as u64;
        info!("Waiting for session data on {}...", self.local_addr);

        let (mut conn, peer) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .map_err(|_| TransportError::Timeout { ms })??;
        drop(self.listener);
        info!("Receiving session data from {}", peer);

        let session = tokio::time::timeout(timeout, read_session(&mut conn, max_len))
            .await
            .map_err(|_| TransportError::Timeout { ms })??;
        info!(
            "Received session from {}: {} frames, {} audio samples @ {} Hz",
            peer,
            session.frame_count(),
            session.audio().len(),
            session.audio_sample_rate()
        );
        Ok((session, peer))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use asciichat_core::{Cell, FrameGrid};

    use super::*;

    const MAX: u64 = 64 * 1024 * 1024;

    fn session(frames: usize, cols: u16) -> Session {
        let frames = (0..frames)
            .map(|i| {
                let cells = (0..cols as usize * 2)
                    .map(|c| Cell::new(if (c + i) % 2 == 0 { '#' } else { '.' }, c as u8, i as u8, 7))
                    .collect();
                FrameGrid::new(2, cols, cells).unwrap()
            })
            .collect();
        Session::new(frames, 30.0, (0..5_000).map(|s| (s % 300) as i16 - 150).collect(), 44_100).unwrap()
    }

    /// Prefix + payload, cut to `len` bytes.
    fn wire_bytes(session: &Session) -> Vec<u8> {
        let payload = codec::encode(session).unwrap();
        let mut wire = (payload.len() as u64).to_be_bytes().to_vec();
        wire.extend_from_slice(&payload);
        wire
    }

    async fn read_cut(wire: &[u8], cut: usize) -> Result<Session, TransportError> {
        let (mut tx, mut rx) = tokio::io::duplex(READ_CHUNK);
        let head = wire[..cut].to_vec();
        let writer = tokio::spawn(async move {
            tx.write_all(&head).await.unwrap();
            // dropping tx closes the stream
        });
        let result = read_session(&mut rx, MAX).await;
        writer.await.unwrap();
        result
    }

    #[tokio::test]
    async fn duplex_roundtrip_across_many_chunks() {
        let original = session(40, 120);
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let sent = original.clone();
        let writer = tokio::spawn(async move { write_session(&mut tx, &sent).await.unwrap() });
        let received = read_session(&mut rx, MAX).await.unwrap();
        let len = writer.await.unwrap();
        assert!(len > READ_CHUNK as u64 * 4);
        assert_eq!(received, original);
    }

    #[tokio::test]
    async fn truncated_at_each_offset() {
        let original = session(3, 10);
        let wire = wire_bytes(&original);
        let l = wire.len() - LENGTH_PREFIX;

        for cut in [0, 3, 4] {
            let err = read_cut(&wire, cut).await.unwrap_err();
            assert!(
                matches!(err, TransportError::Truncated(Truncation::Header { received }) if received == cut),
                "cut {cut}: {err:?}"
            );
        }
        for cut in [LENGTH_PREFIX, LENGTH_PREFIX + l - 1] {
            let err = read_cut(&wire, cut).await.unwrap_err();
            match err {
                TransportError::Truncated(Truncation::Payload { expected, received }) => {
                    assert_eq!(expected, l as u64);
                    assert_eq!(received, (cut - LENGTH_PREFIX) as u64);
                }
                other => panic!("cut {cut}: unexpected {other:?}"),
            }
        }
        assert_eq!(read_cut(&wire, wire.len()).await.unwrap(), original);
    }

    #[tokio::test]
    async fn oversized_declaration_is_refused() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(&(MAX + 1).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut rx, MAX).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { declared, .. } if declared == MAX + 1));
    }

    #[tokio::test]
    async fn corrupt_payload_is_codec_error() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        write_frame(&mut tx, b"not a session container at all....!!").await.unwrap();
        drop(tx);
        assert!(matches!(read_session(&mut rx, MAX).await, Err(TransportError::Codec(_))));
    }

    #[tokio::test]
    async fn tcp_send_and_receive() {
        let receiver = SessionReceiver::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
        let port = receiver.local_addr().port();
        let rx = tokio::spawn(receiver.receive(Duration::from_secs(5), MAX));

        let original = session(12, 64);
        let len = send_session("127.0.0.1", port, &original, Duration::from_secs(5)).await.unwrap();
        assert_eq!(len, codec::encode(&original).unwrap().len() as u64);

        let (received, peer) = rx.await.unwrap().unwrap();
        assert_eq!(received, original);
        assert_eq!(peer.ip(), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn receiver_times_out_without_sender() {
        let receiver = SessionReceiver::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
        let err = receiver.receive(Duration::from_millis(50), MAX).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { ms: 50 }));
    }

    #[tokio::test]
    async fn stalled_sender_times_out() {
        let receiver = SessionReceiver::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
        let addr = receiver.local_addr();
        let rx = tokio::spawn(receiver.receive(Duration::from_millis(200), MAX));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(&100u64.to_be_bytes()).await.unwrap();
        conn.write_all(&[0u8; 10]).await.unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        drop(conn);
    }

    #[tokio::test]
    async fn send_to_closed_port_is_connect_failure() {
        let port = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = send_session("127.0.0.1", port, &session(1, 4), Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { .. }));
    }
}
