//! Ring / accept / reject handshake.
//!
//! # Exchange
//!
//! ```text
//! caller                         callee (listening on the well-known port)
//! ──────                         ──────
//! connect ─────────────────────► accept (one connection, then stop listening)
//! "RING"  ─────────────────────► consent prompt
//!         ◄───────────────────── "ACCEPT" | "REJECT"
//! close                          close
//! ```
//!
//! Anything other than an exact `ACCEPT` (a `REJECT`, unknown bytes, a dropped
//! connection, a timeout) means the caller must not proceed.

use std::net::SocketAddr;
use std::time::Duration;

use asciichat_core::{SignalingError, Token};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

// ── Consent ───────────────────────────────────────────────────────────────────

/// Asks the human on the receiving side whether to take an incoming call.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn decide(&self, caller: SocketAddr) -> bool;
}

/// Answers every call the same way. Used for unattended receivers and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl ConsentPrompt for FixedAnswer {
    async fn decide(&self, _caller: SocketAddr) -> bool {
        self.0
    }
}

// ── Caller side ───────────────────────────────────────────────────────────────

/// The callee's explicit answer to a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingAnswer {
    Accepted,
    Rejected,
}

/// Rings `host:port` and reports why the call did or did not go through.
///
/// `timeout` bounds the connect and, separately, the wait for the answer.
pub async fn try_ring(host: &str, port: u16, timeout: Duration) -> Result<RingAnswer, SignalingError> {
    let addr = format!("{host}:{port}");
    let ms = timeout.as_millis() as u64;

    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(SignalingError::ConnectFailed { addr, reason: e.to_string() }),
        Err(_) => return Err(SignalingError::Timeout { ms }),
    };
    stream.set_nodelay(true)?;
    debug!("Signaling connected to {}", addr);

    stream.write_all(Token::Ring.as_bytes()).await?;
    stream.flush().await?;
    info!("Ringing {}...", addr);

    let reply = tokio::time::timeout(timeout, read_token(&mut stream))
        .await
        .map_err(|_| SignalingError::Timeout { ms })??;

    match Token::parse(&reply) {
        Some(Token::Accept) => {
            info!("Call accepted by {}", addr);
            Ok(RingAnswer::Accepted)
        }
        Some(Token::Reject) => {
            info!("Call rejected by {}", addr);
            Ok(RingAnswer::Rejected)
        }
        _ => Err(SignalingError::UnexpectedToken { received: reply }),
    }
}

/// Rings `host:port`; true iff the callee answered exactly `ACCEPT`.
///
/// A rejection, an unreachable peer, a timeout and a garbled answer all look
/// the same here. Use [`try_ring`] to tell them apart.
pub async fn ring(host: &str, port: u16, timeout: Duration) -> bool {
    match try_ring(host, port, timeout).await {
        Ok(RingAnswer::Accepted) => true,
        Ok(RingAnswer::Rejected) => false,
        Err(e) => {
            warn!("Call to {}:{} did not go through: {}", host, port, e);
            false
        }
    }
}

// ── Callee side ───────────────────────────────────────────────────────────────

/// Outcome of answering one incoming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingDecision {
    Accepted { peer: SocketAddr },
    Declined { peer: SocketAddr },
    /// The caller sent something other than `RING`. Nothing was answered.
    Unrecognized { peer: SocketAddr, received: Vec<u8> },
}

impl RingDecision {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The caller's address, only for an accepted call.
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Self::Accepted { peer } => Some(*peer),
            _ => None,
        }
    }
}

/// Listening socket that serves exactly one incoming ring.
pub struct SignalingListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl SignalingListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, SignalingError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| SignalingError::BindFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr()?;
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts one connection, answers it, then closes the listener.
    ///
    /// Waiting for the connection is unbounded; once connected the caller has
    /// `read_timeout` to send its token.
    pub async fn wait_for_ring(
        self,
        prompt: &dyn ConsentPrompt,
        read_timeout: Duration,
    ) -> Result<RingDecision, SignalingError> {
        info!("Waiting for incoming call on {}...", self.local_addr);
        let (mut conn, peer) = self.listener.accept().await?;
        // One caller per attempt: stop listening before answering.
        drop(self.listener);
        info!("Incoming call from {}", peer);

        let msg = tokio::time::timeout(read_timeout, read_token(&mut conn))
            .await
            .map_err(|_| SignalingError::Timeout { ms: read_timeout.as_millis() as u64 })??;

        if Token::parse(&msg) != Some(Token::Ring) {
            warn!("Unknown message from {}: {:?}", peer, String::from_utf8_lossy(&msg));
            return Ok(RingDecision::Unrecognized { peer, received: msg });
        }

        let accepted = prompt.decide(peer).await;
        let answer = if accepted { Token::Accept } else { Token::Reject };
        conn.write_all(answer.as_bytes()).await?;
        conn.flush().await?;
        info!("Answered {} with {}", peer, answer);

        Ok(if accepted { RingDecision::Accepted { peer } } else { RingDecision::Declined { peer } })
    }
}

/// Binds `addr`, serves one ring and tears the listener down.
pub async fn wait_for_ring(
    addr: SocketAddr,
    prompt: &dyn ConsentPrompt,
    read_timeout: Duration,
) -> Result<RingDecision, SignalingError> {
    SignalingListener::bind(addr).await?.wait_for_ring(prompt, read_timeout).await
}

// ── Token framing ─────────────────────────────────────────────────────────────

/// Reads one handshake token (at most 16 bytes).
///
/// Keeps reading while the bytes so far are a strict prefix of a known token,
/// so a token split across segments is reassembled; stops at EOF.
async fn read_token(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<Vec<u8>, SignalingError> {
    let mut buf = [0u8; Token::MAX_LEN];
    let mut len = 0;
    loop {
        let n = stream.read(&mut buf[len..]).await?;
        if n == 0 {
            break;
        }
        len += n;
        if len == buf.len() || !Token::is_partial(&buf[..len]) {
            break;
        }
    }
    Ok(buf[..len].to_vec())
}
