//! asciichat-transport
//!
//! Point-to-point call plumbing. Both phases use the same well-known TCP port,
//! one connection each:
//!
//! ```text
//! Caller                                  Callee
//! ──────────────────────────────          ─────────────────────────────
//! ring()        ─── TCP:50007 ──────────► SignalingListener::wait_for_ring
//!   "RING"  →   ←  "ACCEPT" | "REJECT"
//! send_session() ── TCP:50007 ──────────► SessionReceiver::receive
//!   u64 BE length + session container
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use asciichat_transport::{ring, send_session, DEFAULT_PORT};
//! # async fn demo(session: asciichat_core::Session) {
//! if ring("10.0.0.5", DEFAULT_PORT, Duration::from_secs(10)).await {
//!     send_session("10.0.0.5", DEFAULT_PORT, &session, Duration::from_secs(30)).await.unwrap();
//! }
//! # }
//! ```

pub mod codec;
pub mod signaling;
pub mod transfer;

pub use asciichat_core::config::DEFAULT_PORT;
pub use signaling::{
    ring, try_ring, wait_for_ring, ConsentPrompt, FixedAnswer, RingAnswer, RingDecision,
    SignalingListener,
};
pub use transfer::{read_session, send_session, write_session, SessionReceiver};

use std::net::{Ipv4Addr, SocketAddr};

/// All-interfaces address on `port`, as both listeners bind it.
#[inline]
pub fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}
