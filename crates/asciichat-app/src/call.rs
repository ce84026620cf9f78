//! Call orchestration: the initiator and receiver roles.
//!
//! # Initiator
//! 1. Probe the capture source (before any network activity)
//! 2. Resolve the peer's handle through the directory
//! 3. Ring; stop on anything but `ACCEPT`
//! 4. Settle delay, so the receiver can open its transfer listener
//! 5. Capture a session and send it
//!
//! # Receiver
//! 1. Listen on the well-known port for one ring, ask the human
//! 2. Listen again on the same port for the session transfer
//! 3. Play it over the target duration
//!
//! Every attempt ends in exactly one terminal outcome. Failures are reported
//! with the phase they hit; only a bind failure is fatal to the process.

use std::net::SocketAddr;
use std::sync::Arc;

use asciichat_capture::{CaptureError, SessionCapture};
use asciichat_core::{CallConfig, CallError, CallPhase, CallState};
use asciichat_directory::Directory;
use asciichat_playback::{AudioOutput, PlaybackClock, PlaybackReport, Renderer};
use asciichat_transport::{
    listen_addr, send_session, try_ring, ConsentPrompt, RingAnswer, RingDecision, SessionReceiver,
    SignalingListener,
};
use tracing::{error, info, warn};

/// How a call attempt ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// Initiator: the session was handed to the peer.
    Delivered { peer: SocketAddr, frames: usize, payload_bytes: u64 },
    /// Receiver: the session was received and played.
    Played { peer: SocketAddr, report: PlaybackReport },
    /// The callee answered `REJECT` (or, as receiver, the human said no).
    Rejected,
}

/// Drives one call attempt at a time and owns its [`CallState`].
pub struct CallOrchestrator {
    config: CallConfig,
    directory: Arc<dyn Directory>,
    capture: Arc<dyn SessionCapture>,
    prompt: Arc<dyn ConsentPrompt>,
    audio: Arc<dyn AudioOutput>,
    state: CallState,
    history: Vec<CallState>,
}

impl CallOrchestrator {
    pub fn new(
        config: CallConfig,
        directory: Arc<dyn Directory>,
        capture: Arc<dyn SessionCapture>,
        prompt: Arc<dyn ConsentPrompt>,
        audio: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            config,
            directory,
            capture,
            prompt,
            audio,
            state: CallState::Idle,
            history: vec![CallState::Idle],
        }
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Every state entered since construction, oldest first.
    pub fn history(&self) -> &[CallState] {
        &self.history
    }

    fn enter(&mut self, next: CallState) {
        info!("Call state: {} -> {}", self.state.label(), next);
        self.history.push(next.clone());
        self.state = next;
    }

    /// Records the terminal state of an attempt and returns to idle.
    fn finish<T>(&mut self, result: Result<T, (CallPhase, CallError)>) -> Result<T, CallError> {
        match result {
            Ok(value) => {
                self.enter(CallState::Idle);
                Ok(value)
            }
            Err((phase, err)) => {
                error!("Call failed while {}: {}", phase, err);
                self.enter(CallState::Failed { phase, reason: err.to_string() });
                self.enter(CallState::Idle);
                Err(err)
            }
        }
    }

    // ── Initiator ───────────────────────────────────────────────────────────

    /// Calls the peer registered as `handle` and sends it a fresh capture.
    pub async fn place_call(&mut self, handle: &str) -> Result<CallOutcome, CallError> {
        let result = self.place_call_inner(handle).await;
        self.finish(result)
    }

    async fn place_call_inner(&mut self, handle: &str) -> Result<CallOutcome, (CallPhase, CallError)> {
        self.capture.probe().await.map_err(|e| (CallPhase::Capturing, capture_error(e)))?;

        let address = self
            .directory
            .lookup(handle)
            .await
            .map_err(|e| (CallPhase::LookingUp, CallError::Directory { reason: e.to_string() }))?
            .ok_or_else(|| (CallPhase::LookingUp, CallError::PeerNotFound { handle: handle.to_string() }))?;
        let peer = resolve(&address, self.config.port).await.map_err(|e| (CallPhase::LookingUp, e))?;
        info!("Peer {} is at {} ({})", handle, address, peer);

        self.enter(CallState::Ringing { peer });
        let host = peer.ip().to_string();
        match try_ring(&host, peer.port(), self.config.handshake_timeout()).await {
            Ok(RingAnswer::Accepted) => {}
            Ok(RingAnswer::Rejected) => {
                self.enter(CallState::Rejected);
                return Ok(CallOutcome::Rejected);
            }
            Err(e) => return Err((CallPhase::Ringing, CallError::from_signaling(e, CallPhase::Ringing))),
        }
        self.enter(CallState::Accepted { peer });

        tokio::time::sleep(self.config.settle_delay()).await;
        let session = self
            .capture
            .capture(self.config.capture_duration(), self.config.grid_width)
            .await
            .map_err(|e| (CallPhase::Capturing, capture_error(e)))?;

        self.enter(CallState::Transferring { peer });
        let payload_bytes = send_session(&host, peer.port(), &session, self.config.transfer_timeout())
            .await
            .map_err(|e| (CallPhase::Transferring, CallError::from_transport(e, CallPhase::Transferring)))?;

        Ok(CallOutcome::Delivered { peer, frames: session.frame_count(), payload_bytes })
    }

    // ── Receiver ────────────────────────────────────────────────────────────

    /// Waits for one incoming call and, if accepted, plays what it sends.
    ///
    /// A [`CallError::BindFailure`] here means the port is taken; callers
    /// should treat it as fatal.
    pub async fn answer_call(&mut self, renderer: &mut dyn Renderer) -> Result<CallOutcome, CallError> {
        let result = self.answer_call_inner(renderer).await;
        self.finish(result)
    }

    async fn answer_call_inner(
        &mut self,
        renderer: &mut dyn Renderer,
    ) -> Result<CallOutcome, (CallPhase, CallError)> {
        let bind = listen_addr(self.config.port);
        let waiting = |e| (CallPhase::Waiting, CallError::from_signaling(e, CallPhase::Waiting));

        let listener = SignalingListener::bind(bind).await.map_err(waiting)?;
        self.enter(CallState::Listening { addr: listener.local_addr() });
        let decision = listener
            .wait_for_ring(self.prompt.as_ref(), self.config.handshake_timeout())
            .await
            .map_err(waiting)?;

        let caller = match decision {
            RingDecision::Accepted { peer } => peer,
            RingDecision::Declined { peer } => {
                info!("Declined call from {}", peer);
                self.enter(CallState::Rejected);
                return Ok(CallOutcome::Rejected);
            }
            RingDecision::Unrecognized { peer, received } => {
                return Err((
                    CallPhase::Waiting,
                    CallError::ProtocolViolation {
                        reason: format!(
                            "{} sent {:?} instead of a ring",
                            peer,
                            String::from_utf8_lossy(&received)
                        ),
                    },
                ));
            }
        };
        self.enter(CallState::Accepted { peer: caller });

        let transferring = |e| (CallPhase::Transferring, CallError::from_transport(e, CallPhase::Transferring));
        let receiver = SessionReceiver::bind(bind).await.map_err(transferring)?;
        self.enter(CallState::Transferring { peer: caller });
        let (session, sender) = receiver
            .receive(self.config.transfer_timeout(), self.config.max_payload_bytes)
            .await
            .map_err(transferring)?;
        if sender.ip() != caller.ip() {
            warn!("Session came from {}, but the call was placed by {}", sender, caller);
        }

        self.enter(CallState::Playing { frames: session.frame_count() });
        let playing = |reason: String| (CallPhase::Playing, CallError::Playback { reason });
        let clock = PlaybackClock::new(self.config.playback_duration()).map_err(|e| playing(e.to_string()))?;
        let report = clock
            .play(session, renderer, Arc::clone(&self.audio))
            .await
            .map_err(|e| playing(e.to_string()))?;
        info!(
            "Played {}/{} frames in {:.2}s{}",
            report.frames_presented,
            report.frames_total,
            report.total_elapsed.as_secs_f64(),
            if report.cancelled { " (closed early)" } else { "" }
        );

        Ok(CallOutcome::Played { peer: sender, report })
    }
}

fn capture_error(err: CaptureError) -> CallError {
    match err {
        CaptureError::DeviceUnavailable { device } => CallError::DeviceUnavailable { device },
        CaptureError::Codec(e) => CallError::Codec(e),
        CaptureError::Io(e) => CallError::Io(e),
        other => CallError::DeviceUnavailable { device: other.to_string() },
    }
}

/// Resolves a directory address (IP or host name) to a socket address.
async fn resolve(address: &str, port: u16) -> Result<SocketAddr, CallError> {
    let unreachable = |reason: String| CallError::ConnectFailure { peer: address.to_string(), reason };
    let mut addrs = tokio::net::lookup_host((address, port)).await.map_err(|e| unreachable(e.to_string()))?;
    addrs.next().ok_or_else(|| unreachable("no addresses".to_string()))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use asciichat_core::{Cell, FrameGrid, Session};
    use asciichat_directory::DirectoryError;
    use asciichat_playback::{NullRenderer, PacedAudioOutput};
    use asciichat_transport::FixedAnswer;
    use async_trait::async_trait;
    use tokio::net::TcpListener;

    use super::*;

    struct OneEntry(String, String);

    #[async_trait]
    impl Directory for OneEntry {
        async fn lookup(&self, handle: &str) -> Result<Option<String>, DirectoryError> {
            Ok((handle == self.0).then(|| self.1.clone()))
        }
        async fn register(&self, _handle: &str, _address: &str) -> Result<(), DirectoryError> {
            Ok(())
        }
    }

    struct NoCamera;

    #[async_trait]
    impl SessionCapture for NoCamera {
        async fn probe(&self) -> Result<(), CaptureError> {
            Err(CaptureError::DeviceUnavailable { device: "camera 0".into() })
        }
        async fn capture(&self, _d: Duration, _w: u16) -> Result<Session, CaptureError> {
            unreachable!("capture after failed probe")
        }
    }

    struct TinyCapture;

    #[async_trait]
    impl SessionCapture for TinyCapture {
        async fn probe(&self) -> Result<(), CaptureError> {
            Ok(())
        }
        async fn capture(&self, _d: Duration, w: u16) -> Result<Session, CaptureError> {
            let frame = FrameGrid::new(1, w, vec![Cell::new('#', 9, 9, 9); w as usize]).unwrap();
            Ok(Session::new(vec![frame; 3], 30.0, vec![1, 2, 3], 8_000)?)
        }
    }

    async fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap().local_addr().unwrap().port()
    }

    fn config(port: u16) -> CallConfig {
        CallConfig {
            port,
            handshake_timeout_ms: 2_000,
            transfer_timeout_ms: 2_000,
            settle_delay_ms: 100,
            playback_duration_secs: 0.2,
            grid_width: 8,
            ..CallConfig::default()
        }
    }

    fn orchestrator(port: u16, capture: Arc<dyn SessionCapture>, answer: bool) -> CallOrchestrator {
        CallOrchestrator::new(
            config(port),
            Arc::new(OneEntry("alice_1".into(), "127.0.0.1".into())),
            capture,
            Arc::new(FixedAnswer(answer)),
            Arc::new(PacedAudioOutput),
        )
    }

    #[tokio::test]
    async fn missing_device_fails_before_network() {
        let port = free_port().await;
        // Anything that connected here would be a ring.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let mut call = orchestrator(port, Arc::new(NoCamera), true);

        let err = call.place_call("alice_1").await.unwrap_err();
        assert!(matches!(err, CallError::DeviceUnavailable { .. }));
        assert!(tokio::time::timeout(Duration::from_millis(100), listener.accept()).await.is_err());
        assert!(matches!(
            call.history(),
            [CallState::Idle, CallState::Failed { phase: CallPhase::Capturing, .. }, CallState::Idle]
        ));
    }

    #[tokio::test]
    async fn unknown_handle_is_peer_not_found() {
        let mut call = orchestrator(free_port().await, Arc::new(TinyCapture), true);
        let err = call.place_call("nobody").await.unwrap_err();
        assert!(matches!(err, CallError::PeerNotFound { ref handle } if handle == "nobody"));
        assert_eq!(call.state(), &CallState::Idle);
    }

    #[tokio::test]
    async fn unreachable_peer_is_connect_failure() {
        let mut call = orchestrator(free_port().await, Arc::new(TinyCapture), true);
        let err = call.place_call("alice_1").await.unwrap_err();
        assert!(matches!(err, CallError::ConnectFailure { .. }), "{err:?}");
        assert!(call.history().iter().any(|s| matches!(s, CallState::Failed { phase: CallPhase::Ringing, .. })));
    }

    #[tokio::test]
    async fn accepted_call_is_delivered_and_played() {
        let port = free_port().await;
        let mut callee = orchestrator(port, Arc::new(TinyCapture), true);
        let answer = tokio::spawn(async move {
            let mut renderer = NullRenderer::default();
            let outcome = callee.answer_call(&mut renderer).await;
            (outcome, renderer.presented(), callee.history().to_vec())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut caller = orchestrator(port, Arc::new(TinyCapture), true);
        let outcome = caller.place_call("alice_1").await.unwrap();
        assert!(matches!(outcome, CallOutcome::Delivered { frames: 3, .. }));

        let (played, presented, history) = answer.await.unwrap();
        match played.unwrap() {
            CallOutcome::Played { report, .. } => {
                assert_eq!(report.frames_presented, 3);
                assert!(report.audio_completed);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(presented, 3);
        let labels: Vec<_> = history.iter().map(CallState::label).collect();
        assert_eq!(labels, ["idle", "listening", "accepted", "transferring", "playing", "idle"]);
        assert_eq!(
            caller.history().iter().map(CallState::label).collect::<Vec<_>>(),
            ["idle", "ringing", "accepted", "transferring", "idle"]
        );
    }

    #[tokio::test]
    async fn declined_call_is_rejected_on_both_sides() {
        let port = free_port().await;
        let mut callee = orchestrator(port, Arc::new(TinyCapture), false);
        let answer = tokio::spawn(async move { callee.answer_call(&mut NullRenderer::default()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut caller = orchestrator(port, Arc::new(TinyCapture), true);
        assert_eq!(caller.place_call("alice_1").await.unwrap(), CallOutcome::Rejected);
        assert_eq!(answer.await.unwrap().unwrap(), CallOutcome::Rejected);
        assert_eq!(
            caller.history().iter().map(CallState::label).collect::<Vec<_>>(),
            ["idle", "ringing", "rejected", "idle"]
        );
    }

    #[tokio::test]
    async fn port_in_use_is_fatal_bind_failure() {
        let taken = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let mut callee = orchestrator(taken.local_addr().unwrap().port(), Arc::new(TinyCapture), true);
        let err = callee.answer_call(&mut NullRenderer::default()).await.unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
    }
}
