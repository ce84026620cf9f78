//! End-to-end calls over loopback TCP: two orchestrators, one per role.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use asciichat_app::{CallOrchestrator, CallOutcome};
use asciichat_capture::{SessionCapture, SyntheticCapture};
use asciichat_core::{CallConfig, CallError, CallPhase, CallState, FrameGrid, Truncation};
use asciichat_directory::{Directory, JsonFileDirectory};
use asciichat_playback::{PacedAudioOutput, Renderer, RendererError};
use asciichat_transport::{codec, ring, FixedAnswer};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// Keeps every presented frame.
#[derive(Default)]
struct Capturing {
    frames: Vec<FrameGrid>,
}

#[async_trait]
impl Renderer for Capturing {
    async fn initialize(&mut self, _rows: u16, _cols: u16) -> Result<(), RendererError> {
        Ok(())
    }
    async fn present(&mut self, frame: &FrameGrid) -> Result<(), RendererError> {
        self.frames.push(frame.clone());
        Ok(())
    }
    async fn shutdown(&mut self) {}
}

async fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap().local_addr().unwrap().port()
}

fn config(port: u16) -> CallConfig {
    CallConfig { port, settle_delay_ms: 300, transfer_timeout_ms: 20_000, ..CallConfig::default() }
}

async fn directory(dir: &tempfile::TempDir) -> Arc<dyn Directory> {
    let d = JsonFileDirectory::new(dir.path().join("directory.json"));
    d.register("alice_1", "127.0.0.1").await.unwrap();
    Arc::new(d)
}

fn orchestrator(port: u16, directory: Arc<dyn Directory>, accept: bool) -> CallOrchestrator {
    CallOrchestrator::new(
        config(port),
        directory,
        Arc::new(SyntheticCapture::instant()),
        Arc::new(FixedAnswer(accept)),
        Arc::new(PacedAudioOutput),
    )
}

#[tokio::test]
async fn accepted_call_plays_identical_session_over_target_duration() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = directory(&tmp).await;
    let port = free_port().await;

    let mut callee = orchestrator(port, dir.clone(), true);
    let receiver = tokio::spawn(async move {
        let mut renderer = Capturing::default();
        let outcome = callee.answer_call(&mut renderer).await;
        (outcome, renderer.frames)
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut caller = orchestrator(port, dir, true);
    let sent = caller.place_call("alice_1").await.unwrap();

    // The synthetic source is deterministic: capturing again yields what was sent.
    let expected = SyntheticCapture::instant().capture(Duration::from_secs(5), 120).await.unwrap();
    match sent {
        CallOutcome::Delivered { frames, payload_bytes, .. } => {
            assert_eq!(frames, 150);
            assert_eq!(payload_bytes, codec::encode(&expected).unwrap().len() as u64);
        }
        other => panic!("caller: unexpected {other:?}"),
    }

    let (outcome, presented) = receiver.await.unwrap();
    let report = match outcome.unwrap() {
        CallOutcome::Played { report, .. } => report,
        other => panic!("callee: unexpected {other:?}"),
    };
    assert_eq!(presented.as_slice(), expected.frames());
    assert_eq!(presented[0].dimensions(), (54, 120));
    assert!(!report.cancelled);
    assert!(report.audio_completed);
    let secs = report.frames_elapsed.as_secs_f64();
    assert!((4.9..5.5).contains(&secs), "played over {secs:.3}s");
}

#[tokio::test]
async fn rejected_call_opens_no_transfer_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = directory(&tmp).await;
    let port = free_port().await;

    let mut callee = orchestrator(port, dir.clone(), false);
    let receiver = tokio::spawn(async move { callee.answer_call(&mut Capturing::default()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut caller = orchestrator(port, dir, true);
    let placed = tokio::spawn(async move {
        let outcome = caller.place_call("alice_1").await;
        (outcome, caller.history().to_vec())
    });

    assert_eq!(receiver.await.unwrap().unwrap(), CallOutcome::Rejected);
    // Take over the port: a transfer attempt would show up here.
    let watch = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.unwrap();

    let (outcome, history) = placed.await.unwrap();
    assert_eq!(outcome.unwrap(), CallOutcome::Rejected);
    assert!(!history.iter().any(|s| matches!(s, CallState::Accepted { .. } | CallState::Transferring { .. })));
    assert!(tokio::time::timeout(Duration::from_millis(600), watch.accept()).await.is_err());
}

#[tokio::test]
async fn truncated_header_fails_transfer_without_playback() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port().await;

    let mut callee = orchestrator(port, directory(&tmp).await, true);
    let receiver = tokio::spawn(async move {
        let mut renderer = Capturing::default();
        let outcome = callee.answer_call(&mut renderer).await;
        (outcome, renderer.frames.len(), callee.history().to_vec())
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(ring("127.0.0.1", port, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut conn = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
    conn.write_all(&[0, 0, 0, 0]).await.unwrap();
    drop(conn);

    let (outcome, presented, history) = receiver.await.unwrap();
    match outcome.unwrap_err() {
        CallError::TruncatedTransfer(Truncation::Header { received }) => assert_eq!(received, 4),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(presented, 0);
    assert!(history.iter().any(|s| matches!(s, CallState::Failed { phase: CallPhase::Transferring, .. })));
    assert!(!history.iter().any(|s| matches!(s, CallState::Playing { .. })));
}
