//! Fixed-duration playback.
//!
//! A session of `n` frames always plays over the same wall-clock target,
//! regardless of the rate it was captured at:
//!
//! ```text
//! rate      = n / target
//! present_i = start + (i + 1) / rate        for i in 0..n
//! ```
//!
//! The clock only sleeps toward presentation times still in the future. When
//! rendering falls behind, the remaining frames go out back to back; earlier
//! frames keep their timing and the tail is compressed.

use std::sync::Arc;
use std::time::Duration;

use asciichat_core::Session;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{spawn_playback, AudioOutput};
use crate::renderer::{Renderer, RendererError};

pub const DEFAULT_TARGET: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Target duration must be positive")]
    ZeroTarget,

    #[error("Renderer error: {0}")]
    Renderer(#[from] RendererError),
}

/// What happened during one playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    pub frames_total: usize,
    pub frames_presented: usize,
    /// Frames whose presentation time had already passed.
    pub frames_late: usize,
    /// The user closed the display before the last frame.
    pub cancelled: bool,
    /// Start of playback to the end of the frame loop.
    pub frames_elapsed: Duration,
    /// Start of playback to audio completion.
    pub total_elapsed: Duration,
    /// Audio played to completion (or there was none to play).
    pub audio_completed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    target: Duration,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self { target: DEFAULT_TARGET }
    }
}

impl PlaybackClock {
    pub fn new(target: Duration) -> Result<Self, PlaybackError> {
        if target.is_zero() {
            return Err(PlaybackError::ZeroTarget);
        }
        Ok(Self { target })
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    /// Frames per second needed to fit `frames` into the target duration.
    pub fn effective_rate(&self, frames: usize) -> f64 {
        frames as f64 / self.target.as_secs_f64()
    }

    /// Offset from start at which frame `index` of `frames` is due to end.
    pub fn presentation_offset(&self, index: usize, frames: usize) -> Duration {
        debug_assert!(index < frames);
        self.target.mul_f64((index + 1) as f64 / frames as f64)
    }

    /// Plays `session` to `renderer` while `audio` plays its buffer.
    ///
    /// Returns once every frame has been presented (or the display was
    /// closed) and the audio output has finished.
    pub async fn play(
        &self,
        session: Session,
        renderer: &mut dyn Renderer,
        audio: Arc<dyn AudioOutput>,
    ) -> Result<PlaybackReport, PlaybackError> {
        let (frames, _source_fps, samples, sample_rate) = session.into_parts();
        let n = frames.len();

        if let Some(first) = frames.first() {
            renderer.initialize(first.rows(), first.cols()).await?;
        }
        info!(
            "Playing {} frames over {:.2}s ({:.2} fps)",
            n,
            self.target.as_secs_f64(),
            self.effective_rate(n)
        );

        let start = Instant::now();
        let audio_task =
            (!samples.is_empty()).then(|| spawn_playback(audio, samples, sample_rate));

        let mut presented = 0;
        let mut late = 0;
        let mut cancelled = false;
        let mut failure = None;

        for (i, frame) in frames.iter().enumerate() {
            match renderer.present(frame).await {
                Ok(()) => presented += 1,
                Err(RendererError::DisplayClosed) => {
                    info!("Display closed; stopping playback at frame {}/{}", i, n);
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            let due = start + self.presentation_offset(i, n);
            if due > Instant::now() {
                tokio::time::sleep_until(due).await;
            } else {
                late += 1;
            }
        }

        let frames_elapsed = start.elapsed();
        if n > 0 {
            renderer.shutdown().await;
        }
        if late > 0 {
            debug!("{} of {} frames presented late", late, n);
        }

        let audio_completed = match audio_task {
            None => true,
            Some(handle) => match handle.wait().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Audio playback failed: {}", e);
                    false
                }
            },
        };

        if let Some(e) = failure {
            return Err(e.into());
        }

        Ok(PlaybackReport {
            frames_total: n,
            frames_presented: presented,
            frames_late: late,
            cancelled,
            frames_elapsed,
            total_elapsed: start.elapsed(),
            audio_completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use asciichat_core::{Cell, FrameGrid};
    use async_trait::async_trait;

    use super::*;
    use crate::audio::AudioError;

    /// Records when each frame was presented, relative to the first call.
    #[derive(Default)]
    struct Recorder {
        times: Vec<Instant>,
        glyphs: Vec<char>,
        close_at: Option<usize>,
        render_cost: Duration,
        fail_at: Option<usize>,
        shut_down: bool,
    }

    #[async_trait]
    impl Renderer for Recorder {
        async fn initialize(&mut self, _rows: u16, _cols: u16) -> Result<(), RendererError> {
            Ok(())
        }
        async fn present(&mut self, frame: &FrameGrid) -> Result<(), RendererError> {
            if self.close_at == Some(self.times.len()) {
                return Err(RendererError::DisplayClosed);
            }
            if self.fail_at == Some(self.times.len()) {
                return Err(RendererError::PresentFailed("gone".into()));
            }
            if !self.render_cost.is_zero() {
                tokio::time::sleep(self.render_cost).await;
            }
            self.times.push(Instant::now());
            self.glyphs.push(frame.cells()[0].glyph);
            Ok(())
        }
        async fn shutdown(&mut self) {
            self.shut_down = true;
        }
    }

    struct CountingAudio {
        calls: AtomicUsize,
        finished: AtomicBool,
        samples: Mutex<usize>,
    }

    impl CountingAudio {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), finished: AtomicBool::new(false), samples: Mutex::new(0) })
        }
    }

    impl AudioOutput for CountingAudio {
        fn play(&self, samples: &[i16], _rate: u32) -> Result<(), AudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            *self.samples.lock().unwrap() = samples.len();
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session(frames: usize, audio: usize) -> Session {
        let glyphs = ['a', 'b', 'c', 'd', 'e', 'f', 'g'];
        let frames = (0..frames)
            .map(|i| FrameGrid::new(1, 2, vec![Cell::new(glyphs[i % glyphs.len()], 0, 0, 0); 2]).unwrap())
            .collect();
        Session::new(frames, 30.0, vec![0; audio], 44_100).unwrap()
    }

    fn within(actual: Duration, expected: Duration, tolerance: Duration) -> bool {
        actual + tolerance >= expected && actual <= expected + tolerance
    }

    #[tokio::test(start_paused = true)]
    async fn duration_is_independent_of_frame_count() {
        let clock = PlaybackClock::default();
        for n in [1, 7, 75, 150, 600] {
            let mut r = Recorder::default();
            let report = clock.play(session(n, 0), &mut r, CountingAudio::new()).await.unwrap();
            let interval = clock.target().div_f64(n as f64);
            assert!(
                within(report.frames_elapsed, clock.target(), interval * 2),
                "n={n}: {:?}",
                report.frames_elapsed
            );
            assert_eq!(report.frames_presented, n);
            assert!(!report.cancelled);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_presented_in_order_on_schedule() {
        let clock = PlaybackClock::new(Duration::from_secs(2)).unwrap();
        let mut r = Recorder::default();
        let start = Instant::now();
        clock.play(session(4, 0), &mut r, CountingAudio::new()).await.unwrap();

        assert_eq!(r.glyphs, vec!['a', 'b', 'c', 'd']);
        // frame i is shown at the end of slot i-1
        let offsets: Vec<_> = r.times.iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_millis(500), Duration::from_millis(1000), Duration::from_millis(1500)]
        );
        assert!(r.shut_down);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_renderer_compresses_tail_without_sleeping() {
        let clock = PlaybackClock::new(Duration::from_secs(1)).unwrap();
        // 10 frames, 100ms slots, 150ms to render each: every frame is late.
        let mut r = Recorder { render_cost: Duration::from_millis(150), ..Recorder::default() };
        let report = clock.play(session(10, 0), &mut r, CountingAudio::new()).await.unwrap();

        assert_eq!(report.frames_presented, 10);
        assert_eq!(report.frames_late, 10);
        assert_eq!(report.frames_elapsed, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn display_close_stops_rendering() {
        let clock = PlaybackClock::default();
        let audio = CountingAudio::new();
        let mut r = Recorder { close_at: Some(3), ..Recorder::default() };
        let report = clock.play(session(50, 1_000), &mut r, audio.clone()).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.frames_presented, 3);
        assert_eq!(r.times.len(), 3);
        assert!(report.frames_elapsed < clock.target());
        assert_eq!(audio.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_still_plays_audio() {
        let clock = PlaybackClock::default();
        let audio = CountingAudio::new();
        let mut r = Recorder::default();
        let report = clock.play(session(0, 4_410), &mut r, audio.clone()).await.unwrap();

        assert_eq!(report.frames_total, 0);
        assert!(report.audio_completed);
        assert!(audio.finished.load(Ordering::SeqCst));
        assert_eq!(*audio.samples.lock().unwrap(), 4_410);
        assert!(!r.shut_down, "renderer is never opened for an empty session");
    }

    #[tokio::test(start_paused = true)]
    async fn no_audio_means_no_audio_task() {
        let audio = CountingAudio::new();
        let report = PlaybackClock::default()
            .play(session(5, 0), &mut Recorder::default(), audio.clone())
            .await
            .unwrap();
        assert!(report.audio_completed);
        assert_eq!(audio.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn audio_is_awaited_before_completion() {
        let audio = CountingAudio::new();
        PlaybackClock::new(Duration::from_millis(100))
            .unwrap()
            .play(session(3, 10), &mut Recorder::default(), audio.clone())
            .await
            .unwrap();
        assert!(audio.finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn render_failure_is_reported() {
        let mut r = Recorder { fail_at: Some(2), ..Recorder::default() };
        let err = PlaybackClock::default().play(session(5, 0), &mut r, CountingAudio::new()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Renderer(RendererError::PresentFailed(_))));
    }

    #[test]
    fn rate_follows_frame_count() {
        let clock = PlaybackClock::default();
        assert_eq!(clock.effective_rate(150), 30.0);
        assert_eq!(clock.effective_rate(75), 15.0);
        assert_eq!(clock.presentation_offset(149, 150), Duration::from_secs(5));
        assert!(PlaybackClock::new(Duration::ZERO).is_err());
    }
}
