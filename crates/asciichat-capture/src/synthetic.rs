//! Deviceless camera and microphone.
//!
//! Renders a moving test pattern at a fixed frame rate while a separate input
//! task produces a sine tone in 20 ms chunks, the way a device callback would.

use std::f64::consts::TAU;
use std::time::Duration;

use asciichat_core::Session;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::quantize::{quantize, RgbFrame};
use crate::{CaptureError, SessionCapture};

/// Audio chunks per second delivered by the input task.
const CHUNKS_PER_SEC: u32 = 50;

#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: f64,
    pub tone_hz: f64,
    pub sample_rate: u32,
    /// Pace frames and audio in wall-clock time like a real device.
    pub realtime: bool,
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self {
            frame_width: 320,
            frame_height: 240,
            fps: 30.0,
            tone_hz: 440.0,
            sample_rate: Session::DEFAULT_SAMPLE_RATE,
            realtime: true,
        }
    }
}

impl SyntheticCapture {
    /// Produces everything at once, without pacing.
    pub fn instant() -> Self {
        Self { realtime: false, ..Self::default() }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Test pattern for frame `index`: a scrolling color gradient with a bright
    /// square bouncing across it.
    pub fn render(&self, index: usize) -> RgbFrame {
        let (w, h) = (self.frame_width.max(1), self.frame_height.max(1));
        let side = (w.min(h) / 4).max(1);
        let travel = (w - side.min(w)).max(1);
        let step = (index as u32).wrapping_mul(4) % (2 * travel);
        let sq_x = if step < travel { step } else { 2 * travel - step };
        let sq_y = (h - side.min(h)) / 2;

        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                if (sq_x..sq_x + side).contains(&x) && (sq_y..sq_y + side).contains(&y) {
                    data.extend_from_slice(&[250, 250, 240]);
                } else {
                    let r = ((x * 255 / w) as usize + index * 3) % 256;
                    let g = (y * 255 / h) as usize;
                    data.extend_from_slice(&[r as u8, g as u8, 96]);
                }
            }
        }
        RgbFrame { width: w, height: h, data }
    }

    fn pace(&self, period: Duration) -> Option<tokio::time::Interval> {
        self.realtime.then(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            ticker
        })
    }
}

#[async_trait]
impl SessionCapture for SyntheticCapture {
    async fn probe(&self) -> Result<(), CaptureError> {
        if self.fps.is_finite() && self.fps > 0.0 && self.sample_rate > 0 {
            Ok(())
        } else {
            Err(CaptureError::DeviceUnavailable { device: "synthetic camera (bad fps or sample rate)".into() })
        }
    }

    async fn capture(&self, duration: Duration, grid_width: u16) -> Result<Session, CaptureError> {
        self.probe().await?;
        let frame_total = (duration.as_secs_f64() * self.fps).round() as usize;
        let sample_total = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        info!(
            "Capturing {:.1}s: {} frames @ {} fps, {} samples @ {} Hz",
            duration.as_secs_f64(),
            frame_total,
            self.fps,
            sample_total,
            self.sample_rate
        );

        // Audio input runs on its own task and hands over chunks as they fill.
        let (tx, mut rx) = mpsc::channel::<Vec<i16>>(CHUNKS_PER_SEC as usize);
        let chunk_len = (self.sample_rate / CHUNKS_PER_SEC).max(1) as usize;
        let mut ticker = self.pace(Duration::from_secs(1) / CHUNKS_PER_SEC);
        let (tone_hz, rate) = (self.tone_hz, self.sample_rate as f64);
        let input = tokio::spawn(async move {
            let mut produced = 0;
            while produced < sample_total {
                if let Some(t) = ticker.as_mut() {
                    t.tick().await;
                }
                let end = (produced + chunk_len).min(sample_total);
                let chunk = (produced..end)
                    .map(|n| ((TAU * tone_hz * n as f64 / rate).sin() * 0.3 * i16::MAX as f64) as i16)
                    .collect();
                if tx.send(chunk).await.is_err() {
                    break;
                }
                produced = end;
            }
        });

        let mut frames = Vec::with_capacity(frame_total);
        let mut ticker = self.pace(Duration::from_secs_f64(1.0 / self.fps));
        for i in 0..frame_total {
            if let Some(t) = ticker.as_mut() {
                t.tick().await;
            }
            frames.push(quantize(&self.render(i), grid_width));
        }
        debug!("Captured {} frames", frames.len());

        let mut audio = Vec::with_capacity(sample_total);
        while let Some(chunk) = rx.recv().await {
            audio.extend_from_slice(&chunk);
        }
        input.await.map_err(|e| CaptureError::Failed(format!("audio input task: {e}")))?;

        Ok(Session::new(frames, self.fps, audio, self.sample_rate)?)
    }
}
