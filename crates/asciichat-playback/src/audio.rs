//! Audio output collaborators and the fire-and-forget playback task.
//!
//! [`spawn_playback`] starts a blocking [`AudioOutput::play`] on the blocking
//! pool and returns an [`AudioHandle`]. The frame loop never looks inside the
//! task; it only awaits [`AudioHandle::wait`] once all frames are presented.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

// MARK: - AudioOutput trait

/// Plays a mono buffer, blocking the calling thread until it has finished.
pub trait AudioOutput: Send + Sync + 'static {
    fn play(&self, samples: &[i16], sample_rate: u32) -> Result<(), AudioError>;
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio task failed: {0}")]
    TaskFailed(String),
}

// MARK: - Playback task

/// Completion signal of one running playback.
pub struct AudioHandle {
    task: JoinHandle<Result<(), AudioError>>,
}

impl AudioHandle {
    /// Waits until the output has finished playing.
    pub async fn wait(self) -> Result<(), AudioError> {
        self.task.await.map_err(|e| AudioError::TaskFailed(e.to_string()))?
    }
}

/// Starts playback off the calling task. Must be called inside a tokio runtime.
pub fn spawn_playback(output: Arc<dyn AudioOutput>, samples: Vec<i16>, sample_rate: u32) -> AudioHandle {
    debug!("Starting audio playback: {} samples @ {} Hz", samples.len(), sample_rate);
    let task = tokio::task::spawn_blocking(move || output.play(&samples, sample_rate));
    AudioHandle { task }
}

// MARK: - PacedAudioOutput

/// Deviceless output: produces no sound but takes as long as the buffer would.
///
/// Keeps the end-of-playback barrier meaningful on machines without speakers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacedAudioOutput;

impl AudioOutput for PacedAudioOutput {
    fn play(&self, samples: &[i16], sample_rate: u32) -> Result<(), AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::Stream("sample rate is zero".into()));
        }
        std::thread::sleep(Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64));
        Ok(())
    }
}

// MARK: - CpalAudioOutput

/// Default output device via cpal.
#[cfg(feature = "device-audio")]
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalAudioOutput;

#[cfg(feature = "device-audio")]
impl AudioOutput for CpalAudioOutput {
    fn play(&self, samples: &[i16], sample_rate: u32) -> Result<(), AudioError> {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".into()))?;
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let data: Arc<Vec<f32>> = Arc::new(samples.iter().map(|&s| s as f32 / 32_768.0).collect());
        let position = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

        let cb_data = Arc::clone(&data);
        let cb_pos = Arc::clone(&position);
        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let start = cb_pos.load(Ordering::Relaxed);
                    let end = (start + out.len()).min(cb_data.len());
                    let n = end - start;
                    out[..n].copy_from_slice(&cb_data[start..end]);
                    out[n..].fill(0.0);
                    cb_pos.store(end, Ordering::Relaxed);
                    if end == cb_data.len() {
                        let _ = done_tx.send(());
                    }
                },
                |err| tracing::warn!("Audio playback error: {}", err),
                None,
            )
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;

        let expected = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
        if done_rx.recv_timeout(expected + Duration::from_secs(2)).is_err() {
            return Err(AudioError::Stream(format!(
                "playback stalled at sample {} of {}",
                position.load(Ordering::Relaxed),
                data.len()
            )));
        }
        // Let the device drain its last buffer before the stream is dropped.
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }
}
