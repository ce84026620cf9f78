//! Webcam and microphone capture.
//!
//! ```text
//! autovideosrc ──► videoconvert ──► videoscale ──► video/x-raw,format=RGB
//!                                                          │
//!                                                       appsink ──► tokio channel ──► quantize()
//!
//! cpal default input ──► callback ──► std channel ──► downmix ──► Vec<i16>   (blocking thread)
//! ```
//!
//! Both devices run for the same wall-clock duration. The session's frame
//! rate is whatever the camera actually delivered, and its sample rate is the
//! microphone's native rate.

use std::time::Duration;

use asciichat_core::Session;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::quantize::{quantize, RgbFrame};
use crate::{CaptureError, SessionCapture};

#[derive(Debug, Clone)]
pub struct DeviceCapture {
    /// GStreamer source element description for the camera.
    pub video_source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
}

impl Default for DeviceCapture {
    fn default() -> Self {
        Self { video_source: "autovideosrc".into(), frame_width: 640, frame_height: 480, fps: 30 }
    }
}

fn unavailable(device: impl Into<String>) -> CaptureError {
    CaptureError::DeviceUnavailable { device: device.into() }
}

impl DeviceCapture {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.video_source = source.into();
        self
    }

    fn pipeline_description(&self) -> String {
        format!(
            "{src} ! videoconvert ! videoscale ! videorate \
             ! video/x-raw,format=RGB,width={w},height={h},framerate={fps}/1 \
             ! appsink name=sink max-buffers=4 drop=true sync=false emit-signals=false",
            src = self.video_source,
            w = self.frame_width,
            h = self.frame_height,
            fps = self.fps,
        )
    }

    fn start_camera(&self) -> Result<(gst::Pipeline, mpsc::Receiver<RgbFrame>), CaptureError> {
        let desc = self.pipeline_description();
        debug!("GStreamer pipeline: {}", desc);

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| unavailable(format!("camera: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Failed("expected a pipeline element".into()))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<AppSink>().ok())
            .ok_or_else(|| CaptureError::Failed("appsink missing from pipeline".into()))?;

        let (tx, rx) = mpsc::channel::<RgbFrame>(8);
        let (w, h) = (self.frame_width, self.frame_height);
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let frame = packed_rgb(map.as_slice(), w, h).ok_or(gst::FlowError::Error)?;
                    if tx.blocking_send(frame).is_err() {
                        return Err(gst::FlowError::Flushing);
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| unavailable(format!("camera: {e}")))?;
        Ok((pipeline, rx))
    }
}

/// First error the pipeline posted, if any.
fn pipeline_error(pipeline: &gst::Pipeline) -> Option<String> {
    let msg = pipeline.bus()?.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(e) => Some(e.error().to_string()),
        _ => None,
    }
}

/// Strips GStreamer's 4-byte row alignment from an RGB buffer.
fn packed_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbFrame> {
    if width == 0 || height == 0 {
        return None;
    }
    let row = width as usize * 3;
    let stride = (row + 3) & !3;
    if data.len() < stride * (height as usize - 1) + row {
        return None;
    }
    let mut packed = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        packed.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    RgbFrame::new(width, height, packed)
}

/// Averages interleaved channels into one.
fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
        .collect()
}

/// Records the default input device for `duration`. Blocks the calling thread.
fn record_microphone(duration: Duration) -> Result<(Vec<i16>, u32), CaptureError> {
    let device = cpal::default_host().default_input_device().ok_or_else(|| unavailable("microphone"))?;
    let supported = device
        .default_input_config()
        .map_err(|e| unavailable(format!("microphone: {e}")))?;
    let rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();
    let on_error = |err: cpal::StreamError| warn!("Microphone stream error: {}", err);

    let (tx, rx) = std::sync::mpsc::channel::<Vec<i16>>();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(downmix(data, channels));
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> =
                    data.iter().map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).collect();
                let _ = tx.send(downmix(&samples, channels));
            },
            on_error,
            None,
        ),
        other => return Err(unavailable(format!("microphone: unsupported sample format {other:?}"))),
    }
    .map_err(|e| unavailable(format!("microphone: {e}")))?;

    stream.play().map_err(|e| CaptureError::Failed(format!("microphone: {e}")))?;
    std::thread::sleep(duration);
    // Dropping the stream drops the callback's sender and closes the channel.
    drop(stream);

    let audio: Vec<i16> = rx.into_iter().flatten().collect();
    debug!("Recorded {} samples @ {} Hz", audio.len(), rate);
    Ok((audio, rate))
}

#[async_trait]
impl SessionCapture for DeviceCapture {
    async fn probe(&self) -> Result<(), CaptureError> {
        gst::init().map_err(|e| unavailable(format!("camera: {e}")))?;
        let monitor = gst::DeviceMonitor::new();
        if monitor.add_filter(Some("Video/Source"), None).is_none() {
            return Err(CaptureError::Failed("cannot monitor video sources".into()));
        }
        monitor.start().map_err(|e| unavailable(format!("camera: {e}")))?;
        let camera = monitor.devices().into_iter().next();
        monitor.stop();
        let camera = camera.ok_or_else(|| unavailable("camera"))?;

        let host = cpal::default_host();
        let microphone = host.default_input_device().ok_or_else(|| unavailable("microphone"))?;
        info!(
            "Capture devices: camera {}, microphone {}",
            camera.display_name(),
            microphone.name().unwrap_or_else(|_| "(unnamed)".into())
        );
        Ok(())
    }

    async fn capture(&self, duration: Duration, grid_width: u16) -> Result<Session, CaptureError> {
        gst::init().map_err(|e| unavailable(format!("camera: {e}")))?;
        info!("Recording {:.1}s from camera and microphone", duration.as_secs_f64());

        let microphone = tokio::task::spawn_blocking(move || record_microphone(duration));
        let (pipeline, mut rx) = self.start_camera()?;

        let deadline = tokio::time::Instant::now() + duration;
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            frames.push(quantize(&frame, grid_width));
        }
        // Release a streaming thread blocked on a full channel before stopping.
        drop(rx);
        let camera_error = pipeline_error(&pipeline);
        if let Err(e) = pipeline.set_state(gst::State::Null) {
            warn!("Stopping camera pipeline: {}", e);
        }

        let (audio, sample_rate) = microphone
            .await
            .map_err(|e| CaptureError::Failed(format!("microphone task: {e}")))??;

        if frames.is_empty() {
            return Err(unavailable(format!(
                "camera: {}",
                camera_error.unwrap_or_else(|| "no frames delivered".into())
            )));
        }
        let fps = frames.len() as f64 / duration.as_secs_f64();
        info!("Recorded {} frames ({:.1} fps), {} samples", frames.len(), fps, audio.len());

        Ok(Session::new(frames, fps, audio, sample_rate)?)
    }
}
