//! asciichat-capture — produces the session a caller sends.
//!
//! # Sources
//!
//! | Source | Frames | Audio |
//! |--------|--------|-------|
//! | [`SyntheticCapture`] | animated test pattern, quantized | generated tone |
//! | [`FileCapture`] | stored session container | stored audio |
//! | `DeviceCapture` (`device-capture`) | webcam via GStreamer | default microphone via cpal |
//!
//! ```text
//! frame source ──► RgbFrame ──► quantize() ──► FrameGrid ─┐
//!                                                         ├──► Session
//! audio input task ──► mpsc chunks ──► Vec<i16> ──────────┘
//! ```

use std::time::Duration;

use asciichat_core::{CodecError, Session, SessionError};
use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "device-capture")]
pub mod device;
pub mod file;
pub mod quantize;
pub mod synthetic;

#[cfg(feature = "device-capture")]
pub use device::DeviceCapture;
pub use file::FileCapture;
pub use quantize::{quantize, RgbFrame, PALETTE};
pub use synthetic::SyntheticCapture;

// ── SessionCapture ────────────────────────────────────────────────────────────

/// Records one session: frames quantized to `grid_width` columns plus audio.
#[async_trait]
pub trait SessionCapture: Send + Sync {
    /// Checks the devices are present. Called before any network activity.
    async fn probe(&self) -> Result<(), CaptureError>;

    async fn capture(&self, duration: Duration, grid_width: u16) -> Result<Session, CaptureError>;
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {device}")]
    DeviceUnavailable { device: String },

    #[error("Capture failed: {0}")]
    Failed(String),

    #[error("Stored session unreadable: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid session: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
