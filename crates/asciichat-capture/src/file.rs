//! Replays a stored session container as if it had just been captured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use asciichat_core::Session;
use asciichat_transport::codec;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::{CaptureError, SessionCapture};

#[derive(Debug, Clone)]
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionCapture for FileCapture {
    async fn probe(&self) -> Result<(), CaptureError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(CaptureError::DeviceUnavailable { device: self.path.display().to_string() }),
        }
    }

    /// Loads the stored session. Its own length and grid width are kept.
    async fn capture(&self, _duration: Duration, grid_width: u16) -> Result<Session, CaptureError> {
        self.probe().await?;
        let bytes = tokio::fs::read(&self.path).await?;
        let session = codec::decode(&bytes)?;
        if let Some((_, cols)) = session.dimensions() {
            if cols != grid_width {
                debug!("Stored session is {} columns wide (requested {})", cols, grid_width);
            }
        }
        info!("Loaded {} frames from {}", session.frame_count(), self.path.display());
        Ok(session)
    }
}
