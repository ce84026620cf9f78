use asciichat_core::FrameGrid;
use async_trait::async_trait;
use thiserror::Error;

// MARK: - Renderer trait

/// Display surface that frames are pushed to during playback.
///
/// Implementations:
/// - `TerminalRenderer`: 24-bit color glyphs in the alternate screen
/// - `NullRenderer`: discards frames (headless receivers)
#[async_trait]
pub trait Renderer: Send {
    /// Prepares the display for grids of `rows × cols` cells.
    async fn initialize(&mut self, rows: u16, cols: u16) -> Result<(), RendererError>;

    /// Shows one frame. Returns [`RendererError::DisplayClosed`] once the user
    /// has closed the display; no further frames should be presented.
    async fn present(&mut self, frame: &FrameGrid) -> Result<(), RendererError>;

    /// Releases the display.
    async fn shutdown(&mut self);
}

// MARK: - RendererError

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to initialize renderer: {0}")]
    InitializationFailed(String),

    #[error("Failed to present frame: {0}")]
    PresentFailed(String),

    #[error("Display closed by user")]
    DisplayClosed,

    #[error("Display unavailable (stdout is not a terminal)")]
    DisplaySystemUnavailable,
}

impl From<std::io::Error> for RendererError {
    fn from(e: std::io::Error) -> Self {
        Self::PresentFailed(e.to_string())
    }
}

// MARK: - NullRenderer

/// Accepts and drops every frame.
#[derive(Debug, Default)]
pub struct NullRenderer {
    presented: usize,
}

impl NullRenderer {
    pub fn presented(&self) -> usize {
        self.presented
    }
}

#[async_trait]
impl Renderer for NullRenderer {
    async fn initialize(&mut self, _rows: u16, _cols: u16) -> Result<(), RendererError> {
        Ok(())
    }
    async fn present(&mut self, _frame: &FrameGrid) -> Result<(), RendererError> {
        self.presented += 1;
        Ok(())
    }
    async fn shutdown(&mut self) {}
}
