use std::net::SocketAddr;
use std::time::Duration;

use crate::errors::SessionError;

// MARK: - Cell

/// One glyph of a rendered frame with its 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub glyph: char,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Cell {
    pub const BLANK: Self = Self { glyph: ' ', r: 0, g: 0, b: 0 };

    pub fn new(glyph: char, r: u8, g: u8, b: u8) -> Self {
        Self { glyph, r, g, b }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::BLANK
    }
}

// MARK: - FrameGrid

/// One video frame quantized to a grid of colored glyphs.
///
/// Cells are stored row-major; `rows * cols == cells.len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGrid {
    rows: u16,
    cols: u16,
    cells: Vec<Cell>,
}

impl FrameGrid {
    /// Builds a grid from row-major cells.
    pub fn new(rows: u16, cols: u16, cells: Vec<Cell>) -> Result<Self, SessionError> {
        let expected = rows as usize * cols as usize;
        if cells.len() != expected {
            return Err(SessionError::CellCount { expected, actual: cells.len() });
        }
        Ok(Self { rows, cols, cells })
    }

    /// Builds a grid from nested rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Result<Self, SessionError> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.len() > u16::MAX as usize || cols > u16::MAX as usize {
            return Err(SessionError::TooLarge { rows: rows.len(), cols });
        }
        let mut cells = Vec::with_capacity(rows.len() * cols);
        for (index, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(SessionError::RaggedRow { row: index, expected: cols, actual: row.len() });
            }
            cells.extend_from_slice(row);
        }
        Ok(Self { rows: rows.len() as u16, cols: cols as u16, cells })
    }

    /// A grid of blank cells.
    pub fn blank(rows: u16, cols: u16) -> Self {
        Self { rows, cols, cells: vec![Cell::BLANK; rows as usize * cols as usize] }
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn row(&self, index: u16) -> Option<&[Cell]> {
        if index >= self.rows {
            return None;
        }
        let start = index as usize * self.cols as usize;
        Some(&self.cells[start..start + self.cols as usize])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[Cell]> {
        // chunks(0) panics, so a zero-width grid yields no rows.
        let width = (self.cols as usize).max(1);
        self.cells.chunks(width).take(if self.cols == 0 { 0 } else { self.rows as usize })
    }

    pub fn cell_mut(&mut self, row: u16, col: u16) -> Option<&mut Cell> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells.get_mut(row as usize * self.cols as usize + col as usize)
    }
}

// MARK: - Session

/// One capture unit: the rendered frames plus one mono audio buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    frames: Vec<FrameGrid>,
    source_fps: f64,
    audio: Vec<i16>,
    audio_sample_rate: u32,
}

impl Session {
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Validates and assembles a session.
    ///
    /// All frames must share the dimensions of the first one; the frame rate
    /// must be positive and finite and the sample rate non-zero.
    pub fn new(
        frames: Vec<FrameGrid>,
        source_fps: f64,
        audio: Vec<i16>,
        audio_sample_rate: u32,
    ) -> Result<Self, SessionError> {
        if !(source_fps.is_finite() && source_fps > 0.0) {
            return Err(SessionError::InvalidFrameRate(source_fps));
        }
        if audio_sample_rate == 0 {
            return Err(SessionError::InvalidSampleRate);
        }
        if let Some(first) = frames.first() {
            let dims = first.dimensions();
            if let Some((index, frame)) =
                frames.iter().enumerate().find(|(_, f)| f.dimensions() != dims)
            {
                return Err(SessionError::MismatchedFrame {
                    index,
                    expected: dims,
                    actual: frame.dimensions(),
                });
            }
        }
        Ok(Self { frames, source_fps, audio, audio_sample_rate })
    }

    pub fn frames(&self) -> &[FrameGrid] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn source_fps(&self) -> f64 {
        self.source_fps
    }

    pub fn audio(&self) -> &[i16] {
        &self.audio
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.audio_sample_rate
    }

    /// Grid dimensions shared by every frame, `None` for a frameless session.
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.frames.first().map(FrameGrid::dimensions)
    }

    pub fn audio_duration(&self) -> Duration {
        Duration::from_secs_f64(self.audio.len() as f64 / self.audio_sample_rate as f64)
    }

    /// Splits the session into frames and audio, handing ownership onward.
    pub fn into_parts(self) -> (Vec<FrameGrid>, f64, Vec<i16>, u32) {
        (self.frames, self.source_fps, self.audio, self.audio_sample_rate)
    }
}

// MARK: - Handshake tokens

/// Handshake tokens exchanged on the signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Ring,
    Accept,
    Reject,
}

impl Token {
    pub const MAX_LEN: usize = 16;

    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Ring => b"RING",
            Self::Accept => b"ACCEPT",
            Self::Reject => b"REJECT",
        }
    }

    /// Exact match only; trailing bytes or partial tokens are not tokens.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        [Self::Ring, Self::Accept, Self::Reject]
            .into_iter()
            .find(|t| t.as_bytes() == bytes)
    }

    /// True when `bytes` is a strict prefix of some token.
    pub fn is_partial(bytes: &[u8]) -> bool {
        [Self::Ring, Self::Accept, Self::Reject]
            .iter()
            .any(|t| t.as_bytes().len() > bytes.len() && t.as_bytes().starts_with(bytes))
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ring => "RING",
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
        })
    }
}

// MARK: - CallPhase

/// The step of a call attempt, used to label failures for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    LookingUp,
    Ringing,
    Waiting,
    Capturing,
    Transferring,
    Playing,
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::LookingUp => "looking up peer",
            Self::Ringing => "ringing",
            Self::Waiting => "waiting",
            Self::Capturing => "capturing",
            Self::Transferring => "transferring",
            Self::Playing => "playing",
        })
    }
}

// MARK: - CallState

/// State of one call attempt. Owned by the orchestrator, discarded once the
/// attempt resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Idle,
    Ringing { peer: SocketAddr },
    Listening { addr: SocketAddr },
    Accepted { peer: SocketAddr },
    Transferring { peer: SocketAddr },
    Playing { frames: usize },
    Rejected,
    Failed { phase: CallPhase, reason: String },
}

impl CallState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing { .. } => "ringing",
            Self::Listening { .. } => "listening",
            Self::Accepted { .. } => "accepted",
            Self::Transferring { .. } => "transferring",
            Self::Playing { .. } => "playing",
            Self::Rejected => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ringing { peer } => write!(f, "ringing {peer}"),
            Self::Listening { addr } => write!(f, "listening on {addr}"),
            Self::Accepted { peer } => write!(f, "accepted by {peer}"),
            Self::Transferring { peer } => write!(f, "transferring with {peer}"),
            Self::Playing { frames } => write!(f, "playing {frames} frames"),
            Self::Failed { phase, reason } => write!(f, "failed while {phase}: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}
