use thiserror::Error;

use crate::types::CallPhase;

/// Failure of one call attempt, as reported to the operator.
///
/// Everything except [`CallError::BindFailure`] is recoverable: the attempt
/// ends and the process keeps running.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Could not connect to {peer}: {reason}")]
    ConnectFailure { peer: String, reason: String },

    #[error("Timed out after {ms}ms while {phase}")]
    Timeout { phase: CallPhase, ms: u64 },

    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("Truncated transfer: {0}")]
    TruncatedTransfer(Truncation),

    #[error("Device unavailable: {device}")]
    DeviceUnavailable { device: String },

    #[error("Cannot listen on {addr}: {reason}")]
    BindFailure { addr: String, reason: String },

    #[error("Peer '{handle}' not found in directory")]
    PeerNotFound { handle: String },

    #[error("Directory error: {reason}")]
    Directory { reason: String },

    #[error("Payload too large: {declared} bytes (limit {limit})")]
    PayloadTooLarge { declared: u64, limit: u64 },

    #[error("Playback failed: {reason}")]
    Playback { reason: String },

    #[error("Session payload invalid: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallError {
    /// Only a bind failure at receiver startup may end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BindFailure { .. })
    }

    /// Maps a transport failure, labelling timeouts with the phase they hit.
    pub fn from_transport(err: TransportError, phase: CallPhase) -> Self {
        match err {
            TransportError::ConnectFailed { addr, reason } => {
                Self::ConnectFailure { peer: addr, reason }
            }
            TransportError::BindFailed { addr, reason } => Self::BindFailure { addr, reason },
            TransportError::Truncated(t) => Self::TruncatedTransfer(t),
            TransportError::PayloadTooLarge { declared, limit } => {
                Self::PayloadTooLarge { declared, limit }
            }
            TransportError::Timeout { ms } => Self::Timeout { phase, ms },
            TransportError::Codec(e) => Self::Codec(e),
            TransportError::Io(e) => Self::Io(e),
        }
    }

    pub fn from_signaling(err: SignalingError, phase: CallPhase) -> Self {
        match err {
            SignalingError::ConnectFailed { addr, reason } => {
                Self::ConnectFailure { peer: addr, reason }
            }
            SignalingError::BindFailed { addr, reason } => Self::BindFailure { addr, reason },
            SignalingError::Timeout { ms } => Self::Timeout { phase, ms },
            SignalingError::UnexpectedToken { received } => Self::ProtocolViolation {
                reason: format!("unexpected handshake bytes {:?}", String::from_utf8_lossy(&received)),
            },
            SignalingError::Io(e) => Self::Io(e),
        }
    }
}

/// Where a bulk transfer stopped short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Connection closed before the 8-byte length prefix was complete.
    Header { received: usize },
    /// Connection closed before the declared payload length was reached.
    Payload { expected: u64, received: u64 },
}

impl std::fmt::Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header { received } => {
                write!(f, "connection closed after {received} of 8 header bytes")
            }
            Self::Payload { expected, received } => {
                write!(f, "connection closed after {received} of {expected} payload bytes")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Connection to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Cannot bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Unexpected handshake bytes: {received:?}")]
    UnexpectedToken { received: Vec<u8> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Cannot bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Truncated transfer: {0}")]
    Truncated(Truncation),

    #[error("Declared payload of {declared} bytes exceeds limit of {limit}")]
    PayloadTooLarge { declared: u64, limit: u64 },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors decoding or encoding the session container.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Bad magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u8),

    #[error("Container too short: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("Container length mismatch: header implies {expected} bytes, payload has {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("Glyph {0:?} is not a single-byte ASCII character")]
    NonAsciiGlyph(char),

    #[error("{frame_count} frames of {rows}x{cols} cells carry no data")]
    EmptyFrames { rows: u16, cols: u16, frame_count: u32 },

    #[error("Invalid session: {0}")]
    Session(#[from] SessionError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Frame {index} is {actual:?}, expected {expected:?} (rows, cols)")]
    MismatchedFrame { index: usize, expected: (u16, u16), actual: (u16, u16) },

    #[error("Row {row} has {actual} cells, expected {expected}")]
    RaggedRow { row: usize, expected: usize, actual: usize },

    #[error("Grid has {actual} cells, expected {expected}")]
    CellCount { expected: usize, actual: usize },

    #[error("Grid of {rows}x{cols} exceeds u16 dimensions")]
    TooLarge { rows: usize, cols: usize },

    #[error("Frame rate must be positive and finite, got {0}")]
    InvalidFrameRate(f64),

    #[error("Audio sample rate must be non-zero")]
    InvalidSampleRate,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },

    #[error("Environment variable {var}={value:?} is not valid")]
    BadEnv { var: String, value: String },

    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Identity file {path}: {reason}")]
    Identity { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
