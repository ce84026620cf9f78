//! Versioned session container carried inside a bulk transfer.
//!
//! # Layout (all integers big-endian)
//!
//! ```text
//! [0..4]    magic         "ACSN"
//! [4]       version       u8      currently 1
//! [5]       flags         u8      reserved, 0x00
//! [6..8]    rows          u16     rows per frame (0 when frame_count == 0)
//! [8..10]   cols          u16     columns per frame
//! [10..14]  frame_count   u32
//! [14..22]  source_fps    f64     IEEE-754 bits
//! [22..26]  sample_rate   u32     audio samples per second
//! [26..34]  sample_count  u64     mono i16 samples
//! [34..]    cells         frame_count × rows × cols × [glyph u8, r, g, b]
//!           audio         sample_count × i16
//! ```
//!
//! The header fully determines the container length, so a decoder rejects any
//! payload that is one byte short or one byte long.

use asciichat_core::{Cell, CodecError, FrameGrid, Session};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MAGIC: [u8; 4] = *b"ACSN";
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 34;
const CELL_SIZE: u64 = 4;
const SAMPLE_SIZE: u64 = 2;

/// Header fields of a container, readable without decoding the body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerHeader {
    pub rows: u16,
    pub cols: u16,
    pub frame_count: u32,
    pub source_fps: f64,
    pub sample_rate: u32,
    pub sample_count: u64,
}

impl ContainerHeader {
    pub fn of(session: &Session) -> Self {
        let (rows, cols) = session.dimensions().unwrap_or((0, 0));
        Self {
            rows,
            cols,
            frame_count: session.frame_count() as u32,
            source_fps: session.source_fps(),
            sample_rate: session.audio_sample_rate(),
            sample_count: session.audio().len() as u64,
        }
    }

    /// Frames must have at least one cell, otherwise the length check cannot
    /// bound `frame_count`.
    fn check_area(&self) -> Result<(), CodecError> {
        if self.frame_count > 0 && (self.rows == 0 || self.cols == 0) {
            return Err(CodecError::EmptyFrames {
                rows: self.rows,
                cols: self.cols,
                frame_count: self.frame_count,
            });
        }
        Ok(())
    }

    /// Total container length implied by the header, `None` on overflow.
    pub fn container_len(&self) -> Option<u64> {
        let cells = (self.rows as u64)
            .checked_mul(self.cols as u64)?
            .checked_mul(self.frame_count as u64)?
            .checked_mul(CELL_SIZE)?;
        let audio = self.sample_count.checked_mul(SAMPLE_SIZE)?;
        (HEADER_SIZE as u64).checked_add(cells)?.checked_add(audio)
    }

    pub fn parse(mut buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::TooShort { needed: HEADER_SIZE, available: buf.len() });
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let _flags = buf.get_u8();
        let header = Self {
            rows: buf.get_u16(),
            cols: buf.get_u16(),
            frame_count: buf.get_u32(),
            source_fps: buf.get_f64(),
            sample_rate: buf.get_u32(),
            sample_count: buf.get_u64(),
        };
        header.check_area()?;
        Ok(header)
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_slice(&MAGIC);
        out.put_u8(VERSION);
        out.put_u8(0);
        out.put_u16(self.rows);
        out.put_u16(self.cols);
        out.put_u32(self.frame_count);
        out.put_f64(self.source_fps);
        out.put_u32(self.sample_rate);
        out.put_u64(self.sample_count);
    }
}

/// Serializes a session into a self-describing container.
///
/// Fails for glyphs outside single-byte ASCII and for zero-area frames.
pub fn encode(session: &Session) -> Result<Bytes, CodecError> {
    let header = ContainerHeader::of(session);
    header.check_area()?;
    // u16 × u16 × u32 cells and a usize sample count cannot overflow u64.
    let len = header.container_len().unwrap_or(HEADER_SIZE as u64);
    let mut out = BytesMut::with_capacity(len as usize);
    header.write(&mut out);

    for frame in session.frames() {
        for cell in frame.cells() {
            if !cell.glyph.is_ascii() {
                return Err(CodecError::NonAsciiGlyph(cell.glyph));
            }
            out.put_u8(cell.glyph as u8);
            out.put_u8(cell.r);
            out.put_u8(cell.g);
            out.put_u8(cell.b);
        }
    }
    for &sample in session.audio() {
        out.put_i16(sample);
    }

    debug_assert_eq!(out.len() as u64, len);
    Ok(out.freeze())
}

/// Reconstructs a session from a complete container.
pub fn decode(payload: &[u8]) -> Result<Session, CodecError> {
    let header = ContainerHeader::parse(payload)?;
    let expected = header.container_len().unwrap_or(u64::MAX);
    if expected != payload.len() as u64 {
        return Err(CodecError::LengthMismatch { expected, actual: payload.len() as u64 });
    }

    // Past the length check every count is backed by payload bytes.
    let mut body = &payload[HEADER_SIZE..];
    let cells_per_frame = header.rows as usize * header.cols as usize;
    let max_frames = body.len() / (cells_per_frame.max(1) * CELL_SIZE as usize);
    let mut frames = Vec::with_capacity((header.frame_count as usize).min(max_frames));
    for _ in 0..header.frame_count {
        let mut cells = Vec::with_capacity(cells_per_frame);
        for _ in 0..cells_per_frame {
            let glyph = body.get_u8();
            if !glyph.is_ascii() {
                return Err(CodecError::NonAsciiGlyph(glyph as char));
            }
            cells.push(Cell::new(glyph as char, body.get_u8(), body.get_u8(), body.get_u8()));
        }
        frames.push(FrameGrid::new(header.rows, header.cols, cells)?);
    }

    let mut audio = Vec::with_capacity((header.sample_count as usize).min(body.len() / SAMPLE_SIZE as usize));
    for _ in 0..header.sample_count {
        audio.push(body.get_i16());
    }

    Ok(Session::new(frames, header.source_fps, audio, header.sample_rate)?)
}
