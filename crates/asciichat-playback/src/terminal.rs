//! Terminal renderer: each cell is printed as its glyph in 24-bit color.
//!
//! Runs in the alternate screen with raw mode enabled so key presses reach us
//! unbuffered; `q`, `Esc` or `Ctrl-C` close the display.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use asciichat_core::FrameGrid;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::tty::IsTty;
use crossterm::{cursor, execute, queue, terminal};
use tracing::{debug, info};

use crate::renderer::{Renderer, RendererError};

pub struct TerminalRenderer {
    out: Stdout,
    active: bool,
    /// Reused between frames to build one write per frame.
    buf: Vec<u8>,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self { out: io::stdout(), active: false, buf: Vec::new() }
    }

    fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        execute!(self.out, ResetColor, cursor::Show, terminal::LeaveAlternateScreen)?;
        terminal::disable_raw_mode()
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

#[async_trait]
impl Renderer for TerminalRenderer {
    async fn initialize(&mut self, rows: u16, cols: u16) -> Result<(), RendererError> {
        if !self.out.is_tty() {
            return Err(RendererError::DisplaySystemUnavailable);
        }
        if let Ok((w, h)) = terminal::size() {
            if w < cols || h < rows {
                info!("Terminal is {}x{}, frames are {}x{}; output will be clipped", w, h, cols, rows);
            }
        }
        terminal::enable_raw_mode().map_err(|e| RendererError::InitializationFailed(e.to_string()))?;
        self.active = true;
        execute!(
            self.out,
            terminal::EnterAlternateScreen,
            cursor::Hide,
            SetBackgroundColor(Color::Black),
            terminal::Clear(terminal::ClearType::All)
        )
        .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;
        self.buf.reserve(rows as usize * cols as usize * 20);
        debug!("Terminal renderer ready for {}x{} grids", cols, rows);
        Ok(())
    }

    async fn present(&mut self, frame: &FrameGrid) -> Result<(), RendererError> {
        if close_requested()? {
            return Err(RendererError::DisplayClosed);
        }
        self.buf.clear();
        compose_frame(frame, &mut self.buf)?;
        self.out.write_all(&self.buf)?;
        self.out.flush()?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.restore() {
            debug!("Terminal restore failed: {}", e);
        }
    }
}

/// Drains pending input; true if any of it asks to close the display.
fn close_requested() -> io::Result<bool> {
    let mut close = false;
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            close |= is_close_key(&key);
        }
    }
    Ok(close)
}

fn is_close_key(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Writes the escape sequences for one frame, switching color only when it
/// changes between consecutive cells.
pub fn compose_frame(frame: &FrameGrid, out: &mut impl Write) -> io::Result<()> {
    let mut current: Option<(u8, u8, u8)> = None;
    for (y, row) in frame.iter_rows().enumerate() {
        queue!(out, cursor::MoveTo(0, y as u16))?;
        for cell in row {
            let rgb = (cell.r, cell.g, cell.b);
            if current != Some(rgb) {
                queue!(out, SetForegroundColor(Color::Rgb { r: cell.r, g: cell.g, b: cell.b }))?;
                current = Some(rgb);
            }
            queue!(out, Print(cell.glyph))?;
        }
    }
    Ok(())
}
