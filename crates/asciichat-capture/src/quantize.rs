//! Pixel → glyph quantization.
//!
//! A captured frame is cut into a `width`-column grid of pixel blocks. Each
//! block becomes one cell: its mean color, and a glyph picked by brightness
//! from [`PALETTE`] (dark → light).

use asciichat_core::{Cell, FrameGrid};

/// Glyph ramp, densest first.
pub const PALETTE: &str =
    "@$B%8&WM#*oahkbdpqwmZO0QLCJUYXzcvunxrjft/|()1{}[]?-_+~<>i!lI;:,^`'. ";

/// Terminal cells are roughly twice as tall as wide; rows are scaled by this.
pub const CELL_ASPECT: f64 = 0.6;

/// A raw captured frame, 3 bytes per pixel (R, G, B), rows top to bottom.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbFrame {
    /// Returns `None` if `data` does not hold exactly `width × height` pixels.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() as u64 == width as u64 * height as u64 * 3).then_some(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb.iter().copied().cycle().take(width as usize * height as usize * 3).collect();
        Self { width, height, data }
    }

    #[inline]
    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Mean color of the half-open block `[x1, x2) × [y1, y2)`; black if empty.
    fn block_mean(&self, x1: u32, x2: u32, y1: u32, y2: u32) -> [u8; 3] {
        let count = (x2.saturating_sub(x1) as u64) * (y2.saturating_sub(y1) as u64);
        if count == 0 {
            return [0, 0, 0];
        }
        let mut sum = [0u64; 3];
        for y in y1..y2 {
            for x in x1..x2 {
                let p = self.pixel(x, y);
                sum[0] += p[0] as u64;
                sum[1] += p[1] as u64;
                sum[2] += p[2] as u64;
            }
        }
        [(sum[0] / count) as u8, (sum[1] / count) as u8, (sum[2] / count) as u8]
    }
}

/// Rows of the grid produced for a `width`-column quantization of `frame`.
pub fn grid_rows(frame_width: u32, frame_height: u32, width: u16) -> u16 {
    if frame_width == 0 {
        return 1;
    }
    let rows = (frame_height as f64 / frame_width as f64 * width as f64 * CELL_ASPECT).floor();
    rows.clamp(1.0, u16::MAX as f64) as u16
}

/// ITU-R BT.601 luma.
#[inline]
pub fn brightness(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) as u8
}

pub fn glyph_for(brightness: u8) -> char {
    let ramp = PALETTE.as_bytes();
    let index = (brightness as f64 / 255.0 * (ramp.len() - 1) as f64) as usize;
    ramp[index] as char
}

/// Quantizes `frame` into a grid `width` cells wide.
pub fn quantize(frame: &RgbFrame, width: u16) -> FrameGrid {
    let cols = width.max(1);
    let rows = grid_rows(frame.width, frame.height, cols);
    let block_w = frame.width as f64 / cols as f64;
    let block_h = frame.height as f64 / rows as f64;

    let mut grid = FrameGrid::blank(rows, cols);
    for y in 0..rows as u32 {
        let y1 = (y as f64 * block_h) as u32;
        let y2 = (((y + 1) as f64 * block_h) as u32).min(frame.height);
        for x in 0..cols as u32 {
            let x1 = (x as f64 * block_w) as u32;
            let x2 = (((x + 1) as f64 * block_w) as u32).min(frame.width);
            let [r, g, b] = frame.block_mean(x1, x2, y1, y2);
            if let Some(cell) = grid.cell_mut(y as u16, x as u16) {
                *cell = Cell::new(glyph_for(brightness(r, g, b)), r, g, b);
            }
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_is_printable_ascii() {
        assert_eq!(PALETTE.len(), 68);
        assert!(PALETTE.bytes().all(|b| (0x20..0x7f).contains(&b)));
        assert_eq!(glyph_for(0), '@');
        assert_eq!(glyph_for(255), ' ');
    }

    #[test]
    fn rows_follow_aspect() {
        // 640x480 at 120 columns: 480/640 × 120 × 0.6 = 54
        assert_eq!(grid_rows(640, 480, 120), 54);
        assert_eq!(grid_rows(1280, 720, 120), 40);
        // very wide frames still produce one row
        assert_eq!(grid_rows(4000, 10, 120), 1);
    }

    #[test]
    fn uniform_frame_gives_uniform_grid() {
        let frame = RgbFrame::filled(640, 480, [200, 40, 10]);
        let grid = quantize(&frame, 120);
        assert_eq!(grid.dimensions(), (54, 120));
        let expected = glyph_for(brightness(200, 40, 10));
        assert!(grid.cells().iter().all(|c| *c == Cell::new(expected, 200, 40, 10)));
    }

    #[test]
    fn black_and_white_halves() {
        let (w, h) = (40u32, 20u32);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for _y in 0..h {
            for x in 0..w {
                let v = if x < w / 2 { 0 } else { 255 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        let grid = quantize(&RgbFrame::new(w, h, data).unwrap(), 4);
        let row = grid.row(0).unwrap();
        assert_eq!(row[0].glyph, '@');
        assert_eq!(row[3].glyph, ' ');
        assert_eq!((row[3].r, row[3].g, row[3].b), (255, 255, 255));
    }

    #[test]
    fn more_columns_than_pixels_leaves_black_cells() {
        let frame = RgbFrame::filled(2, 2, [255, 255, 255]);
        let grid = quantize(&frame, 4);
        assert_eq!(grid.dimensions(), (2, 4));
        // 2 pixels over 4 columns: blocks [0,0) and [1,1) are empty
        let row = grid.row(0).unwrap();
        assert_eq!(row[0], Cell::new('@', 0, 0, 0));
        assert_eq!(row[1].glyph, ' ');
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(RgbFrame::new(2, 2, vec![0; 11]).is_none());
        assert!(RgbFrame::new(2, 2, vec![0; 12]).is_some());
    }
}
