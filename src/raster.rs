use font8x8::UnicodeFonts;
use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::ascii::{AsciiGrid, GlyphCell};
use crate::error::{AppError, Result};

/// Side of the bitmap font cells.
const FONT_SIZE: u32 = 8;

/// Pixel size of one rendered glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellFootprint {
    pub width: u32,
    pub height: u32,
}

impl CellFootprint {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AppError::invalid(format!(
                "cell footprint must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }
}

impl Default for CellFootprint {
    /// Twice as tall as wide, undoing the row halving done while sampling.
    fn default() -> Self {
        Self {
            width: 8,
            height: 16,
        }
    }
}

/// Draws glyph grids onto pixel canvases for video output.
#[derive(Debug, Clone, Copy)]
pub struct RasterRenderer {
    footprint: CellFootprint,
    color: bool,
    foreground: Rgb<u8>,
    background: Rgb<u8>,
}

impl RasterRenderer {
    pub fn new(footprint: CellFootprint, color: bool) -> Self {
        Self {
            footprint,
            color,
            foreground: Rgb([255, 255, 255]),
            background: Rgb([0, 0, 0]),
        }
    }

    pub fn with_foreground(mut self, foreground: Rgb<u8>) -> Self {
        self.foreground = foreground;
        self
    }

    pub fn with_background(mut self, background: Rgb<u8>) -> Self {
        self.background = background;
        self
    }

    pub fn footprint(&self) -> CellFootprint {
        self.footprint
    }

    pub fn canvas_size(&self, columns: u32, rows: u32) -> Result<(u32, u32)> {
        let width = columns.checked_mul(self.footprint.width);
        let height = rows.checked_mul(self.footprint.height);
        match (width, height) {
            (Some(width), Some(height)) => Ok((width, height)),
            _ => Err(AppError::invalid(format!(
                "canvas for a {columns}x{rows} grid overflows"
            ))),
        }
    }

    pub fn render(&self, grid: &AsciiGrid) -> Result<RgbImage> {
        let (width, height) = self.canvas_size(grid.width(), grid.height())?;
        let stride = width as usize * 3;
        let band_size = stride * self.footprint.height as usize;
        let columns = grid.width() as usize;

        let mut data: Vec<u8> = self
            .background
            .0
            .iter()
            .copied()
            .cycle()
            .take(stride * height as usize)
            .collect();

        if band_size > 0 {
            data.par_chunks_exact_mut(band_size)
                .enumerate()
                .for_each(|(row, band)| {
                    let cells = &grid.cells()[row * columns..(row + 1) * columns];
                    for (column, cell) in cells.iter().enumerate() {
                        self.draw_cell(band, stride, column, cell);
                    }
                });
        }

        RgbImage::from_raw(width, height, data).ok_or_else(|| {
            AppError::InvalidFrame(format!("canvas buffer does not fit {width}x{height}"))
        })
    }

    fn draw_cell(&self, band: &mut [u8], stride: usize, column: usize, cell: &GlyphCell) {
        let bitmap = glyph_bitmap(cell.glyph);
        let ink = if self.color { cell.color } else { self.foreground };
        let CellFootprint { width, height } = self.footprint;
        let x0 = column * width as usize;

        for cy in 0..height {
            let bits = bitmap[(cy * FONT_SIZE / height) as usize];
            if bits == 0 {
                continue;
            }
            let line = cy as usize * stride;
            for cx in 0..width {
                if (bits >> (cx * FONT_SIZE / width)) & 1 == 1 {
                    let at = line + (x0 + cx as usize) * 3;
                    band[at..at + 3].copy_from_slice(&ink.0);
                }
            }
        }
    }
}

/// 8x8 bitmap for `ch`, bit 0 of each row is the leftmost pixel.
fn glyph_bitmap(ch: char) -> [u8; 8] {
    font8x8::BASIC_FONTS
        .get(ch)
        .or_else(|| font8x8::LATIN_FONTS.get(ch))
        .or_else(|| font8x8::BLOCK_FONTS.get(ch))
        .or_else(|| font8x8::BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}
