use std::ops::Range;

use image::{Rgb, RgbImage};

use crate::error::{AppError, Result};

/// Glyphs are roughly twice as tall as wide, so rows are halved.
pub const ASPECT_CORRECTION: u64 = 2;

/// Channel layout of decoded pixel bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// One decoded video frame, normalized to RGB.
#[derive(Debug, Clone)]
pub struct RawFrame {
    image: RgbImage,
}

impl RawFrame {
    pub fn from_bytes(
        width: u32,
        height: u32,
        order: ChannelOrder,
        mut data: Vec<u8>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(AppError::InvalidFrame(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                data.len()
            )));
        }

        if order == ChannelOrder::Bgr {
            data.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
        }

        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            AppError::InvalidFrame(format!("cannot wrap {width}x{height} buffer"))
        })?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn solid(width: u32, height: u32, color: Rgb<u8>) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, color),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Averaged color and normalized brightness of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub color: Rgb<u8>,
    pub brightness: f32,
}

impl Sample {
    pub fn from_color(color: Rgb<u8>) -> Self {
        Self {
            color,
            brightness: f32::from(luma(color)) / 255.0,
        }
    }
}

/// Downsampled frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSample {
    width: u32,
    height: u32,
    cells: Vec<Sample>,
}

impl GridSample {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> &[Sample] {
        &self.cells
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&Sample> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get((y * self.width + x) as usize)
    }
}

/// BT.601 luma with integer rounding.
pub fn luma(color: Rgb<u8>) -> u8 {
    let [r, g, b] = color.0;
    let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
    ((weighted + 500) / 1000) as u8
}

/// Grid size for a frame at `columns` glyphs per row, never less than one row.
pub fn grid_dimensions(frame_width: u32, frame_height: u32, columns: u32) -> Result<(u32, u32)> {
    if columns == 0 {
        return Err(AppError::invalid("grid width must be a positive integer"));
    }
    if frame_width == 0 || frame_height == 0 {
        return Err(AppError::InvalidFrame(format!(
            "frame has zero extent ({frame_width}x{frame_height})"
        )));
    }

    let rows = u64::from(frame_height) * u64::from(columns)
        / u64::from(frame_width)
        / ASPECT_CORRECTION;
    let rows = rows.clamp(1, u64::from(u32::MAX)) as u32;
    Ok((columns, rows))
}

/// Downsamples frames to a fixed number of glyph columns.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    columns: u32,
}

impl FrameSampler {
    pub fn new(columns: u32) -> Result<Self> {
        if columns == 0 {
            return Err(AppError::invalid("grid width must be a positive integer"));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Area-resamples `frame` to the grid; every cell averages at least one pixel.
    pub fn sample(&self, frame: &RawFrame) -> Result<GridSample> {
        let (width, height) = grid_dimensions(frame.width(), frame.height(), self.columns)?;
        let image = frame.image();

        let x_spans = spans(image.width(), width);
        let y_spans = spans(image.height(), height);

        let cells = y_spans
            .iter()
            .flat_map(|ys| {
                x_spans.iter().map(move |xs| {
                    Sample::from_color(average_color(image, xs.clone(), ys.clone()))
                })
            })
            .collect();

        Ok(GridSample {
            width,
            height,
            cells,
        })
    }
}

fn spans(source: u32, cells: u32) -> Vec<Range<u32>> {
    let source = u64::from(source);
    let cells = u64::from(cells);
    (0..cells)
        .map(|i| {
            let start = (i * source / cells).min(source - 1);
            let end = ((i + 1) * source / cells).max(start + 1);
            start as u32..end as u32
        })
        .collect()
}

fn average_color(image: &RgbImage, xs: Range<u32>, ys: Range<u32>) -> Rgb<u8> {
    let mut sum = [0u64; 3];
    let mut count: u64 = 0;

    for y in ys {
        for x in xs.clone() {
            let px = image.get_pixel(x, y);
            sum[0] += u64::from(px[0]);
            sum[1] += u64::from(px[1]);
            sum[2] += u64::from(px[2]);
            count += 1;
        }
    }

    if count == 0 {
        return Rgb([0, 0, 0]);
    }
    Rgb(sum.map(|channel| ((channel + count / 2) / count) as u8))
}
