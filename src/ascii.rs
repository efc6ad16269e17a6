use image::Rgb;

use crate::error::{AppError, Result};
use crate::palette::Palette;
use crate::sample::GridSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphCell {
    pub glyph: char,
    pub color: Rgb<u8>,
}

/// One frame worth of glyph cells, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiGrid {
    width: u32,
    height: u32,
    cells: Vec<GlyphCell>,
}

impl AsciiGrid {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> &[GlyphCell] {
        &self.cells
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&GlyphCell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get((y * self.width + x) as usize)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[GlyphCell]> {
        self.cells.chunks_exact(self.width as usize)
    }
}

/// Quantizes brightness into palette indices with a gain applied first.
#[derive(Debug, Clone)]
pub struct GlyphMapper {
    palette: Palette,
    gain: f32,
}

impl GlyphMapper {
    pub fn new(palette: Palette, gain: f32) -> Result<Self> {
        if !gain.is_finite() || gain <= 0.0 {
            return Err(AppError::invalid(format!(
                "brightness gain must be a positive number, got {gain}"
            )));
        }
        Ok(Self { palette, gain })
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn index(&self, brightness: f32) -> usize {
        let last = self.palette.len() - 1;
        // NaN saturates to 0 on the cast
        let level = (brightness * self.gain).clamp(0.0, 1.0);
        ((level * last as f32).floor() as usize).min(last)
    }

    pub fn glyph(&self, brightness: f32) -> char {
        self.palette.glyph_at(self.index(brightness))
    }

    pub fn map(&self, samples: &GridSample) -> AsciiGrid {
        let cells = samples
            .cells()
            .iter()
            .map(|sample| GlyphCell {
                glyph: self.glyph(sample.brightness),
                color: sample.color,
            })
            .collect();

        AsciiGrid {
            width: samples.width(),
            height: samples.height(),
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{FrameSampler, RawFrame};

    fn mapper(gain: f32) -> GlyphMapper {
        GlyphMapper::new(Palette::default(), gain).unwrap()
    }

    #[test]
    fn unit_gain_maps_extremes_to_palette_bounds() {
        let mapper = mapper(1.0);
        assert_eq!(mapper.glyph(0.0), ' ');
        assert_eq!(mapper.glyph(1.0), '@');
    }

    #[test]
    fn out_of_range_brightness_is_clamped() {
        let mapper = mapper(1.0);
        assert_eq!(mapper.index(-3.0), 0);
        assert_eq!(mapper.index(7.5), 9);
        assert_eq!(mapper.index(f32::NAN), 0);
    }

    #[test]
    fn mapping_is_monotonic_for_every_gain() {
        for gain in [0.25_f32, 0.5, 1.0, 1.7, 4.0] {
            let mapper = mapper(gain);
            let mut previous = 0;
            for step in 0..=1000 {
                let index = mapper.index(step as f32 / 1000.0);
                assert!(index >= previous, "gain {gain} step {step}");
                previous = index;
            }
        }
    }

    #[test]
    fn gain_shifts_indices() {
        assert_eq!(mapper(1.0).index(0.5), 4);
        assert_eq!(mapper(2.0).index(0.5), 9);
        assert_eq!(mapper(0.5).index(0.5), 2);
    }

    #[test]
    fn non_positive_gain_is_rejected() {
        for gain in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                GlyphMapper::new(Palette::default(), gain),
                Err(AppError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn single_glyph_palette_always_maps_to_it() {
        let mapper = GlyphMapper::new(Palette::new("#").unwrap(), 1.0).unwrap();
        assert_eq!(mapper.glyph(0.0), '#');
        assert_eq!(mapper.glyph(1.0), '#');
    }

    #[test]
    fn black_frame_maps_to_uniform_emptiest_glyph() {
        let frame = RawFrame::solid(40, 30, Rgb([0, 0, 0]));
        let samples = FrameSampler::new(10).unwrap().sample(&frame).unwrap();
        let grid = mapper(1.0).map(&samples);

        assert_eq!(grid.rows().count(), grid.height() as usize);
        assert!(grid.cells().iter().all(|cell| cell.glyph == ' '));
        assert!(grid.cells().iter().all(|cell| cell.color == Rgb([0, 0, 0])));
    }
}
