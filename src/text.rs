use std::io::Write;

use crate::ascii::AsciiGrid;
use crate::error::Result;

const RESET: &str = "\x1b[0m";

/// Serializes grids as transcript blocks, one line per row.
#[derive(Debug, Clone, Copy)]
pub struct TextRenderer {
    color: bool,
}

impl TextRenderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Frame text followed by the blank line that separates frames.
    pub fn render(&self, grid: &AsciiGrid) -> String {
        // color directive, glyph and reset
        let per_cell = if self.color { 28 } else { 4 };
        let mut out =
            String::with_capacity(grid.cells().len() * per_cell + grid.height() as usize + 1);

        for (row_index, row) in grid.rows().enumerate() {
            if row_index > 0 {
                out.push('\n');
            }
            for cell in row {
                if self.color {
                    let [r, g, b] = cell.color.0;
                    out.push_str(&format!("\x1b[38;2;{r};{g};{b}m"));
                    out.push(cell.glyph);
                    out.push_str(RESET);
                } else {
                    out.push(cell.glyph);
                }
            }
        }

        out.push_str("\n\n");
        out
    }

    /// Appends one frame to `sink` and flushes it.
    pub fn write_frame<W: Write>(&self, sink: &mut W, grid: &AsciiGrid) -> Result<()> {
        sink.write_all(self.render(grid).as_bytes())?;
        sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::ascii::GlyphMapper;
    use crate::palette::Palette;
    use crate::sample::{FrameSampler, RawFrame};

    fn grid_for(color: Rgb<u8>, width: u32, height: u32, columns: u32) -> AsciiGrid {
        let frame = RawFrame::solid(width, height, color);
        let samples = FrameSampler::new(columns).unwrap().sample(&frame).unwrap();
        GlyphMapper::new(Palette::default(), 1.0).unwrap().map(&samples)
    }

    #[test]
    fn plain_block_has_one_line_per_row_and_blank_separator() {
        let grid = grid_for(Rgb([255, 255, 255]), 40, 40, 4);
        let text = TextRenderer::new(false).render(&grid);

        assert_eq!(text, "@@@@\n@@@@\n\n");
    }

    #[test]
    fn colored_cells_reset_after_every_glyph() {
        let grid = grid_for(Rgb([255, 0, 0]), 2, 4, 1);
        let text = TextRenderer::new(true).render(&grid);

        // red luma 76 -> index 2
        assert_eq!(text, "\x1b[38;2;255;0;0m:\x1b[0m\n\n");
    }

    #[test]
    fn every_colored_glyph_carries_its_own_directive() {
        let grid = grid_for(Rgb([0, 0, 255]), 4, 4, 2);
        let text = TextRenderer::new(true).render(&grid);

        // blue luma 29 -> index 1
        let cell = "\x1b[38;2;0;0;255m.\x1b[0m";
        assert_eq!(text, format!("{cell}{cell}\n\n"));
    }

    #[test]
    fn write_frame_appends_to_sink() {
        let grid = grid_for(Rgb([0, 0, 0]), 8, 8, 2);
        let renderer = TextRenderer::new(false);
        let mut sink = Vec::new();

        renderer.write_frame(&mut sink, &grid).unwrap();
        renderer.write_frame(&mut sink, &grid).unwrap();

        assert_eq!(String::from_utf8(sink).unwrap(), "  \n\n  \n\n");
    }
}
