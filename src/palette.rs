use std::sync::Arc;

use crate::error::{AppError, Result};

/// Glyphs from sparsest to densest.
pub const DEFAULT_GLYPHS: &str = " .:-=+*#%@";

/// Ordered glyph lookup table used for brightness quantization.
///
/// Cloning is cheap; the glyphs are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    glyphs: Arc<[char]>,
}

impl Palette {
    pub fn new(glyphs: &str) -> Result<Self> {
        let glyphs: Arc<[char]> = glyphs.chars().collect();
        if glyphs.is_empty() {
            return Err(AppError::invalid("palette must contain at least one glyph"));
        }
        Ok(Self { glyphs })
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Glyph at `index`; indices past the end saturate to the densest glyph.
    pub fn glyph_at(&self, index: usize) -> char {
        self.glyphs[index.min(self.glyphs.len() - 1)]
    }

    pub fn emptiest(&self) -> char {
        self.glyphs[0]
    }

    pub fn fullest(&self) -> char {
        self.glyphs[self.glyphs.len() - 1]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            glyphs: DEFAULT_GLYPHS.chars().collect(),
        }
    }
}
