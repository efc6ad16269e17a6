//! Turns videos into glyph art: either a colored text transcript with one
//! block per frame, or a re-encoded video whose frames are drawn from glyphs.
//!
//! ```no_run
//! use ascii_video::pipeline::{ConvertOptions, Converter};
//! use ascii_video::video::FfmpegSource;
//! use std::path::Path;
//!
//! # fn main() -> ascii_video::error::Result<()> {
//! let converter = Converter::new(&ConvertOptions::default())?;
//! let mut source = FfmpegSource::open(Path::new("clip.mp4"))?;
//! converter.to_text(&mut source, &mut std::io::stdout())?;
//! # Ok(())
//! # }
//! ```

pub mod ascii;
pub mod cli;
pub mod encoder;
pub mod error;
pub mod palette;
pub mod pipeline;
pub mod raster;
pub mod sample;
pub mod source;
pub mod text;
pub mod video;
