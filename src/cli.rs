use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use image::Rgb;

use crate::palette::DEFAULT_GLYPHS;
use crate::pipeline::{ConvertOptions, OutputMode, PipelineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// ANSI-colored text transcript, one block per frame
    Text,
    /// MP4 video with every frame drawn as glyphs
    Video,
}

impl From<Mode> for OutputMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Text => OutputMode::Text,
            Mode::Video => OutputMode::Video,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Convert videos into colored ASCII transcripts or ASCII-rendered videos"
)]
pub struct Cli {
    /// Input video path
    pub input: PathBuf,

    /// Output path (defaults to <input-stem>_ascii.txt or _ascii.mp4)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Text)]
    pub mode: Mode,

    /// Number of glyph columns per frame
    #[arg(long, default_value_t = 80)]
    pub width: u32,

    /// Brightness gain applied before picking glyphs
    #[arg(long, default_value_t = 1.0)]
    pub brightness: f32,

    /// Disable per-glyph color
    #[arg(long)]
    pub no_color: bool,

    /// Characters from sparsest to densest
    #[arg(long, default_value = DEFAULT_GLYPHS)]
    pub charset: String,

    /// Override output framerate
    #[arg(long)]
    pub fps: Option<f64>,

    /// Only keep every Nth frame
    #[arg(long, default_value_t = 1)]
    pub every: usize,

    /// Glyph cell width in pixels (video mode)
    #[arg(long, default_value_t = 8)]
    pub cell_width: u32,

    /// Glyph cell height in pixels (video mode)
    #[arg(long, default_value_t = 16)]
    pub cell_height: u32,

    /// Glyph color when color is disabled (video mode)
    #[arg(long, value_parser = parse_hex_color, default_value = "#ffffff")]
    pub foreground: Rgb<u8>,

    /// Canvas color (video mode)
    #[arg(long, value_parser = parse_hex_color, default_value = "#000000")]
    pub background: Rgb<u8>,

    /// Frames rendered in parallel (video mode)
    #[arg(short, long, default_value_t = rayon::current_num_threads())]
    pub jobs: usize,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    pub log_level: log::LevelFilter,
}

impl Cli {
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => default_output_path(&self.input, self.mode),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            input: self.input.clone(),
            output: self.output_path(),
            mode: self.mode.into(),
            options: ConvertOptions {
                width: self.width,
                brightness: self.brightness,
                color: !self.no_color,
                charset: self.charset.clone(),
                cell_width: self.cell_width,
                cell_height: self.cell_height,
                foreground: self.foreground,
                background: self.background,
                every: self.every,
                fps: self.fps,
                jobs: self.jobs,
            },
        }
    }
}

fn default_output_path(input: &Path, mode: Mode) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = match mode {
        Mode::Text => "txt",
        Mode::Video => "mp4",
    };

    let mut output = match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    output.push(format!("{stem}_ascii.{extension}"));
    output
}

fn parse_hex_color(value: &str) -> Result<Rgb<u8>, String> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(format!("expected a #rrggbb color, got `{value}`"));
    }

    let channel = |at: usize| {
        u8::from_str_radix(&hex[at..at + 2], 16)
            .map_err(|_| format!("expected a #rrggbb color, got `{value}`"))
    };
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}
