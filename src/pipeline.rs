use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::ascii::{AsciiGrid, GlyphMapper};
use crate::encoder::{FrameEncoder, FrameSelector, SinkOpener, SkipPolicy, resolve_frame_rate};
use crate::error::{AppError, Result};
use crate::palette::{DEFAULT_GLYPHS, Palette};
use crate::raster::{CellFootprint, RasterRenderer};
use crate::sample::{FrameSampler, RawFrame};
use crate::source::FrameSource;
use crate::text::TextRenderer;
use crate::video::{self, FfmpegOpener, FfmpegSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Text,
    Video,
}

/// Unvalidated conversion settings; [`Converter::new`] checks them.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Glyph columns per frame.
    pub width: u32,
    /// Gain applied to brightness before quantization.
    pub brightness: f32,
    pub color: bool,
    /// Glyphs from sparsest to densest.
    pub charset: String,
    pub cell_width: u32,
    pub cell_height: u32,
    pub foreground: Rgb<u8>,
    pub background: Rgb<u8>,
    /// Keep every Nth source frame.
    pub every: usize,
    /// Overrides the source frame rate in video mode.
    pub fps: Option<f64>,
    /// Frames rendered concurrently in video mode.
    pub jobs: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        let footprint = CellFootprint::default();
        Self {
            width: 80,
            brightness: 1.0,
            color: true,
            charset: DEFAULT_GLYPHS.to_string(),
            cell_width: footprint.width,
            cell_height: footprint.height,
            foreground: Rgb([255, 255, 255]),
            background: Rgb([0, 0, 0]),
            every: 1,
            fps: None,
            jobs: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: OutputMode,
    pub options: ConvertOptions,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionStats {
    pub frames_read: usize,
    pub frames_written: usize,
    /// Output frame rate, video mode only.
    pub fps: Option<f64>,
    /// Output frame size, video mode only.
    pub canvas: Option<(u32, u32)>,
    pub cancelled: bool,
}

/// Shared flag that stops a running conversion before its next frame read.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct DriveOutcome {
    frames_read: usize,
    frames_written: usize,
    cancelled: bool,
}

/// Validated frame pipeline: sample, map, then render as text or pixels.
pub struct Converter {
    sampler: FrameSampler,
    mapper: GlyphMapper,
    text: TextRenderer,
    raster: RasterRenderer,
    selector: Box<dyn FrameSelector>,
    fps: Option<f64>,
    jobs: usize,
    cancel: CancelToken,
}

impl Converter {
    pub fn new(options: &ConvertOptions) -> Result<Self> {
        let sampler = FrameSampler::new(options.width)?;
        let mapper = GlyphMapper::new(Palette::new(&options.charset)?, options.brightness)?;
        let footprint = CellFootprint::new(options.cell_width, options.cell_height)?;
        let selector = SkipPolicy::every_nth(options.every)?;

        if options.jobs == 0 {
            return Err(AppError::invalid("jobs must be at least 1"));
        }
        if let Some(fps) = options.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(AppError::invalid(format!(
                    "output frame rate must be positive, got {fps}"
                )));
            }
        }

        Ok(Self {
            sampler,
            mapper,
            text: TextRenderer::new(options.color),
            raster: RasterRenderer::new(footprint, options.color)
                .with_foreground(options.foreground)
                .with_background(options.background),
            selector: Box::new(selector),
            fps: options.fps,
            jobs: options.jobs,
            cancel: CancelToken::new(),
        })
    }

    /// Replaces the frame skip policy.
    pub fn with_selector(mut self, selector: impl FrameSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn grid(&self, frame: &RawFrame) -> Result<AsciiGrid> {
        let samples = self.sampler.sample(frame)?;
        Ok(self.mapper.map(&samples))
    }

    pub fn render_canvas(&self, frame: &RawFrame) -> Result<RgbImage> {
        self.raster.render(&self.grid(frame)?)
    }

    /// Appends one text block per selected frame to `sink`, flushing after each.
    pub fn to_text<S, W>(&self, source: &mut S, sink: &mut W) -> Result<ConversionStats>
    where
        S: FrameSource,
        W: Write,
    {
        let outcome = self.drive(
            source,
            1,
            |frame| self.grid(frame),
            |grid: AsciiGrid| self.text.write_frame(sink, &grid),
        )?;

        Ok(ConversionStats {
            frames_read: outcome.frames_read,
            frames_written: outcome.frames_written,
            fps: None,
            canvas: None,
            cancelled: outcome.cancelled,
        })
    }

    /// Renders selected frames to canvases and streams them into a sink from `opener`.
    pub fn to_video<S, O>(&self, source: &mut S, opener: O) -> Result<ConversionStats>
    where
        S: FrameSource,
        O: SinkOpener,
    {
        let fps = resolve_frame_rate(self.fps, source.frame_rate());
        let mut encoder = FrameEncoder::new(opener, fps);

        let outcome = self.drive(
            source,
            self.jobs,
            |frame| self.render_canvas(frame),
            |canvas: RgbImage| encoder.push(&canvas),
        )?;

        let summary = encoder.finish().map_err(|source| AppError::Aborted {
            frames_processed: outcome.frames_written,
            source: Box::new(source),
        })?;

        Ok(ConversionStats {
            frames_read: outcome.frames_read,
            frames_written: summary.frames_written,
            fps: Some(summary.fps),
            canvas: Some(summary.canvas),
            cancelled: outcome.cancelled,
        })
    }

    /// Reads frames in order, renders selected ones in batches of up to `batch`
    /// and hands the results to `write` in source order.
    fn drive<S, T, P, W>(
        &self,
        source: &mut S,
        batch: usize,
        process: P,
        mut write: W,
    ) -> Result<DriveOutcome>
    where
        S: FrameSource,
        T: Send,
        P: Fn(&RawFrame) -> Result<T> + Sync,
        W: FnMut(T) -> Result<()>,
    {
        let batch = batch.max(1);
        let mut pending: Vec<RawFrame> = Vec::with_capacity(batch);
        let mut frames_read = 0usize;
        let mut frames_written = 0usize;
        let mut cancelled = false;

        let abort = |frames_processed: usize, source: AppError| AppError::Aborted {
            frames_processed,
            source: Box::new(source),
        };

        loop {
            if self.cancel.is_cancelled() {
                log::warn!("conversion cancelled after reading {frames_read} frames");
                cancelled = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => return Err(abort(frames_written, err)),
            };

            let index = frames_read;
            frames_read += 1;
            if !self.selector.keep(index) {
                continue;
            }

            pending.push(frame);
            if pending.len() >= batch {
                flush_batch(&mut pending, &process, &mut write, &mut frames_written)
                    .map_err(|err| abort(frames_written, err))?;
            }
        }

        flush_batch(&mut pending, &process, &mut write, &mut frames_written)
            .map_err(|err| abort(frames_written, err))?;

        if frames_written == 0 {
            return Err(if cancelled {
                AppError::Cancelled
            } else if frames_read == 0 {
                AppError::EmptySource
            } else {
                AppError::NoFramesSelected { frames_read }
            });
        }

        log::info!("converted {frames_written} of {frames_read} frames");
        Ok(DriveOutcome {
            frames_read,
            frames_written,
            cancelled,
        })
    }
}

fn flush_batch<T, P, W>(
    pending: &mut Vec<RawFrame>,
    process: &P,
    write: &mut W,
    frames_written: &mut usize,
) -> Result<()>
where
    T: Send,
    P: Fn(&RawFrame) -> Result<T> + Sync,
    W: FnMut(T) -> Result<()>,
{
    let results: Vec<Result<T>> = match pending.as_slice() {
        [] => return Ok(()),
        [frame] => vec![process(frame)],
        frames => frames.par_iter().map(process).collect(),
    };
    pending.clear();

    for result in results {
        write(result?)?;
        *frames_written += 1;
    }
    Ok(())
}

/// Converts the file named by `config`, writing the output only on success.
pub fn run(config: &PipelineConfig, cancel: &CancelToken) -> Result<ConversionStats> {
    let converter = Converter::new(&config.options)?.with_cancel_token(cancel.clone());

    if !config.input.exists() {
        return Err(AppError::InputNotFound(config.input.clone()));
    }

    if !video::tools_available() {
        return Err(AppError::MissingFfmpeg);
    }

    let mut source = FfmpegSource::open(&config.input)?;
    log::info!(
        "converting {} -> {} ({:?}, {} columns)",
        config.input.display(),
        config.output.display(),
        config.mode,
        config.options.width
    );

    let stats = match config.mode {
        OutputMode::Text => {
            let dir = video::output_dir(&config.output);
            fs::create_dir_all(&dir)?;
            let temp = tempfile::Builder::new()
                .prefix(".ascii-video-")
                .suffix(".txt")
                .tempfile_in(&dir)?;

            let mut writer = BufWriter::new(temp);
            let stats = converter.to_text(&mut source, &mut writer)?;
            let temp = writer.into_inner().map_err(|e| AppError::Io(e.into_error()))?;
            temp.persist(&config.output)
                .map_err(|e| AppError::Io(e.error))?;
            stats
        }
        OutputMode::Video => converter.to_video(&mut source, FfmpegOpener::new(&config.output))?,
    };

    if stats.cancelled {
        log::warn!(
            "output {} is truncated at {} frames",
            config.output.display(),
            stats.frames_written
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::MemoryOpener;
    use crate::source::MemorySource;

    fn gray(frames: usize) -> MemorySource {
        MemorySource::new(
            (0..frames).map(|_| RawFrame::solid(64, 48, Rgb([128, 128, 128]))),
            Some(10.0),
        )
    }

    fn options(width: u32, brightness: f32) -> ConvertOptions {
        ConvertOptions {
            width,
            brightness,
            color: false,
            ..ConvertOptions::default()
        }
    }

    #[test]
    fn invalid_parameters_fail_before_conversion() {
        for (width, brightness) in [(0, 1.0), (8, 0.0), (8, -2.0)] {
            assert!(matches!(
                Converter::new(&options(width, brightness)),
                Err(AppError::InvalidParameter(_))
            ));
        }

        let mut bad_jobs = options(8, 1.0);
        bad_jobs.jobs = 0;
        assert!(matches!(
            Converter::new(&bad_jobs),
            Err(AppError::InvalidParameter(_))
        ));
    }

    #[test]
    fn skip_policy_omits_frames_from_text() {
        let mut opts = options(8, 1.0);
        opts.every = 3;
        let converter = Converter::new(&opts).unwrap();
        let mut sink = Vec::new();

        let stats = converter.to_text(&mut gray(10), &mut sink).unwrap();

        assert_eq!(stats.frames_read, 10);
        assert_eq!(stats.frames_written, 3);
        let text = String::from_utf8(sink).unwrap();
        assert_eq!(text.matches("\n\n").count(), 3);
    }

    #[test]
    fn text_sink_is_flushed_once_per_frame() {
        #[derive(Default)]
        struct Flushes {
            bytes: Vec<u8>,
            flushed_at: Vec<usize>,
        }

        impl Write for Flushes {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.bytes.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                self.flushed_at.push(self.bytes.len());
                Ok(())
            }
        }

        let converter = Converter::new(&options(8, 1.0)).unwrap();
        let mut sink = Flushes::default();

        converter.to_text(&mut gray(3), &mut sink).unwrap();

        // 3 rows of 8 glyphs, row breaks and the blank separator
        let block = 3 * 8 + 2 + 2;
        assert_eq!(sink.flushed_at, vec![block, 2 * block, 3 * block]);
    }

    #[test]
    fn selecting_nothing_is_reported() {
        let converter = Converter::new(&options(8, 1.0))
            .unwrap()
            .with_selector(|_: usize| false);

        let err = converter.to_text(&mut gray(4), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::NoFramesSelected { frames_read: 4 }));
    }

    #[test]
    fn cancelled_conversion_keeps_written_frames() {
        struct CancelAfter {
            inner: MemorySource,
            token: CancelToken,
            after: usize,
            served: usize,
        }

        impl FrameSource for CancelAfter {
            fn frame_rate(&self) -> Option<f64> {
                self.inner.frame_rate()
            }

            fn next_frame(&mut self) -> Result<Option<RawFrame>> {
                self.served += 1;
                if self.served == self.after {
                    self.token.cancel();
                }
                self.inner.next_frame()
            }
        }

        let token = CancelToken::new();
        let converter = Converter::new(&options(8, 1.0))
            .unwrap()
            .with_cancel_token(token.clone());
        let mut source = CancelAfter {
            inner: gray(10),
            token,
            after: 4,
            served: 0,
        };
        let opener = MemoryOpener::new();

        let stats = converter.to_video(&mut source, opener.clone()).unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.frames_written, 4);
        let recording = opener.recording();
        assert_eq!(recording.frames.len(), 4);
        assert!(recording.finished);
    }

    #[test]
    fn cancel_before_first_frame_is_an_error() {
        let token = CancelToken::new();
        token.cancel();
        let converter = Converter::new(&options(8, 1.0))
            .unwrap()
            .with_cancel_token(token);

        let err = converter.to_text(&mut gray(3), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[test]
    fn batched_rendering_preserves_source_order() {
        let frames = (0..9u8).map(|i| RawFrame::solid(32, 32, Rgb([i * 28, i * 28, i * 28])));
        let mut source = MemorySource::new(frames, Some(30.0));
        let mut opts = options(4, 1.0);
        opts.jobs = 4;
        opts.color = true;
        let converter = Converter::new(&opts).unwrap();
        let opener = MemoryOpener::new();

        converter.to_video(&mut source, opener.clone()).unwrap();

        let recording = opener.recording();
        let brightest: Vec<u8> = recording
            .frames
            .iter()
            .map(|canvas| canvas.pixels().map(|px| px[0]).max().unwrap_or(0))
            .collect();
        let mut sorted = brightest.clone();
        sorted.sort_unstable();
        assert_eq!(brightest, sorted);
        assert_eq!(recording.frames.len(), 9);
    }

    #[test]
    fn decode_failure_aborts_with_progress() {
        struct Failing {
            served: usize,
        }

        impl FrameSource for Failing {
            fn frame_rate(&self) -> Option<f64> {
                None
            }

            fn next_frame(&mut self) -> Result<Option<RawFrame>> {
                self.served += 1;
                if self.served > 2 {
                    return Err(AppError::InvalidFrame("corrupt packet".to_string()));
                }
                Ok(Some(RawFrame::solid(16, 16, Rgb([90, 90, 90]))))
            }
        }

        let converter = Converter::new(&options(4, 1.0)).unwrap();
        let err = converter
            .to_text(&mut Failing { served: 0 }, &mut Vec::new())
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Aborted {
                frames_processed: 2,
                ..
            }
        ));
        assert!(matches!(err.root(), AppError::InvalidFrame(_)));
    }
}
