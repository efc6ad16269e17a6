use std::sync::{Arc, Mutex};

use image::RgbImage;

use crate::error::{AppError, Result};

/// Output frame rate when neither the caller nor the source provides one.
pub const FALLBACK_FPS: f64 = 24.0;

/// Picks the output frame rate: explicit override, then source rate, then the fallback.
pub fn resolve_frame_rate(requested: Option<f64>, source: Option<f64>) -> f64 {
    let usable = |fps: &f64| fps.is_finite() && *fps > 0.0;

    if let Some(fps) = requested.filter(usable) {
        return fps;
    }
    if let Some(fps) = source.filter(usable) {
        return fps;
    }

    log::warn!("source frame rate {source:?} is unusable, falling back to {FALLBACK_FPS} fps");
    FALLBACK_FPS
}

/// Decides which source frames (0-based index) end up in the output.
pub trait FrameSelector: Send + Sync {
    fn keep(&self, index: usize) -> bool;
}

impl<F> FrameSelector for F
where
    F: Fn(usize) -> bool + Send + Sync,
{
    fn keep(&self, index: usize) -> bool {
        self(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipPolicy {
    #[default]
    EveryFrame,
    /// Keeps the Nth, 2Nth, ... frame (1-based).
    EveryNth(usize),
}

impl SkipPolicy {
    pub fn every_nth(n: usize) -> Result<Self> {
        match n {
            0 => Err(AppError::invalid("frame skip interval must be at least 1")),
            1 => Ok(SkipPolicy::EveryFrame),
            n => Ok(SkipPolicy::EveryNth(n)),
        }
    }
}

impl FrameSelector for SkipPolicy {
    fn keep(&self, index: usize) -> bool {
        match *self {
            SkipPolicy::EveryFrame => true,
            SkipPolicy::EveryNth(n) => n <= 1 || (index + 1) % n == 0,
        }
    }
}

/// Destination for rendered canvases.
pub trait VideoSink {
    fn write_frame(&mut self, canvas: &RgbImage) -> Result<()>;

    /// Flushes and finalizes the stream.
    fn finish(self) -> Result<()>;
}

/// Creates the sink once the canvas size is known.
pub trait SinkOpener {
    type Sink: VideoSink;

    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<Self::Sink>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderPhase {
    Uninitialized,
    Streaming,
    Closed,
}

enum EncoderState<S> {
    Uninitialized,
    Streaming { sink: S, size: (u32, u32) },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeSummary {
    pub frames_written: usize,
    pub fps: f64,
    pub canvas: (u32, u32),
}

/// Streams canvases into a sink at a fixed frame rate and canvas size.
///
/// The first canvas locks the output size and opens the sink; every later
/// canvas has to match it.
pub struct FrameEncoder<O: SinkOpener> {
    opener: O,
    fps: f64,
    state: EncoderState<O::Sink>,
    frames_written: usize,
}

impl<O: SinkOpener> FrameEncoder<O> {
    pub fn new(opener: O, fps: f64) -> Self {
        Self {
            opener,
            fps,
            state: EncoderState::Uninitialized,
            frames_written: 0,
        }
    }

    pub fn phase(&self) -> EncoderPhase {
        match self.state {
            EncoderState::Uninitialized => EncoderPhase::Uninitialized,
            EncoderState::Streaming { .. } => EncoderPhase::Streaming,
            EncoderState::Closed => EncoderPhase::Closed,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        match self.state {
            EncoderState::Streaming { size, .. } => Some(size),
            _ => None,
        }
    }

    pub fn open(&mut self, width: u32, height: u32) -> Result<()> {
        if !matches!(self.state, EncoderState::Uninitialized) {
            return Err(AppError::EncodingFailure(
                "output stream was already opened".to_string(),
            ));
        }

        let sink = self.opener.open(width, height, self.fps)?;
        log::debug!("opened output stream {width}x{height} @ {:.3} fps", self.fps);
        self.state = EncoderState::Streaming {
            sink,
            size: (width, height),
        };
        Ok(())
    }

    pub fn write(&mut self, canvas: &RgbImage) -> Result<()> {
        let EncoderState::Streaming { sink, size } = &mut self.state else {
            return Err(AppError::StreamNotReady);
        };

        if canvas.dimensions() != *size {
            return Err(AppError::FrameSizeMismatch {
                expected: *size,
                actual: canvas.dimensions(),
            });
        }

        sink.write_frame(canvas)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Writes `canvas`, opening the stream at its size if this is the first frame.
    pub fn push(&mut self, canvas: &RgbImage) -> Result<()> {
        if matches!(self.state, EncoderState::Uninitialized) {
            let (width, height) = canvas.dimensions();
            self.open(width, height)?;
        }
        self.write(canvas)
    }

    pub fn finish(&mut self) -> Result<EncodeSummary> {
        match std::mem::replace(&mut self.state, EncoderState::Closed) {
            EncoderState::Streaming { sink, size } => {
                sink.finish()?;
                log::debug!("closed output stream after {} frames", self.frames_written);
                Ok(EncodeSummary {
                    frames_written: self.frames_written,
                    fps: self.fps,
                    canvas: size,
                })
            }
            previous => {
                self.state = previous;
                Err(AppError::StreamNotReady)
            }
        }
    }
}

/// Everything a [`MemorySink`] received.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub opened: Option<(u32, u32, f64)>,
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

/// Keeps rendered canvases in memory instead of encoding them.
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    recording: Arc<Mutex<Recording>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording(&self) -> Recording {
        match self.recording.lock() {
            Ok(recording) => recording.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SinkOpener for MemoryOpener {
    type Sink = MemorySink;

    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<MemorySink> {
        let mut recording = self
            .recording
            .lock()
            .map_err(|_| AppError::EncodingFailure("recording lock poisoned".to_string()))?;
        recording.opened = Some((width, height, fps));
        Ok(MemorySink {
            recording: Arc::clone(&self.recording),
        })
    }
}

#[derive(Debug)]
pub struct MemorySink {
    recording: Arc<Mutex<Recording>>,
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, canvas: &RgbImage) -> Result<()> {
        self.recording
            .lock()
            .map_err(|_| AppError::EncodingFailure("recording lock poisoned".to_string()))?
            .frames
            .push(canvas.clone());
        Ok(())
    }

    fn finish(self) -> Result<()> {
        self.recording
            .lock()
            .map_err(|_| AppError::EncodingFailure("recording lock poisoned".to_string()))?
            .finished = true;
        Ok(())
    }
}
