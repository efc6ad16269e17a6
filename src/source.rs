use std::collections::VecDeque;

use crate::error::Result;
use crate::sample::RawFrame;

/// Forward-only stream of decoded frames.
pub trait FrameSource {
    /// Declared frame rate, if the container reports one.
    fn frame_rate(&self) -> Option<f64>;

    /// Next frame in presentation order, `None` once exhausted.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// Frames held in memory, mostly useful for callers that decode themselves.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    frames: VecDeque<RawFrame>,
    fps: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = RawFrame>, fps: Option<f64>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            fps,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.frames.pop_front())
    }
}
