use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("the source video contains no frames")]
    EmptySource,

    #[error("the frame selection policy skipped all {frames_read} source frames")]
    NoFramesSelected { frames_read: usize },

    #[error("frame size mismatch: expected {expected:?}, got {actual:?}")]
    FrameSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("conversion cancelled before any frame was written")]
    Cancelled,

    #[error("output stream is not ready for writing")]
    StreamNotReady,

    #[error("encoder cannot accept further frames: {0}")]
    EncodingFailure(String),

    #[error("conversion aborted after {frames_processed} frames: {source}")]
    Aborted {
        frames_processed: usize,
        #[source]
        source: Box<AppError>,
    },

    #[error("input file does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("ffmpeg and ffprobe must be installed and available on PATH")]
    MissingFfmpeg,

    #[error("failed to run command `{program}`: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{program}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ProbeParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// The underlying failure, looking through `Aborted`.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Aborted { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidParameter(message.into())
    }
}
