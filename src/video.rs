use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use tempfile::TempPath;

use crate::encoder::{SinkOpener, VideoSink};
use crate::error::{AppError, Result};
use crate::sample::{ChannelOrder, RawFrame};
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// `None` when the container reports `0/0` or garbage.
    pub fps: Option<f64>,
}

pub fn tools_available() -> bool {
    command_success("ffmpeg", &["-version"]) && command_success("ffprobe", &["-version"])
}

pub fn probe_video(input: &Path) -> Result<VideoMetadata> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .map_err(|source| AppError::CommandSpawn {
            program: "ffprobe".to_string(),
            source,
        })?;

    ensure_command_success("ffprobe", &output)?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();

    let width = lines
        .next()
        .ok_or_else(|| AppError::ProbeParse("missing width".to_string()))?
        .trim()
        .parse::<u32>()
        .map_err(|_| AppError::ProbeParse("invalid width".to_string()))?;

    let height = lines
        .next()
        .ok_or_else(|| AppError::ProbeParse("missing height".to_string()))?
        .trim()
        .parse::<u32>()
        .map_err(|_| AppError::ProbeParse("invalid height".to_string()))?;

    let fps = lines.next().and_then(|rate| parse_rational(rate.trim()));

    log::info!("probed {}: {width}x{height} @ {fps:?} fps", input.display());

    Ok(VideoMetadata { width, height, fps })
}

/// Decodes the first video stream through an `ffmpeg` pipe of raw RGB frames.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    metadata: VideoMetadata,
    frame_bytes: usize,
    exhausted: bool,
}

impl FfmpegSource {
    pub fn open(input: &Path) -> Result<Self> {
        let metadata = probe_video(input)?;
        if metadata.width == 0 || metadata.height == 0 {
            return Err(AppError::InvalidFrame(format!(
                "{} reports a {}x{} video stream",
                input.display(),
                metadata.width,
                metadata.height
            )));
        }

        log::debug!("spawning ffmpeg decoder for {}", input.display());
        Self::spawn(decoder_command(input), metadata)
    }

    /// Reads `metadata`-sized rgb24 frames from the stdout of `command`.
    pub(crate) fn spawn(mut command: Command, metadata: VideoMetadata) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AppError::CommandSpawn {
                program: "ffmpeg".to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            AppError::InvalidFrame("ffmpeg decoder has no stdout".to_string())
        })?;
        let stderr = drain_stderr(&mut child);

        Ok(Self {
            child,
            stdout,
            stderr,
            metadata,
            frame_bytes: metadata.width as usize * metadata.height as usize * 3,
            exhausted: false,
        })
    }

    pub fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn finish_decoder(&mut self) -> Result<()> {
        let status = self.child.wait()?;
        check_exit("ffmpeg", status, join_stderr(self.stderr.take()))
    }
}

impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> Option<f64> {
        self.metadata.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_bytes];
        if !read_exact_or_eof(&mut self.stdout, &mut buffer)? {
            self.exhausted = true;
            self.finish_decoder()?;
            return Ok(None);
        }

        RawFrame::from_bytes(
            self.metadata.width,
            self.metadata.height,
            ChannelOrder::Rgb,
            buffer,
        )
        .map(Some)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.exhausted {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Decoder invocation for `input`. Autorotation is off so frames keep the
/// probed coded size.
fn decoder_command(input: &Path) -> Command {
    let mut command = Command::new("ffmpeg");
    command
        .args(["-v", "error", "-noautorotate", "-i"])
        .arg(input)
        .args(["-map", "0:v:0", "-vsync", "0", "-an"])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]);
    command
}

/// Reads the child's stderr on its own thread so a chatty process never
/// stalls on a full pipe.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut pipe = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut bytes) {
            log::debug!("stopped reading ffmpeg stderr: {e}");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }))
}

fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Fills `buf` completely; `Ok(false)` on a clean end of stream before any byte.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut total = 0usize;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) if total == 0 => return Ok(false),
            Ok(0) => {
                return Err(AppError::InvalidFrame(format!(
                    "stream ended mid-frame after {total} of {} bytes",
                    buf.len()
                )));
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Opens H.264/MP4 encoders writing to `output`.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    output: PathBuf,
}

impl FfmpegOpener {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl SinkOpener for FfmpegOpener {
    type Sink = FfmpegSink;

    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<FfmpegSink> {
        let dir = output_dir(&self.output);
        fs::create_dir_all(&dir)?;

        // encoded into a sibling temp file, moved into place by `finish`
        let temp = tempfile::Builder::new()
            .prefix(".ascii-video-")
            .suffix(".mp4")
            .tempfile_in(&dir)?
            .into_temp_path();

        let size = format!("{width}x{height}");
        let fps_string = format!("{fps:.6}");

        let mut command = Command::new("ffmpeg");
        command
            .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(&size)
            .arg("-framerate")
            .arg(&fps_string)
            .args(["-i", "pipe:0"])
            .args([
                "-vf",
                "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-crf",
                "18",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
                "-f",
                "mp4",
            ])
            .arg(&*temp);

        log::debug!("spawning ffmpeg encoder {size} @ {fps_string} fps");
        FfmpegSink::spawn(command, temp, self.output.clone())
    }
}

/// Streams canvases into an encoder process writing `temp`, which becomes
/// `output` once the encoder exits cleanly.
pub struct FfmpegSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    temp: Option<TempPath>,
    output: PathBuf,
}

impl FfmpegSink {
    pub(crate) fn spawn(mut command: Command, temp: TempPath, output: PathBuf) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AppError::CommandSpawn {
                program: "ffmpeg".to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stderr = drain_stderr(&mut child);

        Ok(Self {
            child: Some(child),
            stdin,
            stderr,
            temp: Some(temp),
            output,
        })
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, canvas: &RgbImage) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(AppError::StreamNotReady)?;
        stdin
            .write_all(canvas.as_raw())
            .map_err(|e| AppError::EncodingFailure(format!("ffmpeg stopped reading frames: {e}")))
    }

    fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());

        let mut child = self.child.take().ok_or(AppError::StreamNotReady)?;
        let status = child.wait()?;
        check_exit("ffmpeg", status, join_stderr(self.stderr.take()))?;

        let temp = self.temp.take().ok_or(AppError::StreamNotReady)?;
        temp.persist(&self.output).map_err(|e| AppError::Io(e.error))?;
        log::info!("wrote {}", self.output.display());
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Directory `path` lives in, `.` for bare file names.
pub(crate) fn output_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub fn create_test_video(
    output: &Path,
    width: u32,
    height: u32,
    fps: u32,
    duration_seconds: f32,
) -> Result<()> {
    let size = format!("{width}x{height}");
    let rate = fps.to_string();
    let duration = format!("{duration_seconds}");

    let output_cmd = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i"])
        .arg(format!(
            "testsrc=size={size}:rate={rate}:duration={duration}"
        ))
        .args(["-pix_fmt", "yuv420p"])
        .arg(output)
        .output()
        .map_err(|source| AppError::CommandSpawn {
            program: "ffmpeg".to_string(),
            source,
        })?;

    ensure_command_success("ffmpeg", &output_cmd)
}

fn parse_rational(value: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = value.split_once('/') {
        let numerator = num.parse::<f64>().ok()?;
        let denominator = den.parse::<f64>().ok()?;
        if denominator == 0.0 {
            return None;
        }
        numerator / denominator
    } else {
        value.parse::<f64>().ok()?
    };

    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn ensure_command_success(program: &str, output: &std::process::Output) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    check_exit(program, output.status, stderr)
}

fn check_exit(program: &str, status: ExitStatus, stderr: String) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(AppError::CommandFailed {
        program: program.to_string(),
        code: status.code(),
        stderr,
    })
}

fn command_success(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rational_frame_rate() {
        assert_eq!(parse_rational("30000/1001").unwrap().round(), 30.0);
        assert_eq!(parse_rational("24").unwrap(), 24.0);
        assert!(parse_rational("1/0").is_none());
        assert!(parse_rational("0/0").is_none());
        assert!(parse_rational("0").is_none());
        assert!(parse_rational("abc").is_none());
    }

    #[test]
    fn read_exact_or_eof_distinguishes_clean_end_from_truncation() {
        let mut buf = [0u8; 4];

        let mut empty: &[u8] = &[];
        assert!(!read_exact_or_eof(&mut empty, &mut buf).unwrap());

        let mut full: &[u8] = &[1, 2, 3, 4, 5];
        assert!(read_exact_or_eof(&mut full, &mut buf).unwrap());
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut short: &[u8] = &[9, 9];
        assert!(matches!(
            read_exact_or_eof(&mut short, &mut buf),
            Err(AppError::InvalidFrame(_))
        ));
    }

    #[test]
    fn decoder_keeps_coded_orientation() {
        let command = decoder_command(Path::new("clip.mov"));
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy()).collect();

        let no_rotate = args.iter().position(|a| a == "-noautorotate").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(no_rotate < input);
        assert_eq!(args[input + 1], "clip.mov");
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    #[cfg(unix)]
    #[test]
    fn noisy_decoder_does_not_stall_frame_reads() {
        use std::sync::mpsc;
        use std::time::Duration;

        let metadata = VideoMetadata {
            width: 4,
            height: 4,
            fps: Some(10.0),
        };
        // far more stderr than a pipe buffer holds, then one 4x4 frame
        let decoder = shell("yes corrupt packet | head -c 200000 >&2; head -c 48 /dev/zero");

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = FfmpegSource::spawn(decoder, metadata).and_then(|mut source| {
                let first = source.next_frame()?;
                let second = source.next_frame()?;
                Ok((first.map(|f| (f.width(), f.height())), second.is_none()))
            });
            let _ = tx.send(result);
        });

        let (first, ended) = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("decoder stalled on a full stderr pipe")
            .unwrap();
        assert_eq!(first, Some((4, 4)));
        assert!(ended);
    }

    #[cfg(unix)]
    #[test]
    fn failed_decoder_reports_its_stderr() {
        let metadata = VideoMetadata {
            width: 2,
            height: 2,
            fps: None,
        };
        let decoder = shell("yes bad frame | head -c 100000 >&2; exit 3");

        let mut source = FfmpegSource::spawn(decoder, metadata).unwrap();
        match source.next_frame() {
            Err(AppError::CommandFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.ends_with("bad frame"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn noisy_encoder_finishes_and_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let temp = tempfile::NamedTempFile::new_in(dir.path())
            .unwrap()
            .into_temp_path();
        let output = dir.path().join("out.mp4");
        let encoder = shell("yes warning | head -c 200000 >&2; cat > /dev/null");

        let mut sink = FfmpegSink::spawn(encoder, temp, output.clone()).unwrap();
        let canvas = RgbImage::new(64, 64);
        for _ in 0..8 {
            sink.write_frame(&canvas).unwrap();
        }
        sink.finish().unwrap();

        assert!(output.exists());
    }

    #[test]
    fn output_dir_defaults_to_current_directory() {
        assert_eq!(output_dir(Path::new("out.mp4")), PathBuf::from("."));
        assert_eq!(output_dir(Path::new("a/b/out.mp4")), PathBuf::from("a/b"));
    }
}
