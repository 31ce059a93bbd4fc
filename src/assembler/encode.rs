//! MP3 encoding of the assembled PCM stream.

use super::decode::PcmFormat;
use crate::error::{RelivError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bytes of encoder diagnostics kept for the error message.
const STDERR_TAIL_BYTES: usize = 4096;

/// Starts encoding sessions that write one output file each.
#[async_trait]
pub trait AudioEncoder: Send + Sync {
    /// Open a session that encodes PCM in `input` format into `output`.
    async fn start(&self, input: PcmFormat, output: &Path) -> Result<Box<dyn EncodeSession>>;
}

/// One running encode. Samples are fed in order; the output file is only
/// complete after [`EncodeSession::finish`] returns `Ok`.
#[async_trait]
pub trait EncodeSession: Send {
    async fn write_samples(&mut self, samples: &[i16]) -> Result<()>;

    async fn finish(self: Box<Self>) -> Result<()>;

    /// Stop encoding without producing a usable file.
    async fn abort(self: Box<Self>);
}

/// Encodes with an external `ffmpeg` process fed over stdin.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    bitrate_kbps: u32,
    sample_rate: u32,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, bitrate_kbps: u32, sample_rate: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            bitrate_kbps,
            sample_rate,
        }
    }

    fn args(&self, input: PcmFormat, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            input.sample_rate.to_string(),
            "-ac".into(),
            input.channels.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-vn".into(),
            "-map_metadata".into(),
            "-1".into(),
            "-codec:a".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            format!("{}k", self.bitrate_kbps),
            "-ar".into(),
            self.sample_rate.to_string(),
            "-id3v2_version".into(),
            "0".into(),
            "-write_id3v1".into(),
            "0".into(),
            "-f".into(),
            "mp3".into(),
            "-y".into(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl AudioEncoder for FfmpegEncoder {
    async fn start(&self, input: PcmFormat, output: &Path) -> Result<Box<dyn EncodeSession>> {
        let args = self.args(input, output);
        debug!("Starting ffmpeg: {} {}", self.ffmpeg_path.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RelivError::Encode(format!(
                    "failed to spawn {}: {e}",
                    self.ffmpeg_path.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelivError::Encode("failed to open ffmpeg stdin".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelivError::Encode("failed to open ffmpeg stderr".to_string()))?;

        // Drained concurrently so a chatty encoder never blocks on a full pipe.
        let stderr_tail = tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES));

        Ok(Box::new(FfmpegSession {
            child,
            stdin: Some(stdin),
            stderr_tail,
            buffer: Vec::new(),
        }))
    }
}

/// Read `reader` to the end, keeping only the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    tail.drain(..tail.len() - limit);
                }
            }
            Err(e) => {
                debug!("Stopped reading ffmpeg stderr: {}", e);
                break;
            }
        }
    }
    tail
}

struct FfmpegSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: JoinHandle<Vec<u8>>,
    buffer: Vec<u8>,
}

#[async_trait]
impl EncodeSession for FfmpegSession {
    async fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RelivError::Encode("ffmpeg stdin already closed".to_string()))?;

        self.buffer.clear();
        self.buffer.reserve(samples.len() * 2);
        for sample in samples {
            self.buffer.extend_from_slice(&sample.to_le_bytes());
        }

        stdin
            .write_all(&self.buffer)
            .await
            .map_err(|e| RelivError::Encode(format!("writing PCM to ffmpeg: {e}")))
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| RelivError::Encode(format!("closing ffmpeg stdin: {e}")))?;
        }

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| RelivError::Encode(format!("waiting for ffmpeg: {e}")))?;
        let stderr = (&mut self.stderr_tail).await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(RelivError::Encode(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn abort(mut self: Box<Self>) {
        self.stdin.take();
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill ffmpeg: {}", e);
            return;
        }
        if let Err(e) = self.child.wait().await {
            warn!("Failed to reap ffmpeg: {}", e);
        }
        self.stderr_tail.abort();
    }
}
