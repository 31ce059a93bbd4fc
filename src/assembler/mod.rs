//! Segment download, decode and re-encode into a single MP3 stream.
//!
//! Output goes to a scratch file next to the destination. The scratch file
//! is removed on drop, so the final path is only ever created by
//! [`AssembledStream::publish`].

pub mod decode;
pub mod encode;

pub use decode::{DecodedSegment, PcmFormat, SegmentDecoder, SymphoniaDecoder};
pub use encode::{AudioEncoder, EncodeSession, FfmpegEncoder};

use crate::error::{RelivError, Result};
use crate::http_retry::{RetryConfig, fetch_bytes_with_retry};
use crate::models::SegmentReference;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Scratch output of a successful assembly.
#[derive(Debug)]
pub struct AssembledStream {
    file: NamedTempFile,
    segments: usize,
    skipped_frames: u64,
}

impl AssembledStream {
    /// Location of the scratch file, for tagging before publish.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Atomically move the scratch file to `destination`.
    pub fn publish(self, destination: &Path) -> Result<PathBuf> {
        self.file
            .persist(destination)
            .map_err(|e| RelivError::Io(e.error))?;
        info!("Published {}", destination.display());
        Ok(destination.to_path_buf())
    }
}

pub struct StreamAssembler {
    client: Client,
    retry: RetryConfig,
    decoder: Arc<dyn SegmentDecoder>,
    encoder: Arc<dyn AudioEncoder>,
}

impl StreamAssembler {
    pub fn new(
        client: Client,
        retry: RetryConfig,
        decoder: Arc<dyn SegmentDecoder>,
        encoder: Arc<dyn AudioEncoder>,
    ) -> Self {
        Self {
            client,
            retry,
            decoder,
            encoder,
        }
    }

    /// Fetch, decode and re-encode `segments` in order into a scratch file
    /// created inside `scratch_dir`.
    ///
    /// # Errors
    ///
    /// [`RelivError::AssemblyFailed`] when a segment cannot be fetched after
    /// all retries, when the audio format changes between segments, when
    /// nothing decodes, or when the encoder fails. No file is left behind.
    pub async fn assemble(
        &self,
        segments: &[SegmentReference],
        scratch_dir: &Path,
    ) -> Result<AssembledStream> {
        if segments.is_empty() {
            return Err(RelivError::AssemblyFailed("no segments to assemble".to_string()));
        }

        let started = Instant::now();
        let file = tempfile::Builder::new()
            .prefix(".relive-")
            .suffix(".part")
            .tempfile_in(scratch_dir)?;

        let mut session: Option<(PcmFormat, Box<dyn EncodeSession>)> = None;
        let skipped_frames = match self.feed(segments, file.path(), &mut session).await {
            Ok(skipped) => skipped,
            Err(e) => {
                if let Some((_, running)) = session.take() {
                    running.abort().await;
                }
                return Err(e);
            }
        };

        let Some((_, running)) = session else {
            return Err(RelivError::AssemblyFailed(
                "no audio could be decoded from any segment".to_string(),
            ));
        };
        running
            .finish()
            .await
            .map_err(|e| RelivError::AssemblyFailed(e.to_string()))?;

        crate::metrics::record_duration("assemble", started);
        info!(
            "Assembled {} segments ({} corrupt frames skipped)",
            segments.len(),
            skipped_frames
        );

        Ok(AssembledStream {
            file,
            segments: segments.len(),
            skipped_frames,
        })
    }

    async fn feed(
        &self,
        segments: &[SegmentReference],
        output: &Path,
        session: &mut Option<(PcmFormat, Box<dyn EncodeSession>)>,
    ) -> Result<u64> {
        let mut skipped_frames = 0u64;

        for segment in segments {
            let data = fetch_bytes_with_retry(&self.client, &segment.url, &self.retry)
                .await
                .map_err(|failure| {
                    RelivError::AssemblyFailed(
                        RelivError::SegmentFetch {
                            url: segment.url.clone(),
                            attempts: failure.attempts,
                            reason: failure.reason,
                        }
                        .to_string(),
                    )
                })?;
            crate::metrics::record_segment_fetched();

            let decoder = Arc::clone(&self.decoder);
            let url = segment.url.clone();
            let decoded = tokio::task::spawn_blocking(move || decoder.decode(&data, &url))
                .await
                .map_err(|e| RelivError::Decode(format!("decoder task failed: {e}")))?
                .map_err(|e| RelivError::AssemblyFailed(e.to_string()))?;

            skipped_frames += decoded.skipped_frames;
            crate::metrics::record_skipped_frames(decoded.skipped_frames);

            let Some(format) = decoded.format else {
                warn!("Segment {} produced no audio", segment.url);
                continue;
            };
            if decoded.samples.is_empty() {
                continue;
            }

            match session.as_ref().map(|(expected, _)| *expected) {
                Some(expected) if expected != format => {
                    return Err(RelivError::AssemblyFailed(format!(
                        "audio format changed at {} ({:?} -> {:?})",
                        segment.url, expected, format
                    )));
                }
                Some(_) => {}
                None => {
                    debug!("Starting encoder for {:?}", format);
                    let running = self
                        .encoder
                        .start(format, output)
                        .await
                        .map_err(|e| RelivError::AssemblyFailed(e.to_string()))?;
                    *session = Some((format, running));
                }
            }

            if let Some((_, running)) = session.as_mut() {
                running
                    .write_samples(&decoded.samples)
                    .await
                    .map_err(|e| RelivError::AssemblyFailed(e.to_string()))?;
            }
            debug!(
                "Segment {} appended ({} samples)",
                segment.sequence_index,
                decoded.samples.len()
            );
        }

        Ok(skipped_frames)
    }
}
