//! End-to-end reconstruction of one scheduled broadcast:
//! locate → assemble → chapters → tag → publish.

use crate::assembler::{FfmpegEncoder, StreamAssembler, SymphoniaDecoder};
use crate::chapters::map_chapters;
use crate::config::Config;
use crate::error::{RelivError, Result};
use crate::hls::{HttpPlaylistFetcher, Resolution, SegmentLocator, UrlTemplate};
use crate::http_retry::RetryConfig;
use crate::models::{BroadcastInfo, ScheduledBroadcast};
use crate::tagging::{CoverImage, Id3Tagger, TagKey, TagRequest, Tagger};
use chrono::DateTime;
use chrono_tz::Tz;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The archive has not published the broadcast yet; try again later.
    Unavailable,
    /// A finished file already exists; nothing was fetched.
    AlreadyComplete(PathBuf),
    Success(PathBuf),
    Failed(String),
}

impl BroadcastOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BroadcastOutcome::Unavailable => "unavailable",
            BroadcastOutcome::AlreadyComplete(_) => "already_complete",
            BroadcastOutcome::Success(_) => "success",
            BroadcastOutcome::Failed(_) => "failed",
        }
    }
}

/// Settings the pipeline needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub timezone: Tz,
    /// Timeout for the cover image request.
    pub fetch_timeout: Duration,
    pub station_url: Option<String>,
    /// ISO-639-2 code written as TLAN.
    pub language: String,
}

pub struct BroadcastPipeline {
    client: Client,
    locator: SegmentLocator,
    assembler: StreamAssembler,
    tagger: Arc<dyn Tagger>,
    options: PipelineOptions,
}

impl BroadcastPipeline {
    pub fn new(
        client: Client,
        locator: SegmentLocator,
        assembler: StreamAssembler,
        tagger: Arc<dyn Tagger>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            locator,
            assembler,
            tagger,
            options,
        }
    }

    /// Wire the production collaborators from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;

        let template = UrlTemplate::new(config.playlist_url_template.clone())?;
        let fetcher = Arc::new(HttpPlaylistFetcher::new(client.clone(), config.fetch_timeout));
        let locator = SegmentLocator::new(fetcher, template, config.timezone);

        let retry = RetryConfig {
            max_attempts: config.segment_max_attempts,
            backoff: config.segment_backoff,
            timeout: Some(config.fetch_timeout),
        };
        let encoder = FfmpegEncoder::new(
            config.ffmpeg_path.clone(),
            config.target_bitrate_kbps,
            config.target_sample_rate,
        );
        let assembler = StreamAssembler::new(
            client.clone(),
            retry,
            Arc::new(SymphoniaDecoder),
            Arc::new(encoder),
        );

        let tagger = Arc::new(Id3Tagger::new(&config.tag_language)?);

        Ok(Self::new(
            client,
            locator,
            assembler,
            tagger,
            PipelineOptions {
                output_dir: config.output_dir.clone(),
                timezone: config.timezone,
                fetch_timeout: config.fetch_timeout,
                station_url: config.station_url.clone(),
                language: config.tag_language.to_ascii_lowercase(),
            },
        ))
    }

    /// Final location of the file for `broadcast`.
    pub fn output_path(&self, broadcast: &ScheduledBroadcast) -> PathBuf {
        let local_start = broadcast.event.start.with_timezone(&self.options.timezone);
        self.options
            .output_dir
            .join(output_file_name(&broadcast.info, &local_start))
    }

    /// Run one broadcast to completion. Never fails: every error is folded
    /// into [`BroadcastOutcome::Failed`].
    pub async fn run(&self, broadcast: &ScheduledBroadcast) -> BroadcastOutcome {
        let started = Instant::now();
        let outcome = match self.try_run(broadcast).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "{} / {} failed ({}): {}",
                    broadcast.info.station,
                    broadcast.info.show,
                    e.kind(),
                    e
                );
                BroadcastOutcome::Failed(e.to_string())
            }
        };

        crate::metrics::record_broadcast_outcome(outcome.label());
        crate::metrics::record_duration("broadcast", started);
        outcome
    }

    async fn try_run(&self, broadcast: &ScheduledBroadcast) -> Result<BroadcastOutcome> {
        let target = self.output_path(broadcast);
        if is_complete(&target).await {
            info!("{} already exists, skipping", target.display());
            return Ok(BroadcastOutcome::AlreadyComplete(target));
        }

        let window = broadcast.event.window()?;
        let segments = match self.locator.resolve(&window).await? {
            Resolution::Located(segments) => segments,
            Resolution::Unavailable => {
                info!(
                    "{} / {} at {} is not available yet",
                    broadcast.info.station, broadcast.info.show, broadcast.event.start
                );
                return Ok(BroadcastOutcome::Unavailable);
            }
        };
        info!(
            "Located {} segments for {}",
            segments.len(),
            target.display()
        );

        tokio::fs::create_dir_all(&self.options.output_dir).await?;
        let stream = self
            .assembler
            .assemble(&segments, &self.options.output_dir)
            .await?;

        let chapters = map_chapters(&broadcast.event);
        debug!("Mapped {} chapters", chapters.len());

        let cover = match broadcast.info.image_url.as_deref() {
            Some(url) => self.fetch_cover(url).await,
            None => None,
        };

        let request = self
            .tag_request(broadcast)
            .with_chapters(chapters)
            .with_cover(cover);
        self.tagger.write_tags(stream.path(), &request).await?;

        let published = stream.publish(&target)?;
        Ok(BroadcastOutcome::Success(published))
    }

    /// Tag values derived from the broadcast, without cover and chapters.
    pub fn tag_request(&self, broadcast: &ScheduledBroadcast) -> TagRequest {
        let info = &broadcast.info;
        let local_start = broadcast.event.start.with_timezone(&self.options.timezone);

        let mut request = TagRequest::new(broadcast.event.duration_ms())
            .with_field(TagKey::Station, info.station.as_str())
            .with_field(TagKey::Artist, info.station.as_str())
            .with_field(TagKey::Album, album_name(info))
            .with_field(TagKey::Track, "1/1")
            .with_field(TagKey::Title, local_start.format("%Y-%m-%d %H:%M").to_string())
            .with_field(TagKey::Year, local_start.format("%Y").to_string())
            .with_field(TagKey::Date, local_start.format("%d%m").to_string())
            .with_field(TagKey::Time, local_start.format("%H%M").to_string())
            .with_field(TagKey::Language, self.options.language.as_str());

        if let Some(description) = &info.description {
            request = request.with_field(TagKey::Comment, description.as_str());
        }
        if let Some(page_url) = &info.page_url {
            request = request.with_field(TagKey::SourceUrl, page_url.as_str());
        }
        if let Some(station_url) = &self.options.station_url {
            request = request.with_field(TagKey::StationUrl, station_url.as_str());
        }
        request
    }

    /// Fetch cover art. Failures only cost the cover.
    async fn fetch_cover(&self, url: &str) -> Option<CoverImage> {
        match self.try_fetch_cover(url).await {
            Ok(cover) => Some(cover),
            Err(e) => {
                warn!("Continuing without cover image from {}: {}", url, e);
                None
            }
        }
    }

    async fn try_fetch_cover(&self, url: &str) -> Result<CoverImage> {
        let response = self
            .client
            .get(url)
            .timeout(self.options.fetch_timeout)
            .send()
            .await?
            .error_for_status()?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());

        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(RelivError::Tagging("empty cover image".to_string()));
        }

        Ok(CoverImage {
            mime_type,
            data: data.to_vec(),
        })
    }
}

async fn is_complete(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Show name and episode title joined by `" - "`, without repeating a title
/// that equals the show name.
fn album_name(info: &BroadcastInfo) -> String {
    let show = info.show.trim();
    match info.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() && title != show => {
            if show.is_empty() {
                title.to_string()
            } else {
                format!("{show} - {title}")
            }
        }
        _ => show.to_string(),
    }
}

/// `"{station} {show} {YYYY-MM-DD HH:MM}.mp3"` with unsafe characters
/// replaced by `_`.
pub fn output_file_name(info: &BroadcastInfo, local_start: &DateTime<Tz>) -> String {
    let stem = format!(
        "{} {} {}",
        info.station,
        info.show,
        local_start.format("%Y-%m-%d %H:%M")
    );
    let safe: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() || matches!(c, '-' | '.' | '[' | ']')
            {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}.mp3")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BroadcastEvent;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Europe::Berlin;

    fn info() -> BroadcastInfo {
        BroadcastInfo {
            station: "Radio Eins".to_string(),
            show: "Nachtschicht".to_string(),
            title: Some("Folge 12: Jazz/Soul".to_string()),
            description: Some("Zwei Stunden Musik".to_string()),
            image_url: None,
            page_url: Some("https://radio.example.com/nachtschicht".to_string()),
        }
    }

    #[test]
    fn file_name_is_local_time_and_sanitized() {
        let start = Utc
            .with_ymd_and_hms(2024, 3, 1, 22, 5, 0)
            .unwrap()
            .with_timezone(&Berlin);
        let mut info = info();
        info.show = "Night/Shift: Live!".to_string();

        assert_eq!(
            output_file_name(&info, &start),
            "Radio Eins Night_Shift_ Live_ 2024-03-01 23_05.mp3"
        );
    }

    #[test]
    fn file_name_keeps_unicode_words_and_brackets() {
        let start = Berlin.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let mut info = info();
        info.show = "Früh-Stück [Best.of]".to_string();

        assert_eq!(
            output_file_name(&info, &start),
            "Radio Eins Früh-Stück [Best.of] 2024-07-01 09_00.mp3"
        );
    }

    #[test]
    fn album_deduplicates_show_and_title() {
        let mut info = info();
        assert_eq!(album_name(&info), "Nachtschicht - Folge 12: Jazz/Soul");

        info.title = Some("Nachtschicht".to_string());
        assert_eq!(album_name(&info), "Nachtschicht");

        info.title = None;
        assert_eq!(album_name(&info), "Nachtschicht");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(BroadcastOutcome::Unavailable.label(), "unavailable");
        assert_eq!(
            BroadcastOutcome::Failed("x".to_string()).label(),
            "failed"
        );
    }

    #[tokio::test]
    async fn tag_request_uses_local_start() {
        let config = Config {
            is_dev: true,
            playlist_url_template: "https://a.example.com/{date}/{hour}.m3u8".to_string(),
            output_dir: PathBuf::from("/tmp"),
            broadcasts_file: PathBuf::from("broadcasts.json"),
            timezone: Berlin,
            fetch_timeout: Duration::from_secs(5),
            segment_max_attempts: 3,
            segment_backoff: Duration::from_millis(3000),
            target_bitrate_kbps: 128,
            target_sample_rate: 44100,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            station_url: Some("https://radio.example.com".to_string()),
            tag_language: "DEU".to_string(),
        };
        let pipeline = BroadcastPipeline::from_config(&config).unwrap();
        let broadcast = ScheduledBroadcast {
            event: BroadcastEvent {
                start: Utc.with_ymd_and_hms(2024, 3, 1, 22, 5, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
                items: vec![],
            },
            info: info(),
        };

        let request = pipeline.tag_request(&broadcast);

        assert_eq!(request.get(TagKey::Station), Some("Radio Eins"));
        assert_eq!(request.get(TagKey::Artist), Some("Radio Eins"));
        assert_eq!(request.get(TagKey::Title), Some("2024-03-01 23:05"));
        assert_eq!(request.get(TagKey::Year), Some("2024"));
        assert_eq!(request.get(TagKey::Date), Some("0103"));
        assert_eq!(request.get(TagKey::Time), Some("2305"));
        assert_eq!(request.get(TagKey::Track), Some("1/1"));
        assert_eq!(request.get(TagKey::Language), Some("deu"));
        assert_eq!(request.get(TagKey::Comment), Some("Zwei Stunden Musik"));
        assert_eq!(
            request.get(TagKey::SourceUrl),
            Some("https://radio.example.com/nachtschicht")
        );
        assert_eq!(
            request.get(TagKey::StationUrl),
            Some("https://radio.example.com")
        );
        assert_eq!(request.duration_ms, 6_900_000);
        assert_eq!(
            pipeline.output_path(&broadcast),
            PathBuf::from("/tmp/Radio Eins Nachtschicht 2024-03-01 23_05.mp3")
        );
    }
}
