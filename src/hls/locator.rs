//! Maps a `[start, end)` window onto segments of hour-bucketed relive
//! playlists.
//!
//! The archive publishes one playlist per local hour. A cursor walks from the
//! window start, picks the playlist of the hour it falls into, takes as many
//! segments as that playlist offers, and rolls over to the following hour
//! until the window is covered.

use crate::error::{RelivError, Result};
use crate::hls::fetcher::{FetchOutcome, PlaylistFetcher};
use crate::hls::parser::{PlaylistSpec, parse_relive_playlist};
use crate::models::{SegmentReference, TimeWindow};
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const PLACEHOLDERS: [&str; 3] = ["date", "hour", "offset"];

/// Playlist URL pattern with `{date}`, `{hour}` and `{offset}` placeholders.
///
/// Rendered in the broadcast's local time: `{date}` as `YYYY-MM-DD`,
/// `{hour}` as `HH`, `{offset}` as `+HHMM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    /// Validate a template. Unknown placeholders and templates without both
    /// `{date}` and `{hour}` are rejected, since every hour must map to its
    /// own playlist.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();

        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                RelivError::InvalidTemplate(format!("unclosed placeholder in {template}"))
            })?;
            let name = &after[..close];
            if !PLACEHOLDERS.contains(&name) {
                return Err(RelivError::InvalidTemplate(format!(
                    "unknown placeholder {{{name}}} in {template}"
                )));
            }
            rest = &after[close + 1..];
        }

        if !template.contains("{date}") || !template.contains("{hour}") {
            return Err(RelivError::InvalidTemplate(format!(
                "{template} must contain {{date}} and {{hour}}"
            )));
        }

        Ok(Self(template))
    }

    /// Substitute the placeholders for the given local hour.
    pub fn render(&self, hour: &DateTime<Tz>) -> String {
        self.0
            .replace("{date}", &hour.format("%Y-%m-%d").to_string())
            .replace("{hour}", &hour.format("%H").to_string())
            .replace("{offset}", &hour.format("%z").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Start of the local hour containing `instant`.
///
/// Computed by subtracting the minutes and seconds already elapsed, which
/// stays well-defined across DST folds.
pub fn hour_floor(instant: DateTime<Utc>, timezone: Tz) -> DateTime<Tz> {
    let local = instant.with_timezone(&timezone);
    let into_hour = Duration::seconds(i64::from(local.minute()) * 60 + i64::from(local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));
    local - into_hour
}

/// What one playlist contributed towards covering the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The cursor reached the window end.
    Covered,
    /// The playlist ran out of segments; continue with the next hour.
    NeedNextWindow,
}

/// Result of resolving a window.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// References covering the whole window, in playback order.
    Located(Vec<SegmentReference>),
    /// The first hour is not in the archive yet; the broadcast should be
    /// skipped for now.
    Unavailable,
}

/// Index of the segment playing at `cursor`, clamped to the first segment
/// when the cursor lies before `program_start`.
pub fn start_index(
    cursor: DateTime<Utc>,
    program_start: DateTime<Utc>,
    target_duration: u64,
) -> usize {
    let offset_ms = (cursor - program_start).num_milliseconds();
    let segment_ms = target_duration as i64 * 1000;
    offset_ms.div_euclid(segment_ms).max(0) as usize
}

/// Append references from `spec` starting at the segment under `cursor`,
/// advancing the cursor one target duration per reference.
pub fn consume_playlist(
    spec: &PlaylistSpec,
    program_start: DateTime<Utc>,
    cursor: &mut DateTime<Utc>,
    window_end: DateTime<Utc>,
    refs: &mut Vec<SegmentReference>,
) -> ConsumeOutcome {
    let step = spec.target_duration_chrono();
    let mut index = start_index(*cursor, program_start, spec.target_duration);

    while *cursor < window_end {
        let Some(uri) = spec.segment_uris.get(index) else {
            return ConsumeOutcome::NeedNextWindow;
        };
        refs.push(SegmentReference {
            url: uri.clone(),
            sequence_index: index,
        });
        *cursor += step;
        index += 1;
    }

    ConsumeOutcome::Covered
}

/// Resolves time windows to segment references.
#[derive(Clone)]
pub struct SegmentLocator {
    fetcher: Arc<dyn PlaylistFetcher>,
    template: UrlTemplate,
    timezone: Tz,
}

impl SegmentLocator {
    pub fn new(fetcher: Arc<dyn PlaylistFetcher>, template: UrlTemplate, timezone: Tz) -> Self {
        Self {
            fetcher,
            template,
            timezone,
        }
    }

    /// Collect the segments covering `window`.
    ///
    /// # Errors
    /// - [`RelivError::PlaylistMalformed`] if any hour playlist cannot be parsed
    /// - [`RelivError::PlaylistFetch`] on transport errors, or when a later
    ///   hour is missing after the first one was found
    /// - [`RelivError::ArchiveExhausted`] when hours past the window end still
    ///   do not cover it
    pub async fn resolve(&self, window: &TimeWindow) -> Result<Resolution> {
        let mut cursor = window.start();
        let mut refs = Vec::new();
        let mut previous_hour: Option<DateTime<Tz>> = None;
        let last_hour = hour_floor(window.end(), self.timezone) + Duration::hours(1);

        while cursor < window.end() {
            let mut hour = hour_floor(cursor, self.timezone);
            if let Some(previous) = previous_hour {
                if hour <= previous {
                    hour = previous + Duration::hours(1);
                }
            }
            if hour > last_hour {
                return Err(RelivError::ArchiveExhausted(format!(
                    "no playlist up to {} covers {} (got {} segments)",
                    last_hour,
                    window.end(),
                    refs.len()
                )));
            }

            let url = self.template.render(&hour);
            let playlist_url = Url::parse(&url)?;

            let text = match self.fetcher.fetch_playlist(&url).await? {
                FetchOutcome::Found(text) => text,
                FetchOutcome::NotFound if previous_hour.is_none() => {
                    info!("Relive playlist {} not published yet", url);
                    return Ok(Resolution::Unavailable);
                }
                FetchOutcome::NotFound => {
                    return Err(RelivError::PlaylistFetch(format!(
                        "{url} not found while rolling over"
                    )));
                }
            };

            let spec = parse_relive_playlist(&text, &playlist_url)?;
            let program_start = spec
                .program_start
                .unwrap_or_else(|| hour.with_timezone(&Utc));

            match consume_playlist(&spec, program_start, &mut cursor, window.end(), &mut refs) {
                ConsumeOutcome::Covered => {
                    debug!("Window covered by {} segments", refs.len());
                    break;
                }
                ConsumeOutcome::NeedNextWindow => {
                    info!(
                        "Playlist {} exhausted at {} ({} segments so far), rolling over",
                        url,
                        cursor,
                        refs.len()
                    );
                    previous_hour = Some(hour);
                }
            }
        }

        Ok(Resolution::Located(refs))
    }
}
