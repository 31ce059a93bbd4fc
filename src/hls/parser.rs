use crate::error::{RelivError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use m3u8_rs::{Playlist, parse_playlist_res};
use tracing::debug;
use url::Url;

const PROGRAM_DATE_TIME_TAG: &str = "#EXT-X-PROGRAM-DATE-TIME:";
/// Longest segment duration accepted from a playlist, in seconds.
const MAX_TARGET_DURATION_SECS: u64 = 3600;

/// Timing and segment list of one hour-anchored relive playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSpec {
    /// Nominal duration of every segment, in seconds, between 1 and 3600.
    pub target_duration: u64,
    /// Wall-clock instant of the first segment, if the playlist states one.
    pub program_start: Option<DateTime<Utc>>,
    /// Absolute segment URLs in playback order.
    pub segment_uris: Vec<String>,
}

impl PlaylistSpec {
    pub fn target_duration_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.target_duration.min(MAX_TARGET_DURATION_SECS) as i64)
    }
}

/// Parse relive playlist text into a [`PlaylistSpec`].
///
/// Segment URIs are resolved against `playlist_url`. `EXT-X-PROGRAM-DATE-TIME`
/// is read from the raw lines before m3u8-rs sees the text: m3u8-rs only
/// accepts strict RFC 3339, while archives also emit offsets without a colon.
/// When the first date tag is attached to a later segment, the program start
/// is moved back by one target duration per preceding segment.
///
/// # Errors
/// [`RelivError::PlaylistMalformed`] when the text is not a media playlist or
/// `EXT-X-TARGETDURATION` is missing, zero or longer than an hour.
pub fn parse_relive_playlist(content: &str, playlist_url: &Url) -> Result<PlaylistSpec> {
    let (anchor, stripped) = extract_program_date_time(content);

    let media = match parse_playlist_res(stripped.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => media,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(RelivError::PlaylistMalformed(format!(
                "{playlist_url} is a master playlist, expected a media playlist"
            )));
        }
        Err(e) => {
            return Err(RelivError::PlaylistMalformed(format!(
                "Failed to parse {playlist_url}: {e:?}"
            )));
        }
    };

    if media.target_duration == 0 || media.target_duration > MAX_TARGET_DURATION_SECS {
        return Err(RelivError::PlaylistMalformed(format!(
            "{playlist_url} has no usable EXT-X-TARGETDURATION ({})",
            media.target_duration
        )));
    }
    let target_duration = media.target_duration;

    let segment_uris = media
        .segments
        .iter()
        .map(|segment| playlist_url.join(segment.uri.trim()).map(String::from))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let program_start = anchor.and_then(|(instant, preceding)| {
        let lead = i64::try_from(preceding)
            .ok()
            .and_then(|n| n.checked_mul(target_duration as i64))
            .and_then(chrono::Duration::try_seconds)?;
        instant.checked_sub_signed(lead)
    });

    debug!(
        "Parsed playlist {}: {} segments x {}s, program start {:?}",
        playlist_url,
        segment_uris.len(),
        target_duration,
        program_start
    );

    Ok(PlaylistSpec {
        target_duration,
        program_start,
        segment_uris,
    })
}

/// Find the first parseable program-date-time and how many segment URIs
/// precede it. Returns the content with all date tags removed.
fn extract_program_date_time(content: &str) -> (Option<(DateTime<Utc>, usize)>, String) {
    let mut anchor = None;
    let mut uris_seen = 0usize;
    let mut stripped = String::with_capacity(content.len());

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix(PROGRAM_DATE_TIME_TAG) {
            if anchor.is_none() {
                match parse_date_time(value.trim()) {
                    Some(instant) => anchor = Some((instant, uris_seen)),
                    None => debug!("Ignoring unparseable program date time: {}", value),
                }
            }
            continue;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            uris_seen += 1;
        }
        stripped.push_str(line);
        stripped.push('\n');
    }

    (anchor, stripped)
}

fn parse_date_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/relive/bayern2/2024-03-01/23/playlist.m3u8").unwrap()
    }

    const PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-PROGRAM-DATE-TIME:2024-03-01T23:00:00.000+01:00
#EXTINF:10.0,
seg-0.ts
#EXTINF:10.0,
seg-1.ts
#EXTINF:10.0,
https://other.example.com/abs/seg-2.ts
#EXT-X-ENDLIST
";

    #[test]
    fn parses_target_duration_start_and_uris() {
        let spec = parse_relive_playlist(PLAYLIST, &base()).unwrap();

        assert_eq!(spec.target_duration, 10);
        assert_eq!(
            spec.program_start,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap())
        );
        assert_eq!(
            spec.segment_uris,
            vec![
                "https://cdn.example.com/relive/bayern2/2024-03-01/23/seg-0.ts",
                "https://cdn.example.com/relive/bayern2/2024-03-01/23/seg-1.ts",
                "https://other.example.com/abs/seg-2.ts",
            ]
        );
    }

    #[test]
    fn program_start_is_optional() {
        let content = PLAYLIST
            .lines()
            .filter(|l| !l.starts_with("#EXT-X-PROGRAM-DATE-TIME"))
            .collect::<Vec<_>>()
            .join("\n");

        let spec = parse_relive_playlist(&content, &base()).unwrap();
        assert_eq!(spec.program_start, None);
        assert_eq!(spec.segment_uris.len(), 3);
    }

    #[test]
    fn accepts_offset_without_colon() {
        let content = PLAYLIST.replace("+01:00", "+0100");
        let spec = parse_relive_playlist(&content, &base()).unwrap();
        assert_eq!(
            spec.program_start,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap())
        );
    }

    #[test]
    fn late_date_tag_is_moved_back_to_first_segment() {
        let content = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg-0.ts
#EXTINF:10.0,
seg-1.ts
#EXT-X-PROGRAM-DATE-TIME:2024-03-01T22:00:20Z
#EXTINF:10.0,
seg-2.ts
";
        let spec = parse_relive_playlist(content, &base()).unwrap();
        assert_eq!(
            spec.program_start,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap())
        );
    }

    #[test]
    fn missing_target_duration_is_malformed() {
        let content = "#EXTM3U
#EXTINF:10.0,
seg-0.ts
";
        let err = parse_relive_playlist(content, &base()).unwrap_err();
        assert!(matches!(err, RelivError::PlaylistMalformed(_)));
    }

    #[test]
    fn oversized_target_duration_is_malformed() {
        for value in ["3601", "9223372036854775807", "18446744073709551615"] {
            let content = PLAYLIST.replace(
                "#EXT-X-TARGETDURATION:10",
                &format!("#EXT-X-TARGETDURATION:{value}"),
            );
            let err = parse_relive_playlist(&content, &base()).unwrap_err();
            assert!(
                matches!(err, RelivError::PlaylistMalformed(_)),
                "{value} accepted"
            );
        }
    }

    #[test]
    fn hour_long_target_duration_is_accepted() {
        let content = PLAYLIST.replace("#EXT-X-TARGETDURATION:10", "#EXT-X-TARGETDURATION:3600");
        let spec = parse_relive_playlist(&content, &base()).unwrap();
        assert_eq!(spec.target_duration_chrono(), chrono::Duration::hours(1));
    }

    #[test]
    fn master_playlist_is_malformed() {
        let content = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=128000
audio/playlist.m3u8
";
        let err = parse_relive_playlist(content, &base()).unwrap_err();
        assert!(matches!(err, RelivError::PlaylistMalformed(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = parse_relive_playlist("<html>503</html>", &base()).unwrap_err();
        assert!(matches!(err, RelivError::PlaylistMalformed(_)));
    }
}
