use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RelivError>;

/// Everything that can go wrong while reconstructing a broadcast.
///
/// Only a subset ever reaches the caller: the pipeline folds these into a
/// [`crate::pipeline::BroadcastOutcome`], so no variant is fatal to the process.
#[derive(Debug, Error)]
pub enum RelivError {
    /// A required playlist directive is missing or unparseable.
    #[error("Malformed playlist: {0}")]
    PlaylistMalformed(String),

    /// A playlist fetch failed in a way that is not "not yet available".
    #[error("Playlist fetch failed: {0}")]
    PlaylistFetch(String),

    /// The locator ran out of hour buckets before covering the window.
    #[error("Archive exhausted before window was covered: {0}")]
    ArchiveExhausted(String),

    /// A segment could not be fetched within the retry budget.
    #[error("Segment fetch failed for {url} after {attempts} attempts: {reason}")]
    SegmentFetch {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Decoder-level failure that is not a recoverable corrupt frame.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The encoder process could not be started, fed, or finished.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Assembly aborted; no output was committed.
    #[error("Assembly failed: {0}")]
    AssemblyFailed(String),

    #[error("Tagging failed: {0}")]
    Tagging(String),

    /// A scheduled broadcast whose window is empty or ends before it starts.
    #[error("Invalid broadcast window: {0}")]
    InvalidWindow(String),

    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelivError {
    /// Short stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RelivError::PlaylistMalformed(_) => "playlist_malformed",
            RelivError::PlaylistFetch(_) => "playlist_fetch",
            RelivError::ArchiveExhausted(_) => "archive_exhausted",
            RelivError::SegmentFetch { .. } => "segment_fetch",
            RelivError::Decode(_) => "decode",
            RelivError::Encode(_) => "encode",
            RelivError::AssemblyFailed(_) => "assembly_failed",
            RelivError::Tagging(_) => "tagging",
            RelivError::InvalidWindow(_) => "invalid_window",
            RelivError::InvalidTemplate(_) => "invalid_template",
            RelivError::InvalidUrl(_) => "invalid_url",
            RelivError::Config(_) => "config",
            RelivError::Http(_) => "http",
            RelivError::Io(_) => "io",
            RelivError::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_fetch_message_names_the_segment() {
        let err = RelivError::SegmentFetch {
            url: "https://cdn.example.com/seg-7.ts".to_string(),
            attempts: 3,
            reason: "HTTP 503".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("seg-7.ts"));
        assert!(msg.contains("3 attempts"));
        assert_eq!(err.kind(), "segment_fetch");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: RelivError = io.into();
        assert_eq!(err.kind(), "io");
    }
}
