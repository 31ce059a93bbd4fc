pub mod fetcher;
pub mod locator;
pub mod parser;

pub use fetcher::{FetchOutcome, HttpPlaylistFetcher, PlaylistFetcher};
pub use locator::{ConsumeOutcome, Resolution, SegmentLocator, UrlTemplate};
pub use parser::{PlaylistSpec, parse_relive_playlist};
