use crate::error::{RelivError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of asking the archive for one hour playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Raw playlist text.
    Found(String),
    /// The archive answered 404/410: this hour has not been published.
    NotFound,
}

/// Source of raw playlist text.
///
/// The HTTP implementation is [`HttpPlaylistFetcher`]; tests substitute
/// in-memory fetchers to drive the locator deterministically.
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    /// Fetch the playlist at `url`.
    ///
    /// Not-found is a normal outcome, every other failure is an error.
    async fn fetch_playlist(&self, url: &str) -> Result<FetchOutcome>;
}

/// Fetches playlists over HTTP with a fixed per-request timeout.
#[derive(Clone, Debug)]
pub struct HttpPlaylistFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpPlaylistFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl PlaylistFetcher for HttpPlaylistFetcher {
    async fn fetch_playlist(&self, url: &str) -> Result<FetchOutcome> {
        debug!("Fetching playlist {}", url);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RelivError::PlaylistFetch(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            crate::metrics::record_playlist_fetch("not_found");
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            warn!("Playlist fetch returned {} for {}", status, url);
            crate::metrics::record_playlist_fetch("error");
            return Err(RelivError::PlaylistFetch(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RelivError::PlaylistFetch(format!("{url}: {e}")))?;
        crate::metrics::record_playlist_fetch("found");
        Ok(FetchOutcome::Found(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpPlaylistFetcher {
        HttpPlaylistFetcher::new(Client::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/13/playlist.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .mount(&server)
            .await;

        let outcome = fetcher()
            .fetch_playlist(&format!("{}/13/playlist.m3u8", server.uri()))
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Found("#EXTM3U\n".to_string()));
    }

    #[tokio::test]
    async fn not_found_is_an_outcome_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = fetcher().fetch_playlist(&server.uri()).await.unwrap();
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn server_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = fetcher().fetch_playlist(&server.uri()).await.unwrap_err();
        assert!(matches!(err, RelivError::PlaylistFetch(_)));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("#EXTM3U\n")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpPlaylistFetcher::new(Client::new(), Duration::from_millis(50));
        let err = fetcher.fetch_playlist(&server.uri()).await.unwrap_err();
        assert!(matches!(err, RelivError::PlaylistFetch(_)));
    }
}
