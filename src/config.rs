use crate::error::{RelivError, Result};
use crate::http_retry::{DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BITRATE_KBPS: u32 = 128;
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEV_PLAYLIST_URL_TEMPLATE: &str =
    "http://localhost:8080/relive/{date}/{hour}{offset}/playlist.m3u8";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub is_dev: bool,
    /// Hour playlist URL with `{date}`, `{hour}` and optional `{offset}`
    pub playlist_url_template: String,
    /// Directory receiving the finished files
    pub output_dir: PathBuf,
    /// JSON array of scheduled broadcasts to process
    pub broadcasts_file: PathBuf,
    /// Zone used to render hour buckets, file names and date tags
    pub timezone: Tz,
    /// Per-request timeout for playlist, segment and cover fetches
    pub fetch_timeout: Duration,
    pub segment_max_attempts: u32,
    pub segment_backoff: Duration,
    pub target_bitrate_kbps: u32,
    pub target_sample_rate: u32,
    pub ffmpeg_path: PathBuf,
    /// Station web page written as WORS (optional)
    pub station_url: Option<String>,
    /// ISO-639-2 language for COMM and TLAN frames
    pub tag_language: String,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, the archive
    /// template, output directory and broadcasts file are required.
    pub fn from_env() -> Result<Self> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let playlist_url_template = if is_dev {
            env::var("PLAYLIST_URL_TEMPLATE")
                .unwrap_or_else(|_| DEV_PLAYLIST_URL_TEMPLATE.to_string())
        } else {
            required("PLAYLIST_URL_TEMPLATE")?
        };

        let output_dir = if is_dev {
            env::var("OUTPUT_DIR").unwrap_or_else(|_| ".".to_string())
        } else {
            required("OUTPUT_DIR")?
        };

        let broadcasts_file = if is_dev {
            env::var("BROADCASTS_FILE").unwrap_or_else(|_| "broadcasts.json".to_string())
        } else {
            required("BROADCASTS_FILE")?
        };

        let timezone_name =
            env::var("BROADCAST_TIMEZONE").unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone_name.parse().map_err(|_| {
            RelivError::Config(format!("BROADCAST_TIMEZONE {timezone_name:?} is not a known zone"))
        })?;

        let fetch_timeout_secs = parsed("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?;
        let segment_max_attempts = parsed("SEGMENT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let segment_backoff_ms = parsed("SEGMENT_BACKOFF_MS", DEFAULT_BACKOFF_MS)?;
        let target_bitrate_kbps = parsed("TARGET_BITRATE_KBPS", DEFAULT_BITRATE_KBPS)?;
        let target_sample_rate = parsed("TARGET_SAMPLE_RATE", DEFAULT_SAMPLE_RATE)?;

        let ffmpeg_path = env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());
        let station_url = env::var("STATION_URL").ok().filter(|s| !s.trim().is_empty());
        let tag_language = env::var("TAG_LANGUAGE").unwrap_or_else(|_| "deu".to_string());

        Ok(Config {
            is_dev,
            playlist_url_template,
            output_dir: PathBuf::from(output_dir),
            broadcasts_file: PathBuf::from(broadcasts_file),
            timezone,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            segment_max_attempts,
            segment_backoff: Duration::from_millis(segment_backoff_ms),
            target_bitrate_kbps,
            target_sample_rate,
            ffmpeg_path: PathBuf::from(ffmpeg_path),
            station_url,
            tag_language,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| RelivError::Config(format!("{name} is required in production")))
}

/// Numeric variable with a default; a present but unparseable value is an
/// error rather than silently falling back.
fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelivError::Config(format!("{name} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Set env vars, run `f`, then restore original state.
    ///
    /// `set` holds vars to set, `unset` vars to remove before running `f`.
    fn with_env(set: &[(&str, &str)], unset: &[&str], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        // Save state for all touched vars
        let save_set: Vec<(&str, Option<String>)> = set
            .iter()
            .map(|(k, _)| (*k, std::env::var(k).ok()))
            .collect();
        let save_unset: Vec<(&str, Option<String>)> =
            unset.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for (k, v) in set {
            // SAFETY: serialized by ENV_LOCK, no other thread modifies env vars concurrently.
            unsafe { std::env::set_var(k, v) };
        }
        for k in unset {
            unsafe { std::env::remove_var(k) };
        }

        f();

        // Restore
        for (k, old) in save_set.into_iter().chain(save_unset) {
            match old {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    const ALL_VARS: &[&str] = &[
        "PLAYLIST_URL_TEMPLATE",
        "OUTPUT_DIR",
        "BROADCASTS_FILE",
        "BROADCAST_TIMEZONE",
        "FETCH_TIMEOUT_SECS",
        "SEGMENT_MAX_ATTEMPTS",
        "SEGMENT_BACKOFF_MS",
        "TARGET_BITRATE_KBPS",
        "TARGET_SAMPLE_RATE",
        "FFMPEG_PATH",
        "STATION_URL",
        "TAG_LANGUAGE",
    ];

    #[test]
    fn dev_mode_uses_defaults() {
        with_env(&[("DEV_MODE", "true")], ALL_VARS, || {
            let config = Config::from_env().expect("should succeed in dev mode");
            assert!(config.is_dev);
            assert_eq!(config.playlist_url_template, DEV_PLAYLIST_URL_TEMPLATE);
            assert_eq!(config.output_dir, PathBuf::from("."));
            assert_eq!(config.broadcasts_file, PathBuf::from("broadcasts.json"));
            assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
            assert_eq!(config.fetch_timeout, Duration::from_secs(5));
            assert_eq!(config.segment_max_attempts, 3);
            assert_eq!(config.segment_backoff, Duration::from_millis(3000));
            assert_eq!(config.target_bitrate_kbps, 128);
            assert_eq!(config.target_sample_rate, 44100);
            assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
            assert_eq!(config.station_url, None);
            assert_eq!(config.tag_language, "deu");
        });
    }

    #[test]
    fn prod_mode_requires_playlist_template() {
        with_env(&[], &["DEV_MODE", "PLAYLIST_URL_TEMPLATE"], || {
            let result = Config::from_env();
            assert!(matches!(result, Err(RelivError::Config(_))));
        });
    }

    #[test]
    fn prod_mode_requires_output_dir() {
        with_env(
            &[("PLAYLIST_URL_TEMPLATE", "https://a/{date}/{hour}.m3u8")],
            &["DEV_MODE", "OUTPUT_DIR"],
            || {
                let result = Config::from_env();
                assert!(result.is_err(), "Should fail without OUTPUT_DIR in prod mode");
            },
        );
    }

    #[test]
    fn prod_mode_requires_broadcasts_file() {
        with_env(
            &[
                ("PLAYLIST_URL_TEMPLATE", "https://a/{date}/{hour}.m3u8"),
                ("OUTPUT_DIR", "/srv/relive"),
            ],
            &["DEV_MODE", "BROADCASTS_FILE"],
            || {
                let result = Config::from_env();
                assert!(
                    result.is_err(),
                    "Should fail without BROADCASTS_FILE in prod mode"
                );
            },
        );
    }

    #[test]
    fn prod_mode_with_required_vars() {
        with_env(
            &[
                ("PLAYLIST_URL_TEMPLATE", "https://a/{date}/{hour}.m3u8"),
                ("OUTPUT_DIR", "/srv/relive"),
                ("BROADCASTS_FILE", "/srv/relive/schedule.json"),
            ],
            &["DEV_MODE"],
            || {
                let config = Config::from_env().unwrap();
                assert!(!config.is_dev);
                assert_eq!(config.output_dir, PathBuf::from("/srv/relive"));
            },
        );
    }

    #[test]
    fn timezone_parsed() {
        with_env(
            &[("DEV_MODE", "true"), ("BROADCAST_TIMEZONE", "America/New_York")],
            &[],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.timezone, chrono_tz::America::New_York);
            },
        );
    }

    #[test]
    fn unknown_timezone_rejected() {
        with_env(
            &[("DEV_MODE", "true"), ("BROADCAST_TIMEZONE", "Mars/Olympus_Mons")],
            &[],
            || {
                assert!(matches!(Config::from_env(), Err(RelivError::Config(_))));
            },
        );
    }

    #[test]
    fn retry_settings_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("SEGMENT_MAX_ATTEMPTS", "5"),
                ("SEGMENT_BACKOFF_MS", "250"),
            ],
            &[],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.segment_max_attempts, 5);
                assert_eq!(config.segment_backoff, Duration::from_millis(250));
            },
        );
    }

    #[test]
    fn invalid_number_rejected() {
        with_env(
            &[("DEV_MODE", "true"), ("FETCH_TIMEOUT_SECS", "soon")],
            &[],
            || {
                assert!(matches!(Config::from_env(), Err(RelivError::Config(_))));
            },
        );
    }

    #[test]
    fn blank_station_url_is_none() {
        with_env(&[("DEV_MODE", "true"), ("STATION_URL", " ")], &[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.station_url, None);
        });
    }
}
