//! Pipeline counters and timings, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the embedding binary installs a recorder.

use metrics::{counter, histogram};
use std::time::Instant;

/// Count a playlist fetch by outcome (`found`, `not_found`, `error`).
pub fn record_playlist_fetch(outcome: &'static str) {
    counter!("relive_playlist_fetches_total", "outcome" => outcome).increment(1);
}

/// Count one failed segment download attempt.
pub fn record_segment_attempt_failed() {
    counter!("relive_segment_attempt_failures_total").increment(1);
}

pub fn record_segment_fetched() {
    counter!("relive_segments_fetched_total").increment(1);
}

/// Count audio frames dropped because they failed to decode.
pub fn record_skipped_frames(count: u64) {
    if count > 0 {
        counter!("relive_skipped_frames_total").increment(count);
    }
}

/// Count a finished broadcast by outcome.
pub fn record_broadcast_outcome(outcome: &'static str) {
    counter!("relive_broadcasts_total", "outcome" => outcome).increment(1);
}

/// Record how long a pipeline stage took.
pub fn record_duration(stage: &'static str, start: Instant) {
    histogram!("relive_stage_duration_seconds", "stage" => stage)
        .record(start.elapsed().as_secs_f64());
}
