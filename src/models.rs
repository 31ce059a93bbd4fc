//! Records exchanged between the schedule collaborator, the pipeline stages,
//! and the tagging collaborator.

use crate::error::{RelivError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` interval of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting empty or inverted intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(RelivError::InvalidWindow(format!(
                "start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// One program item (song, feature, interview) inside a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramItem {
    pub start: DateTime<Utc>,
    /// Length in seconds; absent means "runs until the broadcast ends".
    #[serde(default, rename = "duration")]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub performer: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Timing of a single broadcast as published by the schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<ProgramItem>,
}

impl BroadcastEvent {
    pub fn window(&self) -> Result<TimeWindow> {
        TimeWindow::new(self.start, self.end)
    }

    /// Broadcast length in whole milliseconds (sub-millisecond rest dropped).
    pub fn duration_ms(&self) -> u64 {
        (self.end - self.start).num_milliseconds().max(0) as u64
    }
}

/// Descriptive metadata accompanying a broadcast. Only used for tag values
/// and the output file name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastInfo {
    pub station: String,
    pub show: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
}

/// Pipeline input: timing plus descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledBroadcast {
    pub event: BroadcastEvent,
    pub info: BroadcastInfo,
}

/// A located media segment, in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReference {
    pub url: String,
    /// Position of the segment inside the hour playlist it came from.
    pub sequence_index: usize,
}

/// A chapter of the output file, relative to the file start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub id: String,
    pub start_offset_ms: u64,
    pub end_offset_ms: u64,
    pub label: String,
}
