//! Program items to chapter markers relative to the broadcast start.

use crate::models::{BroadcastEvent, Chapter, ProgramItem};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Map the event's program items to chapters.
///
/// Items are taken in start order. An item without a duration runs to the
/// end of the broadcast. An item that overruns the broadcast end is dropped
/// when more of it lies outside the broadcast than inside, otherwise it is
/// clipped. Items entirely outside the broadcast are dropped.
/// Ids are assigned sequentially over the kept items.
pub fn map_chapters(event: &BroadcastEvent) -> Vec<Chapter> {
    let duration_ms = event.duration_ms();

    let mut items: Vec<&ProgramItem> = event.items.iter().collect();
    items.sort_by_key(|item| item.start);

    let mut chapters = Vec::with_capacity(items.len());
    for item in items {
        let Some((start, end)) = clip_to_broadcast(item, event) else {
            continue;
        };

        let end_offset_ms = ceil_millis(end - event.start).min(duration_ms);
        let start_offset_ms = floor_millis(start - event.start).min(end_offset_ms);

        chapters.push(Chapter {
            id: chapters.len().to_string(),
            start_offset_ms,
            end_offset_ms,
            label: chapter_label(item),
        });
    }

    chapters
}

fn item_end(item: &ProgramItem, broadcast_end: DateTime<Utc>) -> DateTime<Utc> {
    match item.duration_seconds {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => {
            // Durations past the representable range run past any broadcast end.
            let micros = (seconds * 1_000_000.0).round();
            if micros >= i64::MAX as f64 {
                return DateTime::<Utc>::MAX_UTC;
            }
            item.start
                .checked_add_signed(Duration::microseconds(micros as i64))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        }
        Some(seconds) => {
            warn!(
                "Ignoring invalid duration {} for item at {}",
                seconds, item.start
            );
            broadcast_end
        }
        None => broadcast_end,
    }
}

fn clip_to_broadcast(
    item: &ProgramItem,
    event: &BroadcastEvent,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut end = item_end(item, event.end);

    if item.start >= event.end {
        debug!("Dropping item at {}: starts after broadcast end", item.start);
        return None;
    }

    if end > event.end {
        let outside = end - event.end;
        let inside = event.end - item.start;
        if outside > inside {
            debug!(
                "Dropping item at {}: {}s outside, {}s inside",
                item.start,
                outside.num_seconds(),
                inside.num_seconds()
            );
            return None;
        }
        end = event.end;
    }

    if end <= event.start && item.start < event.start {
        debug!("Dropping item at {}: ends before broadcast start", item.start);
        return None;
    }

    Some((item.start.max(event.start), end))
}

fn floor_millis(offset: Duration) -> u64 {
    offset.num_milliseconds().max(0) as u64
}

fn ceil_millis(offset: Duration) -> u64 {
    let whole = offset.num_milliseconds();
    let ceiled = if offset > Duration::milliseconds(whole) {
        whole + 1
    } else {
        whole
    };
    ceiled.max(0) as u64
}

/// `"<performer> <author> - <title>"`, leaving out empty parts.
pub fn chapter_label(item: &ProgramItem) -> String {
    let credits = [item.performer.as_deref(), item.author.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let title = item.title.as_deref().map(str::trim).unwrap_or_default();

    [credits.as_str(), title]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" - ")
}
