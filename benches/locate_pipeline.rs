use chrono::{Duration, TimeZone, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use relive::chapters::map_chapters;
use relive::hls::locator::consume_playlist;
use relive::hls::parse_relive_playlist;
use relive::models::{BroadcastEvent, ProgramItem};
use url::Url;

/// One archive hour: 360 ten-second segments.
fn hour_playlist() -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n\
         #EXT-X-PROGRAM-DATE-TIME:2024-03-01T23:00:00.000+0100\n",
    );
    for i in 0..360 {
        out.push_str(&format!("#EXTINF:10.0,\nseg-{i}.aac\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

fn bench_parse(c: &mut Criterion) {
    let content = hour_playlist();
    let base = Url::parse("https://cdn.example.com/relive/2024-03-01/23+0100/playlist.m3u8")
        .expect("valid base url");

    c.bench_function("parse_hour_playlist", |b| {
        b.iter(|| parse_relive_playlist(black_box(&content), &base))
    });
}

fn bench_consume(c: &mut Criterion) {
    let base = Url::parse("https://cdn.example.com/relive/2024-03-01/23+0100/playlist.m3u8")
        .expect("valid base url");
    let spec = parse_relive_playlist(&hour_playlist(), &base).expect("valid playlist");
    let program_start = spec.program_start.expect("program start present");
    let window_end = program_start + Duration::minutes(50);

    c.bench_function("consume_hour_playlist", |b| {
        b.iter(|| {
            let mut cursor = program_start + Duration::minutes(5);
            let mut refs = Vec::new();
            consume_playlist(&spec, program_start, &mut cursor, window_end, &mut refs);
            refs
        })
    });
}

fn bench_chapters(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
    let items = (0..120)
        .rev()
        .map(|i| ProgramItem {
            start: start + Duration::seconds(i * 60),
            duration_seconds: Some(55.0),
            performer: Some(format!("Artist {i}")),
            author: None,
            title: Some(format!("Track {i}")),
        })
        .collect();
    let event = BroadcastEvent {
        start,
        end: start + Duration::hours(2),
        items,
    };

    c.bench_function("map_chapters_two_hours", |b| {
        b.iter(|| map_chapters(black_box(&event)))
    });
}

criterion_group!(benches, bench_parse, bench_consume, bench_chapters);
criterion_main!(benches);
