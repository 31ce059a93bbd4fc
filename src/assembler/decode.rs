//! Segment decoding to interleaved 16-bit PCM.
//!
//! MPEG-TS segments are demuxed to their audio elementary stream first; the
//! elementary stream (or a raw ADTS/MP3 segment) is then decoded with
//! symphonia. Transport packets and frames that fail to parse are dropped
//! and counted, the rest of the segment is still used.

use crate::error::{RelivError, Result};
use mpeg2ts::ts::{ReadTsPacket, TsPacketReader, TsPayload};
use std::cell::Cell;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;

/// Give up on a segment after this many consecutive unreadable packets.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 64;

/// Sample rate and channel count of decoded PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// PCM decoded from one segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedSegment {
    /// `None` when nothing could be decoded.
    pub format: Option<PcmFormat>,
    /// Interleaved samples.
    pub samples: Vec<i16>,
    /// Frames (or transport packets) dropped as corrupt.
    pub skipped_frames: u64,
}

/// Turns the bytes of one media segment into PCM.
///
/// Implementations must recover from corrupt frames themselves and only
/// return an error when decoding cannot proceed at all.
pub trait SegmentDecoder: Send + Sync {
    fn decode(&self, data: &[u8], url: &str) -> Result<DecodedSegment>;
}

/// Decoder for MPEG-TS, ADTS AAC and MP3 segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl SegmentDecoder for SymphoniaDecoder {
    fn decode(&self, data: &[u8], url: &str) -> Result<DecodedSegment> {
        let mut hint = Hint::new();

        let (elementary, transport_skipped) = if data.first() == Some(&TS_SYNC_BYTE) {
            let (packets, dropped) = resync_ts_packets(data);
            let demuxed = demux_ts_audio(&packets);
            if let Some(extension) = demuxed.extension {
                hint.with_extension(extension);
            }
            (demuxed.data, dropped + demuxed.errors)
        } else {
            if let Some(extension) = url_extension(url) {
                hint.with_extension(extension);
            }
            (data.to_vec(), 0)
        };

        if elementary.is_empty() {
            warn!("Segment {} carried no audio payload", url);
            return Ok(DecodedSegment {
                skipped_frames: transport_skipped.max(1),
                ..Default::default()
            });
        }

        let mut decoded = decode_elementary(elementary, &hint, url)?;
        decoded.skipped_frames += transport_skipped;
        Ok(decoded)
    }
}

fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    let (_, extension) = name.rsplit_once('.')?;
    Some(extension)
}

/// Keep only 188-byte packets that start on a sync byte, skipping garbage
/// between them. Returns the packets and the number of resyncs needed.
pub fn resync_ts_packets(data: &[u8]) -> (Vec<u8>, u64) {
    let mut packets = Vec::with_capacity(data.len());
    let mut resyncs = 0u64;
    let mut offset = 0usize;
    let mut in_sync = true;

    while offset + TS_PACKET_SIZE <= data.len() {
        if data[offset] == TS_SYNC_BYTE {
            packets.extend_from_slice(&data[offset..offset + TS_PACKET_SIZE]);
            offset += TS_PACKET_SIZE;
            in_sync = true;
        } else {
            if in_sync {
                resyncs += 1;
                in_sync = false;
            }
            offset += 1;
        }
    }

    (packets, resyncs)
}

struct DemuxedAudio {
    data: Vec<u8>,
    extension: Option<&'static str>,
    errors: u64,
}

/// Byte source for the TS reader whose position the demuxer can move.
///
/// The reader may fail halfway through a packet; the shared position lets
/// the demuxer resume at the next packet boundary with the PAT/PMT state the
/// reader has already learned.
struct PacketSource<'a> {
    data: &'a [u8],
    position: &'a Cell<usize>,
}

impl Read for PacketSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let start = self.position.get().min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position.set(start + n);
        Ok(n)
    }
}

/// Concatenate the PES payloads of the audio streams in a TS segment.
///
/// `packets` must be packet aligned (see [`resync_ts_packets`]). A packet the
/// reader rejects is counted and skipped; demuxing continues with the next.
fn demux_ts_audio(packets: &[u8]) -> DemuxedAudio {
    let position = Cell::new(0usize);
    let mut reader = TsPacketReader::new(PacketSource {
        data: packets,
        position: &position,
    });

    let mut audio_pids: HashSet<u16> = HashSet::new();
    let mut extension = None;
    let mut errors = 0u64;
    let mut data = Vec::with_capacity(packets.len());

    loop {
        let packet_start = position.get();
        match reader.read_ts_packet() {
            Ok(Some(packet)) => {
                let pid = packet.header.pid.as_u16();
                match packet.payload {
                    Some(TsPayload::Pmt(pmt)) => {
                        for es in &pmt.es_info {
                            // MPEG-1/2 audio (0x03, 0x04), AAC ADTS (0x0F), AAC LATM (0x11)
                            let kind = match es.stream_type as u8 {
                                0x03 | 0x04 => Some("mp3"),
                                0x0F | 0x11 => Some("aac"),
                                _ => None,
                            };
                            if let Some(kind) = kind {
                                audio_pids.insert(es.elementary_pid.as_u16());
                                extension.get_or_insert(kind);
                            }
                        }
                    }
                    // Payload-start packets carry the PES header; the rest
                    // of the PES arrives as raw continuation packets.
                    Some(TsPayload::Pes(pes)) if audio_pids.contains(&pid) => {
                        data.extend_from_slice(&pes.data)
                    }
                    Some(TsPayload::Raw(bytes)) if audio_pids.contains(&pid) => {
                        data.extend_from_slice(&bytes)
                    }
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Skipping unreadable TS packet at byte {}: {}", packet_start, e);
                errors += 1;
                position.set(packet_start + TS_PACKET_SIZE);
            }
        }
    }

    DemuxedAudio {
        data,
        extension,
        errors,
    }
}

fn decode_elementary(data: Vec<u8>, hint: &Hint, url: &str) -> Result<DecodedSegment> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let probed = match symphonia::default::get_probe().format(
        hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            warn!("Segment {} is not decodable audio, skipping it: {}", url, e);
            return Ok(DecodedSegment {
                skipped_frames: 1,
                ..Default::default()
            });
        }
    };
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| RelivError::Decode(format!("no audio track in {url}")))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| RelivError::Decode(format!("unsupported codec in {url}: {e}")))?;

    let mut segment = DecodedSegment::default();
    let mut consecutive_errors = 0u32;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Unreadable packet in {}: {}", url, e);
                segment.skipped_frames += 1;
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!("Too many unreadable packets in {}, dropping the rest", url);
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!("Stopping decode of {}: {}", url, e);
                break;
            }
        };
        consecutive_errors = 0;

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frame_format = PcmFormat {
                    sample_rate: spec.rate,
                    channels: spec.channels.count() as u16,
                };
                match segment.format {
                    None => segment.format = Some(frame_format),
                    Some(existing) if existing != frame_format => {
                        warn!(
                            "Frame format changed inside {} ({:?} -> {:?}), skipping frame",
                            url, existing, frame_format
                        );
                        segment.skipped_frames += 1;
                        continue;
                    }
                    Some(_) => {}
                }

                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                segment.samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt frame in {}: {}", url, e);
                segment.skipped_frames += 1;
            }
            Err(SymphoniaError::IoError(e)) => {
                warn!("Skipping truncated frame in {}: {}", url, e);
                segment.skipped_frames += 1;
            }
            Err(e) => {
                return Err(RelivError::Decode(format!("{url}: {e}")));
            }
        }
    }

    Ok(segment)
}
