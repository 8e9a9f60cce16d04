//! Demultiplex a raw GNSS byte stream into RTCM3, UBX and NMEA frames.
//!
//! Responsibilities:
//! - Buffer bytes across arbitrary chunk boundaries
//! - Detect sync markers at the buffer head (RTCM3 `0xD3`, UBX `0xB5 0x62`, NMEA `$`)
//! - Validate length and checksum before emitting a frame
//! - Resynchronize one byte at a time on anything else
//!
//! Every wait/discard decision looks only at the buffered bytes of the
//! candidate frame, so the emitted frame sequence does not depend on how the
//! input was chunked.

use log::{debug, trace};

use crate::decode::decode;
use crate::types::{Message, Protocol};
use crate::{nmea, rtcm, ubx};

// ---------------------------------------------------------------------------
// Frame checks (shared by the protocol modules)
// ---------------------------------------------------------------------------

/// Why a candidate frame at the buffer head was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// Sync byte not followed by a valid header
    BadHeader,
    /// CRC / Fletcher mismatch
    Checksum,
    /// Declared or scanned length above the protocol limit
    TooLong,
    /// Framing violation inside the candidate (NMEA)
    Malformed,
}

/// Result of checking the bytes at the buffer head against one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// More bytes are needed before a decision can be made.
    Incomplete,
    /// Not a frame; drop one byte and rescan.
    Invalid(Discard),
    /// A complete, validated frame of this many bytes.
    Complete(usize),
}

// ---------------------------------------------------------------------------
// RawFrame
// ---------------------------------------------------------------------------

/// A complete frame cut from the stream. Only frames whose length and
/// checksum validated are emitted; rejected candidates show up in
/// [`DemuxStats`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub protocol: Protocol,
    pub bytes: Vec<u8>,
}

/// Running demultiplexer counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemuxStats {
    pub bytes_in: u64,
    pub rtcm_frames: u64,
    pub ubx_frames: u64,
    pub nmea_frames: u64,
    pub checksum_failures: u64,
    pub bytes_skipped: u64,
    /// Frames that passed framing but produced no message
    pub undecodable: u64,
}

impl DemuxStats {
    pub fn frames(&self) -> u64 {
        self.rtcm_frames + self.ubx_frames + self.nmea_frames
    }
}

// ---------------------------------------------------------------------------
// Demuxer
// ---------------------------------------------------------------------------

/// Streaming demultiplexer. One instance per byte stream.
#[derive(Debug, Default)]
pub struct Demuxer {
    buffer: Vec<u8>,
    pub stats: DemuxStats,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every message that became complete.
    pub fn ingest(&mut self, data: &[u8]) -> Vec<Message> {
        let frames = self.extract(data);
        let mut messages = Vec::with_capacity(frames.len());
        for frame in &frames {
            match decode(frame) {
                Some(msg) => messages.push(msg),
                None => {
                    self.stats.undecodable += 1;
                    debug!("{} frame of {} bytes did not decode", frame.protocol, frame.bytes.len());
                }
            }
        }
        messages
    }

    /// Append bytes and return the complete frames without decoding them.
    pub fn extract(&mut self, data: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(data);
        self.stats.bytes_in += data.len() as u64;

        let mut frames = Vec::new();
        let mut cursor = 0;

        while cursor < self.buffer.len() {
            let head = &self.buffer[cursor..];
            let (protocol, check) = match check_head(head) {
                Some(found) => found,
                None => {
                    trace!("skipping byte 0x{:02X}", head[0]);
                    self.stats.bytes_skipped += 1;
                    cursor += 1;
                    continue;
                }
            };

            match check {
                FrameCheck::Incomplete => break,
                FrameCheck::Invalid(reason) => {
                    if reason == Discard::Checksum {
                        self.stats.checksum_failures += 1;
                        debug!("{protocol} checksum mismatch, resyncing");
                    } else {
                        trace!("{protocol} candidate rejected: {reason:?}");
                    }
                    self.stats.bytes_skipped += 1;
                    cursor += 1;
                }
                FrameCheck::Complete(len) => {
                    match protocol {
                        Protocol::Rtcm3 => self.stats.rtcm_frames += 1,
                        Protocol::Ubx => self.stats.ubx_frames += 1,
                        Protocol::Nmea => self.stats.nmea_frames += 1,
                    }
                    frames.push(RawFrame {
                        protocol,
                        bytes: head[..len].to_vec(),
                    });
                    cursor += len;
                }
            }
        }

        self.buffer.drain(..cursor);
        frames
    }

    /// Bytes retained while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered bytes. Counters are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Match the sync pattern at the head of `buf` in priority order.
fn check_head(buf: &[u8]) -> Option<(Protocol, FrameCheck)> {
    match buf.first()? {
        &rtcm::PREAMBLE => Some((Protocol::Rtcm3, rtcm::check_frame(buf))),
        &b if b == ubx::SYNC[0] => Some((Protocol::Ubx, ubx::check_frame(buf))),
        b'$' => Some((Protocol::Nmea, nmea::check_frame(buf))),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
