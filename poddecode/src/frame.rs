//! MPEG audio frame scanner.
//!
//! The scanner sits between the network and minimp3. It strips leading ID3v2
//! tags, finds the first frame sync, then checks that every following frame
//! starts exactly where the previous one ended. Only whole frames leave the
//! scanner, so the decoder never sees a partial frame or bytes from a corrupt
//! region.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::DecodeError;

/// The only sample rate the playback chain accepts.
pub const SUPPORTED_SAMPLE_RATE: u32 = 44_100;

const HEADER_LEN: usize = 4;
const ID3V2_HEADER_LEN: usize = 10;
const ID3V2_FOOTER_LEN: u64 = 10;

/// Bytes of garbage tolerated before the first frame sync.
const MAX_LEADING_JUNK: u64 = 64 * 1024;

/// Tags appended after the audio data (ID3v1, APEv2, Lyrics3).
const TRAILER_TAGS: [&[u8]; 3] = [b"TAG", b"APETAGEX", b"LYRICSBEGIN"];

const MPEG1_L3_KBPS: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const MPEG2_L3_KBPS: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// A decoded 4-byte MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: u8,
    pub bitrate_index: u8,
    pub sample_rate: u32,
    pub padding: bool,
    pub mono: bool,
}

impl FrameHeader {
    /// Parses a header from the first four bytes of `bytes`.
    ///
    /// Returns `None` when the bytes cannot start an MPEG audio frame
    /// (no sync word, reserved version, layer, bitrate or sample rate).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        let layer = match (bytes[1] >> 1) & 0x03 {
            1 => 3,
            2 => 2,
            3 => 1,
            _ => return None,
        };
        let bitrate_index = bytes[2] >> 4;
        if bitrate_index == 0x0F {
            return None;
        }
        let base_rate = match (bytes[2] >> 2) & 0x03 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        Some(Self {
            version,
            layer,
            bitrate_index,
            sample_rate,
            padding: (bytes[2] >> 1) & 0x01 == 1,
            mono: bytes[3] >> 6 == 0x03,
        })
    }

    pub fn channels(&self) -> u8 {
        if self.mono { 1 } else { 2 }
    }

    /// Layer III bitrate in kbit/s, `None` for other layers and free format.
    pub fn bitrate_kbps(&self) -> Option<u32> {
        if self.layer != 3 || self.bitrate_index == 0 {
            return None;
        }
        let table = match self.version {
            MpegVersion::Mpeg1 => &MPEG1_L3_KBPS,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => &MPEG2_L3_KBPS,
        };
        Some(table[self.bitrate_index as usize])
    }

    /// Total frame size in bytes, header included.
    pub fn frame_len(&self) -> Option<usize> {
        let kbps = self.bitrate_kbps()?;
        let slot = match self.version {
            MpegVersion::Mpeg1 => 144,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72,
        };
        Some((slot * kbps * 1000 / self.sample_rate) as usize + usize::from(self.padding))
    }

    /// Why the playback chain cannot use this stream, if it cannot.
    pub fn unsupported_reason(&self) -> Option<String> {
        if self.layer != 3 {
            return Some(format!("MPEG layer {} audio", self.layer));
        }
        if self.bitrate_index == 0 {
            return Some("free-format bitrate".into());
        }
        if self.sample_rate != SUPPORTED_SAMPLE_RATE {
            return Some(format!("sample rate {} Hz", self.sample_rate));
        }
        None
    }

    fn same_stream(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    Start,
    SkipTag(u64),
    Searching,
    Synced(FrameHeader),
    Trailer,
}

enum TrailerMatch {
    Full,
    Partial,
    No,
}

fn trailer_match(bytes: &[u8]) -> TrailerMatch {
    for tag in TRAILER_TAGS {
        if bytes.starts_with(tag) {
            return TrailerMatch::Full;
        }
        if bytes.len() < tag.len() && tag.starts_with(bytes) {
            return TrailerMatch::Partial;
        }
    }
    TrailerMatch::No
}

fn syncsafe(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(4)
        .fold(0u64, |acc, b| (acc << 7) | u64::from(b & 0x7F))
}

/// Incremental frame boundary validator.
///
/// Feed it with [`push`](Self::push) as bytes arrive and call
/// [`finish`](Self::finish) at end of input. Each call returns the whole
/// frames completed by the new data.
pub struct FrameScanner {
    buf: BytesMut,
    offset: u64,
    state: ScanState,
    junk: u64,
    unsupported: Option<String>,
    frames: u64,
    first: Option<FrameHeader>,
    failed: Option<DecodeError>,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            offset: 0,
            state: ScanState::Start,
            junk: 0,
            unsupported: None,
            frames: 0,
            first: None,
            failed: None,
        }
    }

    /// Number of whole frames emitted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Header of the first synced frame.
    pub fn first_header(&self) -> Option<FrameHeader> {
        self.first
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Option<Bytes>, DecodeError> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }
        if matches!(self.state, ScanState::Trailer) {
            self.offset += data.len() as u64;
            return Ok(None);
        }
        self.buf.extend_from_slice(data);
        self.scan(false)
    }

    pub fn finish(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }
        let frames = self.scan(true)?;
        if self.frames == 0 {
            return Err(DecodeError::Decode(
                "stream contained no MPEG audio frames".into(),
            ));
        }
        Ok(frames)
    }

    /// Error found by the last call after it had already completed frames.
    pub fn take_failure(&mut self) -> Option<DecodeError> {
        self.failed.take()
    }

    fn consume(&mut self, n: usize) {
        self.buf.advance(n);
        self.offset += n as u64;
    }

    /// Frames completed before an error are still returned; the error is
    /// reported by the next call.
    fn scan(&mut self, eof: bool) -> Result<Option<Bytes>, DecodeError> {
        let mut out = BytesMut::new();
        let result = self.scan_into(eof, &mut out);

        match (result, out.is_empty()) {
            (Ok(()), true) => Ok(None),
            (Ok(()), false) => Ok(Some(out.freeze())),
            (Err(err), true) => Err(err),
            (Err(err), false) => {
                self.failed = Some(err);
                Ok(Some(out.freeze()))
            }
        }
    }

    fn scan_into(&mut self, eof: bool, out: &mut BytesMut) -> Result<(), DecodeError> {
        loop {
            match self.state {
                ScanState::Start => {
                    if self.buf.len() < ID3V2_HEADER_LEN && !eof {
                        break;
                    }
                    if self.buf.len() >= ID3V2_HEADER_LEN && self.buf.starts_with(b"ID3") {
                        let footer = if self.buf[5] & 0x10 != 0 {
                            ID3V2_FOOTER_LEN
                        } else {
                            0
                        };
                        let total =
                            ID3V2_HEADER_LEN as u64 + syncsafe(&self.buf[6..10]) + footer;
                        debug!(offset = self.offset, size = total, "Skipping ID3v2 tag");
                        self.state = ScanState::SkipTag(total);
                    } else {
                        self.state = ScanState::Searching;
                    }
                }
                ScanState::SkipTag(remaining) => {
                    let n = remaining.min(self.buf.len() as u64) as usize;
                    self.consume(n);
                    let left = remaining - n as u64;
                    if left == 0 {
                        self.state = ScanState::Start;
                        continue;
                    }
                    self.state = ScanState::SkipTag(left);
                    if eof {
                        return Err(DecodeError::Decode(
                            "stream ended inside a leading ID3v2 tag".into(),
                        ));
                    }
                    break;
                }
                ScanState::Searching => match self.find_sync(eof)? {
                    Some(header) => {
                        debug!(
                            offset = self.offset,
                            bitrate_kbps = header.bitrate_kbps().unwrap_or_default(),
                            channels = header.channels(),
                            "MPEG frame sync found"
                        );
                        self.first = Some(header);
                        self.state = ScanState::Synced(header);
                    }
                    None => break,
                },
                ScanState::Synced(reference) => {
                    if self.buf.len() < HEADER_LEN {
                        if eof && !self.buf.is_empty() {
                            return Err(DecodeError::Truncated {
                                offset: self.offset,
                                missing: HEADER_LEN - self.buf.len(),
                            });
                        }
                        break;
                    }

                    match FrameHeader::parse(&self.buf) {
                        Some(header) if header.same_stream(&reference) => {
                            let Some(len) = header.frame_len() else {
                                return Err(DecodeError::Unsupported(
                                    "free-format bitrate".into(),
                                ));
                            };
                            if self.buf.len() < len {
                                if eof {
                                    return Err(DecodeError::Truncated {
                                        offset: self.offset,
                                        missing: len - self.buf.len(),
                                    });
                                }
                                break;
                            }
                            trace!(offset = self.offset, len, "frame");
                            out.extend_from_slice(&self.buf[..len]);
                            self.consume(len);
                            self.frames += 1;
                        }
                        _ => match trailer_match(&self.buf) {
                            TrailerMatch::Full => {
                                debug!(offset = self.offset, "Trailing tag found, ignoring the rest of the stream");
                                let n = self.buf.len();
                                self.consume(n);
                                self.state = ScanState::Trailer;
                            }
                            TrailerMatch::Partial if !eof => break,
                            _ => {
                                return Err(DecodeError::Corrupt {
                                    offset: self.offset,
                                    reason: "expected an MPEG frame header".into(),
                                });
                            }
                        },
                    }
                }
                ScanState::Trailer => {
                    let n = self.buf.len();
                    self.consume(n);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Looks for a frame header confirmed by the header that follows it.
    ///
    /// Bytes ruled out as junk are consumed. Returns `None` when more input
    /// is needed.
    fn find_sync(&mut self, eof: bool) -> Result<Option<FrameHeader>, DecodeError> {
        let mut i = 0;

        while i + HEADER_LEN <= self.buf.len() {
            let Some(header) = FrameHeader::parse(&self.buf[i..]) else {
                i += 1;
                continue;
            };

            match header.frame_len() {
                Some(len) => {
                    let next = i + len;
                    let confirmed = if next + HEADER_LEN <= self.buf.len() {
                        let tail = &self.buf[next..];
                        FrameHeader::parse(tail).is_some_and(|h| h.same_stream(&header))
                            || matches!(trailer_match(tail), TrailerMatch::Full)
                    } else if eof {
                        next <= self.buf.len()
                    } else {
                        // wait for the bytes that confirm or refute this candidate
                        self.discard_junk(i)?;
                        return Ok(None);
                    };

                    if confirmed {
                        if let Some(reason) = header.unsupported_reason() {
                            return Err(DecodeError::Unsupported(reason));
                        }
                        self.discard_junk(i)?;
                        return Ok(Some(header));
                    }
                }
                None => {
                    if let Some(reason) = header.unsupported_reason() {
                        self.unsupported.get_or_insert(reason);
                    }
                }
            }
            i += 1;
        }

        if eof {
            return Err(self.no_sync_error());
        }
        self.discard_junk(i)?;
        Ok(None)
    }

    fn discard_junk(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > 0 {
            trace!(offset = self.offset, bytes = n, "Skipping bytes before frame sync");
            self.junk += n as u64;
            self.consume(n);
        }
        if self.junk > MAX_LEADING_JUNK {
            return Err(self.no_sync_error());
        }
        Ok(())
    }

    fn no_sync_error(&mut self) -> DecodeError {
        match self.unsupported.take() {
            Some(reason) => DecodeError::Unsupported(reason),
            None => DecodeError::Decode(format!(
                "no MPEG audio frame sync found after {} bytes",
                self.junk + self.buf.len() as u64
            )),
        }
    }
}
