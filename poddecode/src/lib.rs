//! # poddecode - streaming MP3 decoding for podplay
//!
//! Turns a compressed MPEG-1 Layer III byte stream into the PCM layout used by
//! the playback chain ([`PCM_FORMAT`]). Decoding is incremental: the input is
//! read as it arrives from the network and PCM is available through
//! `AsyncRead` as soon as the first frame is decoded.
//!
//! The input is validated frame by frame by a [`FrameScanner`] before it
//! reaches minimp3, so corruption and truncation are reported as typed
//! [`DecodeError`]s and no samples from a damaged region are emitted.

mod common;
mod error;
pub mod frame;
mod mp3;
mod pcm;
mod stream;

pub use error::DecodeError;
pub use frame::{FrameHeader, FrameScanner, MpegVersion, SUPPORTED_SAMPLE_RATE};
pub use mp3::{Mp3DecodedStream, decode_mp3_stream};
pub use pcm::{PCM_FORMAT, PcmFormat, StreamInfo};
pub use stream::ManagedAsyncReader;
