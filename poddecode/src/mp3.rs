//! # MP3 Decoder Module
//!
//! Streaming MP3 decoding into the fixed playback PCM layout
//! (16-bit little-endian, interleaved stereo, 44.1 kHz).
//!
//! ## Architecture
//!
//! ```text
//! MP3 Input → [Ingest Task] → [Decode Task] → [Writer Task] → PCM Output (AsyncRead)
//!                  ↓              ↓                ↓
//!           frame scanner    minimp3 in a     duplex stream
//!           + mpsc channel   blocking thread
//! ```
//!
//! - **Ingest Task**: reads the input in chunks, runs the [`FrameScanner`]
//!   and forwards whole frames only
//! - **Decode Task**: decodes frames with minimp3 and upmixes mono to stereo
//! - **Writer Task**: writes PCM into a bounded duplex stream
//!
//! Every queue is bounded: when the consumer stops reading, the writer
//! blocks, then the decoder, then the ingest task stops reading its input.
//!
//! ## Example
//!
//! ```no_run
//! use poddecode::decode_mp3_stream;
//! use tokio::fs::File;
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = File::open("episode.mp3").await?;
//!     let mut stream = decode_mp3_stream(file).await?;
//!     println!("source channels: {}", stream.info().source_channels);
//!
//!     let mut pcm = Vec::new();
//!     stream.read_to_end(&mut pcm).await?;
//!
//!     // Errors found after the first frame are reported here
//!     stream.wait().await?;
//!     Ok(())
//! }
//! ```

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error, Frame};
use tokio::{
    io::{self as tokio_io, AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace};

use crate::{
    common::ChannelReader,
    error::DecodeError,
    frame::{FrameScanner, SUPPORTED_SAMPLE_RATE},
    pcm::{PCM_FORMAT, StreamInfo},
    stream::ManagedAsyncReader,
};

/// Size of chunks when reading MP3 input data (16 KB).
const INGEST_CHUNK_SIZE: usize = 16 * 1024;

/// Channel capacity between tasks.
///
/// If the decoder can't keep up, the ingest task waits before reading more.
const CHANNEL_CAPACITY: usize = 8;

/// Size of the duplex stream buffer for PCM output (256 KB).
const DUPLEX_BUFFER_SIZE: usize = 256 * 1024;

/// An async stream of decoded PCM.
///
/// Implements `AsyncRead`; the decoding happens in background tasks which are
/// aborted when the stream is dropped.
pub struct Mp3DecodedStream {
    info: StreamInfo,
    reader: ManagedAsyncReader,
}

impl Mp3DecodedStream {
    /// Returns metadata about the decoded MP3 stream.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Consumes the stream and returns its components.
    pub fn into_parts(self) -> (StreamInfo, ManagedAsyncReader) {
        (self.info, self.reader)
    }

    /// Waits for the background decoding tasks to complete.
    ///
    /// Call it once the PCM output reached end of stream: a corrupt or
    /// truncated input ends the output early and the cause is returned here.
    pub async fn wait(self) -> Result<(), DecodeError> {
        self.reader.wait().await
    }

    /// Aborts decoding and closes the compressed input.
    pub fn cancel(mut self) {
        debug!("MP3 decoding cancelled");
        self.reader.abort();
    }
}

impl AsyncRead for Mp3DecodedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Decodes an MP3 stream into interleaved stereo 16-bit PCM at 44.1 kHz.
///
/// Resolves once the first frame is decoded, so an input that is not a
/// supported MP3 stream fails here rather than on the first read.
pub async fn decode_mp3_stream<R>(reader: R) -> Result<Mp3DecodedStream, DecodeError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (ingest_tx, ingest_rx) = mpsc::channel::<Result<Bytes, DecodeError>>(CHANNEL_CAPACITY);
    let ingest_handle = spawn_ingest_task(reader, ingest_tx);

    let (pcm_tx, pcm_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (pcm_reader, pcm_writer) = tokio_io::duplex(DUPLEX_BUFFER_SIZE);
    let (info_tx, info_rx) = oneshot::channel::<Result<StreamInfo, DecodeError>>();

    let blocking_handle =
        tokio::task::spawn_blocking(move || decode_frames(ingest_rx, pcm_tx, info_tx));
    let writer_handle = spawn_writer_task(pcm_rx, pcm_writer, blocking_handle);

    // Built before waiting so that dropping this future tears everything down
    let reader = ManagedAsyncReader::new("mp3-decode-writer", pcm_reader, writer_handle)
        .with_companion(ingest_handle.abort_handle());

    let info = match info_rx.await {
        Ok(Ok(info)) => info,
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            return Err(reader.wait().await.err().unwrap_or(DecodeError::ChannelClosed));
        }
    };
    debug!(
        source_channels = info.source_channels,
        bitrate_kbps = info.bitrate_kbps,
        "MP3 stream opened"
    );

    Ok(Mp3DecodedStream { info, reader })
}

fn spawn_ingest_task<R>(
    mut reader: R,
    ingest_tx: mpsc::Sender<Result<Bytes, DecodeError>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut scanner = FrameScanner::new();
        let mut buf = vec![0u8; INGEST_CHUNK_SIZE];

        loop {
            let (step, done) = match reader.read(&mut buf).await {
                Ok(0) => (scanner.finish(), true),
                Ok(n) => (scanner.push(&buf[..n]), false),
                Err(err) => (Err(DecodeError::from(err)), true),
            };

            let failure = match step {
                Ok(Some(frames)) => {
                    if ingest_tx.send(Ok(frames)).await.is_err() {
                        return;
                    }
                    scanner.take_failure()
                }
                Ok(None) => scanner.take_failure(),
                Err(err) => Some(err),
            };

            if let Some(err) = failure {
                debug!(frames = scanner.frames(), error = %err, "MP3 ingest stopped");
                let _ = ingest_tx.send(Err(err)).await;
                return;
            }
            if done {
                debug!(frames = scanner.frames(), "MP3 ingest reached end of input");
                return;
            }
        }
    })
}

fn spawn_writer_task(
    mut pcm_rx: mpsc::Receiver<Vec<u8>>,
    mut pcm_writer: DuplexStream,
    blocking_handle: JoinHandle<Result<(), DecodeError>>,
) -> JoinHandle<Result<(), DecodeError>> {
    tokio::spawn(async move {
        while let Some(chunk) = pcm_rx.recv().await {
            if chunk.is_empty() {
                continue;
            }
            pcm_writer.write_all(&chunk).await?;
        }
        pcm_writer.shutdown().await?;
        match blocking_handle.await {
            Ok(res) => res,
            Err(err) => Err(DecodeError::TaskJoin {
                role: "mp3-decode",
                details: err.to_string(),
            }),
        }
    })
}

fn report_info(
    info_tx: &mut Option<oneshot::Sender<Result<StreamInfo, DecodeError>>>,
    err: &DecodeError,
) {
    if let Some(tx) = info_tx.take() {
        let _ = tx.send(Err(err.clone()));
    }
}

fn check_frame(frame: &Frame) -> Result<(), DecodeError> {
    if frame.layer != 3 {
        return Err(DecodeError::Unsupported(format!(
            "MPEG layer {} audio",
            frame.layer
        )));
    }
    if frame.sample_rate != SUPPORTED_SAMPLE_RATE as i32 {
        return Err(DecodeError::Unsupported(format!(
            "sample rate {} Hz",
            frame.sample_rate
        )));
    }
    if frame.channels == 0 || frame.channels > 2 {
        return Err(DecodeError::Decode(format!(
            "MP3 frame reported {} channels",
            frame.channels
        )));
    }
    Ok(())
}

/// Converts a decoded frame to interleaved stereo little-endian bytes.
fn frame_to_stereo_le(samples: &[i16], channels: usize) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2 * (3 - channels));
    if channels == 1 {
        for sample in samples {
            let bytes = sample.to_le_bytes();
            pcm.extend_from_slice(&bytes);
            pcm.extend_from_slice(&bytes);
        }
    } else {
        for sample in samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
    }
    pcm
}

fn decode_frames(
    ingest_rx: mpsc::Receiver<Result<Bytes, DecodeError>>,
    pcm_tx: mpsc::Sender<Vec<u8>>,
    info_tx: oneshot::Sender<Result<StreamInfo, DecodeError>>,
) -> Result<(), DecodeError> {
    let mut decoder = MiniMp3Decoder::new(ChannelReader::new(ingest_rx));
    let mut info_tx = Some(info_tx);
    let mut frames = 0u64;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if let Err(err) = check_frame(&frame) {
                    report_info(&mut info_tx, &err);
                    return Err(err);
                }

                if let Some(tx) = info_tx.take() {
                    let info = StreamInfo {
                        format: PCM_FORMAT,
                        source_channels: frame.channels as u8,
                        bitrate_kbps: frame.bitrate.max(0) as u32,
                    };
                    if tx.send(Ok(info)).is_err() {
                        // Consumer dropped; stop decoding early.
                        return Ok(());
                    }
                }

                if frame.data.is_empty() {
                    continue;
                }
                frames += 1;
                trace!(frames, samples = frame.data.len(), "decoded frame");
                if pcm_tx
                    .blocking_send(frame_to_stereo_le(&frame.data, frame.channels))
                    .is_err()
                {
                    break;
                }
            }
            Err(MiniMp3Error::Eof) => break,
            Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => {
                // Decoder needs more data; continue ingesting.
                continue;
            }
            Err(MiniMp3Error::Io(err)) => {
                let err = DecodeError::from(err);
                report_info(&mut info_tx, &err);
                return Err(err);
            }
        }
    }

    if info_tx.is_some() {
        let err = DecodeError::Decode("stream contained no decodable MP3 frames".into());
        report_info(&mut info_tx, &err);
        return Err(err);
    }

    Ok(())
}
