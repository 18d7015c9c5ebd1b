//! Bridge between the async ingest task and the blocking decoder.

use std::io::{self, Read};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::DecodeError;

/// Synchronous `Read` over the channel fed by the ingest task.
///
/// minimp3 pulls its input through `std::io::Read`, so the blocking decode
/// task reads frames with `blocking_recv`. An error sent by the ingest task is
/// returned once, wrapped in an `io::Error` that [`DecodeError::from`] unwraps.
pub(crate) struct ChannelReader {
    rx: mpsc::Receiver<Result<Bytes, DecodeError>>,
    current: Bytes,
    offset: usize,
    finished: bool,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<Result<Bytes, DecodeError>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            offset: 0,
            finished: false,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.current.len() {
                let n = buf.len().min(self.current.len() - self.offset);
                buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            if self.finished {
                return Ok(0);
            }

            match self.rx.blocking_recv() {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    self.current = bytes;
                    self.offset = 0;
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Err(io::Error::other(err));
                }
                None => {
                    self.finished = true;
                    return Ok(0);
                }
            }
        }
    }
}
