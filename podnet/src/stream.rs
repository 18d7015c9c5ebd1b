use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::error::FetchError;

type BoxedBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Default)]
struct MonitorState {
    bytes: AtomicU64,
    failure: Mutex<Option<FetchError>>,
    closed: AtomicBool,
}

/// Shared view on the progress of a [`ByteStream`].
///
/// Stays valid after the stream itself has been handed to another stage or
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct FetchMonitor {
    state: Arc<MonitorState>,
}

impl FetchMonitor {
    /// Body bytes pulled from the network so far.
    pub fn bytes_received(&self) -> u64 {
        self.state.bytes.load(Ordering::Acquire)
    }

    /// The transport failure that ended the stream, if any.
    pub fn failure(&self) -> Option<FetchError> {
        match self.state.failure.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn record(&self, len: usize) {
        self.state.bytes.fetch_add(len as u64, Ordering::AcqRel);
    }

    fn fail(&self, err: FetchError) {
        let mut slot = match self.state.failure.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.get_or_insert(err);
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }
}

/// Response body of a successful GET, readable through `AsyncRead`.
///
/// Transport errors surface as `io::Error`s wrapping a [`FetchError`]
/// (see [`FetchError::from_io_error`]) and are also recorded in the
/// [`FetchMonitor`]. Dropping the stream closes the connection.
pub struct ByteStream {
    url: String,
    status: u16,
    content_length: Option<u64>,
    content_type: Option<String>,
    reader: Option<StreamReader<BoxedBody, Bytes>>,
    monitor: FetchMonitor,
}

impl ByteStream {
    pub(crate) fn from_response(requested_url: &str, response: reqwest::Response) -> Self {
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let monitor = FetchMonitor::default();
        let body_monitor = monitor.clone();
        let error_url = requested_url.to_string();
        let body: BoxedBody = Box::pin(response.bytes_stream().map(move |chunk| match chunk {
            Ok(bytes) => {
                body_monitor.record(bytes.len());
                Ok(bytes)
            }
            Err(err) => {
                let err = FetchError::transport(&error_url, &err);
                warn!(error = %err, received = body_monitor.bytes_received(), "Response body failed");
                body_monitor.fail(err.clone());
                Err(io::Error::other(err))
            }
        }));

        Self {
            url,
            status,
            content_length,
            content_type,
            reader: Some(StreamReader::new(body)),
            monitor,
        }
    }

    /// Final URL of the response, after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn monitor(&self) -> FetchMonitor {
        self.monitor.clone()
    }

    /// Closes the connection; later reads fail.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(url = %self.url, received = self.monitor.bytes_received(), "Closing byte stream");
        }
        self.monitor.close();
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("closed", &self.reader.is_none())
            .finish()
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "byte stream closed",
            ))),
        }
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.close();
    }
}
