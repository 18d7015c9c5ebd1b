use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, DuplexStream, ReadBuf},
    task::{AbortHandle, JoinHandle},
};

use crate::error::DecodeError;

/// Async reader backed by a spawned task writing into it.
///
/// Dropping the reader aborts the writer task and every companion task
/// registered with [`with_companion`](Self::with_companion).
pub struct ManagedAsyncReader {
    inner: Option<DuplexStream>,
    join: Option<JoinHandle<Result<(), DecodeError>>>,
    companions: Vec<AbortHandle>,
    role: &'static str,
}

impl ManagedAsyncReader {
    pub fn new(
        role: &'static str,
        inner: DuplexStream,
        join: JoinHandle<Result<(), DecodeError>>,
    ) -> Self {
        Self {
            inner: Some(inner),
            join: Some(join),
            companions: Vec::new(),
            role,
        }
    }

    /// Ties the lifetime of another task to this reader.
    pub fn with_companion(mut self, handle: AbortHandle) -> Self {
        self.companions.push(handle);
        self
    }

    /// Waits for the producer task to finish.
    pub async fn wait(mut self) -> Result<(), DecodeError> {
        match self.join.take() {
            Some(handle) => match handle.await {
                Ok(res) => res,
                Err(err) => Err(DecodeError::TaskJoin {
                    role: self.role,
                    details: err.to_string(),
                }),
            },
            None => Ok(()),
        }
    }

    /// Stops the producer and its companions immediately.
    pub fn abort(&mut self) {
        if let Some(handle) = self.join.take() {
            handle.abort();
        }
        for handle in self.companions.drain(..) {
            handle.abort();
        }
        self.inner.take();
    }

    fn poll_read_inner(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "reader dropped"))?;
        Pin::new(inner).poll_read(cx, buf)
    }
}

impl AsyncRead for ManagedAsyncReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.poll_read_inner(cx, buf)
    }
}

impl Drop for ManagedAsyncReader {
    fn drop(&mut self) {
        self.abort();
    }
}
