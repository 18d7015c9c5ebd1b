//! # podnet - HTTP transport for podplay
//!
//! [`HttpFetcher::fetch`] opens a GET request, follows redirects up to the
//! configured limit and rejects any non-success final status before a single
//! body byte is handed out. The body is exposed as a [`ByteStream`], an
//! `AsyncRead` over the chunked response: nothing is buffered beyond what the
//! consumer asks for, so a slow consumer slows down the download.
//!
//! ```no_run
//! use podnet::{FetchSettings, HttpFetcher};
//! use tokio::io::AsyncReadExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = HttpFetcher::new(FetchSettings::default())?;
//! let mut body = fetcher.fetch("https://example.com/feed.xml").await?;
//! let monitor = body.monitor();
//!
//! let mut xml = Vec::new();
//! body.read_to_end(&mut xml).await?;
//! assert_eq!(monitor.bytes_received(), xml.len() as u64);
//! # Ok(())
//! # }
//! ```

mod error;
mod fetcher;
mod stream;

pub use error::FetchError;
pub use fetcher::{validate_url, FetchSettings, HttpFetcher};
pub use stream::{ByteStream, FetchMonitor};
