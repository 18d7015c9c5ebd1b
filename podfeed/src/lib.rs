//! # podfeed - podcast feed decoding
//!
//! Turns the bytes of an RSS 2.0, RSS 1.0 or Atom document into a [`Feed`]:
//! channel [`FeedMetadata`] plus the [`EpisodeList`] of items that carry an
//! audio enclosure. Items without enclosure are left out, and only the first
//! enclosure of an item is kept.
//!
//! ```no_run
//! use podnet::{FetchSettings, HttpFetcher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = HttpFetcher::new(FetchSettings::default())?;
//! let stream = fetcher.fetch("https://example.com/feed.xml").await?;
//! let feed = podfeed::decode(stream).await?;
//!
//! println!("{} ({})", feed.metadata.title, feed.metadata.link);
//! for label in feed.episodes.labels() {
//!     println!("  {label}");
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod model;
mod parser;

pub use error::{FeedParseError, SelectionError};
pub use model::{Episode, EpisodeList, Feed, FeedMetadata};
pub use parser::{decode, decode_feed};
