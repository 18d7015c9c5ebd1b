//! # podplay - écoute d'un podcast depuis l'URL de son flux
//!
//! [`Player::run`] enchaîne les étapes du pipeline :
//!
//! ```text
//! HttpFetcher(flux) → podfeed::decode → EpisodeSelector
//!     → HttpSource(épisode) → décodage MP3 → AudioSink → AudioOutput
//! ```
//!
//! Chaque transition est publiée sur un canal `watch` ([`Player::subscribe`]).
//! Une erreur est rendue comme [`StageError`] : l'erreur et l'étape
//! ([`Stage`]) qui l'a produite.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use podaudio::NullOutput;
//! use podnet::{FetchSettings, HttpFetcher};
//! use podplay::{Choice, Player};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let player = Player::new(HttpFetcher::new(FetchSettings::default())?, Arc::new(NullOutput::new()));
//! let first = |_: &podfeed::FeedMetadata, labels: &[String]| -> Result<Choice, podfeed::SelectionError> {
//!     Ok(Choice::Selected(labels[0].clone()))
//! };
//! player.run("https://example.com/feed.xml", first, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod player;
mod selector;
mod state;

pub use error::{PipelineError, Stage, StageError};
pub use player::{Outcome, Player, PlayerSettings};
pub use selector::{Choice, EpisodeSelector};
pub use state::PipelineState;
