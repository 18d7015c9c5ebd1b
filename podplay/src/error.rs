use std::fmt;

use podaudio::{AudioError, PlaybackError};
use podfeed::{FeedParseError, SelectionError};
use podnet::FetchError;
use poddecode::DecodeError;

/// The pipeline stages a failure can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    TransportFetcher,
    FeedDecoder,
    EpisodeSelector,
    AudioDecoder,
    PlaybackSink,
    /// Failures of the orchestration itself (a task that panicked, a node
    /// that died without reporting why).
    Orchestrator,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TransportFetcher => "transport fetcher",
            Stage::FeedDecoder => "feed decoder",
            Stage::EpisodeSelector => "episode selector",
            Stage::AudioDecoder => "audio decoder",
            Stage::PlaybackSink => "playback sink",
            Stage::Orchestrator => "pipeline orchestrator",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the pipeline can end with.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    FeedParse(#[from] FeedParseError),
    #[error("feed contains no playable episode")]
    EmptyFeed,
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stage responsible for this error.
    ///
    /// A feed read failure caused by the network belongs to the fetcher.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch(_) => Stage::TransportFetcher,
            PipelineError::FeedParse(err) if err.transport().is_some() => Stage::TransportFetcher,
            PipelineError::FeedParse(_) | PipelineError::EmptyFeed => Stage::FeedDecoder,
            PipelineError::Selection(_) => Stage::EpisodeSelector,
            PipelineError::Decode(_) => Stage::AudioDecoder,
            PipelineError::Playback(_) => Stage::PlaybackSink,
            PipelineError::Internal(_) => Stage::Orchestrator,
        }
    }

    /// Unwraps a feed read failure into the transport error behind it.
    pub(crate) fn from_feed(err: FeedParseError) -> Self {
        match err.transport() {
            Some(fetch) => PipelineError::Fetch(fetch.clone()),
            None => PipelineError::FeedParse(err),
        }
    }
}

impl From<AudioError> for PipelineError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Fetch(e) => PipelineError::Fetch(e),
            AudioError::Decode(e) => PipelineError::Decode(e),
            AudioError::Playback(e) => PipelineError::Playback(e),
            other @ (AudioError::ChildDied | AudioError::ProcessingError(_)) => {
                PipelineError::Internal(other.to_string())
            }
        }
    }
}

/// A [`PipelineError`] tagged with the stage that produced it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("[{stage}] {error}")]
pub struct StageError {
    pub stage: Stage,
    pub error: PipelineError,
}

impl From<PipelineError> for StageError {
    fn from(error: PipelineError) -> Self {
        Self {
            stage: error.stage(),
            error,
        }
    }
}
