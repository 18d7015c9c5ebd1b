use std::fmt;

use crate::error::{PipelineError, Stage};

/// Where a [`Player`](crate::Player) run stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    FetchingFeed {
        url: String,
    },
    AwaitingSelection {
        episodes: usize,
    },
    /// Media fetch, decoding and playback are running
    Playing {
        episode: String,
    },
    Done,
    Cancelled,
    Failed {
        stage: Stage,
        error: PipelineError,
    },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Cancelled | PipelineState::Failed { .. }
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::FetchingFeed { url } => write!(f, "fetching feed {url}"),
            PipelineState::AwaitingSelection { episodes } => {
                write!(f, "awaiting selection among {episodes} episodes")
            }
            PipelineState::Playing { episode } => write!(f, "playing \"{episode}\""),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Cancelled => write!(f, "cancelled"),
            PipelineState::Failed { stage, error } => write!(f, "failed in {stage}: {error}"),
        }
    }
}
