use std::sync::Arc;

use podaudio::{
    AudioOutput, AudioPipelineNode, AudioSink, HttpSource, DEFAULT_CHANNEL_SIZE,
    DEFAULT_CHUNK_DURATION_MS, DEFAULT_PLAYBACK_BUFFER_MS,
};
use podfeed::{Episode, Feed, SelectionError};
use podnet::HttpFetcher;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{PipelineError, StageError},
    selector::{Choice, EpisodeSelector},
    state::PipelineState,
};

/// Sizing of the media chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSettings {
    /// Capacity of the channel between the source and the sink, in PCM blocks
    pub channel_size: usize,
    pub chunk_duration_ms: u64,
    /// Audio queued in front of the output
    pub buffer_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            channel_size: DEFAULT_CHANNEL_SIZE,
            chunk_duration_ms: DEFAULT_CHUNK_DURATION_MS as u64,
            buffer_ms: DEFAULT_PLAYBACK_BUFFER_MS,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Played(Episode),
    Cancelled,
}

/// Runs one feed URL through fetch, selection and playback.
///
/// Every transition is published on a `watch` channel (see
/// [`subscribe`](Self::subscribe)) and logged.
pub struct Player {
    fetcher: HttpFetcher,
    output: Arc<dyn AudioOutput>,
    settings: PlayerSettings,
    state: watch::Sender<PipelineState>,
}

impl Player {
    pub fn new(fetcher: HttpFetcher, output: Arc<dyn AudioOutput>) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            fetcher,
            output,
            settings: PlayerSettings::default(),
            state,
        }
    }

    pub fn with_settings(mut self, settings: PlayerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: PipelineState) {
        info!(state = %next, "Pipeline state");
        self.state.send_replace(next);
    }

    fn fail(&self, error: PipelineError) -> StageError {
        let failure = StageError::from(error);
        warn!(stage = %failure.stage, error = %failure.error, "Pipeline failed");
        self.transition(PipelineState::Failed {
            stage: failure.stage,
            error: failure.error.clone(),
        });
        failure
    }

    fn cancelled(&self) -> Result<Outcome, StageError> {
        self.transition(PipelineState::Cancelled);
        Ok(Outcome::Cancelled)
    }

    /// Fetches `feed_url`, asks `selector` for an episode and plays it.
    ///
    /// Returns once playback drained, the selection or `token` cancelled the
    /// run, or a stage failed. In every case no stream or task is left
    /// running on return.
    pub async fn run<S: EpisodeSelector>(
        &self,
        feed_url: &str,
        selector: S,
        token: CancellationToken,
    ) -> Result<Outcome, StageError> {
        self.transition(PipelineState::FetchingFeed {
            url: feed_url.to_string(),
        });

        let feed = tokio::select! {
            feed = self.load_feed(feed_url) => feed,
            _ = token.cancelled() => return self.cancelled(),
        };
        let feed = feed.map_err(|e| self.fail(e))?;
        if feed.episodes.is_empty() {
            return Err(self.fail(PipelineError::EmptyFeed));
        }

        self.transition(PipelineState::AwaitingSelection {
            episodes: feed.episodes.len(),
        });
        let choice = tokio::select! {
            choice = select_episode(selector, &feed) => choice,
            // Le sélecteur bloquant ne peut pas être interrompu : on l'abandonne
            _ = token.cancelled() => return self.cancelled(),
        };
        let label = match choice.map_err(|e| self.fail(e.into()))? {
            Choice::Selected(label) => label,
            Choice::Cancelled => return self.cancelled(),
        };
        let episode = feed
            .episodes
            .select(&label)
            .map_err(|e| self.fail(e.into()))?
            .clone();
        drop(feed);

        self.transition(PipelineState::Playing {
            episode: label.clone(),
        });
        self.play(&episode, &token).await.map_err(|e| self.fail(e))?;

        if token.is_cancelled() {
            return self.cancelled();
        }
        self.transition(PipelineState::Done);
        Ok(Outcome::Played(episode))
    }

    async fn load_feed(&self, url: &str) -> Result<Feed, PipelineError> {
        let stream = self.fetcher.fetch(url).await?;
        let feed = podfeed::decode(stream).await.map_err(PipelineError::from_feed)?;
        info!(
            title = %feed.metadata.title,
            episodes = feed.episodes.len(),
            "Feed decoded"
        );
        Ok(feed)
    }

    async fn play(&self, episode: &Episode, token: &CancellationToken) -> Result<(), PipelineError> {
        let mut source = HttpSource::with_chunk_duration_ms(
            self.fetcher.clone(),
            episode.enclosure_url.clone(),
            self.settings.chunk_duration_ms,
        );
        let progress = source.progress();
        source.register(Box::new(AudioSink::with_buffer(
            self.output.clone(),
            self.settings.buffer_ms,
            self.settings.channel_size,
        )));

        debug!(url = %episode.enclosure_url, output = %self.output.name(), "Starting media chain");
        let result = Box::new(source).run(token.clone()).await;
        debug!(bytes = progress.bytes_received(), "Media chain stopped");
        result.map_err(PipelineError::from)
    }
}

async fn select_episode<S: EpisodeSelector>(mut selector: S, feed: &Feed) -> Result<Choice, SelectionError> {
    let metadata = feed.metadata.clone();
    let labels = feed.episodes.labels().to_vec();
    tokio::task::spawn_blocking(move || selector.choose(&metadata, &labels))
        .await
        .map_err(|e| SelectionError::Interaction(format!("selector task failed: {e}")))?
}
