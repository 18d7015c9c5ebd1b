use std::sync::Arc;
use std::time::Duration;

use poddecode::PCM_FORMAT;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    nodes::{AudioError, DEFAULT_CHANNEL_SIZE},
    output::{AudioOutput, OutputHandle, PlaybackError},
    pipeline::{Node, NodeLogic},
    AudioPipelineNode, AudioSegment, PlaybackBuffer, SegmentKind,
};

/// Durée par défaut du tampon de lecture
pub const DEFAULT_PLAYBACK_BUFFER_MS: u64 = 500;

/// Délai accordé à la sortie au-delà de la durée restant à jouer
pub const DEFAULT_DRAIN_MARGIN: Duration = Duration::from_secs(2);

/// AudioSink - Joue les segments reçus sur une [`AudioOutput`]
///
/// Les échantillons sont copiés dans un [`PlaybackBuffer`] borné que la
/// sortie vide à son rythme. Quand le tampon est plein, le nœud cesse de lire
/// son canal d'entrée et la pression remonte jusqu'au réseau.
///
/// La sortie n'est ouverte qu'à l'arrivée du premier bloc PCM. Sur
/// `EndOfStream` le nœud attend que le tampon soit vidé avant d'arrêter la
/// sortie ; sur annulation ou fermeture de l'entrée il l'arrête aussitôt.
///
/// L'attente de vidage est bornée par la durée restante plus une marge : une
/// sortie qui ne consomme plus rend [`PlaybackError::Stalled`].
pub struct AudioSinkLogic {
    output: Arc<dyn AudioOutput>,
    buffer_ms: u64,
    drain_margin: Duration,
}

impl AudioSinkLogic {
    pub fn new(output: Arc<dyn AudioOutput>, buffer_ms: u64) -> Self {
        Self {
            output,
            buffer_ms,
            drain_margin: DEFAULT_DRAIN_MARGIN,
        }
    }

    pub fn with_drain_margin(mut self, margin: Duration) -> Self {
        self.drain_margin = margin;
        self
    }

    async fn drain(&self, buffer: &PlaybackBuffer) -> Result<(), PlaybackError> {
        let pending = buffer.len();
        let samples_per_sec = f64::from(PCM_FORMAT.sample_rate) * f64::from(PCM_FORMAT.channels);
        let limit = Duration::from_secs_f64(pending as f64 / samples_per_sec) + self.drain_margin;
        debug!(pending, limit_ms = limit.as_millis() as u64, "Draining playback buffer");
        match tokio::time::timeout(limit, buffer.drained()).await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::Stalled { pending: buffer.len() }),
        }
    }

    async fn consume(
        &self,
        rx: &mut mpsc::Receiver<Arc<AudioSegment>>,
        buffer: &Arc<PlaybackBuffer>,
        handle: &mut Option<Box<dyn OutputHandle>>,
        stop_token: &CancellationToken,
    ) -> Result<(), AudioError> {
        loop {
            let segment = tokio::select! {
                segment = rx.recv() => segment,
                _ = stop_token.cancelled() => {
                    debug!("AudioSink cancelled");
                    return Ok(());
                }
            };
            let Some(segment) = segment else {
                warn!("AudioSink input closed before end of stream");
                return Ok(());
            };

            match &segment.segment {
                SegmentKind::Chunk(chunk) => {
                    if handle.is_none() {
                        let opened = self.output.start(buffer.clone()).await?;
                        info!(output = %self.output.name(), buffer_ms = self.buffer_ms, "Playback started");
                        *handle = Some(opened);
                    }
                    tokio::select! {
                        result = buffer.push(chunk.samples()) => result?,
                        _ = stop_token.cancelled() => return Ok(()),
                    }
                }
                SegmentKind::EndOfStream => {
                    buffer.mark_end();
                    if handle.is_some() {
                        tokio::select! {
                            result = self.drain(buffer) => result?,
                            _ = stop_token.cancelled() => return Ok(()),
                        }
                    }
                    info!(
                        order = segment.order,
                        seconds = segment.timestamp_sec,
                        "Playback finished"
                    );
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl NodeLogic for AudioSinkLogic {
    async fn process(
        &mut self,
        input: Option<mpsc::Receiver<Arc<AudioSegment>>>,
        _output: Vec<mpsc::Sender<Arc<AudioSegment>>>,
        stop_token: CancellationToken,
    ) -> Result<(), AudioError> {
        let mut rx = input.ok_or_else(|| AudioError::ProcessingError("AudioSink must have an input".into()))?;
        let buffer = Arc::new(PlaybackBuffer::with_duration_ms(self.buffer_ms));
        let mut handle = None;

        let result = self.consume(&mut rx, &buffer, &mut handle, &stop_token).await;
        if let Some(handle) = handle.take() {
            handle.stop();
        }
        if let Err(err) = &result {
            warn!(error = %err, "AudioSink failed");
        }
        result
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AudioSink - Wrapper utilisant Node<AudioSinkLogic>
// ═══════════════════════════════════════════════════════════════════════════

pub struct AudioSink {
    inner: Node<AudioSinkLogic>,
}

impl AudioSink {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self::with_buffer(output, DEFAULT_PLAYBACK_BUFFER_MS, DEFAULT_CHANNEL_SIZE)
    }

    /// `buffer_ms` : profondeur du tampon de lecture ;
    /// `channel_size` : capacité du canal d'entrée en segments
    pub fn with_buffer(output: Arc<dyn AudioOutput>, buffer_ms: u64, channel_size: usize) -> Self {
        Self {
            inner: Node::new_with_input(AudioSinkLogic::new(output, buffer_ms), channel_size),
        }
    }
}

#[async_trait::async_trait]
impl AudioPipelineNode for AudioSink {
    fn get_tx(&self) -> Option<mpsc::Sender<Arc<AudioSegment>>> {
        self.inner.get_tx()
    }

    fn register(&mut self, _child: Box<dyn AudioPipelineNode>) {
        panic!("AudioSink is a sink node and cannot have children");
    }

    async fn run(self: Box<Self>, stop_token: CancellationToken) -> Result<(), AudioError> {
        Box::new(self.inner).run(stop_token).await
    }
}
