use std::sync::{Arc, OnceLock};

use podnet::{FetchMonitor, HttpFetcher};
use poddecode::{decode_mp3_stream, DecodeError, PCM_FORMAT};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    nodes::{AudioError, DEFAULT_CHUNK_DURATION_MS},
    pipeline::{send_to_children, Node, NodeLogic},
    AudioPipelineNode, AudioSegment,
};

/// HttpSource - Télécharge un épisode MP3 et publie des `AudioSegment` PCM
///
/// Le corps HTTP est lu en streaming par [`HttpFetcher`], décodé par
/// [`decode_mp3_stream`] puis découpé en segments d'environ 50 ms de PCM
/// stéréo 16 bits. Un `EndOfStream` n'est émis qu'après un décodage complet
/// et sans erreur : en cas d'échec le nœud retourne l'erreur et ses enfants
/// sont annulés.
///
/// # Attribution des erreurs
///
/// Une coupure réseau en cours de lecture remonte du décodeur comme une
/// erreur d'entrée/sortie. Si le [`FetchMonitor`] du flux a enregistré une
/// panne de transport, l'erreur est rendue comme [`AudioError::Fetch`].
///
/// # Exemple
///
/// ```no_run
/// use podaudio::{AudioPipelineNode, AudioSink, HttpSource, NullOutput};
/// use podnet::{FetchSettings, HttpFetcher};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new(FetchSettings::default())?;
/// let mut source = HttpSource::new(fetcher, "http://example.com/episode.mp3");
/// source.register(Box::new(AudioSink::new(Arc::new(NullOutput::new()))));
/// Box::new(source).run(CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```

// ═══════════════════════════════════════════════════════════════════════════
// HttpSourceLogic - Logique métier pure
// ═══════════════════════════════════════════════════════════════════════════

pub struct HttpSourceLogic {
    fetcher: HttpFetcher,
    url: String,
    chunk_frames: usize,
    progress: SourceProgress,
}

impl HttpSourceLogic {
    pub fn new<S: Into<String>>(fetcher: HttpFetcher, url: S, chunk_frames: usize) -> Self {
        Self {
            fetcher,
            url: url.into(),
            chunk_frames,
            progress: SourceProgress::default(),
        }
    }

    pub fn get_url(&self) -> String {
        self.url.clone()
    }

    pub fn get_chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    fn effective_chunk_frames(&self) -> usize {
        if self.chunk_frames == 0 {
            (f64::from(PCM_FORMAT.sample_rate) * DEFAULT_CHUNK_DURATION_MS / 1000.0).round() as usize
        } else {
            self.chunk_frames
        }
    }

    /// Une panne de transport enregistrée prime sur l'erreur du décodeur
    fn classify(&self, err: DecodeError) -> AudioError {
        match self.progress.monitor().and_then(|m| m.failure()) {
            Some(fetch_err) => {
                debug!(decode_error = %err, "Decoder failure caused by the transport");
                AudioError::Fetch(fetch_err)
            }
            None => AudioError::Decode(err),
        }
    }
}

#[async_trait::async_trait]
impl NodeLogic for HttpSourceLogic {
    async fn process(
        &mut self,
        _input: Option<mpsc::Receiver<Arc<AudioSegment>>>,
        output: Vec<mpsc::Sender<Arc<AudioSegment>>>,
        stop_token: CancellationToken,
    ) -> Result<(), AudioError> {
        let fetched = tokio::select! {
            result = self.fetcher.fetch(&self.url) => Some(result),
            _ = stop_token.cancelled() => None,
        };
        let Some(fetched) = fetched else { return Ok(()) };
        let body = fetched?;
        info!(url = %body.url(), content_length = ?body.content_length(), "Media stream opened");
        let _ = self.progress.monitor.set(body.monitor());

        let decoded = tokio::select! {
            result = decode_mp3_stream(body) => Some(result),
            _ = stop_token.cancelled() => None,
        };
        let Some(decoded) = decoded else { return Ok(()) };
        let mut stream = decoded.map_err(|e| self.classify(e))?;
        debug!(
            source_channels = stream.info().source_channels,
            bitrate_kbps = stream.info().bitrate_kbps,
            "MP3 stream decoded"
        );

        let chunk_frames = self.effective_chunk_frames();
        let frame_bytes = PCM_FORMAT.frame_bytes();
        let chunk_byte_len = chunk_frames * frame_bytes;
        let sample_rate = f64::from(PCM_FORMAT.sample_rate);

        let mut pending: Vec<u8> = Vec::with_capacity(chunk_byte_len * 2);
        let mut read_buf = vec![0u8; chunk_byte_len];
        let mut chunk_index = 0u64;
        let mut total_frames = 0u64;

        // Lire et émettre les chunks complets
        loop {
            if stop_token.is_cancelled() {
                stream.cancel();
                return Ok(());
            }

            if pending.len() < chunk_byte_len {
                let result = tokio::select! {
                    result = stream.read(&mut read_buf) => Some(result),
                    _ = stop_token.cancelled() => None,
                };
                let Some(result) = result else {
                    stream.cancel();
                    return Ok(());
                };
                let read = result.map_err(|e| self.classify(DecodeError::from(e)))?;
                if read == 0 {
                    break;
                }
                pending.extend_from_slice(&read_buf[..read]);
                continue;
            }

            let chunk_bytes: Vec<u8> = pending.drain(..chunk_byte_len).collect();
            let segment = AudioSegment::new_chunk(
                chunk_index,
                total_frames as f64 / sample_rate,
                bytes_to_samples(&chunk_bytes),
            );
            send_to_children(&output, segment, &stop_token).await?;
            chunk_index += 1;
            total_frames += chunk_frames as u64;
        }

        // Fin du PCM : vérifier que le décodage s'est terminé proprement
        stream.wait().await.map_err(|e| self.classify(e))?;

        // Traiter le reste éventuel
        let frames = pending.len() / frame_bytes;
        if frames > 0 {
            let segment = AudioSegment::new_chunk(
                chunk_index,
                total_frames as f64 / sample_rate,
                bytes_to_samples(&pending[..frames * frame_bytes]),
            );
            send_to_children(&output, segment, &stop_token).await?;
            chunk_index += 1;
            total_frames += frames as u64;
        }

        let final_timestamp = total_frames as f64 / sample_rate;
        info!(
            chunks = chunk_index,
            seconds = final_timestamp,
            bytes = self.progress.bytes_received(),
            "Media stream finished"
        );
        send_to_children(&output, AudioSegment::new_end_of_stream(chunk_index, final_timestamp), &stop_token).await
    }
}

fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Vue partagée sur la progression du téléchargement d'une [`HttpSource`].
///
/// Vide tant que la réponse HTTP n'a pas été acceptée.
#[derive(Debug, Clone, Default)]
pub struct SourceProgress {
    monitor: Arc<OnceLock<FetchMonitor>>,
}

impl SourceProgress {
    pub fn monitor(&self) -> Option<FetchMonitor> {
        self.monitor.get().cloned()
    }

    /// Octets du corps lus sur le réseau, 0 avant l'ouverture
    pub fn bytes_received(&self) -> u64 {
        self.monitor.get().map_or(0, FetchMonitor::bytes_received)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HttpSource - Wrapper utilisant Node<HttpSourceLogic>
// ═══════════════════════════════════════════════════════════════════════════

pub struct HttpSource {
    inner: Node<HttpSourceLogic>,
}

impl HttpSource {
    /// Source avec des chunks d'environ 50 ms
    pub fn new<S: Into<String>>(fetcher: HttpFetcher, url: S) -> Self {
        Self::with_chunk_size(fetcher, url, 0)
    }

    /// `chunk_frames` : frames stéréo par segment (0 = calcul automatique)
    pub fn with_chunk_size<S: Into<String>>(fetcher: HttpFetcher, url: S, chunk_frames: usize) -> Self {
        let logic = HttpSourceLogic::new(fetcher, url, chunk_frames);
        Self {
            inner: Node::new_source(logic),
        }
    }

    /// Taille de chunk correspondant à une durée en millisecondes
    pub fn with_chunk_duration_ms<S: Into<String>>(fetcher: HttpFetcher, url: S, duration_ms: u64) -> Self {
        Self::with_chunk_size(fetcher, url, PCM_FORMAT.frames_for_ms(duration_ms))
    }

    pub fn get_url(&self) -> String {
        self.inner.logic().get_url()
    }

    pub fn get_chunk_frames(&self) -> usize {
        self.inner.logic().get_chunk_frames()
    }

    pub fn progress(&self) -> SourceProgress {
        self.inner.logic().progress.clone()
    }
}

#[async_trait::async_trait]
impl AudioPipelineNode for HttpSource {
    fn get_tx(&self) -> Option<mpsc::Sender<Arc<AudioSegment>>> {
        self.inner.get_tx()
    }

    fn register(&mut self, child: Box<dyn AudioPipelineNode>) {
        self.inner.register(child);
    }

    async fn run(self: Box<Self>, stop_token: CancellationToken) -> Result<(), AudioError> {
        Box::new(self.inner).run(stop_token).await
    }
}

#[cfg(test)]
mod tests {
    use podnet::FetchSettings;

    use super::*;

    #[test]
    fn automatic_chunk_size() {
        let fetcher = HttpFetcher::new(FetchSettings::default()).unwrap();
        let logic = HttpSourceLogic::new(fetcher.clone(), "http://localhost/a.mp3", 0);
        // 50 ms à 44.1 kHz
        assert_eq!(logic.effective_chunk_frames(), 2205);
        let logic = HttpSourceLogic::new(fetcher, "http://localhost/a.mp3", 1000);
        assert_eq!(logic.effective_chunk_frames(), 1000);
    }

    #[test]
    fn little_endian_samples() {
        assert_eq!(bytes_to_samples(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]), vec![1, -1, i16::MIN]);
    }

    #[test]
    fn progress_before_open() {
        let progress = SourceProgress::default();
        assert_eq!(progress.bytes_received(), 0);
        assert!(progress.monitor().is_none());
    }
}
