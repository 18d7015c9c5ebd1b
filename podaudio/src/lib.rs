#![doc = r#"
PodAudio - Pipeline de lecture d'épisodes en streaming

Cette crate relie le téléchargement HTTP, le décodage MP3 et la sortie audio
en un arbre de nodes asynchrones qui communiquent via des channels Tokio
bornés. Les échantillons PCM sont partagés via `Arc<[i16]>`.

# Architecture

```text
HttpSource ──(mpsc borné)──> AudioSink ──(PlaybackBuffer)──> AudioOutput
  fetch + décodage MP3          tampon borné                 thread dédié
```

- **Backpressure** : chaque file est bornée. Une sortie lente remplit le
  [`PlaybackBuffer`], qui suspend [`AudioSink`], qui suspend l'envoi de
  [`HttpSource`], qui cesse de lire le décodeur puis le réseau.
- **Erreurs** : un node échoue dès qu'un de ses enfants échoue ; ses enfants
  sont alors annulés via un `CancellationToken` enfant et attendus.
- **Sorties** : [`CpalOutput`] pour le périphérique système, [`NullOutput`]
  pour une lecture muette cadencée.

# Exemple

```no_run
use podaudio::{AudioPipelineNode, AudioSink, CpalOutput, HttpSource};
use podnet::{FetchSettings, HttpFetcher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = HttpFetcher::new(FetchSettings::default())?;
    let mut source = HttpSource::new(fetcher, "https://example.com/episode.mp3");
    source.register(Box::new(AudioSink::new(Arc::new(CpalOutput::new()))));

    Box::new(source).run(CancellationToken::new()).await?;
    Ok(())
}
```
"#]

mod audio_segment;
pub mod nodes;
pub mod output;
pub mod pipeline;
mod playback_buffer;

pub use audio_segment::{AudioSegment, PcmChunk, SegmentKind};
pub use nodes::{
    audio_sink::{AudioSink, AudioSinkLogic, DEFAULT_DRAIN_MARGIN, DEFAULT_PLAYBACK_BUFFER_MS},
    http_source::{HttpSource, HttpSourceLogic, SourceProgress},
    AudioError, DEFAULT_CHANNEL_SIZE, DEFAULT_CHUNK_DURATION_MS,
};
pub use output::{
    list_output_devices, AudioOutput, CpalOutput, NullOutput, OutputHandle, OutputStats, PlaybackError,
};
pub use pipeline::{AudioPipelineNode, Node, NodeLogic};
pub use playback_buffer::PlaybackBuffer;
