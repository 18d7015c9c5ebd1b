pub mod audio_sink;
pub mod http_source;

use podnet::FetchError;
use poddecode::DecodeError;

use crate::output::PlaybackError;

/// Taille par défaut des canaux entre nœuds (en segments)
pub const DEFAULT_CHANNEL_SIZE: usize = 16;

/// Durée cible d'un segment PCM émis par une source
pub const DEFAULT_CHUNK_DURATION_MS: f64 = 50.0;

/// Erreurs remontées par les nœuds du pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    /// Échec du transport HTTP (statut, connexion coupée, ...)
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    /// Un enfant a fermé son canal d'entrée sans erreur connue
    #[error("Child node died unexpectedly")]
    ChildDied,
    #[error("Processing error: {0}")]
    ProcessingError(String),
}
