//! Sorties audio : le périphérique système ([`CpalOutput`]) ou une sortie
//! muette cadencée ([`NullOutput`]).
//!
//! Une sortie tourne sur son propre thread et tire les échantillons d'un
//! [`PlaybackBuffer`] partagé avec le nœud [`AudioSink`](crate::AudioSink).

mod device;
mod null;

use std::sync::Arc;

use async_trait::async_trait;

use crate::PlaybackBuffer;

pub use self::device::{list_output_devices, CpalOutput};
pub use self::null::{NullOutput, OutputStats};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("no audio output device found: {0}")]
    NoDevice(String),
    #[error("audio output does not support {0}")]
    UnsupportedFormat(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio output stopped consuming with {pending} samples left")]
    Stalled { pending: usize },
}

/// Une destination pour le PCM 44.1 kHz stéréo 16 bits.
#[async_trait]
pub trait AudioOutput: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Ouvre la sortie ; elle consomme `buffer` jusqu'à [`OutputHandle::stop`].
    async fn start(&self, buffer: Arc<PlaybackBuffer>) -> Result<Box<dyn OutputHandle>, PlaybackError>;
}

/// Sortie ouverte. La lâcher sans appeler `stop` l'arrête aussi.
pub trait OutputHandle: Send {
    /// Arrête la sortie et attend la fin de son thread
    fn stop(self: Box<Self>);
}
