//! Tampon borné entre le nœud de lecture et le thread de sortie audio.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use poddecode::PCM_FORMAT;
use tokio::sync::Notify;

use crate::output::PlaybackError;

#[derive(Debug, Default)]
struct BufferState {
    samples: VecDeque<i16>,
    ended: bool,
    error: Option<PlaybackError>,
    consumed: u64,
}

/// File d'échantillons PCM entrelacés de capacité fixe.
///
/// Le côté producteur ([`push`](Self::push)) est asynchrone et se suspend
/// quand le tampon est plein. Le côté consommateur
/// ([`pop_into`](Self::pop_into)) est synchrone et ne bloque jamais : il est
/// appelé depuis le callback du périphérique audio.
#[derive(Debug)]
pub struct PlaybackBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
    changed: Notify,
}

impl PlaybackBuffer {
    /// Capacité en échantillons, arrondie à une frame stéréo complète
    pub fn new(capacity: usize) -> Self {
        let channels = usize::from(PCM_FORMAT.channels);
        let capacity = capacity.max(channels).div_ceil(channels) * channels;
        Self {
            state: Mutex::new(BufferState {
                samples: VecDeque::with_capacity(capacity),
                ..BufferState::default()
            }),
            capacity,
            changed: Notify::new(),
        }
    }

    pub fn with_duration_ms(duration_ms: u64) -> Self {
        Self::new(PCM_FORMAT.frames_for_ms(duration_ms) * usize::from(PCM_FORMAT.channels))
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    /// Échantillons lus par la sortie depuis la création
    pub fn consumed(&self) -> u64 {
        self.lock().consumed
    }

    /// Copie `samples` dans le tampon, en attendant de la place si besoin.
    ///
    /// Échoue dès que la sortie a signalé une erreur.
    pub async fn push(&self, mut samples: &[i16]) -> Result<(), PlaybackError> {
        while !samples.is_empty() {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(err) = &state.error {
                    return Err(err.clone());
                }
                let free = self.capacity.saturating_sub(state.samples.len());
                if free > 0 {
                    let n = free.min(samples.len());
                    state.samples.extend(&samples[..n]);
                    samples = &samples[n..];
                    continue;
                }
            }
            notified.await;
        }
        Ok(())
    }

    /// Retire au plus `out.len()` échantillons ; retourne le nombre copié.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let n = {
            let mut state = self.lock();
            let n = out.len().min(state.samples.len());
            for (slot, sample) in out.iter_mut().zip(state.samples.drain(..n)) {
                *slot = sample;
            }
            state.consumed += n as u64;
            n
        };
        if n > 0 {
            self.changed.notify_waiters();
        }
        n
    }

    /// Plus aucun échantillon ne sera poussé
    pub fn mark_end(&self) {
        self.lock().ended = true;
        self.changed.notify_waiters();
    }

    /// Fin marquée et tout a été lu
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        state.ended && state.samples.is_empty()
    }

    /// Enregistre une erreur de la sortie (la première gagne) et réveille le producteur
    pub fn report_error(&self, err: PlaybackError) {
        self.lock().error.get_or_insert(err);
        self.changed.notify_waiters();
    }

    pub fn error(&self) -> Option<PlaybackError> {
        self.lock().error.clone()
    }

    /// Attend que la sortie ait tout consommé
    pub async fn drained(&self) -> Result<(), PlaybackError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.lock();
                if let Some(err) = &state.error {
                    return Err(err.clone());
                }
                if state.samples.is_empty() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn capacity_is_whole_frames() {
        assert_eq!(PlaybackBuffer::new(5).capacity(), 6);
        assert_eq!(PlaybackBuffer::new(0).capacity(), 2);
        assert_eq!(PlaybackBuffer::with_duration_ms(500).capacity(), 44_100);
    }

    #[tokio::test]
    async fn push_waits_for_room() {
        let buffer = Arc::new(PlaybackBuffer::new(8));
        buffer.push(&[1; 8]).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push(&[2; 4]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let mut out = [0i16; 6];
        assert_eq!(buffer.pop_into(&mut out), 6);
        assert_eq!(out, [1; 6]);
        producer.await.unwrap().unwrap();
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.consumed(), 6);
    }

    #[tokio::test]
    async fn error_wakes_a_blocked_push() {
        let buffer = Arc::new(PlaybackBuffer::new(2));
        buffer.push(&[0; 2]).await.unwrap();
        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push(&[0; 2]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.report_error(PlaybackError::Stream("device unplugged".into()));
        buffer.report_error(PlaybackError::Stream("second".into()));

        let err = producer.await.unwrap().unwrap_err();
        assert_eq!(err, PlaybackError::Stream("device unplugged".into()));
        assert_eq!(buffer.drained().await, Err(err));
    }

    #[tokio::test]
    async fn drained_after_last_pop() {
        let buffer = Arc::new(PlaybackBuffer::new(16));
        buffer.push(&[3; 10]).await.unwrap();
        buffer.mark_end();
        assert!(!buffer.is_finished());

        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.drained().await })
        };
        let mut out = [0i16; 16];
        assert_eq!(buffer.pop_into(&mut out), 10);
        waiter.await.unwrap().unwrap();
        assert!(buffer.is_finished());
        assert_eq!(buffer.pop_into(&mut out), 0);
    }
}
