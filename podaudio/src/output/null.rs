use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use poddecode::PCM_FORMAT;
use tracing::debug;

use super::{AudioOutput, OutputHandle, PlaybackError};
use crate::PlaybackBuffer;

const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct NullState {
    paused: AtomicBool,
    started: AtomicUsize,
    stopped: AtomicUsize,
    samples: AtomicU64,
}

/// Compteurs d'une [`NullOutput`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub started: usize,
    pub stopped: usize,
    pub samples_consumed: u64,
}

/// Sortie muette : consomme le tampon au rythme réel (multiplié par
/// `speed`) et jette les échantillons.
///
/// Sert en mode sans périphérique et dans les tests, où `pause` simule un
/// périphérique bloqué.
#[derive(Debug, Clone)]
pub struct NullOutput {
    speed: f64,
    state: Arc<NullState>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    pub fn with_speed(speed: f64) -> Self {
        Self {
            speed: if speed.is_finite() && speed > 0.0 { speed } else { 1.0 },
            state: Arc::new(NullState::default()),
        }
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> OutputStats {
        OutputStats {
            started: self.state.started.load(Ordering::Acquire),
            stopped: self.state.stopped.load(Ordering::Acquire),
            samples_consumed: self.state.samples.load(Ordering::Acquire),
        }
    }

    fn samples_per_tick(&self) -> usize {
        let per_sec = f64::from(PCM_FORMAT.sample_rate) * f64::from(PCM_FORMAT.channels) * self.speed;
        let n = (per_sec * TICK.as_secs_f64()) as usize;
        n.max(usize::from(PCM_FORMAT.channels))
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

struct NullHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    state: Arc<NullState>,
}

impl NullHandle {
    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop_tx.try_send(());
            let _ = thread.join();
            self.state.stopped.fetch_add(1, Ordering::AcqRel);
            debug!("Null output stopped");
        }
    }
}

impl OutputHandle for NullHandle {
    fn stop(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for NullHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl AudioOutput for NullOutput {
    fn name(&self) -> String {
        "null".to_string()
    }

    async fn start(&self, buffer: Arc<PlaybackBuffer>) -> Result<Box<dyn OutputHandle>, PlaybackError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let state = self.state.clone();
        let per_tick = self.samples_per_tick();

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("podplay-null-output".to_string())
            .spawn(move || {
                let mut scratch = vec![0i16; per_tick];
                loop {
                    match stop_rx.recv_timeout(TICK) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if thread_state.paused.load(Ordering::Acquire) {
                        continue;
                    }
                    let n = buffer.pop_into(&mut scratch);
                    thread_state.samples.fetch_add(n as u64, Ordering::AcqRel);
                }
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        state.started.fetch_add(1, Ordering::AcqRel);
        debug!(per_tick, "Null output started");
        Ok(Box::new(NullHandle {
            stop_tx,
            thread: Some(thread),
            state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumes_at_the_configured_pace() {
        let output = NullOutput::with_speed(10.0);
        let buffer = Arc::new(PlaybackBuffer::with_duration_ms(200));
        buffer.push(&vec![1; buffer.capacity()]).await.unwrap();

        let handle = output.start(buffer.clone()).await.unwrap();
        assert_eq!(output.stats().started, 1);
        tokio::time::timeout(Duration::from_secs(2), buffer.drained())
            .await
            .unwrap()
            .unwrap();
        handle.stop();

        let stats = output.stats();
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.samples_consumed, buffer.capacity() as u64);
    }

    #[tokio::test]
    async fn paused_output_consumes_nothing() {
        let output = NullOutput::with_speed(10.0);
        output.pause();
        let buffer = Arc::new(PlaybackBuffer::new(64));
        buffer.push(&[0; 64]).await.unwrap();

        let handle = output.start(buffer.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(buffer.len(), 64);

        output.resume();
        tokio::time::timeout(Duration::from_secs(2), buffer.drained())
            .await
            .unwrap()
            .unwrap();
        drop(handle);
        assert_eq!(output.stats().stopped, 1);
    }
}
