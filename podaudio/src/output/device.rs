use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample as _, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use poddecode::PCM_FORMAT;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::{AudioOutput, OutputHandle, PlaybackError};
use crate::PlaybackBuffer;

/// Sortie sur un périphérique du système via cpal.
///
/// Le `cpal::Stream` n'est pas `Send` : il vit sur un thread dédié qui
/// l'ouvre, le démarre puis attend l'ordre d'arrêt.
#[derive(Debug, Clone)]
pub struct CpalOutput {
    device_name: Option<String>,
    volume: f32,
}

impl CpalOutput {
    /// Périphérique par défaut de l'hôte
    pub fn new() -> Self {
        Self {
            device_name: None,
            volume: 1.0,
        }
    }

    pub fn with_device(mut self, name: Option<String>) -> Self {
        self.device_name = name;
        self
    }

    /// Gain appliqué aux échantillons, borné à `0.0..=1.0`
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Noms des périphériques de sortie de l'hôte par défaut
pub fn list_output_devices() -> Result<Vec<String>, PlaybackError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

struct CpalHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalHandle {
    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop_tx.try_send(());
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

impl OutputHandle for CpalHandle {
    fn stop(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    fn name(&self) -> String {
        match &self.device_name {
            Some(name) => format!("cpal:{name}"),
            None => "cpal:default".to_string(),
        }
    }

    async fn start(&self, buffer: Arc<PlaybackBuffer>) -> Result<Box<dyn OutputHandle>, PlaybackError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = bounded(1);
        let device_name = self.device_name.clone();
        let volume = self.volume;

        let thread = std::thread::Builder::new()
            .name("podplay-output".to_string())
            .spawn(move || run_device(device_name, volume, buffer, ready_tx, stop_rx))
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(description)) => {
                info!(device = %description, "Audio output started");
                Ok(Box::new(CpalHandle {
                    stop_tx,
                    thread: Some(thread),
                }))
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlaybackError::Device("audio output thread exited".to_string()))
            }
        }
    }
}

fn run_device(
    device_name: Option<String>,
    volume: f32,
    buffer: Arc<PlaybackBuffer>,
    ready_tx: oneshot::Sender<Result<String, PlaybackError>>,
    stop_rx: Receiver<()>,
) {
    let (stream, description) = match open_stream(device_name.as_deref(), volume, buffer) {
        Ok(opened) => opened,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(PlaybackError::Stream(err.to_string())));
        return;
    }
    if ready_tx.send(Ok(description)).is_err() {
        return;
    }

    // Arrêt explicite ou handle lâché
    let _ = stop_rx.recv();
    drop(stream);
    debug!("Audio output stopped");
}

fn open_stream(
    device_name: Option<&str>,
    volume: f32,
    buffer: Arc<PlaybackBuffer>,
) -> Result<(cpal::Stream, String), PlaybackError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| PlaybackError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| PlaybackError::NoDevice(wanted.to_string()))?,
        None => host
            .default_output_device()
            .ok_or_else(|| PlaybackError::NoDevice("default".to_string()))?,
    };
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let rate = cpal::SampleRate(PCM_FORMAT.sample_rate);
    let channels = u16::from(PCM_FORMAT.channels);
    let supported = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::Device(e.to_string()))?
        .filter(|c| c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .filter(|c| matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .max_by_key(|c| c.sample_format() == SampleFormat::I16)
        .ok_or_else(|| {
            PlaybackError::UnsupportedFormat(format!(
                "{} channels at {} Hz on {name}",
                channels, PCM_FORMAT.sample_rate
            ))
        })?
        .with_sample_rate(rate);

    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    debug!(device = %name, ?format, "Opening audio stream");

    let stream = match format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, volume, buffer)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, volume, buffer)?,
        other => return Err(PlaybackError::UnsupportedFormat(format!("sample format {other:?}"))),
    };
    Ok((stream, format!("{name} ({format:?}, {} Hz)", PCM_FORMAT.sample_rate)))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    volume: f32,
    buffer: Arc<PlaybackBuffer>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: SizedSample + FromSample<i16>,
{
    let error_buffer = buffer.clone();
    let mut scratch: Vec<i16> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0);
                let available = buffer.pop_into(&mut scratch);
                for (i, out) in data.iter_mut().enumerate() {
                    *out = if i < available {
                        let scaled = (f32::from(scratch[i]) * volume) as i16;
                        T::from_sample(scaled)
                    } else {
                        // Sous-alimentation : silence
                        T::EQUILIBRIUM
                    };
                }
            },
            move |err| {
                error!(error = %err, "Audio stream error");
                error_buffer.report_error(PlaybackError::Stream(err.to_string()));
            },
            None,
        )
        .map_err(|e| PlaybackError::Stream(e.to_string()))
}
