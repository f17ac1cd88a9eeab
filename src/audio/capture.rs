//! Microphone capture pipeline
//!
//! Pulls fixed-size blocks from the default input device at its native
//! callback cadence, publishes an RMS level for the UI meter, and hands
//! PCM16-encoded blocks to the session's outbound path.
//!
//! Outbound sends are fire-and-forget: the device callback must never block
//! on network I/O, so blocks are dropped (`try_send`) when the channel is full
//! or the session is not ready. Bounded loss beats unbounded buffering or a
//! stalled audio callback.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::pcm::encode_pcm16;
use super::{AudioError, CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE};

/// Observational RMS level of the most recent capture block, in [0.0, 1.0].
///
/// Read by the UI meter only; nothing on the control path consumes it.
#[derive(Clone, Default)]
pub struct CaptureLevel {
    bits: Arc<AtomicU32>,
}

impl CaptureLevel {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

enum StreamCommand {
    Shutdown,
}

/// Handle to an active capture stream.
///
/// The CPAL stream is not `Send`, so it lives on a dedicated thread; the
/// handle carries the shutdown channel and the level meter. Dropping the
/// handle releases the microphone.
pub struct CaptureHandle {
    shutdown_tx: std::sync::mpsc::Sender<StreamCommand>,
    thread: Option<std::thread::JoinHandle<()>>,
    level: CaptureLevel,
}

impl CaptureHandle {
    /// The live RMS meter for this capture stream.
    pub fn level(&self) -> CaptureLevel {
        self.level.clone()
    }

    /// Stop capturing and release the input device. Best-effort.
    pub fn stop(mut self) {
        let _ = self.shutdown_tx.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Open the default input device at the capture rate and start streaming
/// PCM16-encoded blocks into `block_tx`.
///
/// The callback writes the per-block RMS into `level`, which the caller may
/// keep across capture restarts.
pub fn start_capture(
    block_tx: mpsc::Sender<Vec<u8>>,
    level: CaptureLevel,
) -> Result<CaptureHandle, AudioError> {
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), AudioError>>(1);
    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<StreamCommand>();

    let level_for_thread = level.clone();
    let thread = std::thread::Builder::new()
        .name("voiceloop-capture".into())
        .spawn(move || {
            let stream = match build_input_stream(block_tx, level_for_thread) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
                    "Failed to start input stream: {}",
                    e
                ))));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while let Ok(cmd) = shutdown_rx.recv() {
                match cmd {
                    StreamCommand::Shutdown => break,
                }
            }
            log::debug!("Capture thread exiting");
        })
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => {
            log::info!("Capture started ({} Hz, {}-sample blocks)", CAPTURE_SAMPLE_RATE, CAPTURE_BLOCK_SIZE);
            Ok(CaptureHandle {
                shutdown_tx,
                thread: Some(thread),
                level,
            })
        }
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => Err(AudioError::StreamCreationFailed(
            "Capture thread died during startup".to_string(),
        )),
    }
}

fn build_input_stream(
    block_tx: mpsc::Sender<Vec<u8>>,
    level: CaptureLevel,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

    let channels = supported.channels();
    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    log::info!(
        "Capture config: {} Hz, {} channels, {:?}",
        config.sample_rate.0,
        channels,
        supported.sample_format()
    );

    match supported.sample_format() {
        SampleFormat::I16 => build_input_typed::<i16>(&device, &config, block_tx, level),
        SampleFormat::U16 => build_input_typed::<u16>(&device, &config, block_tx, level),
        SampleFormat::F32 => build_input_typed::<f32>(&device, &config, block_tx, level),
        other => Err(AudioError::StreamCreationFailed(format!(
            "Unsupported input sample format {:?}",
            other
        ))),
    }
}

fn build_input_typed<T>(
    device: &Device,
    config: &StreamConfig,
    block_tx: mpsc::Sender<Vec<u8>>,
    level: CaptureLevel,
) -> Result<Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let err_fn = |err| log::error!("Input stream error: {}", err);
    let channels = config.channels as usize;
    let mut accumulator: Vec<f32> = Vec::with_capacity(CAPTURE_BLOCK_SIZE * 2);
    let dropped = AtomicU64::new(0);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Downmix interleaved device channels to mono
                for frame in data.chunks_exact(channels) {
                    let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                    accumulator.push(sum / channels as f32);
                }

                while accumulator.len() >= CAPTURE_BLOCK_SIZE {
                    let block: Vec<f32> = accumulator.drain(..CAPTURE_BLOCK_SIZE).collect();
                    level.set(rms(&block));

                    // Fire-and-forget: never block the device callback
                    if block_tx.try_send(encode_pcm16(&block)).is_err() {
                        let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if n % 50 == 1 {
                            log::debug!("Capture: outbound not ready, {} blocks dropped", n);
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("input device not available".to_string())
            }
            other => AudioError::StreamCreationFailed(other.to_string()),
        })?;

    Ok(stream)
}

/// Root-mean-square amplitude of a block, in [0.0, 1.0].
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence() {
        assert_eq!(rms(&[0.0; 128]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_square_wave() {
        let samples = [0.5, -0.5, 0.5, -0.5];
        assert!((rms(&samples) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_capture_level_round_trip() {
        let level = CaptureLevel::default();
        assert_eq!(level.get(), 0.0);
        level.set(0.42);
        assert!((level.get() - 0.42).abs() < f32::EPSILON);
    }
}
